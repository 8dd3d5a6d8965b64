//! Value Codec Module
//!
//! Converts cached values to and from the byte form stored in the second level.

use std::any::type_name;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

// == Value Codec ==
/// Encodes values for the second level.
///
/// A codec that cannot encode a value returns [`CodecError::NotSerializable`];
/// such values can still live in the first level.
pub trait ValueCodec<V>: Send + Sync {
    fn encode(&self, value: &V) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<V, CodecError>;
}

// == JSON Codec ==
/// serde_json codec for any serde value.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<V> ValueCodec<V> for JsonCodec
where
    V: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &V) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::NotSerializable(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

// == Memory Only Codec ==
/// Rejects every value: entries never leave the first level.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryOnlyCodec;

impl<V> ValueCodec<V> for MemoryOnlyCodec {
    fn encode(&self, _value: &V) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::NotSerializable(type_name::<V>().to_string()))
    }

    fn decode(&self, _bytes: &[u8]) -> Result<V, CodecError> {
        Err(CodecError::Malformed(type_name::<V>().to_string()))
    }
}
