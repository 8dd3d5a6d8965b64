//! Background Tasks Module
//!
//! Contains background tasks that run periodically next to a cache store.
//!
//! # Tasks
//! - Expiry Sweeper: Removes expired entries from both tiers at a fixed interval

mod sweeper;

pub use sweeper::spawn_expiry_sweeper;
