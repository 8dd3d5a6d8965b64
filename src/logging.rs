//! Logging Module
//!
//! Installs the tracing subscriber used by applications and tests embedding
//! the cache.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter applied when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "tier_cache=info";

/// Initializes a global tracing subscriber with an env filter.
///
/// Defaults to `tier_cache=info`, can be overridden with the `RUST_LOG` env
/// var. Returns false when a global subscriber was already installed.
pub fn init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
