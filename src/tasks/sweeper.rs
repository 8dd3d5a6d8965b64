//! Expiry Sweeper Task
//!
//! Background task that periodically purges expired entries from a store.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CacheStore};

/// Spawns a background task that periodically removes expired entries from
/// both tiers of `store`.
///
/// Store operations block on second-level I/O, so each sweep runs on the
/// blocking thread pool.
///
/// # Arguments
/// * `store` - Shared cache store
/// * `interval` - Time between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
///
/// # Example
/// ```ignore
/// let store = Arc::new(CacheStore::<String, String>::new(CacheConfig::new("images"))?);
/// let sweeper = spawn_expiry_sweeper(store.clone(), Duration::from_secs(30));
/// // Later, during shutdown:
/// sweeper.abort();
/// ```
pub fn spawn_expiry_sweeper<K, V>(
    store: Arc<CacheStore<K, V>>,
    interval: Duration,
) -> JoinHandle<()>
where
    K: CacheKey,
    V: Send + 'static,
{
    tokio::spawn(async move {
        info!(
            "Starting expiry sweeper for store {} with interval of {:?}",
            store.name(),
            interval
        );

        loop {
            tokio::time::sleep(interval).await;

            let sweep_target = store.clone();
            let sweep = tokio::task::spawn_blocking(move || sweep_target.purge_expired());
            let removed = match sweep.await {
                Ok(removed) => removed,
                Err(e) => {
                    warn!("Expiry sweep failed: {}", e);
                    continue;
                }
            };

            if removed > 0 {
                info!("Expiry sweep: removed {} expired entries", removed);
            } else {
                debug!("Expiry sweep: no expired entries found");
            }
        }
    })
}
