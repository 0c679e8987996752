//! Purge Task
//!
//! Background task that periodically removes entries failing verification.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::storage::MemoryStorage;

/// Spawns a background task that periodically purges invalid entries.
///
/// Reads already treat invalid entries as misses; the purge only reclaims
/// their memory.
///
/// # Arguments
/// * `storage` - Shared reference to the backend to purge
/// * `purge_interval_secs` - Interval in seconds between purge runs
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort it on shutdown.
///
/// # Example
/// ```ignore
/// let storage = Arc::new(MemoryStorage::<String>::new());
/// let purge_handle = spawn_purge_task(Arc::clone(&storage), 1);
/// // Later, during shutdown:
/// purge_handle.abort();
/// ```
pub fn spawn_purge_task<V>(storage: Arc<MemoryStorage<V>>, purge_interval_secs: u64) -> JoinHandle<()>
where
    V: Serialize + DeserializeOwned + 'static,
{
    let interval = Duration::from_secs(purge_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting purge task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = storage.purge_invalid();

            if removed > 0 {
                info!("Purge: removed {} invalid entries", removed);
            } else {
                debug!("Purge: no invalid entries found");
            }
        }
    })
}
