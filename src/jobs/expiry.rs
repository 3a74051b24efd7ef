//! Background job: purge expired tokens from a store.
//!
//! Stores already hide expired records from lookups; this sweep reclaims
//! the space. Runs every `period` until the returned handle is aborted.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::store::TokenStore;

/// Spawn the background sweep. Call this once per store at startup.
pub fn spawn(store: Arc<dyn TokenStore>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = sweep(store.as_ref()).await {
                tracing::error!("token expiry sweep failed: {}", e);
            }
        }
    })
}

/// Run one sweep. Returns the number of records removed.
pub async fn sweep(store: &dyn TokenStore) -> anyhow::Result<u64> {
    let removed = store.purge_expired().await?;
    if removed > 0 {
        tracing::info!(rows = removed, "expired tokens purged");
    }
    Ok(removed)
}
