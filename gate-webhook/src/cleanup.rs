//! Background sweep that deletes rows past the retention bound (spec §3's
//! row lifecycle: "deleted by a periodic cleanup").

use gate_core::store::RestStore;
use gate_core::store::Store;
use std::sync::Arc;
use std::time::Duration;

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const RETENTION: Duration = Duration::from_secs(24 * 3600);

pub fn spawn(store: Arc<RestStore>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            match store.cleanup_expired(RETENTION).await {
                Ok(deleted) => tracing::info!(deleted, "cleanup sweep completed"),
                Err(err) => tracing::warn!(error = %err, "cleanup sweep failed"),
            }
        }
    });
}
