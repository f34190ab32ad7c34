//! Background retention sweep.
//!
//! Marks idle conversations inactive after the retention window and keeps
//! the notice dedup set bounded. Runs until the shutdown signal flips.

use crate::config::CleanupConfig;
use crate::conversation::ConversationStore;
use crate::health::DedupGuard;

use std::sync::Arc;
use tokio::task::JoinHandle;

/// Spawn the periodic retention sweep as a tokio task.
pub fn spawn_retention_sweep(
    store: ConversationStore,
    dedup: Arc<DedupGuard>,
    config: CleanupConfig,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut shutdown = shutdown_rx;
        tracing::info!(
            retention_days = config.retention_days,
            interval_seconds = config.interval.as_secs(),
            "retention sweep started"
        );

        loop {
            tokio::select! {
                () = tokio::time::sleep(config.interval) => {
                    match store.deactivate_older_than(config.retention_days).await {
                        Ok(affected) if affected > 0 => {
                            tracing::info!(affected, "retention sweep deactivated conversations");
                        }
                        Ok(_) => {
                            tracing::debug!("retention sweep found nothing to deactivate");
                        }
                        Err(error) => {
                            tracing::warn!(%error, "retention sweep failed");
                        }
                    }
                    dedup.sweep();
                }
                // The watch guard is confined to the inner block so the
                // spawned future stays Send.
                () = async { let _ = shutdown.wait_for(|v| *v).await; } => {
                    tracing::info!("retention sweep shutting down");
                    break;
                }
            }
        }
    })
}
