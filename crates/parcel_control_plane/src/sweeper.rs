use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parcel_backends::CodeRegistry;
use parcel_storage::TransferRecordStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Copies registry expiry onto the persisted `expired` flag.
///
/// The registry stays authoritative for lookups; the flag only mirrors it
/// for record listings.
#[derive(Clone)]
pub struct ExpirySweeper {
    registry: Arc<dyn CodeRegistry>,
    store: Arc<dyn TransferRecordStore>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(
        registry: Arc<dyn CodeRegistry>,
        store: Arc<dyn TransferRecordStore>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            interval,
        }
    }

    /// Returns how many records were newly flagged.
    pub async fn sweep_once(&self) -> Result<u64> {
        let lapsed = self
            .registry
            .purge_expired()
            .await
            .context("purge lapsed pickup codes")?;
        if lapsed.is_empty() {
            return Ok(0);
        }

        let transfer_ids: Vec<String> = lapsed.iter().map(|entry| entry.transfer_id.clone()).collect();
        let flagged = match self.store.mark_expired(&transfer_ids).await {
            Ok(flagged) => flagged,
            Err(err) => {
                // Keep the lapses so the next sweep retries them.
                self.registry
                    .requeue_lapsed(lapsed)
                    .await
                    .context("requeue lapsed pickup codes")?;
                return Err(err.context("flag expired transfers"));
            }
        };
        info!(lapsed = transfer_ids.len(), flagged, "expired pickup codes swept");
        Ok(flagged)
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.sweep_once().await {
                            warn!(error = ?err, "expiry sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("expiry sweeper stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
