//! Background sync scheduler.
//!
//! Runs one cycle right away, then one per tick. A cycle walks every active
//! item in order and keeps retrying a failing item with exponential backoff
//! until it syncs or shutdown is requested. Cycles never overlap.

use std::time::Duration;

use backoff::{ExponentialBackoff, backoff::Backoff};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{Engine, EngineError, SyncError};

#[derive(Clone, Debug)]
pub struct SyncWorkerConfig {
    pub interval: Duration,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl SyncWorkerConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    /// `min_backoff * 2^attempt`, capped at `max_backoff`, without jitter.
    pub fn retry_policy(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.min_backoff,
            initial_interval: self.min_backoff,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.max_backoff,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}

impl Default for SyncWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

#[derive(Debug)]
pub struct SyncWorker {
    engine: Engine,
    config: SyncWorkerConfig,
}

impl SyncWorker {
    pub fn new(engine: Engine, config: SyncWorkerConfig) -> Self {
        Self { engine, config }
    }

    /// Runs until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(interval = ?self.config.interval, "sync worker started");
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_cycle(&shutdown).await;
                }
            }
        }
        info!("sync worker stopped");
    }

    /// Syncs every active item once, retrying failures.
    pub async fn run_cycle(&self, shutdown: &CancellationToken) -> CycleReport {
        let items = match self.engine.active_items().await {
            Ok(items) => items,
            Err(err) => {
                error!(error = %err, "cannot load active items");
                return CycleReport::default();
            }
        };
        if items.is_empty() {
            debug!("no active items to sync");
            return CycleReport::default();
        }

        let mut report = CycleReport {
            total: items.len(),
            ..CycleReport::default()
        };
        for item in &items {
            if shutdown.is_cancelled() {
                break;
            }
            match self.sync_item_with_retry(item.id, shutdown).await {
                Ok(synced) => {
                    report.succeeded += 1;
                    debug!(item_id = %item.id, institution = %item.institution_name, synced, "item synced");
                }
                Err(err) => {
                    report.failed += 1;
                    error!(
                        item_id = %item.id,
                        institution = %item.institution_name,
                        error = %err,
                        "item sync abandoned"
                    );
                }
            }
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            total = report.total,
            "sync cycle completed"
        );
        report
    }

    /// Retries the same item until it syncs or shutdown is requested, whatever
    /// the failure. A permanently broken item stalls the rest of the cycle.
    pub async fn sync_item_with_retry(
        &self,
        item_id: Uuid,
        shutdown: &CancellationToken,
    ) -> Result<usize, SyncError> {
        let mut policy = self.config.retry_policy();
        let mut attempt: u32 = 0;
        loop {
            if shutdown.is_cancelled() {
                return Err(EngineError::Cancelled.into());
            }
            let err = match self.engine.sync_item_transactions(item_id, shutdown).await {
                Ok(synced) => {
                    if attempt > 0 {
                        info!(item_id = %item_id, attempts = attempt + 1, "item synced after retries");
                    }
                    return Ok(synced);
                }
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => err,
            };

            let delay = policy.next_backoff().unwrap_or(self.config.max_backoff);
            warn!(
                item_id = %item_id,
                attempt = attempt + 1,
                retry_in = ?delay,
                error = %err,
                "item sync failed, will retry"
            );
            tokio::select! {
                () = shutdown.cancelled() => return Err(EngineError::Cancelled.into()),
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delays(config: &SyncWorkerConfig, n: usize) -> Vec<Duration> {
        let mut policy = config.retry_policy();
        (0..n).map(|_| policy.next_backoff().unwrap()).collect()
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let got = delays(&SyncWorkerConfig::default(), 8);
        let secs: Vec<u64> = got.iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn backoff_honours_custom_bounds() {
        let config = SyncWorkerConfig {
            interval: Duration::from_secs(1),
            min_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(35),
        };
        let millis: Vec<u128> = delays(&config, 4).iter().map(Duration::as_millis).collect();
        assert_eq!(millis, vec![10, 20, 35, 35]);
    }
}
