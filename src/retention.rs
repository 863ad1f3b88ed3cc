//! Retention worker: deletes audit records past the retention horizon.
//!
//! Sweeps run on their own interval in a background task and go through the
//! same [`StoreGuard`] as request-path calls, so a slow store delays the next
//! sweep rather than piling them up.

use crate::audit::AuditStore;
use crate::clock::{Clock, SystemClock};
use crate::config::{check_duration, ConfigError};
use crate::degradation::{StoreGuard, StoreOperation};
use crate::error::StoreError;
use crate::telemetry::{QuotaEvent, RetentionEvent};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Periodic audit purge.
#[derive(Debug, Clone)]
pub struct RetentionWorker {
    store: Arc<dyn AuditStore>,
    guard: StoreGuard,
    clock: Arc<dyn Clock>,
    horizon: Duration,
    interval: Duration,
}

impl RetentionWorker {
    /// Errors if `horizon` or `interval` is zero or unrepresentable.
    pub fn new(
        store: Arc<dyn AuditStore>,
        guard: StoreGuard,
        horizon: Duration,
        interval: Duration,
    ) -> Result<Self, ConfigError> {
        check_duration("retention", horizon)?;
        check_duration("purge_interval", interval)?;
        Ok(Self { store, guard, clock: Arc::new(SystemClock), horizon, interval })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
    }

    /// Delete records created before `now - horizon`. Running it twice in a
    /// row deletes nothing the second time.
    pub async fn purge_older_than(&self, horizon: Duration) -> Result<u64, StoreError> {
        let cutoff = self.cutoff(horizon);
        let result = self
            .guard
            .call(StoreOperation::RetentionPurge, self.store.purge_older_than(cutoff))
            .await;

        let event = match &result {
            Ok(deleted) => {
                info!(deleted, cutoff = %cutoff, "audit retention sweep");
                RetentionEvent::Purged { deleted: *deleted, cutoff }
            }
            Err(err) => {
                warn!(error = %err, "audit retention sweep failed");
                RetentionEvent::Failed { cause: err.to_string() }
            }
        };
        self.guard.events().emit(QuotaEvent::Retention(event)).await;

        result
    }

    /// One sweep with the configured horizon.
    pub async fn sweep(&self) -> Result<u64, StoreError> {
        self.purge_older_than(self.horizon).await
    }

    /// Run sweeps every `interval` until the handle is shut down. The first
    /// sweep runs immediately.
    pub fn spawn(self) -> RetentionHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Failures are already logged and emitted.
                        let _ = self.sweep().await;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        RetentionHandle { stop: stop_tx, task }
    }

    fn cutoff(&self, horizon: Duration) -> DateTime<Utc> {
        let now = self.clock.now();
        chrono::Duration::from_std(horizon)
            .ok()
            .and_then(|delta| now.checked_sub_signed(delta))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Handle to a running retention loop.
#[derive(Debug)]
pub struct RetentionHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RetentionHandle {
    /// Stop the loop and wait for an in-flight sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
