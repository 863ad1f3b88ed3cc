//! Degradation policy: bounded store calls and what happens when they fail.
//!
//! Every quota and audit store call goes through [`StoreGuard::call`], which
//! applies the per-call timeout, records health in a [`DegradationMonitor`],
//! and emits `Degraded` / `Recovered` events. The guard never decides the
//! outcome of a request; callers pair it with a [`FailurePolicy`] (engine) or
//! drop the entry (audit logger).

use crate::config::{check_duration, ConfigError, FailureMode};
use crate::error::StoreError;
use crate::quota::Decision;
use crate::telemetry::{EventEmitter, QuotaEvent, StoreEvent};
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Store calls the guard distinguishes for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    CheckAndIncrement,
    Peek,
    AuditAppend,
    RetentionPurge,
    Admin,
}

impl StoreOperation {
    const ALL: [StoreOperation; 5] = [
        StoreOperation::CheckAndIncrement,
        StoreOperation::Peek,
        StoreOperation::AuditAppend,
        StoreOperation::RetentionPurge,
        StoreOperation::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOperation::CheckAndIncrement => "check_and_increment",
            StoreOperation::Peek => "peek",
            StoreOperation::AuditAppend => "audit_append",
            StoreOperation::RetentionPurge => "retention_purge",
            StoreOperation::Admin => "admin",
        }
    }

    fn index(self) -> usize {
        match self {
            StoreOperation::CheckAndIncrement => 0,
            StoreOperation::Peek => 1,
            StoreOperation::AuditAppend => 2,
            StoreOperation::RetentionPurge => 3,
            StoreOperation::Admin => 4,
        }
    }
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of store health for internal observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// The most recent call of every operation succeeded.
    Healthy,
    /// At least one operation's most recent call failed.
    Degraded {
        /// Operations whose last call failed
        operations: Vec<StoreOperation>,
        /// Rendered error of the most recent failure
        last_error: Option<String>,
    },
}

impl HealthStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, HealthStatus::Degraded { .. })
    }
}

#[derive(Debug, Default)]
struct OperationHealth {
    consecutive_failures: AtomicU64,
    total_failures: AtomicU64,
}

/// Lock-free per-operation failure counters.
///
/// Shared between the engine, the audit logger, and the retention worker so a
/// single status reflects the whole subsystem.
#[derive(Debug, Default)]
pub struct DegradationMonitor {
    operations: [OperationHealth; 5],
    last_error: Mutex<Option<String>>,
}

impl DegradationMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure; returns the new consecutive failure count.
    pub fn record_failure(&self, op: StoreOperation, err: &StoreError) -> u64 {
        let health = &self.operations[op.index()];
        health.total_failures.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) =
            Some(err.to_string());
        health.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Record a success; returns `true` if this ended a failure streak.
    pub fn record_success(&self, op: StoreOperation) -> bool {
        self.operations[op.index()].consecutive_failures.swap(0, Ordering::AcqRel) > 0
    }

    /// Failures of `op` since the last success.
    pub fn consecutive_failures(&self, op: StoreOperation) -> u64 {
        self.operations[op.index()].consecutive_failures.load(Ordering::Acquire)
    }

    /// Failures of `op` since the monitor was created.
    pub fn total_failures(&self, op: StoreOperation) -> u64 {
        self.operations[op.index()].total_failures.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> HealthStatus {
        let operations: Vec<StoreOperation> = StoreOperation::ALL
            .into_iter()
            .filter(|op| self.consecutive_failures(*op) > 0)
            .collect();
        if operations.is_empty() {
            return HealthStatus::Healthy;
        }
        let last_error = self.last_error.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone();
        HealthStatus::Degraded { operations, last_error }
    }
}

/// Bounds every store call with a timeout and reports failures.
///
/// Clones share the same monitor and event emitter.
#[derive(Debug, Clone)]
pub struct StoreGuard {
    timeout: Duration,
    monitor: Arc<DegradationMonitor>,
    events: EventEmitter,
}

impl StoreGuard {
    /// Create a guard. Errors if `timeout` is zero or unrepresentable.
    pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
        check_duration("store_timeout", timeout)?;
        Ok(Self { timeout, monitor: Arc::new(DegradationMonitor::new()), events: EventEmitter::default() })
    }

    /// Share an existing monitor.
    pub fn with_monitor(mut self, monitor: Arc<DegradationMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Emit `Degraded` / `Recovered` events through `events`.
    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    /// Inspect the configured per-call budget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn monitor(&self) -> &Arc<DegradationMonitor> {
        &self.monitor
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Run one store call under the timeout.
    ///
    /// The returned error is for the caller's fallback logic only; it has
    /// already been logged and counted.
    pub async fn call<T, Fut>(&self, op: StoreOperation, call: Fut) -> Result<T, StoreError>
    where
        Fut: Future<Output = Result<T, StoreError>> + Send,
    {
        self.call_within(op, self.timeout, call).await
    }

    /// Like [`StoreGuard::call`], but bounded by `budget` when that is
    /// shorter than the per-call timeout.
    ///
    /// A spent budget still polls `call` once, so a store that answers
    /// immediately is not counted as degraded.
    pub async fn call_within<T, Fut>(
        &self,
        op: StoreOperation,
        budget: Duration,
        call: Fut,
    ) -> Result<T, StoreError>
    where
        Fut: Future<Output = Result<T, StoreError>> + Send,
    {
        let limit = budget.min(self.timeout);
        let start = tokio::time::Instant::now();

        let result = match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout { elapsed: start.elapsed(), timeout: limit }),
        };

        match &result {
            Ok(_) => {
                if self.monitor.record_success(op) {
                    info!(operation = %op, "store recovered");
                    self.events.emit(QuotaEvent::Store(StoreEvent::Recovered { operation: op })).await;
                }
            }
            Err(err) => {
                let streak = self.monitor.record_failure(op, err);
                warn!(operation = %op, error = %err, consecutive_failures = streak, "store call degraded");
                self.events
                    .emit(QuotaEvent::Store(StoreEvent::Degraded {
                        operation: op,
                        cause: err.to_string(),
                    }))
                    .await;
            }
        }

        result
    }
}

/// Best information the engine has when the store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fallback {
    /// Last remaining count observed for the identity, or the limit.
    pub remaining: u32,
    /// Last observed window end, or `now + window`.
    pub reset_at: DateTime<Utc>,
}

/// Decides admission when the quota store is unreachable.
pub trait FailurePolicy: Send + Sync + fmt::Debug {
    fn on_store_failure(&self, fallback: Fallback, err: &StoreError) -> Decision;
}

/// Availability over enforcement: admit and mark the decision degraded.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailOpen;

impl FailurePolicy for FailOpen {
    fn on_store_failure(&self, fallback: Fallback, _err: &StoreError) -> Decision {
        Decision { allowed: true, remaining: fallback.remaining, reset_at: fallback.reset_at, degraded: true }
    }
}

/// Enforcement over availability: deny while the store is unreachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailClosed;

impl FailurePolicy for FailClosed {
    fn on_store_failure(&self, fallback: Fallback, _err: &StoreError) -> Decision {
        Decision { allowed: false, remaining: 0, reset_at: fallback.reset_at, degraded: true }
    }
}

impl FailureMode {
    /// The policy object for this mode.
    pub fn policy(self) -> Arc<dyn FailurePolicy> {
        match self {
            FailureMode::Open => Arc::new(FailOpen),
            FailureMode::Closed => Arc::new(FailClosed),
        }
    }
}
