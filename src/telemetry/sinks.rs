use super::events::{AdmissionEvent, AuditEvent, QuotaEvent, RetentionEvent, StoreEvent};
use crate::degradation::StoreOperation;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::{Service, ServiceExt};

/// A sink failure, rendered once so every sink erases to the same type.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("telemetry sink failed: {0}")]
pub struct SinkError(pub String);

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
///
/// Returns whether the sink accepted the event.
pub async fn emit_best_effort<S>(sink: S, event: QuotaEvent) -> bool
where
    S: Service<QuotaEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    match sink.ready_oneshot().await {
        Ok(mut ready_sink) => ready_sink.call(event).await.is_ok(),
        Err(_) => false,
    }
}

/// Type-erased sink held by [`EventEmitter`].
pub type BoxedSink = tower::util::BoxCloneService<QuotaEvent, (), SinkError>;

/// Shared, type-erased handle the engine, logger, and worker emit through.
///
/// Emission is best-effort: a failing sink bumps [`EventEmitter::failed`] and
/// the caller carries on. Clones share the same sink and counter.
#[derive(Clone)]
pub struct EventEmitter {
    sink: Arc<Mutex<BoxedSink>>,
    failed: Arc<AtomicU64>,
}

impl EventEmitter {
    pub fn new<S>(sink: S) -> Self
    where
        S: Service<QuotaEvent, Response = ()> + Clone + Send + 'static,
        S::Error: std::error::Error + Send + 'static,
        S::Future: Send + 'static,
    {
        let erased = BoxedSink::new(sink.map_err(|err: S::Error| SinkError(err.to_string())));
        Self { sink: Arc::new(Mutex::new(erased)), failed: Arc::new(AtomicU64::new(0)) }
    }

    /// Emit one event, waiting only for the sink's own `call`.
    pub async fn emit(&self, event: QuotaEvent) {
        let sink = self.sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone();
        if !emit_best_effort(sink, event).await {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Events the sink refused since construction.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(NullSink)
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter").field("failed", &self.failed()).finish_non_exhaustive()
    }
}

type Ready = Pin<Box<dyn std::future::Future<Output = Result<(), Infallible>> + Send>>;

/// Discards every event.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<QuotaEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: QuotaEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

/// Writes events as `tracing` records under the `quotaward::events` target.
///
/// Admissions log at `debug`, recoveries and purges at `info`, anything that
/// lost data or skipped the store at `warn`.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<QuotaEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: QuotaEvent) -> Self::Future {
        const TARGET: &str = "quotaward::events";
        match &event {
            QuotaEvent::Admission(AdmissionEvent::Admitted { identity, remaining }) => {
                tracing::debug!(target: TARGET, user = %identity, remaining, "admitted")
            }
            QuotaEvent::Admission(AdmissionEvent::Denied { identity, reset_at }) => {
                tracing::debug!(target: TARGET, user = %identity, reset_at = %reset_at, "denied")
            }
            QuotaEvent::Store(StoreEvent::Degraded { operation, cause }) => {
                tracing::warn!(target: TARGET, operation = %operation, cause = %cause, "store degraded")
            }
            QuotaEvent::Store(StoreEvent::Recovered { operation }) => {
                tracing::info!(target: TARGET, operation = %operation, "store recovered")
            }
            QuotaEvent::Audit(AuditEvent::Dropped { identity, endpoint, cause }) => {
                tracing::warn!(target: TARGET, user = %identity, endpoint = %endpoint, cause = %cause, "audit dropped")
            }
            QuotaEvent::Retention(RetentionEvent::Purged { deleted, cutoff }) => {
                tracing::info!(target: TARGET, deleted, cutoff = %cutoff, "audit purged")
            }
            QuotaEvent::Retention(RetentionEvent::Failed { cause }) => {
                tracing::warn!(target: TARGET, cause = %cause, "retention sweep failed")
            }
        }
        Box::pin(async { Ok(()) })
    }
}

/// Keeps the most recent events in memory, evicting the oldest at capacity.
///
/// Clones share the buffer. The query helpers answer the questions tests and
/// health endpoints ask about quota traffic without matching on events.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<QuotaEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity,
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<QuotaEvent> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Events pushed out by the capacity bound.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Admissions recorded for `identity`.
    pub fn admitted(&self, identity: &str) -> usize {
        self.count(|event| {
            matches!(event, QuotaEvent::Admission(AdmissionEvent::Admitted { identity: who, .. }) if who == identity)
        })
    }

    /// Denials recorded for `identity`.
    pub fn denied(&self, identity: &str) -> usize {
        self.count(|event| {
            matches!(event, QuotaEvent::Admission(AdmissionEvent::Denied { identity: who, .. }) if who == identity)
        })
    }

    /// Degraded calls recorded for `operation`.
    pub fn degraded(&self, operation: StoreOperation) -> usize {
        self.count(|event| {
            matches!(event, QuotaEvent::Store(StoreEvent::Degraded { operation: op, .. }) if *op == operation)
        })
    }

    /// Recoveries recorded for `operation`.
    pub fn recovered(&self, operation: StoreOperation) -> usize {
        self.count(|event| {
            matches!(event, QuotaEvent::Store(StoreEvent::Recovered { operation: op }) if *op == operation)
        })
    }

    /// Audit entries reported as dropped.
    pub fn audit_drops(&self) -> usize {
        self.count(|event| matches!(event, QuotaEvent::Audit(AuditEvent::Dropped { .. })))
    }

    /// Rows deleted across every recorded retention sweep.
    pub fn purged(&self) -> u64 {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                QuotaEvent::Retention(RetentionEvent::Purged { deleted, .. }) => Some(*deleted),
                _ => None,
            })
            .sum()
    }

    fn count(&self, matches: impl Fn(&QuotaEvent) -> bool) -> usize {
        self.lock().iter().filter(|event| matches(event)).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<QuotaEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<QuotaEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: QuotaEvent) -> Self::Future {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(event);
        Box::pin(async { Ok(()) })
    }
}

/// Offloads telemetry emission to a bounded channel and worker task.
///
/// A full channel drops the event and bumps [`NonBlockingSink::dropped`]; the
/// caller never waits on the inner sink.
#[derive(Clone)]
pub struct NonBlockingSink {
    tx: tokio::sync::mpsc::Sender<QuotaEvent>,
    dropped: Arc<AtomicU64>,
}

impl NonBlockingSink {
    /// Spawn the worker on the current tokio runtime.
    pub fn with_capacity<S>(sink: S, capacity: usize) -> Self
    where
        S: tower::Service<QuotaEvent, Response = ()> + Send + Clone + 'static,
        S::Error: std::error::Error + Send + 'static,
        S::Future: Send + 'static,
    {
        let (tx, mut rx) = tokio::sync::mpsc::channel(capacity.max(1));

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                emit_best_effort(sink.clone(), event).await;
            }
        });

        Self { tx, dropped: Arc::new(AtomicU64::new(0)) }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for NonBlockingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonBlockingSink").field("dropped", &self.dropped()).finish()
    }
}

impl tower::Service<QuotaEvent> for NonBlockingSink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: QuotaEvent) -> Self::Future {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        Box::pin(async { Ok(()) })
    }
}
