//! Telemetry for the quota engine, audit logger, and retention worker.
//!
//! Components emit [`QuotaEvent`]s through an [`EventEmitter`]. Sinks are
//! `tower::Service<QuotaEvent>` implementations, so any tower combinator can
//! sit in front of them.
//!
//! # Event Types
//!
//! - **Admission**: `Admitted`, `Denied`
//! - **Store**: `Degraded`, `Recovered`
//! - **Audit**: `Dropped`
//! - **Retention**: `Purged`, `Failed`

pub mod events;
pub mod sinks;

pub use events::{AdmissionEvent, AuditEvent, QuotaEvent, RetentionEvent, StoreEvent};
pub use sinks::{
    emit_best_effort, BoxedSink, EventEmitter, LogSink, MemorySink, NonBlockingSink, NullSink,
    SinkError,
};
