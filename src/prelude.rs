//! Convenient re-exports for wiring up a quota gate.
pub use crate::{
    audit::{AuditEntry, AuditLogger, AuditStore, EndpointName, InMemoryAuditStore},
    clock::{Clock, ManualClock, SystemClock},
    config::{FailureMode, QuotaConfig},
    degradation::{FailClosed, FailOpen, FailurePolicy, HealthStatus, StoreGuard},
    engine::RateLimiterEngine,
    gate::{Admitted, GateError, QuotaGate, RequestInfo},
    quota::{Decision, UserIdentity, WindowPolicy},
    retention::RetentionWorker,
    store::{InMemoryQuotaStore, QuotaStore},
    telemetry::{EventEmitter, LogSink, MemorySink, NonBlockingSink, QuotaEvent},
    StoreError,
};
