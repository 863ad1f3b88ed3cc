#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # quotaward
//!
//! Per-user request quotas with an audit trail, built to stay out of the way
//! of the request path when its storage misbehaves.
//!
//! ## Features
//!
//! - **Fixed-window quotas** enforced by one atomic check-and-increment per request
//! - **Audit logging** that is best-effort and never fails a request
//! - **Retention** sweeps on an independent schedule
//! - **Degradation policy**: bounded store calls, fail-open by default
//! - **Request gate** mapping exhaustion to HTTP 429
//!
//! ## Quick Start
//!
//! ```rust
//! use quotaward::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let guard = StoreGuard::new(Duration::from_secs(2)).unwrap();
//!     let engine = RateLimiterEngine::new(
//!         Arc::new(InMemoryQuotaStore::new()),
//!         WindowPolicy::new(20, Duration::from_secs(24 * 3600)).unwrap(),
//!         guard.clone(),
//!     );
//!     let audit = AuditLogger::new(Arc::new(InMemoryAuditStore::new()), guard);
//!     let gate = QuotaGate::new(engine, audit);
//!
//!     let request = RequestInfo::new("a@example.com", "extract", "{}");
//!     let admitted = gate
//!         .execute(request, || async { Ok::<_, String>(serde_json::json!({ "ok": true })) })
//!         .await
//!         .unwrap();
//!     assert_eq!(admitted.remaining_requests(), 19);
//! }
//! ```

pub mod adaptive;
pub mod audit;
pub mod clock;
pub mod config;
pub mod degradation;
pub mod engine;
pub mod error;
pub mod gate;
pub mod prelude;
pub mod quota;
pub mod retention;
pub mod store;
pub mod telemetry;

// Re-exports
pub use adaptive::DynamicConfig;
pub use audit::{
    AuditEntry, AuditLogger, AuditRecord, AuditStore, EndpointName, InMemoryAuditStore,
    MAX_ENDPOINT_LEN, MAX_SUMMARY_BYTES,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, FailureMode, QuotaConfig};
pub use degradation::{
    DegradationMonitor, FailClosed, FailOpen, FailurePolicy, Fallback, HealthStatus, StoreGuard,
    StoreOperation,
};
pub use engine::RateLimiterEngine;
pub use error::{IdentityError, StoreError};
pub use gate::{Admitted, GateError, QuotaExceeded, QuotaGate, RequestInfo, STATUS_TOO_MANY_REQUESTS};
pub use quota::{
    latest_reset, Admission, Decision, UserIdentity, UserQuota, WindowPolicy, MAX_IDENTITY_LEN,
    MAX_WINDOW,
};
pub use retention::{RetentionHandle, RetentionWorker};
pub use store::{InMemoryQuotaStore, QuotaStore};
