use crate::degradation::StoreOperation;
use chrono::{DateTime, Utc};
use std::fmt;

/// Events emitted by the engine, the audit logger, and the retention worker.
///
/// Infrastructure failures never reach the request pipeline; these events (and
/// the matching `tracing` records) are how they stay observable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaEvent {
    /// Admission decisions
    Admission(AdmissionEvent),
    /// Store health transitions
    Store(StoreEvent),
    /// Audit trail events
    Audit(AuditEvent),
    /// Retention sweeps
    Retention(RetentionEvent),
}

/// Events emitted for each authoritative admission decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionEvent {
    /// The request was admitted.
    Admitted {
        identity: String,
        /// Requests left in the window
        remaining: u32,
    },
    /// The request was denied because the window is exhausted.
    Denied {
        identity: String,
        /// When the window reopens
        reset_at: DateTime<Utc>,
    },
}

/// Events emitted by the degradation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A store call failed or timed out and the fallback path was taken.
    Degraded {
        operation: StoreOperation,
        /// Rendered store error
        cause: String,
    },
    /// The first successful call after one or more degraded calls.
    Recovered { operation: StoreOperation },
}

/// Events emitted by the audit logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    /// An entry could not be persisted and was dropped.
    Dropped { identity: String, endpoint: String, cause: String },
}

/// Events emitted by the retention worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetentionEvent {
    /// A sweep finished.
    Purged {
        /// Rows deleted by this sweep
        deleted: u64,
        /// Rows created before this instant were eligible
        cutoff: DateTime<Utc>,
    },
    /// A sweep could not reach the store.
    Failed { cause: String },
}

impl fmt::Display for QuotaEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaEvent::Admission(event) => write!(f, "Admission::{}", event),
            QuotaEvent::Store(event) => write!(f, "Store::{}", event),
            QuotaEvent::Audit(event) => write!(f, "Audit::{}", event),
            QuotaEvent::Retention(event) => write!(f, "Retention::{}", event),
        }
    }
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::Admitted { identity, remaining } => {
                write!(f, "Admitted({}, remaining={})", identity, remaining)
            }
            AdmissionEvent::Denied { identity, reset_at } => {
                write!(f, "Denied({}, reset_at={})", identity, reset_at.to_rfc3339())
            }
        }
    }
}

impl fmt::Display for StoreEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreEvent::Degraded { operation, cause } => {
                write!(f, "Degraded({}, cause={})", operation, cause)
            }
            StoreEvent::Recovered { operation } => write!(f, "Recovered({})", operation),
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEvent::Dropped { identity, endpoint, cause } => {
                write!(f, "Dropped({} {}, cause={})", identity, endpoint, cause)
            }
        }
    }
}

impl fmt::Display for RetentionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionEvent::Purged { deleted, cutoff } => {
                write!(f, "Purged(deleted={}, cutoff={})", deleted, cutoff.to_rfc3339())
            }
            RetentionEvent::Failed { cause } => write!(f, "Failed(cause={})", cause),
        }
    }
}
