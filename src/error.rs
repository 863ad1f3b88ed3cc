//! Error types shared by stores, the engine, and the request gate.
use std::time::Duration;

/// Failure of a quota or audit store call.
///
/// None of these reach the end user: the engine turns them into a degraded
/// decision and the audit logger drops the entry.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached (connection refused, pool closed, I/O).
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The call did not finish inside its budget.
    #[error("store call timed out after {elapsed:?} (limit: {timeout:?})")]
    Timeout { elapsed: Duration, timeout: Duration },
    /// Two first requests for a new identity raced on row creation and the
    /// single retry did not settle it.
    #[error("concurrent creation of quota row for '{identity}' did not settle")]
    RaceOnCreate { identity: String },
    /// The backend returned data that does not decode.
    #[error("corrupt store data: {0}")]
    Corrupt(String),
    /// The caller passed a value the store cannot persist.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl StoreError {
    /// Check if this error is due to timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Connection-level failures and timeouts; the ones the degradation path exists for.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout { .. })
    }

    /// Access timeout details if this is a timeout error.
    pub fn timeout_details(&self) -> Option<(Duration, Duration)> {
        match self {
            Self::Timeout { elapsed, timeout } => Some((*elapsed, *timeout)),
            _ => None,
        }
    }
}

/// Rejection of a user identity or endpoint name that does not fit the schema.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} is {len} bytes, maximum is {max}")]
    TooLong { field: &'static str, len: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_error_display() {
        let err = StoreError::Timeout {
            elapsed: Duration::from_millis(2100),
            timeout: Duration::from_secs(2),
        };
        let msg = err.to_string();
        assert!(msg.contains("timed out"));
        assert!(msg.contains("2.1"));
    }

    #[test]
    fn unavailable_covers_timeouts() {
        let timeout =
            StoreError::Timeout { elapsed: Duration::from_secs(1), timeout: Duration::from_secs(1) };
        assert!(timeout.is_timeout());
        assert!(timeout.is_unavailable());
        assert!(StoreError::Unavailable("refused".into()).is_unavailable());
        assert!(!StoreError::Corrupt("bad".into()).is_unavailable());
        assert!(!StoreError::RaceOnCreate { identity: "a".into() }.is_timeout());
    }

    #[test]
    fn timeout_details_only_for_timeouts() {
        let err = StoreError::Timeout {
            elapsed: Duration::from_millis(10),
            timeout: Duration::from_millis(20),
        };
        assert_eq!(
            err.timeout_details(),
            Some((Duration::from_millis(10), Duration::from_millis(20)))
        );
        assert!(StoreError::InvalidInput("x".into()).timeout_details().is_none());
    }

    #[test]
    fn identity_error_display() {
        let err = IdentityError::TooLong { field: "user_identity", len: 300, max: 255 };
        assert_eq!(err.to_string(), "user_identity is 300 bytes, maximum is 255");
    }
}
