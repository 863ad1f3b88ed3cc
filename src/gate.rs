//! Request gate: admission, handler, audit, response.
//!
//! [`QuotaGate::execute`] is the full per-request flow. Admission runs first;
//! a denial skips the handler and maps to a 429 body. Every admitted or denied
//! request produces exactly one audit entry, written after the outcome is
//! known and before the response is returned.
//!
//! Store calls share one budget per request, the engine's store timeout. The
//! audit write gets whatever admission left of it, so a hung database costs a
//! request one timeout, not two.

use crate::audit::{AuditEntry, AuditLogger, EndpointName};
use crate::engine::RateLimiterEngine;
use crate::error::IdentityError;
use crate::quota::{Decision, UserIdentity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tokio::time::Instant;

/// HTTP status for an exhausted quota.
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;
/// HTTP status for a request whose identity or endpoint does not validate.
pub const STATUS_UNPROCESSABLE: u16 = 422;
/// HTTP status for a handler failure.
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// What the gate needs to know about an incoming request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub user_identity: String,
    pub endpoint_name: String,
    /// Serialized request input, stored in the audit trail.
    pub input_summary: String,
}

impl RequestInfo {
    pub fn new(
        user_identity: impl Into<String>,
        endpoint_name: impl Into<String>,
        input_summary: impl Into<String>,
    ) -> Self {
        Self {
            user_identity: user_identity.into(),
            endpoint_name: endpoint_name.into(),
            input_summary: input_summary.into(),
        }
    }
}

/// Response body for a denied request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaExceeded {
    pub error: String,
    pub message: String,
    pub remaining_requests: u32,
}

impl QuotaExceeded {
    fn new(limit: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            error: "rate_limit_exceeded".into(),
            message: format!(
                "Request limit of {} reached. Try again after {}.",
                limit,
                reset_at.to_rfc3339()
            ),
            remaining_requests: 0,
        }
    }
}

/// Gate failures, each with the status code the HTTP layer should use.
#[derive(thiserror::Error, Debug)]
pub enum GateError<E> {
    /// The user's window is exhausted.
    #[error("{}", .0.message)]
    QuotaExceeded(QuotaExceeded),
    /// Identity or endpoint name out of bounds; nothing was counted or audited.
    #[error(transparent)]
    InvalidRequest(#[from] IdentityError),
    /// The business handler failed; the request was counted and audited.
    #[error("handler failed: {0}")]
    Handler(E),
}

impl<E> GateError<E> {
    pub fn status(&self) -> u16 {
        match self {
            GateError::QuotaExceeded(_) => STATUS_TOO_MANY_REQUESTS,
            GateError::InvalidRequest(_) => STATUS_UNPROCESSABLE,
            GateError::Handler(_) => STATUS_INTERNAL_ERROR,
        }
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, GateError::QuotaExceeded(_))
    }
}

/// An admitted request's business response plus its quota decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Admitted<T> {
    pub body: T,
    pub decision: Decision,
}

impl<T: Serialize> Admitted<T> {
    pub fn remaining_requests(&self) -> u32 {
        self.decision.remaining
    }

    /// The business response with `remaining_requests` added. Non-object
    /// bodies are wrapped as `{"result": ...}`.
    pub fn into_json(self) -> Result<serde_json::Value, serde_json::Error> {
        let remaining = serde_json::Value::from(self.decision.remaining);
        let mut value = serde_json::to_value(self.body)?;
        match value.as_object_mut() {
            Some(object) => {
                object.insert("remaining_requests".into(), remaining);
                Ok(value)
            }
            None => Ok(serde_json::json!({ "result": value, "remaining_requests": remaining })),
        }
    }
}

/// Per-request orchestration over the engine and the audit logger.
#[derive(Debug, Clone)]
pub struct QuotaGate {
    engine: RateLimiterEngine,
    audit: AuditLogger,
}

impl QuotaGate {
    pub fn new(engine: RateLimiterEngine, audit: AuditLogger) -> Self {
        Self { engine, audit }
    }

    pub fn engine(&self) -> &RateLimiterEngine {
        &self.engine
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Admit, run `handler`, audit, and return the response.
    pub async fn execute<T, E, F, Fut>(
        &self,
        request: RequestInfo,
        handler: F,
    ) -> Result<Admitted<T>, GateError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize,
        E: fmt::Display,
    {
        let received = Instant::now();
        let timestamp = self.engine.clock().now();

        let identity = UserIdentity::new(request.user_identity)?;
        let endpoint = EndpointName::new(request.endpoint_name)?;
        let entry = AuditEntry::new(identity.clone(), endpoint, request.input_summary, timestamp);

        let decision = self.engine.check_and_increment(&identity).await;
        let audit_budget = self.engine.guard().timeout().saturating_sub(received.elapsed());
        if !decision.allowed {
            let body = QuotaExceeded::new(self.engine.window_policy().limit(), decision.reset_at);
            let entry = entry.failed(body.message.clone()).with_processing_time_ms(elapsed_ms(received));
            self.audit.record_within(entry, audit_budget).await;
            return Err(GateError::QuotaExceeded(body));
        }

        match handler().await {
            Ok(body) => {
                let summary = serde_json::to_string(&body)
                    .unwrap_or_else(|err| format!("<unserializable result: {}>", err));
                let entry = entry.succeeded(summary).with_processing_time_ms(elapsed_ms(received));
                self.audit.record_within(entry, audit_budget).await;
                Ok(Admitted { body, decision })
            }
            Err(err) => {
                let entry = entry.failed(err.to_string()).with_processing_time_ms(elapsed_ms(received));
                self.audit.record_within(entry, audit_budget).await;
                Err(GateError::Handler(err))
            }
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
