mod common;

use common::test_helpers::identity;
use quotaward::prelude::*;
use quotaward::{GateError, STATUS_TOO_MANY_REQUESTS};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct Analysis {
    proposal_id: u32,
    summary: String,
}

struct Harness {
    gate: QuotaGate,
    audit: Arc<InMemoryAuditStore>,
    clock: ManualClock,
    config: QuotaConfig,
}

fn harness(vars: &[(&str, &str)]) -> Harness {
    let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    let config = QuotaConfig::from_lookup(|var: &str| vars.get(var).cloned()).unwrap();
    let clock = ManualClock::default();
    let engine = RateLimiterEngine::from_config(Arc::new(InMemoryQuotaStore::new()), &config)
        .unwrap()
        .with_clock(Arc::new(clock.clone()));
    let audit = Arc::new(InMemoryAuditStore::new());
    let logger = AuditLogger::new(audit.clone(), engine.guard().clone());
    Harness { gate: QuotaGate::new(engine, logger), audit, clock, config }
}

async fn analyze(gate: &QuotaGate, user: &str) -> Result<Admitted<Analysis>, GateError<String>> {
    gate.execute(RequestInfo::new(user, "analyze", r#"{"proposal_id":7}"#), || async {
        Ok(Analysis { proposal_id: 7, summary: "funded".into() })
    })
    .await
}

#[tokio::test]
async fn full_request_cycle_with_env_config() {
    let h = harness(&[("QUOTAWARD_REQUEST_LIMIT", "2"), ("QUOTAWARD_WINDOW_SECS", "60")]);

    let first = analyze(&h.gate, "a@example.com").await.unwrap();
    assert_eq!(
        first.into_json().unwrap(),
        json!({ "proposal_id": 7, "summary": "funded", "remaining_requests": 1 })
    );
    analyze(&h.gate, "a@example.com").await.unwrap();

    let err = analyze(&h.gate, "a@example.com").await.unwrap_err();
    assert_eq!(err.status(), STATUS_TOO_MANY_REQUESTS);
    match err {
        GateError::QuotaExceeded(body) => {
            assert_eq!(body.remaining_requests, 0);
            assert!(body.message.contains("limit of 2"));
        }
        other => panic!("unexpected error: {}", other),
    }

    // Other users are unaffected.
    assert!(analyze(&h.gate, "b@example.com").await.is_ok());

    h.clock.advance(Duration::from_secs(60));
    assert_eq!(analyze(&h.gate, "a@example.com").await.unwrap().remaining_requests(), 1);

    let history = h.audit.list_for_user(&identity("a@example.com"), 10).await.unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history.iter().filter(|r| r.entry.success).count(), 3);
    assert!(history.iter().all(|r| r.entry.endpoint_name.as_str() == "analyze"));
    assert!(history.iter().all(|r| r.entry.input_summary == r#"{"proposal_id":7}"#));
}

#[tokio::test]
async fn retention_clears_old_audit_records() {
    let h = harness(&[]);
    analyze(&h.gate, "a@example.com").await.unwrap();

    h.clock.advance(Duration::from_secs(31 * 24 * 3600));
    analyze(&h.gate, "a@example.com").await.unwrap();
    assert_eq!(h.audit.count().await.unwrap(), 2);

    let worker = RetentionWorker::new(
        h.audit.clone(),
        h.gate.engine().guard().clone(),
        h.config.retention(),
        h.config.purge_interval(),
    )
    .unwrap()
    .with_clock(Arc::new(h.clock.clone()));

    assert_eq!(worker.sweep().await.unwrap(), 1);
    assert_eq!(worker.sweep().await.unwrap(), 0);
    assert_eq!(h.audit.count().await.unwrap(), 1);
}

#[tokio::test]
async fn admin_reset_reopens_quota() {
    let h = harness(&[("QUOTAWARD_REQUEST_LIMIT", "1")]);
    analyze(&h.gate, "a@example.com").await.unwrap();
    assert!(analyze(&h.gate, "a@example.com").await.unwrap_err().is_quota_exceeded());

    assert!(h.gate.engine().reset(&identity("a@example.com")).await.unwrap());
    assert!(analyze(&h.gate, "a@example.com").await.is_ok());
}
