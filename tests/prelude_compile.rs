//! Compile-time prelude coverage test.
use quotaward::prelude::*;
use std::sync::Arc;

#[tokio::test]
async fn prelude_reexports_core_types() {
    let config = QuotaConfig::default();
    let guard = StoreGuard::new(config.store_timeout()).expect("valid timeout");
    let engine = RateLimiterEngine::new(
        Arc::new(InMemoryQuotaStore::new()),
        config.window_policy().expect("valid policy"),
        guard.clone(),
    )
    .with_failure_policy(Arc::new(FailOpen))
    .with_clock(Arc::new(SystemClock));
    let audit = AuditLogger::new(Arc::new(InMemoryAuditStore::new()), guard);
    let gate = QuotaGate::new(engine, audit);

    let admitted = gate
        .execute(RequestInfo::new("a@example.com", "chat", "{}"), || async { Ok::<_, String>(()) })
        .await
        .expect("admitted");
    let decision: Decision = admitted.decision;
    assert_eq!(decision.remaining, config.request_limit - 1);
    assert_eq!(gate.engine().health(), HealthStatus::Healthy);
}
