mod common;

use common::test_helpers::{identity, HangingStore, UnreachableStore};
use quotaward::telemetry::{EventEmitter, MemorySink};
use quotaward::{
    AuditEntry, AuditLogger, EndpointName, FailureMode, HealthStatus, InMemoryQuotaStore,
    QuotaConfig, QuotaGate, RateLimiterEngine, RequestInfo, RetentionWorker, StoreGuard,
    StoreOperation, WindowPolicy,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const TIMEOUT: Duration = Duration::from_millis(200);

fn policy() -> WindowPolicy {
    WindowPolicy::new(20, Duration::from_secs(24 * 3600)).unwrap()
}

#[tokio::test]
async fn unreachable_store_fails_open() {
    let engine = RateLimiterEngine::new(Arc::new(UnreachableStore), policy(), StoreGuard::new(TIMEOUT).unwrap());

    let decision = engine.check_and_increment(&identity("a@example.com")).await;
    assert!(decision.allowed);
    assert!(decision.degraded);
    assert_eq!(decision.remaining, 20);

    match engine.health() {
        HealthStatus::Degraded { operations, last_error } => {
            assert_eq!(operations, vec![StoreOperation::CheckAndIncrement]);
            assert!(last_error.unwrap().contains("connection refused"));
        }
        HealthStatus::Healthy => panic!("expected degraded status"),
    }
}

#[tokio::test(start_paused = true)]
async fn hanging_store_is_bounded_by_timeout() {
    let engine = RateLimiterEngine::new(Arc::new(HangingStore), policy(), StoreGuard::new(TIMEOUT).unwrap());

    let start = Instant::now();
    let decision = engine.check_and_increment(&identity("a@example.com")).await;
    let elapsed = start.elapsed();

    assert!(decision.allowed);
    assert!(decision.degraded);
    assert!(elapsed >= TIMEOUT);
    assert!(elapsed < TIMEOUT + Duration::from_millis(50), "took {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn fail_closed_config_denies_when_store_hangs() {
    let config = QuotaConfig { failure_mode: FailureMode::Closed, store_timeout_ms: 200, ..QuotaConfig::default() };
    let engine = RateLimiterEngine::from_config(Arc::new(HangingStore), &config).unwrap();

    let decision = engine.check_and_increment(&identity("a@example.com")).await;
    assert!(!decision.allowed);
    assert!(decision.degraded);
}

#[tokio::test(start_paused = true)]
async fn audit_logger_drops_instead_of_blocking() {
    let sink = MemorySink::new();
    let guard = StoreGuard::new(TIMEOUT).unwrap().with_events(EventEmitter::new(sink.clone()));
    let logger = AuditLogger::new(Arc::new(HangingStore), guard);

    let entry = AuditEntry::new(
        identity("a@example.com"),
        EndpointName::new("extract").unwrap(),
        "{}",
        chrono::Utc::now(),
    );
    let start = Instant::now();
    logger.record(entry).await;

    assert!(start.elapsed() < TIMEOUT + Duration::from_millis(50));
    assert_eq!(logger.dropped(), 1);
    assert_eq!(sink.degraded(StoreOperation::AuditAppend), 1);
    assert_eq!(sink.audit_drops(), 1);
}

#[tokio::test]
async fn request_succeeds_with_both_stores_down() {
    let guard = StoreGuard::new(TIMEOUT).unwrap();
    let engine = RateLimiterEngine::new(Arc::new(UnreachableStore), policy(), guard.clone());
    let gate = QuotaGate::new(engine, AuditLogger::new(Arc::new(UnreachableStore), guard));

    let admitted = gate
        .execute(RequestInfo::new("a@example.com", "extract", "{}"), || async {
            Ok::<_, String>(serde_json::json!({ "status": "ok" }))
        })
        .await
        .unwrap();

    assert!(admitted.decision.degraded);
    assert_eq!(admitted.remaining_requests(), 20);
    assert_eq!(gate.audit().dropped(), 1);
}

#[tokio::test(start_paused = true)]
async fn hung_database_costs_one_timeout_per_request() {
    let guard = StoreGuard::new(TIMEOUT).unwrap();
    let engine = RateLimiterEngine::new(Arc::new(HangingStore), policy(), guard.clone());
    let gate = QuotaGate::new(engine, AuditLogger::new(Arc::new(HangingStore), guard));

    let start = Instant::now();
    let admitted = gate
        .execute(RequestInfo::new("a@example.com", "extract", "{}"), || async {
            Ok::<_, String>(serde_json::json!({ "status": "ok" }))
        })
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert!(admitted.decision.allowed);
    assert!(admitted.decision.degraded);
    assert!(elapsed >= TIMEOUT);
    assert!(elapsed < TIMEOUT + Duration::from_millis(50), "took {:?}", elapsed);
    assert_eq!(gate.audit().dropped(), 1);
}

#[tokio::test(start_paused = true)]
async fn retention_sweep_times_out() {
    let worker = RetentionWorker::new(
        Arc::new(HangingStore),
        StoreGuard::new(TIMEOUT).unwrap(),
        Duration::from_secs(30 * 24 * 3600),
        Duration::from_secs(3600),
    )
    .unwrap();

    let err = worker.sweep().await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn recovery_is_reported_once_store_answers_again() {
    let sink = MemorySink::new();
    let guard = StoreGuard::new(TIMEOUT).unwrap().with_events(EventEmitter::new(sink.clone()));
    let broken = RateLimiterEngine::new(Arc::new(UnreachableStore), policy(), guard.clone());
    let healthy = RateLimiterEngine::new(Arc::new(InMemoryQuotaStore::new()), policy(), guard);
    let user = identity("a@example.com");

    broken.check_and_increment(&user).await;
    assert!(healthy.health().is_degraded());

    let decision = healthy.check_and_increment(&user).await;
    assert!(!decision.degraded);
    assert_eq!(healthy.health(), HealthStatus::Healthy);
    assert_eq!(sink.recovered(StoreOperation::CheckAndIncrement), 1);
}
