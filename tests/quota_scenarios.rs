mod common;

use common::test_helpers::identity;
use futures::future::join_all;
use quotaward::{
    InMemoryQuotaStore, ManualClock, RateLimiterEngine, StoreGuard, WindowPolicy,
};
use std::sync::Arc;
use std::time::Duration;

fn engine(limit: u32, window: Duration) -> (RateLimiterEngine, ManualClock) {
    let clock = ManualClock::default();
    let engine = RateLimiterEngine::new(
        Arc::new(InMemoryQuotaStore::new()),
        WindowPolicy::new(limit, window).unwrap(),
        StoreGuard::new(Duration::from_secs(2)).unwrap(),
    )
    .with_clock(Arc::new(clock.clone()));
    (engine, clock)
}

#[tokio::test]
async fn daily_limit_denies_twenty_first_and_reopens_after_window() {
    let (engine, clock) = engine(20, Duration::from_secs(24 * 3600));
    let user = identity("daily@example.com");

    let mut first_reset = None;
    for n in 1..=20u32 {
        let decision = engine.check_and_increment(&user).await;
        assert!(decision.allowed, "call {} should be admitted", n);
        assert_eq!(decision.remaining, 20 - n);
        first_reset.get_or_insert(decision.reset_at);
    }

    let denied = engine.check_and_increment(&user).await;
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert_eq!(Some(denied.reset_at), first_reset);

    clock.advance(Duration::from_secs(24 * 3600));
    let reopened = engine.check_and_increment(&user).await;
    assert!(reopened.allowed);
    assert_eq!(reopened.remaining, 19);
    assert!(Some(reopened.reset_at) > first_reset);
}

#[tokio::test]
async fn short_window_scenario() {
    let (engine, clock) = engine(3, Duration::from_secs(1));
    let user = identity("a@example.com");

    let burst = join_all((0..3).map(|_| engine.check_and_increment(&user))).await;
    assert!(burst.iter().all(|d| d.allowed));
    let mut remaining: Vec<u32> = burst.iter().map(|d| d.remaining).collect();
    remaining.sort_unstable();
    assert_eq!(remaining, vec![0, 1, 2]);

    let fourth = engine.check_and_increment(&user).await;
    assert!(!fourth.allowed);
    assert_eq!(fourth.remaining, 0);

    clock.advance(Duration::from_millis(1_100));
    let later = engine.check_and_increment(&user).await;
    assert!(later.allowed);
    assert_eq!(later.remaining, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_calls_never_exceed_limit() {
    let (engine, _) = engine(10, Duration::from_secs(3600));
    let users: Vec<_> = (0..5).map(|n| identity(&format!("user-{}@example.com", n))).collect();

    let tasks = (0..200).map(|i| {
        let engine = engine.clone();
        let user = users[i % users.len()].clone();
        tokio::spawn(async move {
            let decision = engine.check_and_increment(&user).await;
            (user, decision.allowed)
        })
    });
    let outcomes = join_all(tasks).await;

    for user in &users {
        let admitted = outcomes
            .iter()
            .map(|r| r.as_ref().unwrap())
            .filter(|(u, allowed)| u == user && *allowed)
            .count();
        assert_eq!(admitted, 10, "{} admitted {} times", user, admitted);
    }
}

#[tokio::test]
async fn peek_tracks_counter_without_consuming() {
    let (engine, clock) = engine(5, Duration::from_secs(60));
    let user = identity("peek@example.com");

    assert_eq!(engine.remaining(&user).await.remaining, 5);
    engine.check_and_increment(&user).await;
    engine.check_and_increment(&user).await;
    assert_eq!(engine.remaining(&user).await.remaining, 3);

    clock.advance(Duration::from_secs(60));
    assert_eq!(engine.remaining(&user).await.remaining, 5);
    assert_eq!(engine.check_and_increment(&user).await.remaining, 4);
}
