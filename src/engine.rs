//! Rate limiter engine: the admission decision for each request.
//!
//! The engine owns no counters. Every decision is the store's atomic
//! check-and-increment under the [`StoreGuard`] timeout; when that fails, the
//! configured [`FailurePolicy`] decides using the last answer the store gave
//! for that identity. The last-known map is a fallback hint only and never
//! allows or denies on its own while the store is healthy.

use crate::adaptive::DynamicConfig;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, QuotaConfig};
use crate::degradation::{
    FailOpen, FailurePolicy, Fallback, HealthStatus, StoreGuard, StoreOperation,
};
use crate::error::StoreError;
use crate::quota::{Decision, UserIdentity, UserQuota, WindowPolicy};
use crate::store::QuotaStore;
use crate::telemetry::{AdmissionEvent, QuotaEvent};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Expired fallback entries are swept once per this many observations.
const EVICT_EVERY: u64 = 1024;

#[derive(Debug, Clone, Copy)]
struct Observed {
    remaining: u32,
    reset_at: DateTime<Utc>,
}

/// Decides whether a user may make one more request.
///
/// Cheap to clone; clones share the store, policy cell, and fallback map.
#[derive(Debug, Clone)]
pub struct RateLimiterEngine {
    store: Arc<dyn QuotaStore>,
    policy: DynamicConfig<WindowPolicy>,
    guard: StoreGuard,
    failure: Arc<dyn FailurePolicy>,
    last_known: Arc<DashMap<UserIdentity, Observed>>,
    observations: Arc<AtomicU64>,
    clock: Arc<dyn Clock>,
}

impl RateLimiterEngine {
    /// Engine with fail-open degradation and the system clock.
    pub fn new(store: Arc<dyn QuotaStore>, policy: WindowPolicy, guard: StoreGuard) -> Self {
        Self {
            store,
            policy: DynamicConfig::new(policy),
            guard,
            failure: Arc::new(FailOpen),
            last_known: Arc::new(DashMap::new()),
            observations: Arc::new(AtomicU64::new(0)),
            clock: Arc::new(SystemClock),
        }
    }

    /// Build from validated configuration.
    pub fn from_config(store: Arc<dyn QuotaStore>, config: &QuotaConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let guard = StoreGuard::new(config.store_timeout())?;
        Ok(Self::new(store, config.window_policy()?, guard)
            .with_failure_policy(config.failure_mode.policy()))
    }

    pub fn with_failure_policy(mut self, failure: Arc<dyn FailurePolicy>) -> Self {
        self.failure = failure;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the guard, e.g. to share its monitor and events with the audit logger.
    pub fn with_guard(mut self, guard: StoreGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn guard(&self) -> &StoreGuard {
        &self.guard
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current limit and window.
    pub fn window_policy(&self) -> WindowPolicy {
        *self.policy.get()
    }

    /// Install a new limit/window; returns the previous one.
    ///
    /// Windows already open keep their stored reset instant; the new window
    /// length applies from each user's next reset.
    pub fn set_window_policy(&self, policy: WindowPolicy) -> WindowPolicy {
        let previous = *self.policy.replace(policy);
        debug!(limit = policy.limit(), window = ?policy.window(), "window policy updated");
        previous
    }

    /// Store health as seen by this engine's guard.
    pub fn health(&self) -> HealthStatus {
        self.guard.monitor().status()
    }

    /// Atomically count one request against `identity`'s window.
    ///
    /// Never fails: an unreachable store yields the failure policy's decision
    /// with `degraded = true`, inside the store timeout.
    pub async fn check_and_increment(&self, identity: &UserIdentity) -> Decision {
        let policy = self.policy.get();
        let now = self.clock.now();

        let call = self.store.check_and_increment(identity, &policy, now);
        match self.guard.call(StoreOperation::CheckAndIncrement, call).await {
            Ok(admission) => {
                let decision = Decision::from_admission(&admission, policy.limit());
                self.observe(identity, &decision);

                let event = if decision.allowed {
                    debug!(user = %identity, remaining = decision.remaining, "request admitted");
                    AdmissionEvent::Admitted { identity: identity.to_string(), remaining: decision.remaining }
                } else {
                    debug!(user = %identity, reset_at = %decision.reset_at, "request denied");
                    AdmissionEvent::Denied { identity: identity.to_string(), reset_at: decision.reset_at }
                };
                self.guard.events().emit(QuotaEvent::Admission(event)).await;

                decision
            }
            Err(err) => self.failure.on_store_failure(self.fallback(identity, &policy, now), &err),
        }
    }

    /// Remaining quota without counting a request.
    pub async fn remaining(&self, identity: &UserIdentity) -> Decision {
        let policy = self.policy.get();
        let now = self.clock.now();

        match self.guard.call(StoreOperation::Peek, self.store.get(identity)).await {
            Ok(row) => {
                let (remaining, reset_at) = match row {
                    Some(quota) if !quota.window_elapsed(now) => {
                        (quota.remaining_at(now, policy.limit()), quota.window_reset_at)
                    }
                    _ => (policy.limit(), policy.next_reset(now)),
                };
                Decision { allowed: remaining > 0, remaining, reset_at, degraded: false }
            }
            Err(err) => self.failure.on_store_failure(self.fallback(identity, &policy, now), &err),
        }
    }

    /// Zero one user's counter; the next request opens a fresh window.
    pub async fn reset(&self, identity: &UserIdentity) -> Result<bool, StoreError> {
        let now = self.clock.now();
        self.last_known.remove(identity);
        self.guard.call(StoreOperation::Admin, self.store.reset(identity, now)).await
    }

    pub async fn reset_all(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();
        self.last_known.clear();
        self.guard.call(StoreOperation::Admin, self.store.reset_all(now)).await
    }

    pub async fn delete(&self, identity: &UserIdentity) -> Result<bool, StoreError> {
        self.last_known.remove(identity);
        self.guard.call(StoreOperation::Admin, self.store.delete(identity)).await
    }

    pub async fn list(&self) -> Result<Vec<UserQuota>, StoreError> {
        self.guard.call(StoreOperation::Admin, self.store.list()).await
    }

    /// Drop fallback entries whose window has ended. Returns how many went.
    ///
    /// Runs on its own every [`EVICT_EVERY`] admissions; exposed for hosts
    /// that want to sweep on a timer instead.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.last_known.len();
        self.last_known.retain(|_, seen| now < seen.reset_at);
        before.saturating_sub(self.last_known.len())
    }

    fn observe(&self, identity: &UserIdentity, decision: &Decision) {
        let observed = Observed { remaining: decision.remaining, reset_at: decision.reset_at };
        self.last_known.insert(identity.clone(), observed);

        if self.observations.fetch_add(1, Ordering::Relaxed) % EVICT_EVERY == EVICT_EVERY - 1 {
            let evicted = self.evict_expired();
            if evicted > 0 {
                debug!(evicted, cached = self.last_known.len(), "expired fallback entries evicted");
            }
        }
    }

    fn fallback(&self, identity: &UserIdentity, policy: &WindowPolicy, now: DateTime<Utc>) -> Fallback {
        let seen = self.last_known.get(identity).map(|entry| *entry);
        match seen {
            Some(seen) if now < seen.reset_at => {
                Fallback { remaining: seen.remaining, reset_at: seen.reset_at }
            }
            Some(_) => {
                self.last_known.remove_if(identity, |_, seen| now >= seen.reset_at);
                Fallback { remaining: policy.limit(), reset_at: policy.next_reset(now) }
            }
            None => Fallback { remaining: policy.limit(), reset_at: policy.next_reset(now) },
        }
    }
}
