use crate::error::StoreError;
use crate::quota::{Admission, UserIdentity, UserQuota, WindowPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// Persistent record of per-user counters; the source of truth for admission.
///
/// Implementations must make [`QuotaStore::check_and_increment`] indivisible
/// per identity: either one conditional update at the storage layer, or a
/// per-key serialization point around a plain read-modify-write. Distinct
/// identities must not serialize behind each other.
#[async_trait]
pub trait QuotaStore: Send + Sync + std::fmt::Debug {
    /// Fetch-or-create the row for `identity`, roll an elapsed window, and
    /// increment if under the limit, all as one atomic step.
    async fn check_and_increment(
        &self,
        identity: &UserIdentity,
        policy: &WindowPolicy,
        now: DateTime<Utc>,
    ) -> Result<Admission, StoreError>;

    /// Read a row without modifying it.
    async fn get(&self, identity: &UserIdentity) -> Result<Option<UserQuota>, StoreError>;

    /// Zero a user's counter and expire the window so the next access opens a
    /// fresh one. Returns `false` if the identity has no row.
    async fn reset(&self, identity: &UserIdentity, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Reset every row; returns the number touched.
    async fn reset_all(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Administrative removal of a row.
    async fn delete(&self, identity: &UserIdentity) -> Result<bool, StoreError>;

    /// All rows, ordered by identity.
    async fn list(&self) -> Result<Vec<UserQuota>, StoreError>;
}

#[async_trait]
impl<S: QuotaStore + ?Sized> QuotaStore for Arc<S> {
    async fn check_and_increment(
        &self,
        identity: &UserIdentity,
        policy: &WindowPolicy,
        now: DateTime<Utc>,
    ) -> Result<Admission, StoreError> {
        (**self).check_and_increment(identity, policy, now).await
    }

    async fn get(&self, identity: &UserIdentity) -> Result<Option<UserQuota>, StoreError> {
        (**self).get(identity).await
    }

    async fn reset(&self, identity: &UserIdentity, now: DateTime<Utc>) -> Result<bool, StoreError> {
        (**self).reset(identity, now).await
    }

    async fn reset_all(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).reset_all(now).await
    }

    async fn delete(&self, identity: &UserIdentity) -> Result<bool, StoreError> {
        (**self).delete(identity).await
    }

    async fn list(&self) -> Result<Vec<UserQuota>, StoreError> {
        (**self).list().await
    }
}

/// In-process quota store.
///
/// Rows live in a sharded map; the admission step runs while holding the
/// entry's shard guard, which serializes competing increments for one identity
/// without a process-wide lock. State does not survive restarts and is not
/// shared across instances; use a persistent backend for that.
#[derive(Default, Clone, Debug)]
pub struct InMemoryQuotaStore {
    rows: Arc<DashMap<UserIdentity, UserQuota>>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn check_and_increment(
        &self,
        identity: &UserIdentity,
        policy: &WindowPolicy,
        now: DateTime<Utc>,
    ) -> Result<Admission, StoreError> {
        let mut row = self
            .rows
            .entry(identity.clone())
            .or_insert_with(|| UserQuota::fresh(identity.clone(), now, policy));
        let allowed = row.admit(now, policy);
        Ok(Admission { allowed, quota: row.clone() })
    }

    async fn get(&self, identity: &UserIdentity) -> Result<Option<UserQuota>, StoreError> {
        Ok(self.rows.get(identity).map(|row| row.clone()))
    }

    async fn reset(&self, identity: &UserIdentity, now: DateTime<Utc>) -> Result<bool, StoreError> {
        match self.rows.get_mut(identity) {
            Some(mut row) => {
                reset_row(&mut row, now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reset_all(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut touched = 0;
        for mut row in self.rows.iter_mut() {
            reset_row(&mut row, now);
            touched += 1;
        }
        Ok(touched)
    }

    async fn delete(&self, identity: &UserIdentity) -> Result<bool, StoreError> {
        Ok(self.rows.remove(identity).is_some())
    }

    async fn list(&self) -> Result<Vec<UserQuota>, StoreError> {
        let mut rows: Vec<UserQuota> = self.rows.iter().map(|row| row.clone()).collect();
        rows.sort_by(|a, b| a.user_identity.cmp(&b.user_identity));
        Ok(rows)
    }
}

fn reset_row(row: &mut UserQuota, now: DateTime<Utc>) {
    row.request_count = 0;
    row.window_reset_at = now;
    row.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn id(raw: &str) -> UserIdentity {
        UserIdentity::new(raw).unwrap()
    }

    #[tokio::test]
    async fn test_creates_row_lazily() {
        let store = InMemoryQuotaStore::new();
        let policy = WindowPolicy::new(5, Duration::from_secs(60)).unwrap();
        let now = Utc::now();

        assert!(store.get(&id("u1")).await.unwrap().is_none());
        let admission = store.check_and_increment(&id("u1"), &policy, now).await.unwrap();
        assert!(admission.allowed);
        assert_eq!(admission.quota.request_count, 1);
        assert_eq!(admission.quota.created_at, now);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_denies_at_limit() {
        let store = InMemoryQuotaStore::new();
        let policy = WindowPolicy::new(2, Duration::from_secs(60)).unwrap();
        let now = Utc::now();

        for _ in 0..2 {
            assert!(store.check_and_increment(&id("u1"), &policy, now).await.unwrap().allowed);
        }
        let denied = store.check_and_increment(&id("u1"), &policy, now).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.quota.request_count, 2);
    }

    #[tokio::test]
    async fn test_reset_reopens_window() {
        let store = InMemoryQuotaStore::new();
        let policy = WindowPolicy::new(1, Duration::from_secs(3600)).unwrap();
        let now = Utc::now();

        store.check_and_increment(&id("u1"), &policy, now).await.unwrap();
        assert!(!store.check_and_increment(&id("u1"), &policy, now).await.unwrap().allowed);

        assert!(store.reset(&id("u1"), now).await.unwrap());
        assert!(!store.reset(&id("nobody"), now).await.unwrap());
        assert!(store.check_and_increment(&id("u1"), &policy, now).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_reset_all_and_delete() {
        let store = InMemoryQuotaStore::new();
        let policy = WindowPolicy::new(1, Duration::from_secs(3600)).unwrap();
        let now = Utc::now();

        store.check_and_increment(&id("b"), &policy, now).await.unwrap();
        store.check_and_increment(&id("a"), &policy, now).await.unwrap();

        assert_eq!(store.reset_all(now).await.unwrap(), 2);
        let rows = store.list().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].user_identity.as_str(), "a");
        assert!(rows.iter().all(|r| r.request_count == 0));

        assert!(store.delete(&id("a")).await.unwrap());
        assert!(!store.delete(&id("a")).await.unwrap());
        assert_eq!(store.len(), 1);
    }
}
