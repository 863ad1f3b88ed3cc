#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quotaward::{
    Admission, AuditEntry, AuditRecord, AuditStore, QuotaStore, StoreError, UserIdentity,
    UserQuota, WindowPolicy,
};
use std::future::pending;

/// Every call fails immediately, as if the connection were refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnreachableStore;

/// Every call waits forever, as if the database stopped answering.
#[derive(Debug, Default, Clone, Copy)]
pub struct HangingStore;

fn refused<T>() -> Result<T, StoreError> {
    Err(StoreError::Unavailable("connection refused".into()))
}

#[async_trait]
impl QuotaStore for UnreachableStore {
    async fn check_and_increment(
        &self,
        _identity: &UserIdentity,
        _policy: &WindowPolicy,
        _now: DateTime<Utc>,
    ) -> Result<Admission, StoreError> {
        refused()
    }
    async fn get(&self, _identity: &UserIdentity) -> Result<Option<UserQuota>, StoreError> {
        refused()
    }
    async fn reset(&self, _identity: &UserIdentity, _now: DateTime<Utc>) -> Result<bool, StoreError> {
        refused()
    }
    async fn reset_all(&self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
        refused()
    }
    async fn delete(&self, _identity: &UserIdentity) -> Result<bool, StoreError> {
        refused()
    }
    async fn list(&self) -> Result<Vec<UserQuota>, StoreError> {
        refused()
    }
}

#[async_trait]
impl AuditStore for UnreachableStore {
    async fn append(&self, _entry: &AuditEntry) -> Result<i64, StoreError> {
        refused()
    }
    async fn get(&self, _id: i64) -> Result<Option<AuditRecord>, StoreError> {
        refused()
    }
    async fn list_for_user(
        &self,
        _identity: &UserIdentity,
        _limit: usize,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        refused()
    }
    async fn purge_older_than(&self, _cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        refused()
    }
    async fn count(&self) -> Result<u64, StoreError> {
        refused()
    }
}

#[async_trait]
impl QuotaStore for HangingStore {
    async fn check_and_increment(
        &self,
        _identity: &UserIdentity,
        _policy: &WindowPolicy,
        _now: DateTime<Utc>,
    ) -> Result<Admission, StoreError> {
        pending().await
    }
    async fn get(&self, _identity: &UserIdentity) -> Result<Option<UserQuota>, StoreError> {
        pending().await
    }
    async fn reset(&self, _identity: &UserIdentity, _now: DateTime<Utc>) -> Result<bool, StoreError> {
        pending().await
    }
    async fn reset_all(&self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
        pending().await
    }
    async fn delete(&self, _identity: &UserIdentity) -> Result<bool, StoreError> {
        pending().await
    }
    async fn list(&self) -> Result<Vec<UserQuota>, StoreError> {
        pending().await
    }
}

#[async_trait]
impl AuditStore for HangingStore {
    async fn append(&self, _entry: &AuditEntry) -> Result<i64, StoreError> {
        pending().await
    }
    async fn get(&self, _id: i64) -> Result<Option<AuditRecord>, StoreError> {
        pending().await
    }
    async fn list_for_user(
        &self,
        _identity: &UserIdentity,
        _limit: usize,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        pending().await
    }
    async fn purge_older_than(&self, _cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        pending().await
    }
    async fn count(&self) -> Result<u64, StoreError> {
        pending().await
    }
}

pub fn identity(raw: &str) -> UserIdentity {
    UserIdentity::new(raw).unwrap()
}
