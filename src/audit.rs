//! Append-only audit trail with a best-effort writer.
//!
//! [`AuditStore`] is the persistence seam; [`AuditLogger::record`] sits on
//! the request path and never returns an error. Entries that cannot be
//! persisted inside the store timeout are dropped with a `warn` record and an
//! [`AuditEvent::Dropped`] event.

use crate::degradation::{StoreGuard, StoreOperation};
use crate::error::{IdentityError, StoreError};
use crate::quota::{check_bounded, UserIdentity};
use crate::telemetry::{AuditEvent, QuotaEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest accepted endpoint name, in bytes.
pub const MAX_ENDPOINT_LEN: usize = 100;

/// Largest input/result/error text stored verbatim, in bytes.
pub const MAX_SUMMARY_BYTES: usize = 64 * 1024;

/// A validated endpoint name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndpointName(String);

impl EndpointName {
    pub fn new(raw: impl Into<String>) -> Result<Self, IdentityError> {
        let raw = raw.into();
        check_bounded("endpoint_name", &raw, MAX_ENDPOINT_LEN)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EndpointName {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EndpointName> for String {
    fn from(value: EndpointName) -> Self {
        value.0
    }
}

impl fmt::Display for EndpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cut `text` to at most [`MAX_SUMMARY_BYTES`], on a character boundary.
pub fn truncate_summary(mut text: String) -> String {
    if text.len() <= MAX_SUMMARY_BYTES {
        return text;
    }
    let mut cut = MAX_SUMMARY_BYTES;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text
}

/// One request's audit data, as handed to the logger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub user_identity: UserIdentity,
    pub endpoint_name: EndpointName,
    pub input_summary: String,
    /// Serialized response; `None` for failures and denials.
    pub result_summary: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    /// Request-received to response-ready.
    pub processing_time_ms: u64,
    /// When the request was received; also the retention key.
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    /// Start an entry for a request received at `timestamp`. The outcome
    /// defaults to failure with no message until one of the builders runs.
    pub fn new(
        user_identity: UserIdentity,
        endpoint_name: EndpointName,
        input_summary: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_identity,
            endpoint_name,
            input_summary: truncate_summary(input_summary.into()),
            result_summary: None,
            success: false,
            error_message: None,
            processing_time_ms: 0,
            timestamp,
        }
    }

    /// Mark the request successful with its serialized result.
    pub fn succeeded(mut self, result_summary: impl Into<String>) -> Self {
        self.success = true;
        self.result_summary = Some(truncate_summary(result_summary.into()));
        self.error_message = None;
        self
    }

    /// Mark the request failed.
    pub fn failed(mut self, error_message: impl Into<String>) -> Self {
        self.success = false;
        self.result_summary = None;
        self.error_message = Some(truncate_summary(error_message.into()));
        self
    }

    pub fn with_processing_time_ms(mut self, ms: u64) -> Self {
        self.processing_time_ms = ms;
        self
    }
}

/// A persisted entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    #[serde(flatten)]
    pub entry: AuditEntry,
}

impl AuditRecord {
    pub fn created_at(&self) -> DateTime<Utc> {
        self.entry.timestamp
    }
}

/// Append-only audit persistence.
#[async_trait]
pub trait AuditStore: Send + Sync + fmt::Debug {
    /// Persist an entry; returns its id.
    async fn append(&self, entry: &AuditEntry) -> Result<i64, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<AuditRecord>, StoreError>;

    /// Up to `limit` records for `identity`, newest first.
    async fn list_for_user(
        &self,
        identity: &UserIdentity,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, StoreError>;

    /// Delete records created strictly before `cutoff`; returns the count.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;
}

#[async_trait]
impl<S: AuditStore + ?Sized> AuditStore for Arc<S> {
    async fn append(&self, entry: &AuditEntry) -> Result<i64, StoreError> {
        (**self).append(entry).await
    }

    async fn get(&self, id: i64) -> Result<Option<AuditRecord>, StoreError> {
        (**self).get(id).await
    }

    async fn list_for_user(
        &self,
        identity: &UserIdentity,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        (**self).list_for_user(identity, limit).await
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).purge_older_than(cutoff).await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        (**self).count().await
    }
}

/// In-memory audit store for tests and single-process deployments.
#[derive(Debug, Clone)]
pub struct InMemoryAuditStore {
    records: Arc<Mutex<BTreeMap<i64, AuditEntry>>>,
    next_id: Arc<AtomicI64>,
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self { records: Arc::new(Mutex::new(BTreeMap::new())), next_id: Arc::new(AtomicI64::new(1)) }
    }
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<i64, AuditEntry>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, entry: &AuditEntry) -> Result<i64, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, entry.clone());
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Option<AuditRecord>, StoreError> {
        Ok(self.lock().get(&id).map(|entry| AuditRecord { id, entry: entry.clone() }))
    }

    async fn list_for_user(
        &self,
        identity: &UserIdentity,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        let guard = self.lock();
        let mut records: Vec<AuditRecord> = guard
            .iter()
            .filter(|(_, entry)| &entry.user_identity == identity)
            .map(|(id, entry)| AuditRecord { id: *id, entry: entry.clone() })
            .collect();
        records.sort_by(|a, b| b.entry.timestamp.cmp(&a.entry.timestamp).then(b.id.cmp(&a.id)));
        records.truncate(limit);
        Ok(records)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut guard = self.lock();
        let before = guard.len();
        guard.retain(|_, entry| entry.timestamp >= cutoff);
        Ok((before - guard.len()) as u64)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.lock().len() as u64)
    }
}

#[derive(Debug, Default)]
struct LoggerStats {
    written: AtomicU64,
    dropped: AtomicU64,
}

/// Best-effort audit writer used on the request path.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    store: Arc<dyn AuditStore>,
    guard: StoreGuard,
    stats: Arc<LoggerStats>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn AuditStore>, guard: StoreGuard) -> Self {
        Self { store, guard, stats: Arc::new(LoggerStats::default()) }
    }

    /// Persist `entry` within the store timeout, or drop it.
    pub async fn record(&self, entry: AuditEntry) {
        self.record_within(entry, self.guard.timeout()).await
    }

    /// Persist `entry` within whatever is left of a caller's store budget, or
    /// drop it.
    pub async fn record_within(&self, entry: AuditEntry, budget: Duration) {
        let append = self.store.append(&entry);
        match self.guard.call_within(StoreOperation::AuditAppend, budget, append).await {
            Ok(id) => {
                self.stats.written.fetch_add(1, Ordering::Relaxed);
                debug!(id, user = %entry.user_identity, endpoint = %entry.endpoint_name, "audit recorded");
            }
            Err(err) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    user = %entry.user_identity,
                    endpoint = %entry.endpoint_name,
                    error = %err,
                    "audit entry dropped"
                );
                self.guard
                    .events()
                    .emit(QuotaEvent::Audit(AuditEvent::Dropped {
                        identity: entry.user_identity.to_string(),
                        endpoint: entry.endpoint_name.to_string(),
                        cause: err.to_string(),
                    }))
                    .await;
            }
        }
    }

    /// The underlying store, for read-side queries.
    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    pub fn written(&self) -> u64 {
        self.stats.written.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }
}
