use crate::pool::SqlitePool;
use crate::schema::{db_error, decode_time, encode_time};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quotaward::{AuditEntry, AuditRecord, AuditStore, EndpointName, StoreError, UserIdentity};
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;

const COLUMNS: &str = "id, user_identity, endpoint_name, input_summary, result_summary, success, \
                       error_message, processing_time_ms, created_at";

/// Append-only audit store backed by the `audit_records` table.
#[derive(Debug, Clone)]
pub struct SqliteAuditStore {
    pool: Arc<SqlitePool>,
}

impl SqliteAuditStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<SqlitePool> {
        &self.pool
    }
}

struct RawRecord {
    id: i64,
    user_identity: String,
    endpoint_name: String,
    input_summary: String,
    result_summary: Option<String>,
    success: bool,
    error_message: Option<String>,
    processing_time_ms: i64,
    created_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        user_identity: row.get(1)?,
        endpoint_name: row.get(2)?,
        input_summary: row.get(3)?,
        result_summary: row.get(4)?,
        success: row.get(5)?,
        error_message: row.get(6)?,
        processing_time_ms: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn decode(raw: RawRecord) -> Result<AuditRecord, StoreError> {
    let corrupt = |err: quotaward::IdentityError| StoreError::Corrupt(err.to_string());
    Ok(AuditRecord {
        id: raw.id,
        entry: AuditEntry {
            user_identity: UserIdentity::new(raw.user_identity).map_err(corrupt)?,
            endpoint_name: EndpointName::new(raw.endpoint_name).map_err(corrupt)?,
            input_summary: raw.input_summary,
            result_summary: raw.result_summary,
            success: raw.success,
            error_message: raw.error_message,
            processing_time_ms: u64::try_from(raw.processing_time_ms).map_err(|_| {
                StoreError::Corrupt(format!("processing_time_ms {} out of range", raw.processing_time_ms))
            })?,
            timestamp: decode_time(&raw.created_at)?,
        },
    })
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn append(&self, entry: &AuditEntry) -> Result<i64, StoreError> {
        let entry = entry.clone();
        let processing_time_ms = i64::try_from(entry.processing_time_ms)
            .map_err(|_| StoreError::InvalidInput("processing_time_ms exceeds i64".into()))?;
        self.pool
            .run(move |conn| {
                conn.prepare_cached(
                    "INSERT INTO audit_records (user_identity, endpoint_name, input_summary, \
                     result_summary, success, error_message, processing_time_ms, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )
                .and_then(|mut stmt| {
                    stmt.execute(params![
                        entry.user_identity.as_str(),
                        entry.endpoint_name.as_str(),
                        entry.input_summary,
                        entry.result_summary,
                        entry.success,
                        entry.error_message,
                        processing_time_ms,
                        encode_time(entry.timestamp),
                    ])
                })
                .map_err(db_error)?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    async fn get(&self, id: i64) -> Result<Option<AuditRecord>, StoreError> {
        self.pool
            .run(move |conn| {
                let sql = format!("SELECT {} FROM audit_records WHERE id = ?1", COLUMNS);
                conn.query_row(&sql, params![id], read_row)
                    .optional()
                    .map_err(db_error)?
                    .map(decode)
                    .transpose()
            })
            .await
    }

    async fn list_for_user(
        &self,
        identity: &UserIdentity,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        let identity = identity.clone();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.pool
            .run(move |conn| {
                let sql = format!(
                    "SELECT {} FROM audit_records WHERE user_identity = ?1 \
                     ORDER BY created_at DESC, id DESC LIMIT ?2",
                    COLUMNS
                );
                let mut stmt = conn.prepare_cached(&sql).map_err(db_error)?;
                let rows = stmt.query_map(params![identity.as_str(), limit], read_row).map_err(db_error)?;
                let mut records = Vec::new();
                for row in rows {
                    records.push(decode(row.map_err(db_error)?)?);
                }
                Ok(records)
            })
            .await
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let cutoff = encode_time(cutoff);
        self.pool
            .run(move |conn| {
                conn.execute("DELETE FROM audit_records WHERE created_at < ?1", params![cutoff])
                    .map(|deleted| u64::try_from(deleted).unwrap_or(u64::MAX))
                    .map_err(db_error)
            })
            .await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.pool
            .run(move |conn| {
                let count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM audit_records", [], |row| row.get(0))
                    .map_err(db_error)?;
                u64::try_from(count).map_err(|_| StoreError::Corrupt(format!("negative count {}", count)))
            })
            .await
    }
}
