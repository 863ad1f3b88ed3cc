use crate::pool::SqlitePool;
use crate::schema::{db_error, decode_time, encode_time};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quotaward::{Admission, QuotaStore, StoreError, UserIdentity, UserQuota, WindowPolicy};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use tracing::debug;

const COLUMNS: &str = "user_identity, request_count, window_reset_at, created_at, updated_at";

/// Roll an elapsed window or count one more request, in one statement.
/// Matches nothing when the window is open and already full.
const ADMIT: &str = "
UPDATE user_quotas SET
    request_count   = CASE WHEN ?2 >= window_reset_at THEN 1 ELSE request_count + 1 END,
    window_reset_at = CASE WHEN ?2 >= window_reset_at THEN ?4 ELSE window_reset_at END,
    updated_at      = ?2
WHERE user_identity = ?1 AND (?2 >= window_reset_at OR request_count < ?3)
RETURNING user_identity, request_count, window_reset_at, created_at, updated_at";

const CREATE: &str = "
INSERT INTO user_quotas (user_identity, request_count, window_reset_at, created_at, updated_at)
VALUES (?1, 0, ?2, ?3, ?3)
ON CONFLICT (user_identity) DO NOTHING";

/// Quota store backed by the `user_quotas` table.
#[derive(Debug, Clone)]
pub struct SqliteQuotaStore {
    pool: Arc<SqlitePool>,
}

impl SqliteQuotaStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<SqlitePool> {
        &self.pool
    }
}

type RawQuota = (String, i64, String, String, String);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawQuota> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode((identity, count, reset_at, created_at, updated_at): RawQuota) -> Result<UserQuota, StoreError> {
    Ok(UserQuota {
        user_identity: UserIdentity::new(identity).map_err(|err| StoreError::Corrupt(err.to_string()))?,
        request_count: u32::try_from(count)
            .map_err(|_| StoreError::Corrupt(format!("request_count {} out of range", count)))?,
        window_reset_at: decode_time(&reset_at)?,
        created_at: decode_time(&created_at)?,
        updated_at: decode_time(&updated_at)?,
    })
}

fn select_one(conn: &Connection, identity: &str) -> Result<Option<UserQuota>, StoreError> {
    let sql = format!("SELECT {} FROM user_quotas WHERE user_identity = ?1", COLUMNS);
    conn.prepare_cached(&sql)
        .and_then(|mut stmt| stmt.query_row(params![identity], read_row).optional())
        .map_err(db_error)?
        .map(decode)
        .transpose()
}

fn admit(
    conn: &Connection,
    identity: &UserIdentity,
    limit: u32,
    now: &str,
    next_reset: &str,
) -> Result<Admission, StoreError> {
    for attempt in 0..2 {
        let updated = conn
            .prepare_cached(ADMIT)
            .and_then(|mut stmt| {
                stmt.query_row(params![identity.as_str(), now, limit, next_reset], read_row).optional()
            })
            .map_err(db_error)?;
        if let Some(raw) = updated {
            return Ok(Admission { allowed: true, quota: decode(raw)? });
        }

        if let Some(quota) = select_one(conn, identity.as_str())? {
            return Ok(Admission { allowed: false, quota });
        }

        if attempt == 0 {
            let created = conn
                .prepare_cached(CREATE)
                .and_then(|mut stmt| stmt.execute(params![identity.as_str(), next_reset, now]))
                .map_err(db_error)?;
            debug!(user = %identity, created, "quota row created");
        }
    }
    Err(StoreError::RaceOnCreate { identity: identity.to_string() })
}

fn to_count(changed: usize) -> u64 {
    u64::try_from(changed).unwrap_or(u64::MAX)
}

#[async_trait]
impl QuotaStore for SqliteQuotaStore {
    async fn check_and_increment(
        &self,
        identity: &UserIdentity,
        policy: &WindowPolicy,
        now: DateTime<Utc>,
    ) -> Result<Admission, StoreError> {
        let identity = identity.clone();
        let limit = policy.limit();
        let next_reset = encode_time(policy.next_reset(now));
        let now = encode_time(now);
        self.pool.run(move |conn| admit(conn, &identity, limit, &now, &next_reset)).await
    }

    async fn get(&self, identity: &UserIdentity) -> Result<Option<UserQuota>, StoreError> {
        let identity = identity.clone();
        self.pool.run(move |conn| select_one(conn, identity.as_str())).await
    }

    async fn reset(&self, identity: &UserIdentity, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let identity = identity.clone();
        let now = encode_time(now);
        self.pool
            .run(move |conn| {
                conn.execute(
                    "UPDATE user_quotas SET request_count = 0, window_reset_at = ?2, updated_at = ?2 \
                     WHERE user_identity = ?1",
                    params![identity.as_str(), now],
                )
                .map(|changed| changed > 0)
                .map_err(db_error)
            })
            .await
    }

    async fn reset_all(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let now = encode_time(now);
        self.pool
            .run(move |conn| {
                conn.execute(
                    "UPDATE user_quotas SET request_count = 0, window_reset_at = ?1, updated_at = ?1",
                    params![now],
                )
                .map(to_count)
                .map_err(db_error)
            })
            .await
    }

    async fn delete(&self, identity: &UserIdentity) -> Result<bool, StoreError> {
        let identity = identity.clone();
        self.pool
            .run(move |conn| {
                conn.execute("DELETE FROM user_quotas WHERE user_identity = ?1", params![identity.as_str()])
                    .map(|changed| changed > 0)
                    .map_err(db_error)
            })
            .await
    }

    async fn list(&self) -> Result<Vec<UserQuota>, StoreError> {
        self.pool
            .run(move |conn| {
                let sql = format!("SELECT {} FROM user_quotas ORDER BY user_identity", COLUMNS);
                let mut stmt = conn.prepare(&sql).map_err(db_error)?;
                let rows = stmt.query_map([], read_row).map_err(db_error)?;
                let mut quotas = Vec::new();
                for row in rows {
                    quotas.push(decode(row.map_err(db_error)?)?);
                }
                Ok(quotas)
            })
            .await
    }
}
