//! Table definitions and value codecs shared by both stores.

use chrono::{DateTime, SecondsFormat, Utc};
use quotaward::StoreError;
use rusqlite::Connection;

/// Timestamps are stored as fixed-width RFC 3339 UTC text so that string
/// comparison in SQL matches chronological order.
pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS user_quotas (
    user_identity   TEXT    PRIMARY KEY NOT NULL CHECK (length(user_identity) BETWEEN 1 AND 255),
    request_count   INTEGER NOT NULL DEFAULT 0 CHECK (request_count >= 0),
    window_reset_at TEXT    NOT NULL,
    created_at      TEXT    NOT NULL,
    updated_at      TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_records (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    user_identity      TEXT    NOT NULL,
    endpoint_name      TEXT    NOT NULL,
    input_summary      TEXT    NOT NULL,
    result_summary     TEXT,
    success            INTEGER NOT NULL CHECK (success IN (0, 1)),
    error_message      TEXT,
    processing_time_ms INTEGER NOT NULL CHECK (processing_time_ms >= 0),
    created_at         TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_user_created ON audit_records (user_identity, created_at);
CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_records (created_at);
";

pub(crate) fn initialize(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SCHEMA).map_err(db_error)
}

pub(crate) fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| StoreError::Corrupt(format!("timestamp {:?}: {}", raw, err)))
}

/// Map a driver error onto the store error taxonomy.
pub(crate) fn db_error(err: rusqlite::Error) -> StoreError {
    use rusqlite::ErrorCode;

    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure
            | ErrorCode::DiskFull
            | ErrorCode::ReadOnly => StoreError::Unavailable(err.to_string()),
            ErrorCode::ConstraintViolation | ErrorCode::TooBig => {
                StoreError::InvalidInput(err.to_string())
            }
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => StoreError::Corrupt(err.to_string()),
            _ => StoreError::Unavailable(err.to_string()),
        },
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::IntegralValueOutOfRange(..)
        | rusqlite::Error::InvalidColumnType(..) => StoreError::Corrupt(err.to_string()),
        _ => StoreError::Unavailable(err.to_string()),
    }
}
