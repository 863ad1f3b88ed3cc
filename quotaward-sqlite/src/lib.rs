//! SQLite backend for `quotaward`.
//!
//! One database file holds both tables. Connections come from a fixed-size
//! pool; every statement runs on tokio's blocking pool so the async runtime
//! never waits on disk. Quota admission is a single conditional
//! `UPDATE ... RETURNING`, which SQLite applies atomically per row.

mod audit;
mod config;
mod pool;
mod quota;
mod schema;

pub use audit::SqliteAuditStore;
pub use config::{
    SqliteConfig, DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_DATABASE_PATH, DEFAULT_POOL_SIZE,
    ENV_BUSY_TIMEOUT_MS, ENV_DATABASE_PATH, ENV_POOL_SIZE,
};
pub use pool::SqlitePool;
pub use quota::SqliteQuotaStore;

use quotaward::StoreError;
use std::sync::Arc;

/// Open the database at `config.path`, create the schema, and return both
/// stores sharing one pool.
pub fn open(config: &SqliteConfig) -> Result<(SqliteQuotaStore, SqliteAuditStore), StoreError> {
    let pool = Arc::new(SqlitePool::open(config)?);
    Ok((SqliteQuotaStore::new(pool.clone()), SqliteAuditStore::new(pool)))
}
