use crate::config::SqliteConfig;
use crate::schema::{self, db_error};
use quotaward::StoreError;
use rusqlite::{Connection, OpenFlags};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::debug;

/// Fixed-size connection pool.
///
/// A semaphore permit is held for the whole blocking call, so at most
/// `pool_size` statements are outstanding. The connection is returned to the
/// pool when the blocking task ends, even if the awaiting caller has already
/// given up on it.
#[derive(Debug)]
pub struct SqlitePool {
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl SqlitePool {
    /// Open `pool_size` connections and create the schema.
    pub fn open(config: &SqliteConfig) -> Result<Self, StoreError> {
        config.validate().map_err(|err| StoreError::InvalidInput(err.to_string()))?;

        let mut connections = Vec::with_capacity(config.pool_size);
        for _ in 0..config.pool_size {
            connections.push(open_connection(config)?);
        }
        if let Some(first) = connections.first() {
            schema::initialize(first)?;
        }
        debug!(path = %config.path.display(), size = config.pool_size, "sqlite pool opened");

        Ok(Self {
            idle: Mutex::new(connections),
            permits: Arc::new(Semaphore::new(config.pool_size)),
            size: config.pool_size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Refuse new calls; in-flight calls finish normally.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Run `f` with a pooled connection on the blocking thread pool.
    pub(crate) async fn run<T, F>(self: &Arc<Self>, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Unavailable("connection pool closed".into()))?;
        let pool = Arc::clone(self);

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut lease = pool.checkout()?;
            let conn = lease.connection()?;
            f(conn)
        })
        .await
        .map_err(|err| StoreError::Unavailable(format!("blocking store task failed: {}", err)))?
    }

    fn checkout(&self) -> Result<Lease<'_>, StoreError> {
        let conn = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
            .ok_or_else(|| StoreError::Unavailable("no idle connection".into()))?;
        Ok(Lease { pool: self, conn: Some(conn) })
    }
}

struct Lease<'a> {
    pool: &'a SqlitePool,
    conn: Option<Connection>,
}

impl Lease<'_> {
    fn connection(&mut self) -> Result<&mut Connection, StoreError> {
        self.conn.as_mut().ok_or_else(|| StoreError::Unavailable("connection already released".into()))
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(conn);
        }
    }
}

fn open_connection(config: &SqliteConfig) -> Result<Connection, StoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(&config.path, flags).map_err(db_error)?;
    conn.busy_timeout(config.busy_timeout()).map_err(db_error)?;
    let mode: String = conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .map_err(db_error)?;
    debug!(journal_mode = %mode, "sqlite connection opened");
    conn.pragma_update(None, "synchronous", "NORMAL").map_err(db_error)?;
    Ok(conn)
}
