use quotaward::config::parse_var;
use quotaward::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DATABASE_PATH: &str = "quotaward.db";
pub const DEFAULT_POOL_SIZE: usize = 4;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

pub const ENV_DATABASE_PATH: &str = "QUOTAWARD_DATABASE_PATH";
pub const ENV_POOL_SIZE: &str = "QUOTAWARD_POOL_SIZE";
pub const ENV_BUSY_TIMEOUT_MS: &str = "QUOTAWARD_BUSY_TIMEOUT_MS";

/// Connection parameters for the SQLite stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file; created if missing.
    pub path: PathBuf,
    /// Connections opened up front; bounds concurrent store calls.
    pub pool_size: usize,
    /// How long SQLite waits on a locked database before failing a statement.
    pub busy_timeout_ms: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DATABASE_PATH),
            pool_size: DEFAULT_POOL_SIZE,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl SqliteConfig {
    /// Config for `path` with default pool and busy timeout.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), ..Self::default() }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(path) = lookup(ENV_DATABASE_PATH).filter(|p| !p.trim().is_empty()) {
            config.path = PathBuf::from(path);
        }
        if let Some(size) = parse_var(&lookup, ENV_POOL_SIZE)? {
            config.pool_size = size;
        }
        if let Some(ms) = parse_var(&lookup, ENV_BUSY_TIMEOUT_MS)? {
            config.busy_timeout_ms = ms;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Zero { field: "pool_size" });
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SqliteConfig::from_lookup(|_: &str| None).unwrap();
        assert_eq!(config, SqliteConfig::default());
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn overrides_and_validation() {
        let config = SqliteConfig::from_lookup(|var: &str| match var {
            ENV_DATABASE_PATH => Some("/tmp/q.db".into()),
            ENV_POOL_SIZE => Some("8".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.path, PathBuf::from("/tmp/q.db"));
        assert_eq!(config.pool_size, 8);

        let err = SqliteConfig::from_lookup(|var: &str| (var == ENV_POOL_SIZE).then(|| "0".into()))
            .unwrap_err();
        assert_eq!(err, ConfigError::Zero { field: "pool_size" });
    }
}
