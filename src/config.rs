//! Quota configuration.
//!
//! Everything is environment-sourced in production (`QuotaConfig::from_env`);
//! tests build configs directly or through [`QuotaConfig::from_lookup`].

use crate::quota::WindowPolicy;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Default number of admitted requests per window.
pub const DEFAULT_REQUEST_LIMIT: u32 = 20;
/// Default window length (24 hours).
pub const DEFAULT_WINDOW_SECS: u64 = 24 * 3600;
/// Default audit retention horizon.
pub const DEFAULT_RETENTION_DAYS: u64 = 30;
/// Default per-call store budget.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;
/// Default interval between retention sweeps.
pub const DEFAULT_PURGE_INTERVAL_SECS: u64 = 3600;

pub const ENV_REQUEST_LIMIT: &str = "QUOTAWARD_REQUEST_LIMIT";
pub const ENV_WINDOW_SECS: &str = "QUOTAWARD_WINDOW_SECS";
pub const ENV_RETENTION_DAYS: &str = "QUOTAWARD_RETENTION_DAYS";
pub const ENV_STORE_TIMEOUT_MS: &str = "QUOTAWARD_STORE_TIMEOUT_MS";
pub const ENV_PURGE_INTERVAL_SECS: &str = "QUOTAWARD_PURGE_INTERVAL_SECS";
pub const ENV_FAILURE_MODE: &str = "QUOTAWARD_FAILURE_MODE";

/// Errors produced when loading or validating configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable was set but did not parse.
    #[error("{var}={value:?} is not a valid value")]
    Unparsable { var: String, value: String },
    /// Limit must be >= 1.
    #[error("request_limit must be > 0 (got {0})")]
    InvalidLimit(u32),
    /// A duration field was zero or too large to represent as a timestamp offset.
    #[error("{field} must be > 0 and representable (got {value:?})")]
    InvalidDuration { field: &'static str, value: Duration },
    /// A count that must be positive was zero.
    #[error("{field} must be > 0")]
    Zero { field: &'static str },
}

/// What the engine does when the quota store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Admit the request and mark the decision degraded.
    #[default]
    Open,
    /// Deny the request.
    Closed,
}

impl FromStr for FailureMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "fail-open" | "fail_open" => Ok(Self::Open),
            "closed" | "fail-closed" | "fail_closed" => Ok(Self::Closed),
            _ => Err(()),
        }
    }
}

/// Quota, audit, and degradation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Admitted requests per user per window.
    pub request_limit: u32,

    /// Fixed window length in seconds.
    pub window_secs: u64,

    /// Audit records older than this many days are purged.
    pub retention_days: u64,

    /// Budget for a single store call, in milliseconds.
    pub store_timeout_ms: u64,

    /// Interval between retention sweeps, in seconds.
    pub purge_interval_secs: u64,

    /// Behaviour when the quota store is unreachable.
    pub failure_mode: FailureMode,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            request_limit: DEFAULT_REQUEST_LIMIT,
            window_secs: DEFAULT_WINDOW_SECS,
            retention_days: DEFAULT_RETENTION_DAYS,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            purge_interval_secs: DEFAULT_PURGE_INTERVAL_SECS,
            failure_mode: FailureMode::Open,
        }
    }
}

impl QuotaConfig {
    /// Load configuration from environment variables, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(limit) = parse_var(&lookup, ENV_REQUEST_LIMIT)? {
            config.request_limit = limit;
        }
        if let Some(secs) = parse_var(&lookup, ENV_WINDOW_SECS)? {
            config.window_secs = secs;
        }
        if let Some(days) = parse_var(&lookup, ENV_RETENTION_DAYS)? {
            config.retention_days = days;
        }
        if let Some(ms) = parse_var(&lookup, ENV_STORE_TIMEOUT_MS)? {
            config.store_timeout_ms = ms;
        }
        if let Some(secs) = parse_var(&lookup, ENV_PURGE_INTERVAL_SECS)? {
            config.purge_interval_secs = secs;
        }
        if let Some(mode) = parse_var(&lookup, ENV_FAILURE_MODE)? {
            config.failure_mode = mode;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject zero limits and zero or unrepresentable durations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window_policy()?;
        check_duration("retention", self.retention())?;
        check_duration("store_timeout", self.store_timeout())?;
        check_duration("purge_interval", self.purge_interval())?;
        Ok(())
    }

    /// The admission limit and window as a validated policy.
    pub fn window_policy(&self) -> Result<WindowPolicy, ConfigError> {
        WindowPolicy::new(self.request_limit, self.window())
    }

    /// Get window duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Get retention horizon
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(24 * 3600))
    }

    /// Get per-call store timeout
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Get interval between retention sweeps
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

/// Parse `var` through `lookup`; `Ok(None)` if it is unset.
pub fn parse_var<F, T>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Unparsable { var: var.to_string(), value: raw }),
    }
}

pub(crate) fn check_duration(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() || chrono::Duration::from_std(value).is_err() {
        return Err(ConfigError::InvalidDuration { field, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = QuotaConfig::default();
        assert_eq!(config.request_limit, 20);
        assert_eq!(config.window(), Duration::from_secs(24 * 3600));
        assert_eq!(config.retention(), Duration::from_secs(30 * 24 * 3600));
        assert_eq!(config.failure_mode, FailureMode::Open);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = QuotaConfig::from_lookup(lookup_from(&[
            (ENV_REQUEST_LIMIT, "3"),
            (ENV_WINDOW_SECS, "1"),
            (ENV_STORE_TIMEOUT_MS, "250"),
            (ENV_FAILURE_MODE, "closed"),
        ]))
        .unwrap();

        assert_eq!(config.request_limit, 3);
        assert_eq!(config.window(), Duration::from_secs(1));
        assert_eq!(config.store_timeout(), Duration::from_millis(250));
        assert_eq!(config.failure_mode, FailureMode::Closed);
        assert_eq!(config.retention_days, DEFAULT_RETENTION_DAYS);
    }

    #[test]
    fn test_unparsable_value_is_an_error() {
        let err = QuotaConfig::from_lookup(lookup_from(&[(ENV_REQUEST_LIMIT, "twenty")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Unparsable { var: ENV_REQUEST_LIMIT.into(), value: "twenty".into() }
        );
    }

    #[test]
    fn test_zero_limit_rejected() {
        let err = QuotaConfig::from_lookup(lookup_from(&[(ENV_REQUEST_LIMIT, "0")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidLimit(0));
    }

    #[test]
    fn test_window_past_year_9999_rejected() {
        let err = QuotaConfig::from_lookup(lookup_from(&[(ENV_WINDOW_SECS, "400000000000")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { field: "window", .. }));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = QuotaConfig { store_timeout_ms: 0, ..QuotaConfig::default() };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDuration { field: "store_timeout", .. })
        ));
    }

    #[test]
    fn test_failure_mode_parsing() {
        assert_eq!("OPEN".parse::<FailureMode>(), Ok(FailureMode::Open));
        assert_eq!("fail-closed".parse::<FailureMode>(), Ok(FailureMode::Closed));
        assert!("maybe".parse::<FailureMode>().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = QuotaConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: QuotaConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);

        let partial: QuotaConfig = serde_json::from_str(r#"{"request_limit": 5}"#).unwrap();
        assert_eq!(partial.request_limit, 5);
        assert_eq!(partial.window_secs, DEFAULT_WINDOW_SECS);
    }
}
