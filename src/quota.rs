//! Quota types and the fixed-window admission rule.
//!
//! [`UserQuota::admit`] is the single place the window rule lives; stores that
//! cannot express it as one conditional statement run it under a per-key lock.

use crate::config::{check_duration, ConfigError};
use crate::error::IdentityError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Longest accepted user identity, in bytes.
pub const MAX_IDENTITY_LEN: usize = 255;

/// A validated user identity (typically an email address; the format is not checked).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserIdentity(String);

impl UserIdentity {
    pub fn new(raw: impl Into<String>) -> Result<Self, IdentityError> {
        let raw = raw.into();
        check_bounded("user_identity", &raw, MAX_IDENTITY_LEN)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserIdentity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserIdentity> for String {
    fn from(value: UserIdentity) -> Self {
        value.0
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UserIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub(crate) fn check_bounded(field: &'static str, value: &str, max: usize) -> Result<(), IdentityError> {
    if value.is_empty() {
        return Err(IdentityError::Empty { field });
    }
    if value.len() > max {
        return Err(IdentityError::TooLong { field, len: value.len(), max });
    }
    Ok(())
}

/// Longest accepted window: 100 years of 365.25 days.
pub const MAX_WINDOW: Duration = Duration::from_secs(3_155_760_000);

/// 9999-12-31T23:59:59Z, the last instant with a four-digit RFC3339 year.
const LATEST_RESET_SECS: i64 = 253_402_300_799;

/// Latest `window_reset_at` a policy will produce, so persisted timestamps
/// always keep a four-digit year.
pub fn latest_reset() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(LATEST_RESET_SECS, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Validated admission limit and fixed-window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    limit: u32,
    window: Duration,
    window_delta: chrono::Duration,
}

impl WindowPolicy {
    /// Create a policy. Errors if `limit` is zero or `window` is zero or
    /// longer than [`MAX_WINDOW`].
    pub fn new(limit: u32, window: Duration) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::InvalidLimit(limit));
        }
        check_duration("window", window)?;
        if window > MAX_WINDOW {
            return Err(ConfigError::InvalidDuration { field: "window", value: window });
        }
        let window_delta = chrono::Duration::from_std(window)
            .map_err(|_| ConfigError::InvalidDuration { field: "window", value: window })?;
        Ok(Self { limit, window, window_delta })
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Reset instant for a window opened at `now`, capped at [`latest_reset`].
    pub fn next_reset(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let latest = latest_reset();
        now.checked_add_signed(self.window_delta).map_or(latest, |at| at.min(latest))
    }
}

/// Persisted per-user counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserQuota {
    pub user_identity: UserIdentity,
    pub request_count: u32,
    pub window_reset_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserQuota {
    /// A row as lazily created on first sight of `identity`.
    pub fn fresh(identity: UserIdentity, now: DateTime<Utc>, policy: &WindowPolicy) -> Self {
        Self {
            user_identity: identity,
            request_count: 0,
            window_reset_at: policy.next_reset(now),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the stored window has elapsed at `now`.
    pub fn window_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_reset_at
    }

    /// Apply one admission attempt in place.
    ///
    /// An elapsed window is reset (count 0, new reset instant) before the limit
    /// is evaluated. A denial leaves the row untouched.
    pub fn admit(&mut self, now: DateTime<Utc>, policy: &WindowPolicy) -> bool {
        if self.window_elapsed(now) {
            self.request_count = 0;
            self.window_reset_at = policy.next_reset(now);
            self.updated_at = now;
        }
        if self.request_count < policy.limit() {
            self.request_count += 1;
            self.updated_at = now;
            true
        } else {
            false
        }
    }

    /// Requests still available at `now` without touching the row.
    pub fn remaining_at(&self, now: DateTime<Utc>, limit: u32) -> u32 {
        if self.window_elapsed(now) {
            limit
        } else {
            limit.saturating_sub(self.request_count)
        }
    }
}

/// Outcome of a store-level admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Row state after the attempt.
    pub quota: UserQuota,
}

/// Admission decision handed to the request pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests left in the current window after this one.
    pub remaining: u32,
    /// When the current window ends.
    pub reset_at: DateTime<Utc>,
    /// Set when the store could not be consulted and the failure policy decided.
    pub degraded: bool,
}

impl Decision {
    /// Build a decision from an authoritative store answer.
    pub fn from_admission(admission: &Admission, limit: u32) -> Self {
        let remaining = if admission.allowed {
            limit.saturating_sub(admission.quota.request_count)
        } else {
            0
        };
        Self {
            allowed: admission.allowed,
            remaining,
            reset_at: admission.quota.window_reset_at,
            degraded: false,
        }
    }

    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}
