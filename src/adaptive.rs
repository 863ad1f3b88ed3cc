//! Live-updatable configuration cells.
//!
//! The engine keeps its [`WindowPolicy`](crate::quota::WindowPolicy) in a
//! [`DynamicConfig`] so operators can change the limit or window without a
//! restart. Each admission reads one snapshot; a change never splits a single
//! decision across two policies.
//!
//! The default backend is `ArcSwap` (lock-free reads). Feature
//! `adaptive-rwlock` switches to a `RwLock` for builds without `arc-swap`.

use std::sync::Arc;

#[cfg(feature = "adaptive-rwlock")]
use std::sync::RwLock;

#[cfg(not(feature = "adaptive-rwlock"))]
use arc_swap::ArcSwap;

/// Shared cell with cheap snapshots; clones observe the same value.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    #[cfg(not(feature = "adaptive-rwlock"))]
    inner: Arc<ArcSwap<T>>,
    #[cfg(feature = "adaptive-rwlock")]
    inner: Arc<RwLock<Arc<T>>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> DynamicConfig<T> {
    pub fn new(value: T) -> Self {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            Self { inner: Arc::new(RwLock::new(Arc::new(value))) }
        }
    }

    /// Snapshot the current value.
    pub fn get(&self) -> Arc<T> {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            self.inner.load_full()
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
        }
    }

    /// Install `value`; returns the value it replaced.
    pub fn replace(&self, value: T) -> Arc<T> {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            self.inner.swap(Arc::new(value))
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            let mut guard = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *guard, Arc::new(value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DynamicConfig;
    use crate::quota::WindowPolicy;
    use std::time::Duration;

    #[test]
    fn snapshots_survive_replacement() {
        let first = WindowPolicy::new(20, Duration::from_secs(86_400)).unwrap();
        let second = WindowPolicy::new(5, Duration::from_secs(60)).unwrap();
        let cell = DynamicConfig::new(first);
        let shared = cell.clone();

        let snapshot = cell.get();
        let previous = shared.replace(second);

        assert_eq!(*previous, first);
        assert_eq!(*snapshot, first);
        assert_eq!(*cell.get(), second);
    }
}
