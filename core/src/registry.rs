//! Cache-key keyed registry of in-flight requests.
//!
//! # Design
//! Each `ApiClient` owns one registry; nothing is process-global. At most one
//! handle is registered per key. Registering a new handle cancels the previous
//! one inside the same critical section, so two requests for one key can
//! never both be live. The lock is a plain `std::sync::Mutex` because tokio
//! tasks may run on several worker threads; it is never held across an
//! `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tokio_util::sync::CancellationToken;

/// Why a request was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// `cancel_request` / `cancel_all_requests` was called.
    Explicit,
    /// A newer request was registered under the same cache key.
    Superseded,
}

/// Cancellation handle for one logical request. Clones share identity.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel with `reason`. The first reason wins.
    pub fn cancel(&self, reason: CancelReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn same(&self, other: &CancelHandle) -> bool {
        Arc::ptr_eq(&self.reason, &other.reason)
    }
}

/// Lock a mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct CancellationRegistry {
    entries: Mutex<HashMap<String, CancelHandle>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CancelHandle>> {
        lock(&self.entries)
    }

    /// Register `handle` under `key`, cancelling whatever was there.
    pub fn register(&self, key: &str, handle: CancelHandle) {
        let mut entries = self.entries();
        if let Some(previous) = entries.insert(key.to_string(), handle) {
            tracing::debug!(cache_key = key, "superseding in-flight request");
            previous.cancel(CancelReason::Superseded);
        }
    }

    /// Remove the entry for `key` only if it is still `handle`.
    pub fn resolve(&self, key: &str, handle: &CancelHandle) -> bool {
        let mut entries = self.entries();
        if entries.get(key).is_some_and(|current| current.same(handle)) {
            entries.remove(key);
            true
        } else {
            false
        }
    }

    /// Cancel and remove the request registered under `key`, if any.
    pub fn cancel(&self, key: &str) -> bool {
        let removed = self.entries().remove(key);
        match removed {
            Some(handle) => {
                handle.cancel(CancelReason::Explicit);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let drained: Vec<_> = self.entries().drain().collect();
        for (key, handle) in drained {
            tracing::debug!(cache_key = %key, "cancelling in-flight request");
            handle.cancel(CancelReason::Explicit);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
