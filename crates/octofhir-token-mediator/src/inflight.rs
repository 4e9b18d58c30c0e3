//! In-flight acquisition registry.
//!
//! Guarantees at most one outstanding credential acquisition per identity
//! key. The first caller for a key starts the acquisition; callers arriving
//! while it runs attach to the same [`PendingAcquisition`] and all observe
//! its single outcome, success or failure.
//!
//! The acquisition runs on its own Tokio task, so it completes (and
//! deregisters itself) even if every waiter is dropped. Successful
//! acquisitions are removed as soon as they resolve. Failed ones stay
//! registered for the configured negative TTL, during which new callers
//! receive the same failure instead of hammering the backing store, and are
//! then removed so the next caller retries.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::task::AbortHandle;

use crate::MediationResult;
use crate::assertion::IdentityKey;
use crate::credential::Credential;
use crate::error::MediationError;

/// A shared, single-resolution handle on an in-progress acquisition.
///
/// Cloning attaches another waiter; it never starts a second acquisition.
pub type PendingAcquisition = Shared<BoxFuture<'static, MediationResult<Credential>>>;

struct InFlightEntry {
    id: u64,
    acquisition: PendingAcquisition,
    task: AbortHandle,
}

struct RegistryInner {
    entries: DashMap<IdentityKey, InFlightEntry>,
    next_id: AtomicU64,
    negative_ttl: Duration,
}

impl RegistryInner {
    fn remove(&self, key: &IdentityKey, id: u64) {
        if self.entries.remove_if(key, |_, entry| entry.id == id).is_some() {
            tracing::trace!(key = %key, "In-flight acquisition deregistered");
        }
    }
}

/// Deduplicates concurrent acquisitions per identity key.
#[derive(Clone)]
pub struct InFlightRegistry {
    inner: Arc<RegistryInner>,
}

impl InFlightRegistry {
    /// Creates a registry whose failed acquisitions are remembered for
    /// `negative_ttl` (zero removes them immediately).
    #[must_use]
    pub fn new(negative_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: DashMap::new(),
                next_id: AtomicU64::new(0),
                negative_ttl,
            }),
        }
    }

    /// Returns the pending acquisition for `key`, starting one with `start`
    /// if none is registered.
    ///
    /// The lookup and the registration happen under the map's per-key lock,
    /// so concurrent callers for one key always share a single acquisition.
    /// `start` runs on the spawned task, outside that lock.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn get_or_start<F, Fut>(&self, key: &IdentityKey, start: F) -> PendingAcquisition
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = MediationResult<Credential>> + Send + 'static,
    {
        match self.inner.entries.entry(key.clone()) {
            Entry::Occupied(entry) => {
                tracing::debug!(key = %key, "Joining in-flight acquisition");
                entry.get().acquisition.clone()
            }
            Entry::Vacant(entry) => {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                let registry = Arc::clone(&self.inner);
                let task_key = key.clone();

                let task = tokio::spawn(async move {
                    let outcome = AssertUnwindSafe(async move { start().await })
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            Err(MediationError::internal("credential acquisition panicked"))
                        });
                    settle(registry, task_key, id, outcome.is_ok());
                    outcome
                });
                let abort = task.abort_handle();

                let acquisition = async move {
                    task.await.unwrap_or_else(|e| {
                        Err(MediationError::internal(format!(
                            "credential acquisition task did not complete: {e}"
                        )))
                    })
                }
                .boxed()
                .shared();

                entry.insert(InFlightEntry {
                    id,
                    acquisition: acquisition.clone(),
                    task: abort,
                });
                tracing::debug!(key = %key, "Started credential acquisition");
                acquisition
            }
        }
    }

    /// Returns `true` if an acquisition (or a remembered failure) is
    /// registered for `key`.
    #[must_use]
    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.inner.entries.contains_key(key)
    }

    /// Number of registered acquisitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Aborts every running acquisition and forgets all entries.
    ///
    /// Waiters on an aborted acquisition receive an `Internal` error.
    pub fn clear(&self) {
        self.inner.entries.retain(|_, entry| {
            entry.task.abort();
            false
        });
    }
}

fn settle(registry: Arc<RegistryInner>, key: IdentityKey, id: u64, succeeded: bool) {
    if succeeded || registry.negative_ttl.is_zero() {
        registry.remove(&key, id);
        return;
    }

    tracing::debug!(
        key = %key,
        negative_ttl_ms = registry.negative_ttl.as_millis() as u64,
        "Remembering failed acquisition"
    );
    tokio::spawn(async move {
        tokio::time::sleep(registry.negative_ttl).await;
        registry.remove(&key, id);
    });
}
