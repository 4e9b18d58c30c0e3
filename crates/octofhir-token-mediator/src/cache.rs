//! Expiring credential cache.
//!
//! Each entry lives exactly as long as the assertion it was acquired for.
//! On insert a timer task is scheduled for the remaining lifetime of the
//! assertion; when it fires the entry is removed. Overwriting a key aborts
//! the previous timer, and every entry carries a generation number so a
//! timer that fires anyway can only remove the entry it was scheduled for.
//!
//! Lookups also compare against the deadline, so an entry is never returned
//! past its expiry even if its timer task has not run yet.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::assertion::IdentityKey;
use crate::credential::{Clock, Credential};

struct CacheEntry {
    credential: Credential,
    deadline: Instant,
    generation: u64,
    eviction: Option<AbortHandle>,
}

impl CacheEntry {
    fn cancel_eviction(&self) {
        if let Some(handle) = &self.eviction {
            handle.abort();
        }
    }
}

/// Credential cache keyed by identity with per-entry scheduled eviction.
pub struct ExpiringCache {
    entries: Arc<DashMap<IdentityKey, CacheEntry>>,
    generation: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl ExpiringCache {
    /// Creates an empty cache using the given wall clock.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
            clock,
        }
    }

    /// Looks up a live credential.
    #[must_use]
    pub fn get(&self, key: &IdentityKey) -> Option<Credential> {
        let entry = self.entries.get(key)?;
        if Instant::now() >= entry.deadline {
            return None;
        }
        Some(entry.credential.clone())
    }

    /// Inserts or overwrites a credential that expires at `expires_at`
    /// (Unix seconds).
    ///
    /// Returns `false` without caching if `expires_at` is not in the future;
    /// any existing entry for the key is evicted in that case.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn put(&self, key: IdentityKey, credential: Credential, expires_at: i64) -> bool {
        let Some(ttl) = self.remaining_lifetime(expires_at) else {
            tracing::debug!(key = %key, expires_at, "Assertion already expired, not caching");
            self.evict(&key);
            return false;
        };

        let deadline = Instant::now() + ttl;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

        let previous = self.entries.insert(
            key.clone(),
            CacheEntry {
                credential,
                deadline,
                generation,
                eviction: None,
            },
        );
        if let Some(previous) = previous {
            previous.cancel_eviction();
        }

        let entries = Arc::clone(&self.entries);
        let timer_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if entries
                .remove_if(&timer_key, |_, entry| entry.generation == generation)
                .is_some()
            {
                tracing::trace!(key = %timer_key, "Cached credential expired");
            }
        });

        if let Some(mut entry) = self.entries.get_mut(&key)
            && entry.generation == generation
        {
            entry.eviction = Some(handle.abort_handle());
        }

        tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "Credential cached");
        true
    }

    /// Removes an entry and cancels its timer. Idempotent.
    pub fn evict(&self, key: &IdentityKey) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                entry.cancel_eviction();
                true
            }
            None => false,
        }
    }

    /// Removes every entry and cancels all pending timers.
    pub fn clear(&self) {
        self.entries.retain(|_, entry| {
            entry.cancel_eviction();
            false
        });
    }

    /// Number of stored entries, including any whose timer has not fired yet.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remaining_lifetime(&self, expires_at: i64) -> Option<std::time::Duration> {
        let expires_at = OffsetDateTime::from_unix_timestamp(expires_at).ok()?;
        let remaining = expires_at - self.clock.now();
        if remaining <= time::Duration::ZERO {
            return None;
        }
        std::time::Duration::try_from(remaining).ok()
    }
}

impl Drop for ExpiringCache {
    fn drop(&mut self) {
        for entry in self.entries.iter() {
            entry.cancel_eviction();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::ManualClock;
    use std::time::Duration;

    fn cache_at(now: i64) -> (ExpiringCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at(now));
        (ExpiringCache::new(clock.clone()), clock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_and_get() {
        let (cache, _) = cache_at(100);
        let key = IdentityKey::new("u1", 100);

        assert!(cache.get(&key).is_none());
        assert!(cache.put(key.clone(), Credential::from("tok1"), 200));
        assert_eq!(cache.get(&key), Some(Credential::from("tok1")));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicted_at_expiry() {
        let (cache, _) = cache_at(100);
        let key = IdentityKey::new("u1", 100);
        cache.put(key.clone(), Credential::from("tok1"), 200);

        tokio::time::advance(Duration::from_secs(99)).await;
        assert!(cache.get(&key).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(&key).is_none());

        // Let the timer task run.
        tokio::task::yield_now().await;
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_assertion_not_cached() {
        let (cache, _) = cache_at(300);
        let key = IdentityKey::new("u1", 100);

        assert!(!cache.put(key.clone(), Credential::from("tok1"), 200));
        assert!(!cache.put(key.clone(), Credential::from("tok1"), 300));
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_supersedes_timer() {
        let (cache, clock) = cache_at(100);
        let key = IdentityKey::new("u1", 100);
        cache.put(key.clone(), Credential::from("old"), 110);

        clock.advance(Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.put(key.clone(), Credential::from("new"), 150);

        // The first entry's timer would have fired here.
        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(cache.get(&key), Some(Credential::from("new")));

        tokio::time::advance(Duration::from_secs(35)).await;
        tokio::task::yield_now().await;
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_is_idempotent() {
        let (cache, _) = cache_at(100);
        let key = IdentityKey::new("u1", 100);
        cache.put(key.clone(), Credential::from("tok1"), 200);

        assert!(cache.evict(&key));
        assert!(!cache.evict(&key));
        assert!(cache.get(&key).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear() {
        let (cache, _) = cache_at(100);
        cache.put(IdentityKey::new("u1", 100), Credential::from("a"), 200);
        cache.put(IdentityKey::new("u2", 100), Credential::from("b"), 200);

        cache.clear();
        assert!(cache.is_empty());
    }
}
