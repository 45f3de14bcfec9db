//! Time-bounded membership verdict cache.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

/// A cached verdict and the instant it stops being valid.
#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    is_member: bool,
    expires_at: Instant,
}

/// Process-wide map from external identity id to membership verdict.
///
/// Lookups take the shared lock, writes and sweeps take the exclusive one.
/// An expired entry is never returned; [`MembershipCache::sweep_expired`]
/// only reclaims memory.
#[derive(Debug, Default)]
pub struct MembershipCache {
    entries: RwLock<HashMap<i64, CacheEntry>>,
}

impl MembershipCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a verdict.
    ///
    /// Returns `None` when the id is absent or its entry has expired, which is
    /// distinct from `Some(false)` (cached as not a member).
    #[must_use]
    pub fn get(&self, external_id: i64) -> Option<bool> {
        self.get_at(external_id, Instant::now())
    }

    /// Look up a verdict as of `now`.
    #[must_use]
    pub fn get_at(&self, external_id: i64, now: Instant) -> Option<bool> {
        let entries = self.entries.read();
        entries
            .get(&external_id)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.is_member)
    }

    /// Store a verdict valid for `ttl`, replacing any prior entry.
    pub fn set(&self, external_id: i64, is_member: bool, ttl: Duration) {
        self.set_at(external_id, is_member, ttl, Instant::now());
    }

    /// Store a verdict valid for `ttl` from `now`.
    pub fn set_at(&self, external_id: i64, is_member: bool, ttl: Duration, now: Instant) {
        let entry = CacheEntry {
            is_member,
            expires_at: now + ttl,
        };
        self.entries.write().insert(external_id, entry);
    }

    /// Remove every expired entry, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    /// Remove every entry expired as of `now`.
    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "Swept expired membership verdicts");
        }
        removed
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_should_return_fresh_verdict() {
        let cache = MembershipCache::new();
        cache.set(42, true, Duration::from_secs(300));
        assert_eq!(cache.get(42), Some(true));

        cache.set(43, false, Duration::from_secs(300));
        assert_eq!(cache.get(43), Some(false));
        assert_eq!(cache.get(44), None);
    }

    #[test]
    fn test_should_treat_expired_entry_as_absent() {
        let cache = MembershipCache::new();
        cache.set(42, true, Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(42), None);
    }

    #[test]
    fn test_should_expire_exactly_at_deadline() {
        let cache = MembershipCache::new();
        let now = Instant::now();
        let ttl = Duration::from_secs(10);
        cache.set_at(42, true, ttl, now);
        assert_eq!(cache.get_at(42, now + ttl - Duration::from_millis(1)), Some(true));
        assert_eq!(cache.get_at(42, now + ttl), None);
    }

    #[test]
    fn test_should_overwrite_prior_entry() {
        let cache = MembershipCache::new();
        cache.set(42, true, Duration::from_secs(300));
        cache.set(42, false, Duration::from_secs(300));
        assert_eq!(cache.get(42), Some(false));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_should_sweep_only_expired_entries() {
        let cache = MembershipCache::new();
        let now = Instant::now();
        cache.set_at(1, true, Duration::from_secs(1), now);
        cache.set_at(2, true, Duration::from_secs(100), now);
        assert_eq!(cache.sweep_expired_at(now + Duration::from_secs(5)), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at(2, now + Duration::from_secs(5)), Some(true));
    }

    #[test]
    fn test_should_clear_all_entries() {
        let cache = MembershipCache::new();
        cache.set(1, true, Duration::from_secs(60));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_should_handle_concurrent_access() {
        let cache = Arc::new(MembershipCache::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        cache.set(t * 100 + i, i % 2 == 0, Duration::from_secs(60));
                        let _ = cache.get(i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 800);
    }
}
