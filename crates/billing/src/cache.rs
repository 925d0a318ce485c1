//! Quota cache
//!
//! Process-local read-through cache of computed quota answers. A latency
//! optimization only: entries expire after a short TTL and are deleted
//! (never updated in place) whenever a write touches the underlying state,
//! so the next read recomputes from authoritative storage. Lost entries on
//! restart have no correctness impact.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::catalog::QuotaResource;
use crate::entitlement::QuotaCheck;

/// Default entry lifetime; bounds staleness after an uninvalidated change
pub const QUOTA_CACHE_TTL: Duration = Duration::from_secs(30);

/// Full expiry sweep every this many inserts, so entries for users that
/// are never read again still get reclaimed
const EVICT_EVERY_N_INSERTS: usize = 1024;

struct CacheEntry {
    check: QuotaCheck,
    expires_at: Instant,
}

/// Per-user, per-resource cache of quota check results
pub struct QuotaCache {
    ttl: Duration,
    entries: RwLock<HashMap<(Uuid, QuotaResource), CacheEntry>>,
    inserts: AtomicUsize,
}

impl Default for QuotaCache {
    fn default() -> Self {
        Self::new(QUOTA_CACHE_TTL)
    }
}

impl QuotaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            inserts: AtomicUsize::new(0),
        }
    }

    /// Fetch a live entry, if any
    ///
    /// An expired entry is removed on the way out rather than left for the
    /// sweep, so hot keys never linger past their TTL.
    pub fn get(&self, user_id: Uuid, resource: QuotaResource) -> Option<QuotaCheck> {
        let now = Instant::now();
        {
            let entries = self.entries.read().ok()?;
            let entry = entries.get(&(user_id, resource))?;
            if entry.expires_at > now {
                return Some(entry.check.clone());
            }
        }

        if let Ok(mut entries) = self.entries.write() {
            // Re-check under the write lock; a concurrent insert may have
            // refreshed the entry
            if entries
                .get(&(user_id, resource))
                .is_some_and(|entry| entry.expires_at <= now)
            {
                entries.remove(&(user_id, resource));
            }
        }
        None
    }

    pub fn insert(&self, user_id: Uuid, resource: QuotaResource, check: QuotaCheck) {
        let sweep = self.inserts.fetch_add(1, Ordering::Relaxed) % EVICT_EVERY_N_INSERTS
            == EVICT_EVERY_N_INSERTS - 1;

        if let Ok(mut entries) = self.entries.write() {
            if sweep {
                let now = Instant::now();
                entries.retain(|_, entry| entry.expires_at > now);
            }
            entries.insert(
                (user_id, resource),
                CacheEntry {
                    check,
                    expires_at: Instant::now() + self.ttl,
                },
            );
        }
    }

    /// Drop every cached answer for a user
    ///
    /// Called after any write that can change the answer: counter
    /// increments and subscription-state changes from the reconciler or
    /// the trial sweep.
    pub fn invalidate_user(&self, user_id: Uuid) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|(cached_user, _), _| *cached_user != user_id);
        }
    }

    /// Remove expired entries so long-lived processes don't accumulate them
    pub fn evict_expired(&self) {
        let now = Instant::now();
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|_, entry| entry.expires_at > now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Limit;

    fn check(allowed: bool) -> QuotaCheck {
        QuotaCheck {
            allowed,
            remaining: Limit::Count(3),
            limit: Limit::Count(25),
        }
    }

    #[test]
    fn insert_then_get_within_ttl() {
        let cache = QuotaCache::new(Duration::from_secs(30));
        let user = Uuid::new_v4();

        cache.insert(user, QuotaResource::PantryItems, check(true));
        let hit = cache.get(user, QuotaResource::PantryItems).unwrap();
        assert!(hit.allowed);
        assert_eq!(hit.limit, Limit::Count(25));
    }

    #[test]
    fn expired_entries_are_misses() {
        let cache = QuotaCache::new(Duration::ZERO);
        let user = Uuid::new_v4();

        cache.insert(user, QuotaResource::PantryItems, check(true));
        assert!(cache.get(user, QuotaResource::PantryItems).is_none());
    }

    #[test]
    fn expired_reads_do_not_leave_entries_behind() {
        let cache = QuotaCache::new(Duration::ZERO);
        let users: Vec<Uuid> = (0..100).map(|_| Uuid::new_v4()).collect();

        for user in &users {
            cache.insert(*user, QuotaResource::PantryItems, check(true));
        }
        for user in &users {
            assert!(cache.get(*user, QuotaResource::PantryItems).is_none());
        }

        // Every miss dropped its dead entry, so distinct one-shot users
        // don't accumulate in a long-lived process
        assert_eq!(cache.entries.read().unwrap().len(), 0);
    }

    #[test]
    fn insert_sweep_reclaims_unread_entries() {
        let cache = QuotaCache::new(Duration::ZERO);

        for _ in 0..EVICT_EVERY_N_INSERTS {
            cache.insert(Uuid::new_v4(), QuotaResource::PantryItems, check(true));
        }

        // The periodic sweep ran on the last insert and dropped every
        // expired entry, even though none were ever read
        assert_eq!(cache.entries.read().unwrap().len(), 1);
    }

    #[test]
    fn invalidate_user_removes_all_resources() {
        let cache = QuotaCache::new(Duration::from_secs(30));
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();

        for resource in QuotaResource::ALL {
            cache.insert(user, resource, check(true));
        }
        cache.insert(other, QuotaResource::PantryItems, check(false));

        cache.invalidate_user(user);

        for resource in QuotaResource::ALL {
            assert!(cache.get(user, resource).is_none());
        }
        // Unrelated users keep their entries
        assert!(cache.get(other, QuotaResource::PantryItems).is_some());
    }

    #[test]
    fn evict_expired_keeps_live_entries() {
        let cache = QuotaCache::new(Duration::from_secs(30));
        let user = Uuid::new_v4();
        cache.insert(user, QuotaResource::CookwareItems, check(true));

        cache.evict_expired();
        assert!(cache.get(user, QuotaResource::CookwareItems).is_some());
    }
}
