// time-bounded key/value cache shared by the instance registry and the metadata cache
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

struct CacheEntry<V> {
    value: V,
    inserted: Instant,
}

/// Key/value map whose entries expire a fixed time after their last insert.
///
/// Expiry is lazy: nothing runs in the background. A stale entry is dropped
/// when it is looked up, when room is needed for an insert, or when
/// [`ExpiringCache::size`] compacts the map. Reads never renew an entry.
pub struct ExpiringCache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    /// `None` means unbounded
    max_size: Option<usize>,
    /// `None` means entries never expire
    ttl: Option<Duration>,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// A zero `max_size` means unbounded and a zero `ttl` means no timeout.
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_size: (max_size > 0).then_some(max_size),
            ttl: (!ttl.is_zero()).then_some(ttl),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Inserts or replaces `key`, renewing its timestamp.
    ///
    /// When the cache is full and `key` is new, one entry is evicted first:
    /// the first stale entry found, otherwise the oldest one.
    pub fn insert(&self, key: K, value: V) {
        let now = Instant::now();
        let mut entries = self.lock();

        if !entries.contains_key(&key) {
            if let Some(max_size) = self.max_size {
                if entries.len() >= max_size {
                    self.evict_one(&mut entries, now);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                inserted: now,
            },
        );
    }

    /// Returns a clone of the value for `key`, dropping it if it has gone stale.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if self.is_stale(entry, now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if self.is_stale(entry, now) => {
                entries.remove(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Removes `key`, returning its value if it was present (stale or not).
    pub fn invalidate<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.lock().remove(key).map(|entry| entry.value)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of live entries.
    ///
    /// Purges every stale entry before counting, so calling this compacts
    /// the cache as a side effect.
    pub fn size(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        if self.ttl.is_some() {
            entries.retain(|_, entry| !self.is_stale(entry, now));
        }
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn is_stale(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(entry.inserted) >= ttl,
            None => false,
        }
    }

    fn evict_one(&self, entries: &mut HashMap<K, CacheEntry<V>>, now: Instant) {
        let stale = entries
            .iter()
            .find(|(_, entry)| self.is_stale(entry, now))
            .map(|(key, _)| key.clone());

        let victim = stale.or_else(|| {
            entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted)
                .map(|(key, _)| key.clone())
        });

        if let Some(key) = victim {
            entries.remove(&key);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, CacheEntry<V>>> {
        // a panic while holding the lock cannot leave the map half-updated
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
