//! Local entry cache of a caching region.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use crate::config::{ExpirationAction, ExpirationAttributes, RegionConfig};
use crate::listener::Operation;

/// Counters of the local entry cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryCacheStats {
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl EntryCacheStats {
    /// Returns the number of lookups answered locally.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Returns the number of lookups that went to a server.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Returns the number of LRU evictions.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Returns the number of expired entries.
    pub fn expirations(&self) -> u64 {
        self.expirations
    }
}

struct CacheEntry<V> {
    // None once invalidated.
    value: Option<V>,
    modified_at: Instant,
    last_accessed: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: Option<V>, now: Instant) -> Self {
        Self {
            value,
            modified_at: now,
            last_accessed: now,
        }
    }
}

/// A local change produced by expiry or eviction.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LocalChange<K, V> {
    pub(crate) key: K,
    pub(crate) old_value: Option<V>,
    pub(crate) operation: Operation,
}

/// Result of storing a value locally.
#[derive(Debug)]
pub(crate) struct Stored<K, V> {
    pub(crate) old_value: Option<V>,
    pub(crate) existed: bool,
    pub(crate) evicted: Option<LocalChange<K, V>>,
}

/// Keys and values of a caching region kept on the client.
///
/// Entries expire by time to live (since the last modification) or idle
/// timeout (since the last access). Both only affect the local copy.
pub(crate) struct EntryCache<K, V> {
    store: HashMap<K, CacheEntry<V>>,
    idle: ExpirationAttributes,
    ttl: ExpirationAttributes,
    lru_limit: Option<usize>,
    stats: EntryCacheStats,
}

impl<K, V> std::fmt::Debug for EntryCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryCache")
            .field("entries", &self.store.len())
            .field("idle", &self.idle)
            .field("ttl", &self.ttl)
            .field("lru_limit", &self.lru_limit)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<K, V> EntryCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new(config: &RegionConfig) -> Self {
        Self {
            store: HashMap::new(),
            idle: config.entry_idle_timeout(),
            ttl: config.entry_time_to_live(),
            lru_limit: config.lru_entries_limit(),
            stats: EntryCacheStats::default(),
        }
    }

    /// Returns the cached value and refreshes its idle timer.
    pub(crate) fn get(&mut self, key: &K) -> Option<V> {
        let now = Instant::now();
        let (idle, ttl) = (self.idle, self.ttl);
        match self.store.get_mut(key) {
            Some(entry) if entry.value.is_some() && !is_expired(entry, idle, ttl, now) => {
                entry.last_accessed = now;
                self.stats.hits += 1;
                entry.value.clone()
            }
            _ => {
                self.stats.misses += 1;
                None
            }
        }
    }

    pub(crate) fn contains_key(&self, key: &K) -> bool {
        self.store.contains_key(key)
    }

    /// Stores `value`, evicting the least recently used entry when the
    /// limit is reached.
    pub(crate) fn put(&mut self, key: K, value: V) -> Stored<K, V> {
        let now = Instant::now();
        if let Some(entry) = self.store.get_mut(&key) {
            let old_value = entry.value.replace(value);
            entry.modified_at = now;
            entry.last_accessed = now;
            return Stored {
                old_value,
                existed: true,
                evicted: None,
            };
        }

        let evicted = match self.lru_limit {
            Some(limit) if self.store.len() >= limit => self.evict_lru(),
            _ => None,
        };
        self.store.insert(key, CacheEntry::new(Some(value), now));
        Stored {
            old_value: None,
            existed: false,
            evicted,
        }
    }

    /// Drops the value of `key`, keeping the entry. Returns `None` if the
    /// key is not cached, otherwise the previous value.
    pub(crate) fn invalidate(&mut self, key: &K) -> Option<Option<V>> {
        let entry = self.store.get_mut(key)?;
        Some(entry.value.take())
    }

    /// Removes `key`. Returns `None` if the key is not cached, otherwise
    /// the previous value.
    pub(crate) fn destroy(&mut self, key: &K) -> Option<Option<V>> {
        self.store.remove(key).map(|e| e.value)
    }

    pub(crate) fn clear(&mut self) -> usize {
        let count = self.store.len();
        self.store.clear();
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.store.len()
    }

    pub(crate) fn keys(&self) -> Vec<K> {
        self.store.keys().cloned().collect()
    }

    pub(crate) fn stats(&self) -> EntryCacheStats {
        self.stats
    }

    /// Applies expiration to every entry whose timer elapsed.
    pub(crate) fn sweep(&mut self) -> Vec<LocalChange<K, V>> {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&mut self, now: Instant) -> Vec<LocalChange<K, V>> {
        let (idle, ttl) = (self.idle, self.ttl);
        let due: Vec<(K, ExpirationAction)> = self
            .store
            .iter()
            .filter_map(|(key, entry)| {
                expired_action(entry, idle, ttl, now).map(|action| (key.clone(), action))
            })
            .collect();

        let mut changes = Vec::with_capacity(due.len());
        for (key, action) in due {
            match action {
                ExpirationAction::LocalDestroy => {
                    if let Some(entry) = self.store.remove(&key) {
                        changes.push(LocalChange {
                            key,
                            old_value: entry.value,
                            operation: Operation::ExpireDestroy,
                        });
                    }
                }
                ExpirationAction::LocalInvalidate => {
                    let old_value = self.store.get_mut(&key).and_then(|e| e.value.take());
                    if old_value.is_some() {
                        changes.push(LocalChange {
                            key,
                            old_value,
                            operation: Operation::ExpireInvalidate,
                        });
                    }
                }
            }
        }
        self.stats.expirations += changes.len() as u64;
        changes
    }

    fn evict_lru(&mut self) -> Option<LocalChange<K, V>> {
        let key = self
            .store
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(k, _)| k.clone())?;
        let entry = self.store.remove(&key)?;
        self.stats.evictions += 1;
        Some(LocalChange {
            key,
            old_value: entry.value,
            operation: Operation::Evict,
        })
    }
}

fn elapsed(since: Instant, now: Instant, timeout: Duration) -> bool {
    now.saturating_duration_since(since) >= timeout
}

fn is_expired<V>(
    entry: &CacheEntry<V>,
    idle: ExpirationAttributes,
    ttl: ExpirationAttributes,
    now: Instant,
) -> bool {
    (ttl.is_enabled() && elapsed(entry.modified_at, now, ttl.timeout()))
        || (idle.is_enabled() && elapsed(entry.last_accessed, now, idle.timeout()))
}

// Time to live wins over idle timeout when both elapsed.
fn expired_action<V>(
    entry: &CacheEntry<V>,
    idle: ExpirationAttributes,
    ttl: ExpirationAttributes,
    now: Instant,
) -> Option<ExpirationAction> {
    if ttl.is_enabled() && elapsed(entry.modified_at, now, ttl.timeout()) {
        return Some(ttl.action());
    }
    if idle.is_enabled() && elapsed(entry.last_accessed, now, idle.timeout()) {
        return Some(idle.action());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(
        idle: Option<ExpirationAttributes>,
        ttl: Option<ExpirationAttributes>,
        lru: Option<usize>,
    ) -> RegionConfig {
        let mut builder = RegionConfig::builder("r").caching_enabled(true);
        if let Some(idle) = idle {
            builder = builder.entry_idle_timeout(idle);
        }
        if let Some(ttl) = ttl {
            builder = builder.entry_time_to_live(ttl);
        }
        if let Some(lru) = lru {
            builder = builder.lru_entries_limit(lru);
        }
        builder.build().unwrap()
    }

    fn k(s: &str) -> String {
        s.to_string()
    }

    #[test]
    fn test_put_get_and_update() {
        let mut cache = EntryCache::<String, i32>::new(&config(None, None, None));
        let stored = cache.put(k("a"), 1);
        assert!(!stored.existed);
        let stored = cache.put(k("a"), 2);
        assert!(stored.existed);
        assert_eq!(stored.old_value, Some(1));
        assert_eq!(cache.get(&k("a")), Some(2));
        assert_eq!(cache.get(&k("b")), None);
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[test]
    fn test_invalidate_keeps_key() {
        let mut cache = EntryCache::<String, i32>::new(&config(None, None, None));
        cache.put(k("a"), 1);
        assert_eq!(cache.invalidate(&k("a")), Some(Some(1)));
        assert!(cache.contains_key(&k("a")));
        assert_eq!(cache.get(&k("a")), None);
        assert_eq!(cache.invalidate(&k("missing")), None);
        assert_eq!(cache.destroy(&k("a")), Some(None));
        assert!(!cache.contains_key(&k("a")));
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let mut cache = EntryCache::<String, i32>::new(&config(None, None, Some(2)));
        cache.put(k("a"), 1);
        std::thread::sleep(Duration::from_millis(2));
        cache.put(k("b"), 2);
        std::thread::sleep(Duration::from_millis(2));
        cache.get(&k("a"));
        let stored = cache.put(k("c"), 3);
        let evicted = stored.evicted.unwrap();
        assert_eq!(evicted.key, "b");
        assert_eq!(evicted.old_value, Some(2));
        assert_eq!(evicted.operation, Operation::Evict);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn test_ttl_destroy_sweep() {
        let ttl = ExpirationAttributes::new(Duration::from_secs(10), ExpirationAction::LocalDestroy);
        let mut cache = EntryCache::<String, i32>::new(&config(None, Some(ttl), None));
        cache.put(k("a"), 1);
        assert!(cache.sweep().is_empty());

        let later = Instant::now() + Duration::from_secs(11);
        let changes = cache.sweep_at(later);
        assert_eq!(
            changes,
            vec![LocalChange {
                key: k("a"),
                old_value: Some(1),
                operation: Operation::ExpireDestroy,
            }]
        );
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().expirations(), 1);
    }

    #[test]
    fn test_idle_invalidate_sweep_fires_once() {
        let idle =
            ExpirationAttributes::new(Duration::from_secs(5), ExpirationAction::LocalInvalidate);
        let mut cache = EntryCache::<String, i32>::new(&config(Some(idle), None, None));
        cache.put(k("a"), 1);
        let later = Instant::now() + Duration::from_secs(6);
        let changes = cache.sweep_at(later);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].operation, Operation::ExpireInvalidate);
        assert!(cache.contains_key(&k("a")));
        assert_eq!(cache.get(&k("a")), None);
        assert!(cache.sweep_at(later).is_empty());
    }

    #[test]
    fn test_expired_entry_is_a_miss_before_sweep() {
        let ttl =
            ExpirationAttributes::new(Duration::from_millis(1), ExpirationAction::LocalDestroy);
        let mut cache = EntryCache::<String, i32>::new(&config(None, Some(ttl), None));
        cache.put(k("a"), 1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&k("a")), None);
        assert!(cache.contains_key(&k("a")));
    }
}
