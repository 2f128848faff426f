use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use tb_options::ChainSnapshot;

/// Chain snapshot cache keyed by currency or underlying.
pub trait ChainCache: Send + Sync + std::fmt::Debug {
    fn get(&self, key: &str) -> Option<ChainSnapshot>;

    fn set(&self, key: &str, chain: ChainSnapshot);

    /// Returns true when an entry was removed.
    fn invalidate(&self, key: &str) -> bool;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    chain: ChainSnapshot,
    stored_at: DateTime<Utc>,
}

/// [`ChainCache`] over a concurrent map. Entries older than the TTL are
/// treated as absent and dropped on lookup.
#[derive(Debug)]
pub struct InMemoryChainCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Option<Duration>,
    stats: RwLock<CacheStats>,
}

impl Default for InMemoryChainCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryChainCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            ttl: None,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::new()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
        *self.stats.write() = CacheStats::default();
    }

    pub fn get_stats(&self) -> CacheStats {
        self.stats.read().clone()
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => now - entry.stored_at < ttl,
            None => true,
        }
    }
}

impl ChainCache for InMemoryChainCache {
    fn get(&self, key: &str) -> Option<ChainSnapshot> {
        let now = Utc::now();
        let hit = self
            .entries
            .get(key)
            .filter(|entry| self.is_fresh(entry, now))
            .map(|entry| entry.chain.clone());

        let mut stats = self.stats.write();
        match hit {
            Some(chain) => {
                stats.hits += 1;
                Some(chain)
            }
            None => {
                stats.misses += 1;
                drop(stats);
                if self
                    .entries
                    .remove_if(key, |_, entry| !self.is_fresh(entry, now))
                    .is_some()
                {
                    self.stats.write().expirations += 1;
                }
                None
            }
        }
    }

    fn set(&self, key: &str, chain: ChainSnapshot) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                chain,
                stored_at: Utc::now(),
            },
        );
        self.stats.write().stores += 1;
    }

    fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}
