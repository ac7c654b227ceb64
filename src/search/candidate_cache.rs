//! Search-result cache behind a swappable interface.
//!
//! Cache trouble must never fail a search: every error path here logs and
//! degrades to a miss (reads) or a dropped write.

use std::collections::HashMap;
use std::sync::Mutex;

use log::{info, warn};

use crate::db_manager::DbManager;
use crate::protocol::{CacheKey, RemoteCandidate};

/// Read/write interface the orchestrator depends on.
///
/// A `Some(vec![])` hit means the query ran before and legitimately found
/// nothing; only `None` sends the caller to the network.
pub trait CandidateCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<Vec<RemoteCandidate>>;
    fn put(&self, key: &CacheKey, candidates: &[RemoteCandidate]);
    /// Drops expired entries. Called once per batch, not per lookup.
    fn prune(&self);
}

/// Durable cache over the sqlite store, shared across worker threads.
pub struct SqliteCandidateCache {
    db: Mutex<DbManager>,
    ttl_seconds: u64,
}

impl SqliteCandidateCache {
    pub fn new(db: DbManager, ttl_seconds: u64) -> Self {
        Self {
            db: Mutex::new(db),
            ttl_seconds,
        }
    }
}

impl CandidateCache for SqliteCandidateCache {
    fn get(&self, key: &CacheKey) -> Option<Vec<RemoteCandidate>> {
        let Ok(db) = self.db.lock() else {
            warn!("Search cache lock poisoned; treating lookup as a miss");
            return None;
        };
        match db.get_candidates(key, self.ttl_seconds) {
            Ok(hit) => hit,
            Err(error) => {
                warn!("Search cache read failed: {error}; treating as a miss");
                None
            }
        }
    }

    fn put(&self, key: &CacheKey, candidates: &[RemoteCandidate]) {
        let Ok(db) = self.db.lock() else {
            warn!("Search cache lock poisoned; dropping cache write");
            return;
        };
        if let Err(error) = db.put_candidates(key, candidates) {
            warn!("Search cache write failed: {error}; continuing without caching");
        }
    }

    fn prune(&self) {
        let Ok(db) = self.db.lock() else {
            return;
        };
        match db.prune_expired(self.ttl_seconds) {
            Ok(removed) if removed > 0 => info!("Pruned {removed} expired search cache entries"),
            Ok(_) => {}
            Err(error) => warn!("Search cache prune failed: {error}"),
        }
    }
}

/// Process-local cache with no expiry, for callers that skip the durable
/// store.
#[derive(Default)]
pub struct MemoryCandidateCache {
    entries: Mutex<HashMap<String, Vec<RemoteCandidate>>>,
}

impl MemoryCandidateCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CandidateCache for MemoryCandidateCache {
    fn get(&self, key: &CacheKey) -> Option<Vec<RemoteCandidate>> {
        let Ok(entries) = self.entries.lock() else {
            return None;
        };
        entries.get(&key.storage_key()).cloned()
    }

    fn put(&self, key: &CacheKey, candidates: &[RemoteCandidate]) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.storage_key(), candidates.to_vec());
        }
    }

    fn prune(&self) {}
}

#[cfg(test)]
mod tests {
    use super::{CandidateCache, MemoryCandidateCache, SqliteCandidateCache};
    use crate::db_manager::DbManager;
    use crate::protocol::{CacheKey, RemoteCandidate, SearchTierKind};

    fn sample_candidate(title: &str) -> RemoteCandidate {
        RemoteCandidate {
            source_url: "https://example.com/track/42".to_string(),
            title: title.to_string(),
            artist: "Daft Punk".to_string(),
            label: String::new(),
            bpm: None,
            key: String::new(),
            genre: String::new(),
            release_date: String::new(),
        }
    }

    #[test]
    fn test_memory_cache_round_trip_and_empty_hit() {
        let cache = MemoryCandidateCache::new();
        let key = CacheKey::new("Daft Punk One More Time", SearchTierKind::Direct);

        assert_eq!(cache.get(&key), None);
        cache.put(&key, &[]);
        assert_eq!(cache.get(&key), Some(Vec::new()));

        cache.put(&key, &[sample_candidate("One More Time")]);
        let hit = cache.get(&key).expect("entry should exist");
        assert_eq!(hit.len(), 1);
    }

    #[test]
    fn test_memory_cache_distinguishes_tiers() {
        let cache = MemoryCandidateCache::new();
        let direct = CacheKey::new("one more time", SearchTierKind::Direct);
        let web = CacheKey::new("one more time", SearchTierKind::WebSearch);

        cache.put(&direct, &[sample_candidate("One More Time")]);
        assert!(cache.get(&web).is_none());
    }

    #[test]
    fn test_sqlite_cache_round_trip() {
        let db = DbManager::open_in_memory().expect("in-memory db should open");
        let cache = SqliteCandidateCache::new(db, 3_600);
        let key = CacheKey::new("Daft Punk One More Time", SearchTierKind::Direct);

        assert_eq!(cache.get(&key), None);
        cache.put(&key, &[sample_candidate("One More Time")]);
        let hit = cache.get(&key).expect("entry should exist");
        assert_eq!(hit[0].title, "One More Time");
    }

    #[test]
    fn test_sqlite_cache_prune_runs_without_error() {
        let db = DbManager::open_in_memory().expect("in-memory db should open");
        let cache = SqliteCandidateCache::new(db, 3_600);
        cache.put(
            &CacheKey::new("anything", SearchTierKind::Direct),
            &[sample_candidate("Anything")],
        );
        cache.prune();
        assert!(cache
            .get(&CacheKey::new("anything", SearchTierKind::Direct))
            .is_some());
    }
}
