use crate::protocol::{CacheKey, PipelineError, RemoteCandidate};
use log::warn;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub struct DbManager {
    conn: Connection,
}

impl DbManager {
    pub fn new(path_override: Option<&str>) -> Result<Self, PipelineError> {
        let db_path = match path_override {
            Some(path) => PathBuf::from(path),
            None => default_cache_path(),
        };
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let db_manager = Self { conn };
        db_manager.initialize_schema()?;
        db_manager.migrate()?;
        Ok(db_manager)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let db_manager = Self { conn };
        db_manager.initialize_schema()?;
        db_manager.migrate()?;
        Ok(db_manager)
    }

    fn initialize_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS search_cache (
                cache_key TEXT PRIMARY KEY,
                tier TEXT NOT NULL,
                candidates_json TEXT NOT NULL,
                stored_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        // Check if we need to add the tier column (for caches written before
        // tiered search, which keyed rows on the bare normalized query).
        let mut stmt = self.conn.prepare("PRAGMA table_info(search_cache)")?;
        let columns = stmt.query_map([], |row| row.get::<_, String>(1))?;
        let mut has_tier = false;
        for col in columns {
            if col? == "tier" {
                has_tier = true;
                break;
            }
        }

        if !has_tier {
            self.conn
                .execute("ALTER TABLE search_cache ADD COLUMN tier TEXT", [])?;

            // Old rows were all direct-tier fetches; fold the tier into the
            // key so they line up with the current storage form.
            self.conn.execute(
                "UPDATE search_cache
                 SET tier = 'direct', cache_key = 'direct' || char(31) || cache_key
                 WHERE tier IS NULL",
                [],
            )?;
        }

        Ok(())
    }

    pub fn get_candidates(
        &self,
        key: &CacheKey,
        ttl_seconds: u64,
    ) -> Result<Option<Vec<RemoteCandidate>>, rusqlite::Error> {
        let row: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT candidates_json, stored_at FROM search_cache WHERE cache_key = ?1",
                params![key.storage_key()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((candidates_json, stored_at)) = row else {
            return Ok(None);
        };
        if is_expired(stored_at, ttl_seconds) {
            return Ok(None);
        }
        match serde_json::from_str::<Vec<RemoteCandidate>>(&candidates_json) {
            Ok(candidates) => Ok(Some(candidates)),
            Err(error) => {
                warn!(
                    "Discarding unreadable cache entry for {:?}: {error}",
                    key.storage_key()
                );
                Ok(None)
            }
        }
    }

    pub fn put_candidates(
        &self,
        key: &CacheKey,
        candidates: &[RemoteCandidate],
    ) -> Result<(), rusqlite::Error> {
        self.put_candidates_at(key, candidates, unix_timestamp())
    }

    fn put_candidates_at(
        &self,
        key: &CacheKey,
        candidates: &[RemoteCandidate],
        stored_at: u64,
    ) -> Result<(), rusqlite::Error> {
        let candidates_json = serde_json::to_string(candidates).unwrap_or_else(|_| "[]".to_string());
        self.conn.execute(
            "INSERT OR REPLACE INTO search_cache (cache_key, tier, candidates_json, stored_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                key.storage_key(),
                key.tier.label(),
                candidates_json,
                stored_at as i64
            ],
        )?;
        Ok(())
    }

    pub fn prune_expired(&self, ttl_seconds: u64) -> Result<usize, rusqlite::Error> {
        let cutoff = unix_timestamp().saturating_sub(ttl_seconds);
        let removed = self.conn.execute(
            "DELETE FROM search_cache WHERE stored_at < ?1",
            params![cutoff as i64],
        )?;
        Ok(removed)
    }

    pub fn entry_count(&self) -> Result<usize, rusqlite::Error> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM search_cache", [], |r| r.get(0))?;
        Ok(count as usize)
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

fn is_expired(stored_at: i64, ttl_seconds: u64) -> bool {
    let now = unix_timestamp();
    let stored_at = stored_at.max(0) as u64;
    stored_at.saturating_add(ttl_seconds) <= now
}

fn default_cache_path() -> PathBuf {
    let data_dir = match dirs::data_dir() {
        Some(dir) => dir,
        None => {
            warn!("No platform data directory; keeping the search cache in the temp directory");
            std::env::temp_dir()
        }
    };
    data_dir.join("cratedig").join("search_cache.db")
}
