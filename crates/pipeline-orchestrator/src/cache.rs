//! In-memory, time-bounded key→blob cache for rendered read-side artifacts
//! (split manifests, per-category listings, status summaries): a
//! `RwLock<HashMap<String, CacheEntry>>` with per-entry TTL expiry.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Default TTL for cached blobs (5 minutes) — rendered artifacts change only
/// when their owning run advances, so a short TTL trades a little staleness
/// for avoiding repeated disk reads/recomputation on every status poll.
const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(value: Vec<u8>, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn get(&self) -> Option<Vec<u8>> {
        if self.is_expired() {
            None
        } else {
            Some(self.value.clone())
        }
    }
}

/// Time-bounded key→blob store. Not persisted — safe to drop on restart,
/// since every entry is a cheap-to-recompute projection of durable state in
/// the [`pipeline_core::repository::Store`].
pub struct BlobCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl BlobCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries
            .read()
            .ok()
            .and_then(|guard| guard.get(key).and_then(|e| e.get()))
    }

    pub fn set(&self, key: String, value: Vec<u8>) {
        if let Ok(mut guard) = self.entries.write() {
            guard.insert(key, CacheEntry::new(value, self.ttl));
            // Prune expired entries once the table grows large rather than on
            // every write, keeping the common path a single insert.
            if guard.len() > 1000 {
                guard.retain(|_, entry| !entry.is_expired());
            }
        }
    }

    pub fn invalidate(&self, key: &str) {
        if let Ok(mut guard) = self.entries.write() {
            guard.remove(key);
        }
    }

    /// Drop every cached entry belonging to a run, e.g. after a restart
    /// clears that run's output directory.
    pub fn invalidate_prefix(&self, prefix: &str) {
        if let Ok(mut guard) = self.entries.write() {
            guard.retain(|k, _| !k.starts_with(prefix));
        }
    }
}

impl Default for BlobCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_value_before_expiry() {
        let cache = BlobCache::with_ttl(Duration::from_secs(60));
        cache.set("k".to_string(), vec![1, 2, 3]);
        assert_eq!(cache.get("k"), Some(vec![1, 2, 3]));
    }

    #[test]
    fn expired_entries_read_as_missing() {
        let cache = BlobCache::with_ttl(Duration::from_millis(1));
        cache.set("k".to_string(), vec![1]);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn invalidate_prefix_clears_a_runs_entries() {
        let cache = BlobCache::new();
        cache.set("run-1:status".to_string(), vec![1]);
        cache.set("run-1:split".to_string(), vec![2]);
        cache.set("run-2:status".to_string(), vec![3]);
        cache.invalidate_prefix("run-1:");
        assert_eq!(cache.get("run-1:status"), None);
        assert_eq!(cache.get("run-2:status"), Some(vec![3]));
    }
}
