// =============================================================================
// Provider Cache — TTL memory cache with an optional file-backed tier
// =============================================================================
//
// Entries are owned by the cache; readers get a deserialized copy, never a
// reference into the store. Staleness is checked on read and stale entries
// are reaped lazily. The optional file tier persists entries across restarts
// under a configured size cap, evicting oldest-first.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One cached value. `fetched_at`/`ttl` decide staleness; `etag` is kept for
/// conditional revalidation by adapters that support it.
struct CacheEntry {
    value: Vec<u8>,
    #[allow(dead_code)]
    etag: Option<String>,
    fetched_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() <= self.ttl
    }
}

/// Counter snapshot for the health endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
    pub file_hits: u64,
}

/// Wrapper persisted to the file tier; wall-clock based since `Instant` does
/// not survive a restart.
#[derive(Serialize, Deserialize)]
struct FileEntry {
    stored_at_ms: i64,
    ttl_secs: u64,
    value: serde_json::Value,
}

struct FileTier {
    dir: PathBuf,
    max_bytes: u64,
}

impl FileTier {
    fn path_for(&self, key: &str) -> PathBuf {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        self.dir.join(format!("{:016x}.json", hasher.finish()))
    }

    fn read(&self, key: &str) -> Option<serde_json::Value> {
        let raw = std::fs::read_to_string(self.path_for(key)).ok()?;
        let entry: FileEntry = serde_json::from_str(&raw).ok()?;

        let age_ms = Utc::now().timestamp_millis().saturating_sub(entry.stored_at_ms);
        if age_ms < 0 || age_ms as u64 > entry.ttl_secs * 1000 {
            return None;
        }
        Some(entry.value)
    }

    fn write(&self, key: &str, value: &serde_json::Value, ttl: Duration) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create cache dir {}", self.dir.display()))?;

        let entry = FileEntry {
            stored_at_ms: Utc::now().timestamp_millis(),
            ttl_secs: ttl.as_secs(),
            value: value.clone(),
        };
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(&entry)?)?;
        std::fs::rename(&tmp, &path)?;

        self.enforce_size_cap();
        Ok(())
    }

    /// Evict oldest files until total size fits under the cap.
    fn enforce_size_cap(&self) {
        let Ok(entries) = std::fs::read_dir(&self.dir) else { return };

        let mut files: Vec<(PathBuf, u64, std::time::SystemTime)> = entries
            .flatten()
            .filter_map(|e| {
                let meta = e.metadata().ok()?;
                if !meta.is_file() {
                    return None;
                }
                let modified = meta.modified().ok()?;
                Some((e.path(), meta.len(), modified))
            })
            .collect();

        let total: u64 = files.iter().map(|(_, len, _)| len).sum();
        if total <= self.max_bytes {
            return;
        }

        files.sort_by_key(|(_, _, modified)| *modified);
        let mut excess = total - self.max_bytes;
        for (path, len, _) in files {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "file cache eviction failed");
                continue;
            }
            debug!(path = %path.display(), "file cache entry evicted");
            excess = excess.saturating_sub(len);
            if excess == 0 {
                break;
            }
        }
    }
}

/// TTL cache shared by all providers through the registry.
pub struct ProviderCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    file_tier: Option<FileTier>,
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    file_hits: AtomicU64,
}

impl ProviderCache {
    /// Memory-only cache.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            file_tier: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            file_hits: AtomicU64::new(0),
        }
    }

    /// Cache with a file-backed tier under `dir`, capped at `max_bytes`.
    pub fn with_file_tier(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        let mut cache = Self::new();
        cache.file_tier = Some(FileTier {
            dir: dir.into(),
            max_bytes,
        });
        cache
    }

    /// Fetch a fresh entry, or `None` on miss/stale. Stale entries are
    /// reaped on the way out.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(key) {
                if entry.is_fresh() {
                    if let Ok(value) = serde_json::from_slice(&entry.value) {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Some(value);
                    }
                }
            }
        }

        // Stale or missing in memory: reap, then consult the file tier.
        let had_stale = {
            let mut entries = self.entries.write();
            match entries.get(key) {
                Some(entry) if !entry.is_fresh() => {
                    entries.remove(key);
                    true
                }
                _ => false,
            }
        };
        if had_stale {
            self.stale.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(tier) = &self.file_tier {
            if let Some(value) = tier.read(key) {
                if let Ok(typed) = serde_json::from_value::<T>(value) {
                    self.file_hits.fetch_add(1, Ordering::Relaxed);
                    return Some(typed);
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert a value under `key` with the given TTL. Last writer wins.
    pub fn put<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let Ok(bytes) = serde_json::to_vec(value) else {
            warn!(key, "cache put skipped — value failed to serialize");
            return;
        };

        if let Some(tier) = &self.file_tier {
            if let Ok(json) = serde_json::to_value(value) {
                if let Err(e) = tier.write(key, &json, ttl) {
                    warn!(key, error = %e, "file cache write failed");
                }
            }
        }

        self.entries.write().insert(
            key.to_string(),
            CacheEntry {
                value: bytes,
                etag: None,
                fetched_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Drop an entry regardless of freshness.
    pub fn invalidate(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            file_hits: self.file_hits.load(Ordering::Relaxed),
        }
    }
}

impl Default for ProviderCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_within_ttl() {
        let cache = ProviderCache::new();
        cache.put("k", &vec![1, 2, 3], Duration::from_secs(60));

        let got: Vec<i32> = cache.get("k").unwrap();
        assert_eq!(got, vec![1, 2, 3]);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn zero_ttl_is_immediately_stale() {
        let cache = ProviderCache::new();
        cache.put("k", &42_u32, Duration::from_secs(0));
        std::thread::sleep(Duration::from_millis(5));

        assert!(cache.get::<u32>("k").is_none());
        let stats = cache.stats();
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = ProviderCache::new();
        cache.put("k", &1_u32, Duration::from_secs(60));
        cache.invalidate("k");
        assert!(cache.get::<u32>("k").is_none());
    }

    #[test]
    fn last_writer_wins() {
        let cache = ProviderCache::new();
        cache.put("k", &1_u32, Duration::from_secs(60));
        cache.put("k", &2_u32, Duration::from_secs(60));
        assert_eq!(cache.get::<u32>("k"), Some(2));
    }

    #[test]
    fn file_tier_survives_memory_invalidation() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ProviderCache::with_file_tier(dir.path(), 1024 * 1024);

        cache.put("k", &"payload".to_string(), Duration::from_secs(60));
        cache.invalidate("k");

        // Memory gone, file tier still fresh.
        let got: String = cache.get("k").unwrap();
        assert_eq!(got, "payload");
        assert_eq!(cache.stats().file_hits, 1);
    }

    #[test]
    fn file_tier_size_cap_evicts() {
        let dir = tempfile::tempdir().unwrap();
        // Cap small enough that a handful of entries forces eviction.
        let cache = ProviderCache::with_file_tier(dir.path(), 256);

        for i in 0..20 {
            cache.put(&format!("key-{i}"), &vec![i; 32], Duration::from_secs(60));
        }

        let total: u64 = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum();
        assert!(total <= 512, "file tier grew unbounded: {total} bytes");
    }
}
