//! Content-addressed cache for rendered artifacts
//!
//! Keys are a checksum over exactly the inputs that determine a rendered
//! artifact (options text, code text, and optionally an explicit filename),
//! so a hit is always safe to reuse and clearing is always safe.
//!
//! There is no TTL and no LRU policy. Eviction happens by wholesale
//! replacement: a render pass builds a fresh table with [`ResultCache::begin_pass`],
//! copying over only the entries the pass reconfirms, and
//! [`CachePass::commit`] swaps it in. Diagrams removed from the document
//! therefore drop out after the next full render.
//!
//! # Example
//!
//! ```rust
//! use livedoc_cache::{CacheKey, ResultCache};
//!
//! let cache = ResultCache::new();
//! let key = CacheKey::for_render("{}", "A -> B", None);
//!
//! let pass = cache.begin_pass();
//! if pass.get(&key).is_none() {
//!     pass.put(key.clone(), "<svg/>".to_string());
//! }
//! pass.commit();
//!
//! assert_eq!(cache.get(&key).as_deref(), Some("<svg/>"));
//! ```

#![warn(missing_debug_implementations)]

use blake3::Hasher;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A cache key based on content hash
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Blake3 hash of the cache key components
    pub content_hash: [u8; 32],
}

impl CacheKey {
    /// Create a cache key from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        CacheKey {
            content_hash: *blake3::hash(bytes).as_bytes(),
        }
    }

    /// Create a cache key from multiple components
    ///
    /// Each component is length-prefixed so `["ab", "c"]` and `["a", "bc"]`
    /// hash differently.
    pub fn from_components(components: &[&[u8]]) -> Self {
        let mut hasher = Hasher::new();
        for component in components {
            hasher.update(&(component.len() as u64).to_le_bytes());
            hasher.update(component);
        }
        CacheKey {
            content_hash: *hasher.finalize().as_bytes(),
        }
    }

    /// Create a cache key for a rendered artifact
    pub fn for_render(options: &str, code: &str, filename: Option<&str>) -> Self {
        match filename {
            Some(name) => {
                Self::from_components(&[options.as_bytes(), code.as_bytes(), name.as_bytes()])
            }
            None => Self::from_components(&[options.as_bytes(), code.as_bytes()]),
        }
    }

    /// Get the hash as a hex string
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.content_hash).to_hex().to_string()
    }
}

/// A cached artifact with metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: String,

    /// When this entry was first rendered
    pub created_at: Instant,

    /// Number of times read back
    pub access_count: u64,
}

impl CacheEntry {
    pub fn new(value: String) -> Self {
        CacheEntry {
            value,
            created_at: Instant::now(),
            access_count: 0,
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Statistics about cache usage
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub total_size_bytes: usize,
}

impl CacheStats {
    /// Get cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Cache Statistics:")?;
        writeln!(
            f,
            "  Hits: {} | Misses: {} | Hit Rate: {:.1}%",
            self.hits,
            self.misses,
            self.hit_rate() * 100.0
        )?;
        writeln!(f, "  Entries: {}", self.entries)?;
        writeln!(f, "  Total Size: {} bytes", self.total_size_bytes)?;
        Ok(())
    }
}

/// Content-addressed store shared by every diagram kind in one document
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: DashMap<CacheKey, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get an artifact from the cache
    pub fn get(&self, key: &CacheKey) -> Option<String> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.access_count += 1;
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.value.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Store an artifact, replacing any previous value for the key
    pub fn put(&self, key: CacheKey, value: String) {
        self.entries.insert(key, CacheEntry::new(value));
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry and reset the counters
    pub fn clear(&self) {
        self.entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
            total_size_bytes: self.entries.iter().map(|e| e.value.len()).sum(),
        }
    }

    /// Start a render pass that rebuilds the cache from what it reconfirms
    pub fn begin_pass(&self) -> CachePass<'_> {
        CachePass {
            cache: self,
            fresh: DashMap::new(),
        }
    }
}

/// A fresh cache table built alongside the live one during a full render
///
/// Dropping the pass without committing leaves the live cache untouched.
#[derive(Debug)]
pub struct CachePass<'a> {
    cache: &'a ResultCache,
    fresh: DashMap<CacheKey, CacheEntry>,
}

impl CachePass<'_> {
    /// Look the key up in this pass, then in the live cache
    ///
    /// A hit in the live cache reconfirms the entry, copying it into the pass.
    pub fn get(&self, key: &CacheKey) -> Option<String> {
        if let Some(entry) = self.fresh.get(key) {
            self.cache.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.value.clone());
        }

        let value = self.cache.get(key)?;
        if let Some(entry) = self.cache.entries.get(key) {
            self.fresh.insert(key.clone(), entry.clone());
        }
        Some(value)
    }

    /// Record a newly rendered artifact in this pass
    pub fn put(&self, key: CacheKey, value: String) {
        self.fresh.insert(key, CacheEntry::new(value));
    }

    /// Number of entries reconfirmed or added so far
    pub fn len(&self) -> usize {
        self.fresh.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fresh.is_empty()
    }

    /// Replace the live cache contents with this pass
    ///
    /// Returns the number of entries evicted.
    pub fn commit(self) -> usize {
        let before = self.cache.entries.len();
        self.cache
            .entries
            .retain(|key, _| self.fresh.contains_key(key));
        let evicted = before - self.cache.entries.len();

        for (key, entry) in self.fresh {
            self.cache.entries.insert(key, entry);
        }

        if evicted > 0 {
            tracing::debug!(evicted, "cache pass dropped stale entries");
        }
        evicted
    }
}
