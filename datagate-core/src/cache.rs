//! Time-bounded schema cache.
//!
//! Schema snapshots are expensive to build (one metadata query per source,
//! plus `PRAGMA table_info` per table on SQLite) and change rarely, so each
//! connector consults a [`SchemaCache`] before introspecting. An entry older
//! than its TTL is never served: lookups treat it as a miss and the next
//! `set` replaces it.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

/// TTL applied to live database schemas.
pub const DEFAULT_SCHEMA_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    /// `None` when the TTL runs past what `Instant` can represent
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| now < expires_at)
    }
}

/// Key to (value, expiry) map guarded by a read/write lock.
#[derive(Debug)]
pub struct SchemaCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA_TTL)
    }
}

static GLOBAL_CACHE: OnceLock<Arc<SchemaCache>> = OnceLock::new();

impl SchemaCache {
    /// Creates an empty cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Process-wide cache shared by connectors that were not given one.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL_CACHE.get_or_init(|| Arc::new(Self::default())))
    }

    /// Default TTL applied by [`SchemaCache::set`].
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached value if present and not expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        match entries.get(key) {
            Some(entry) if entry.is_fresh(Instant::now()) => {
                debug!(key, "Schema cache hit");
                Some(entry.value.clone())
            }
            Some(_) => {
                debug!(key, "Schema cache entry expired");
                None
            }
            None => {
                debug!(key, "Schema cache miss");
                None
            }
        }
    }

    /// Stores a value with the cache's default TTL.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.set_with_ttl(key, value, self.ttl);
    }

    /// Stores a value that expires after `ttl`.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) {
        let expires_at = Instant::now().checked_add(ttl);
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.insert(
            key.into(),
            CacheEntry {
                value: value.into(),
                expires_at,
            },
        );
    }

    /// Drops one entry, returning whether it existed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    /// Removes expired entries and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        before.saturating_sub(entries.len())
    }

    /// Removes all entries.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
