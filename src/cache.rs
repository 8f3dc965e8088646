//! TTL cache for fetched cloud range documents.

use ipnet::IpNet;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// A cached copy of a fetched range list.
#[derive(Debug, Clone)]
pub struct CachedRanges {
    /// Prefixes as fetched.
    pub ranges: Arc<Vec<IpNet>>,
    /// When this entry was cached.
    pub cached_at: Instant,
    /// TTL for this entry.
    pub ttl: Duration,
}

impl CachedRanges {
    /// Check if this cache entry has expired.
    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }
}

/// Thread-safe single-entry TTL cache.
///
/// A zero TTL disables caching: `set` is a no-op and `get` always misses.
pub struct RangeCache {
    entry: RwLock<Option<CachedRanges>>,
    ttl: Duration,
}

impl RangeCache {
    /// Create a new range cache.
    pub fn new(ttl_seconds: u64) -> Self {
        Self::with_ttl(Duration::from_secs(ttl_seconds))
    }

    /// Create a new range cache with an explicit TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entry: RwLock::new(None),
            ttl,
        }
    }

    /// Whether this cache ever holds entries.
    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Get the cached ranges if present and not expired.
    pub fn get(&self) -> Option<Arc<Vec<IpNet>>> {
        let entry = self.entry.read().ok()?;
        match entry.as_ref() {
            Some(cached) if !cached.is_expired() => Some(cached.ranges.clone()),
            _ => None,
        }
    }

    /// Store freshly fetched ranges.
    pub fn set(&self, ranges: Arc<Vec<IpNet>>) {
        if !self.is_enabled() {
            return;
        }

        if let Ok(mut entry) = self.entry.write() {
            *entry = Some(CachedRanges {
                ranges,
                cached_at: Instant::now(),
                ttl: self.ttl,
            });
        }
    }

    /// Check if the cache holds no live entry.
    pub fn is_empty(&self) -> bool {
        self.get().is_none()
    }
}
