//! Bounded least-recently-used cache of decoded tiles.
//!
//! The cache answers "do we already have this tile's decoded data" across
//! reloads. It is mutated only from the coordination context, so it needs no
//! interior locking.
//!
//! Eviction only forgets the cached copy. A tile that is still part of the
//! store's active set stays on the surface after its cache entry is evicted.

mod tile_cache;

pub use tile_cache::TileCache;

use std::fmt;

use thiserror::Error;

/// Errors that can occur during cache operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A negative capacity was requested.
    #[error("invalid cache capacity {0}: must be non-negative")]
    InvalidCapacity(i64),
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of `get` calls that found an entry.
    pub hits: u64,
    /// Number of `get` calls that found nothing.
    pub misses: u64,
    /// Number of entries dropped from the tail.
    pub evictions: u64,
    /// Entries currently held.
    pub entry_count: usize,
    /// Current capacity.
    pub capacity: usize,
}

impl CacheStats {
    /// Hit rate in `[0, 1]`, or `0.0` before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} entries, {} hits, {} misses, {} evictions ({:.1}% hit rate)",
            self.entry_count,
            self.capacity,
            self.hits,
            self.misses,
            self.evictions,
            self.hit_rate() * 100.0
        )
    }
}
