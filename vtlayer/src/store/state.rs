//! Per-tile lifecycle state.
//!
//! ```text
//! request ──► Loading ──cancel──► LoadingCancelled ──response──► (gone)
//!                │                       │
//!                │ response              └──request──► Loading (new load id)
//!                ▼
//!             Loaded ──cancel──► (gone)
//! ```
//!
//! A failed fetch leaves the tile `Failed` (active but empty) until the view
//! cancels it or requests it again, which starts a new load. Destroyed tiles have no entry at all, so no transition can
//! lead out of destruction.

use tokio_util::sync::CancellationToken;

use crate::pipeline::LoadId;
use crate::tile::Tile;

/// State of one tile key in the store.
#[derive(Debug)]
pub(crate) enum TileState {
    /// Fetch+decode in flight.
    Loading {
        load: LoadId,
        cancellation: CancellationToken,
    },
    /// Cancelled while loading; the response will be discarded.
    LoadingCancelled { load: LoadId },
    /// Populated, indexed and on the surface.
    Loaded {
        tile: Tile,
        /// Conditional refetch in flight for a tile adopted from the cache.
        revalidating: Option<LoadId>,
    },
    /// The load attempt failed; the tile stays empty.
    Failed,
}

impl TileState {
    pub(crate) fn lifecycle(&self) -> TileLifecycle {
        match self {
            TileState::Loading { .. } => TileLifecycle::Loading,
            TileState::LoadingCancelled { .. } => TileLifecycle::LoadingCancelled,
            TileState::Loaded { .. } => TileLifecycle::Loaded,
            TileState::Failed => TileLifecycle::Failed,
        }
    }

    /// True while a response is still expected for this key.
    pub(crate) fn is_pending(&self) -> bool {
        matches!(
            self,
            TileState::Loading { .. }
                | TileState::LoadingCancelled { .. }
                | TileState::Loaded {
                    revalidating: Some(_),
                    ..
                }
        )
    }

    pub(crate) fn loaded_tile(&self) -> Option<&Tile> {
        match self {
            TileState::Loaded { tile, .. } => Some(tile),
            _ => None,
        }
    }

    pub(crate) fn loaded_tile_mut(&mut self) -> Option<&mut Tile> {
        match self {
            TileState::Loaded { tile, .. } => Some(tile),
            _ => None,
        }
    }
}

/// Public view of a tile's lifecycle. A destroyed tile has no lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileLifecycle {
    Loading,
    /// Cancelled while loading, waiting for the in-flight response.
    LoadingCancelled,
    Loaded,
    Failed,
}

impl TileLifecycle {
    /// True if the tile is part of the active set.
    pub fn is_active(&self) -> bool {
        !matches!(self, TileLifecycle::LoadingCancelled)
    }
}

/// Counts of tiles per lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub loading: usize,
    pub cancelled: usize,
    pub loaded: usize,
    pub failed: usize,
    /// Loaded tiles with a revalidation in flight.
    pub revalidating: usize,
}

impl StoreStats {
    /// Tiles in the active set.
    pub fn active(&self) -> usize {
        self.loading + self.loaded + self.failed
    }
}
