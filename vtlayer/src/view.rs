//! View context signals.
//!
//! The host view reports raw tile coordinates as tiles scroll in and out.
//! Coordinates are validated here; out-of-range ones never reach the store.

use crate::coord::TileCoord;

/// A change in the set of tiles in view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewEvent {
    /// A tile entered the view and should be loaded.
    TileEntered { x: i64, y: i64, z: i64 },
    /// A tile left the view and should be cancelled.
    TileLeft { x: i64, y: i64, z: i64 },
}

impl ViewEvent {
    pub fn entered(coord: TileCoord) -> Self {
        ViewEvent::TileEntered {
            x: i64::from(coord.x()),
            y: i64::from(coord.y()),
            z: i64::from(coord.z()),
        }
    }

    pub fn left(coord: TileCoord) -> Self {
        ViewEvent::TileLeft {
            x: i64::from(coord.x()),
            y: i64::from(coord.y()),
            z: i64::from(coord.z()),
        }
    }

    /// The validated coordinate, or `None` if it is out of range.
    pub fn coord(&self) -> Option<TileCoord> {
        let (x, y, z) = match *self {
            ViewEvent::TileEntered { x, y, z } | ViewEvent::TileLeft { x, y, z } => (x, y, z),
        };
        let x = u32::try_from(x).ok()?;
        let y = u32::try_from(y).ok()?;
        let z = u8::try_from(z).ok()?;
        TileCoord::new(x, y, z).ok()
    }
}
