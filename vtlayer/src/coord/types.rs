//! Coordinate type definitions

use std::fmt;

use thiserror::Error;

/// Web Mercator valid latitude range
pub const MIN_LAT: f64 = -85.05112878;
pub const MAX_LAT: f64 = 85.05112878;

/// Valid longitude range
pub const MIN_LON: f64 = -180.0;
pub const MAX_LON: f64 = 180.0;

/// Supported zoom levels.
///
/// Capped so that `2^z` always fits in a `u32` tile index.
pub const MIN_ZOOM: u8 = 0;
pub const MAX_ZOOM: u8 = 30;

/// Tile coordinates in the slippy map (`z/x/y`) scheme.
///
/// A `TileCoord` can only be built through [`TileCoord::new`], so every
/// value in circulation satisfies `x < 2^z` and `y < 2^z`.
///
/// # Example
///
/// ```
/// use vtlayer::coord::TileCoord;
///
/// let coord = TileCoord::new(9646, 12320, 15).unwrap();
/// assert_eq!(coord.x(), 9646);
/// assert_eq!(coord.y(), 12320);
/// assert_eq!(coord.z(), 15);
/// assert_eq!(coord.key().as_str(), "9646:12320:15");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    /// X coordinate (east-west), 0 at west
    x: u32,
    /// Y coordinate (north-south), 0 at north
    y: u32,
    /// Zoom level
    z: u8,
}

impl TileCoord {
    /// Create a tile coordinate, validating it against the zoom level.
    pub fn new(x: u32, y: u32, z: u8) -> Result<Self, CoordError> {
        if z > MAX_ZOOM {
            return Err(CoordError::InvalidZoom(z));
        }
        let n = 1u64 << z;
        if u64::from(x) >= n || u64::from(y) >= n {
            return Err(CoordError::OutOfRange { x, y, z });
        }
        Ok(Self { x, y, z })
    }

    /// Get the tile column.
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Get the tile row.
    pub fn y(&self) -> u32 {
        self.y
    }

    /// Get the zoom level.
    pub fn z(&self) -> u8 {
        self.z
    }

    /// Canonical lookup key for this coordinate.
    pub fn key(&self) -> TileKey {
        TileKey(format!("{}:{}:{}", self.x, self.y, self.z))
    }

    /// Substitute `{z}`, `{x}` and `{y}` in a URL template.
    pub fn expand_url(&self, template: &str) -> String {
        template
            .replace("{z}", &self.z.to_string())
            .replace("{x}", &self.x.to_string())
            .replace("{y}", &self.y.to_string())
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Canonical, hashable identifier of a [`TileCoord`].
///
/// Keys are human-readable (`x:y:z`) so they can be logged directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey(String);

impl TileKey {
    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<TileCoord> for TileKey {
    fn from(coord: TileCoord) -> Self {
        coord.key()
    }
}

impl From<&TileCoord> for TileKey {
    fn from(coord: &TileCoord) -> Self {
        coord.key()
    }
}

/// Errors that can occur during coordinate validation or conversion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordError {
    /// Zoom level outside `MIN_ZOOM..=MAX_ZOOM`.
    #[error("Invalid zoom level: {0} (max {MAX_ZOOM})")]
    InvalidZoom(u8),

    /// Column or row not below `2^z`.
    #[error("Tile ({x}, {y}) out of range at zoom {z}")]
    OutOfRange { x: u32, y: u32, z: u8 },

    /// Latitude outside the Web Mercator range.
    #[error("Invalid latitude: {0}")]
    InvalidLatitude(f64),

    /// Longitude outside -180..=180.
    #[error("Invalid longitude: {0}")]
    InvalidLongitude(f64),
}
