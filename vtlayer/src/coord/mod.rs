//! Tile coordinate module
//!
//! Provides the validated `(x, y, z)` tile coordinate, its canonical
//! [`TileKey`], and conversions between geographic coordinates and the
//! Web Mercator tile grid.

mod types;

pub use types::{
    CoordError, TileCoord, TileKey, MAX_LAT, MAX_LON, MAX_ZOOM, MIN_LAT, MIN_LON, MIN_ZOOM,
};

use std::f64::consts::PI;

use crate::geometry::Bbox;

/// Converts geographic coordinates to the tile containing them.
///
/// # Arguments
///
/// * `lat` - Latitude in degrees (-85.05112878 to 85.05112878)
/// * `lon` - Longitude in degrees (-180.0 to 180.0)
/// * `zoom` - Zoom level
#[inline]
pub fn to_tile_coords(lat: f64, lon: f64, zoom: u8) -> Result<TileCoord, CoordError> {
    if !(MIN_LAT..=MAX_LAT).contains(&lat) {
        return Err(CoordError::InvalidLatitude(lat));
    }
    if !(MIN_LON..=MAX_LON).contains(&lon) {
        return Err(CoordError::InvalidLongitude(lon));
    }
    if zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }

    let n = 2.0_f64.powi(zoom as i32);
    let max_index = (n as u64).saturating_sub(1) as u32;

    // The east edge (lon = 180) and south edge belong to the last tile
    let x = (((lon + 180.0) / 360.0 * n) as u32).min(max_index);
    let lat_rad = lat * PI / 180.0;
    let y = (((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n) as u32).min(max_index);

    TileCoord::new(x, y, zoom)
}

/// Converts a tile corner back to geographic coordinates.
///
/// Returns `(lon, lat)` of the tile's northwest corner.
#[inline]
pub fn tile_to_lon_lat(x: f64, y: f64, zoom: u8) -> (f64, f64) {
    let n = 2.0_f64.powi(zoom as i32);
    let lon = x / n * 360.0 - 180.0;
    let lat_rad = (PI * (1.0 - 2.0 * y / n)).sinh().atan();
    (lon, lat_rad * 180.0 / PI)
}

/// Geographic bounds of a tile as a lon/lat box.
pub fn tile_bounds(coord: &TileCoord) -> Bbox {
    let (west, north) = tile_to_lon_lat(coord.x() as f64, coord.y() as f64, coord.z());
    let (east, south) = tile_to_lon_lat(coord.x() as f64 + 1.0, coord.y() as f64 + 1.0, coord.z());
    Bbox::new(west, south, east, north)
}

/// Every tile at `zoom` that intersects a lon/lat box.
///
/// The box is clamped to the Web Mercator range first. Use
/// [`count_tiles_covering`] to size the result before building it.
pub fn tiles_covering(bbox: &Bbox, zoom: u8) -> Result<Vec<TileCoord>, CoordError> {
    let (top_left, bottom_right) = covering_corners(bbox, zoom)?;

    let mut tiles = Vec::new();
    for y in top_left.y()..=bottom_right.y() {
        for x in top_left.x()..=bottom_right.x() {
            tiles.push(TileCoord::new(x, y, zoom)?);
        }
    }
    Ok(tiles)
}

/// Number of tiles [`tiles_covering`] would return, without allocating them.
pub fn count_tiles_covering(bbox: &Bbox, zoom: u8) -> Result<u64, CoordError> {
    let (top_left, bottom_right) = covering_corners(bbox, zoom)?;
    let span = |low: u32, high: u32| high.checked_sub(low).map_or(0, |d| u64::from(d) + 1);
    Ok(span(top_left.x(), bottom_right.x()) * span(top_left.y(), bottom_right.y()))
}

/// Northwest and southeast tiles of a clamped lon/lat box.
fn covering_corners(bbox: &Bbox, zoom: u8) -> Result<(TileCoord, TileCoord), CoordError> {
    let west = bbox.min_x.clamp(MIN_LON, MAX_LON);
    let east = bbox.max_x.clamp(MIN_LON, MAX_LON);
    let south = bbox.min_y.clamp(MIN_LAT, MAX_LAT);
    let north = bbox.max_y.clamp(MIN_LAT, MAX_LAT);

    Ok((
        to_tile_coords(north, west, zoom)?,
        to_tile_coords(south, east, zoom)?,
    ))
}
