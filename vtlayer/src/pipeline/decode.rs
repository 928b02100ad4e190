//! Vector tile payload decoding.
//!
//! Turns one binary payload into per-layer feature candidates, reprojecting
//! tile-local integer coordinates into longitude/latitude. Failures never
//! escape as an `Err` for the whole tile; they are collected into a
//! [`DecodeReport`] next to whatever decoded successfully.
//!
//! Cancellation is checked before each layer and each feature.

use std::borrow::Cow;
use std::f64::consts::PI;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use prost::Message;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::proto::{self, GeomType, CMD_CLOSE_PATH, CMD_LINE_TO, CMD_MOVE_TO};
use crate::coord::TileCoord;
use crate::geometry::{FeatureData, Geometry, Position, Properties, PropertyValue};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decode failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The payload is not a valid vector tile message.
    #[error("invalid protobuf payload: {0}")]
    Protobuf(String),

    /// The payload looked gzipped but could not be inflated.
    #[error("failed to inflate gzip payload: {0}")]
    Gzip(String),

    /// A geometry command id other than MoveTo, LineTo or ClosePath.
    #[error("unknown geometry command {0}")]
    UnknownCommand(u32),

    /// The command stream ended in the middle of a command.
    #[error("malformed geometry: {0}")]
    MalformedGeometry(String),

    /// The feature decoded to a geometry shape that is not supported.
    #[error("unsupported geometry type {0}")]
    UnsupportedGeometry(String),
}

impl DecodeError {
    /// True if the error ends decoding of the current layer.
    pub fn is_fatal_for_layer(&self) -> bool {
        matches!(
            self,
            DecodeError::UnknownCommand(_) | DecodeError::MalformedGeometry(_)
        )
    }
}

/// One decode problem and where it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Layer name, `None` for payload-level failures.
    pub layer: Option<String>,
    /// Feature index within the layer.
    pub feature: Option<usize>,
    pub error: DecodeError,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.layer, self.feature) {
            (Some(layer), Some(index)) => write!(f, "{}[{}]: {}", layer, index, self.error),
            (Some(layer), None) => write!(f, "{}: {}", layer, self.error),
            _ => write!(f, "{}", self.error),
        }
    }
}

/// Diagnostics collected while decoding one tile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeReport {
    pub diagnostics: Vec<Diagnostic>,
}

impl DecodeReport {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Features skipped for an unsupported geometry.
    pub fn skipped_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| matches!(d.error, DecodeError::UnsupportedGeometry(_)))
            .count()
    }

    /// Layers or payloads whose decoding stopped early.
    pub fn fatal_count(&self) -> usize {
        self.diagnostics.len() - self.skipped_count()
    }

    fn push(&mut self, layer: Option<&str>, feature: Option<usize>, error: DecodeError) {
        self.diagnostics.push(Diagnostic {
            layer: layer.map(str::to_string),
            feature,
            error,
        });
    }
}

/// A decoded feature candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFeature {
    /// Position within the layer's feature list.
    pub index: usize,
    pub data: Arc<FeatureData>,
}

/// All candidates of one layer, in payload order.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLayer {
    pub name: String,
    pub extent: u32,
    pub features: Vec<DecodedFeature>,
}

/// A fully decoded tile. Also the value kept in the tile cache.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTile {
    pub coord: TileCoord,
    pub layers: Vec<DecodedLayer>,
    /// Modification time reported by the source, or the fetch time.
    pub fetched_at: DateTime<Utc>,
    pub report: DecodeReport,
}

impl DecodedTile {
    fn failed(coord: TileCoord, fetched_at: DateTime<Utc>, error: DecodeError) -> Self {
        let mut report = DecodeReport::default();
        report.push(None, None, error);
        Self {
            coord,
            layers: Vec::new(),
            fetched_at,
            report,
        }
    }

    pub fn feature_count(&self) -> usize {
        self.layers.iter().map(|l| l.features.len()).sum()
    }
}

/// Decode a payload for `coord`.
///
/// Returns `None` if `cancel` fired before decoding finished.
pub fn decode_tile(
    payload: &[u8],
    coord: TileCoord,
    fetched_at: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Option<DecodedTile> {
    if cancel.is_cancelled() {
        return None;
    }

    let bytes = match inflate(payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(tile = %coord, error = %e, "Failed to inflate tile payload");
            return Some(DecodedTile::failed(coord, fetched_at, e));
        }
    };

    let message = match proto::Tile::decode(bytes.as_ref()) {
        Ok(message) => message,
        Err(e) => {
            warn!(tile = %coord, error = %e, "Failed to decode tile payload");
            return Some(DecodedTile::failed(
                coord,
                fetched_at,
                DecodeError::Protobuf(e.to_string()),
            ));
        }
    };

    let mut report = DecodeReport::default();
    let mut layers = Vec::with_capacity(message.layers.len());
    for layer in &message.layers {
        if cancel.is_cancelled() {
            return None;
        }
        layers.push(decode_layer(layer, coord, cancel, &mut report)?);
    }

    debug!(
        tile = %coord,
        layers = layers.len(),
        diagnostics = report.diagnostics.len(),
        "Tile decoded"
    );

    Some(DecodedTile {
        coord,
        layers,
        fetched_at,
        report,
    })
}

fn inflate(payload: &[u8]) -> Result<Cow<'_, [u8]>, DecodeError> {
    if !payload.starts_with(&GZIP_MAGIC) {
        return Ok(Cow::Borrowed(payload));
    }

    let mut decoder = GzDecoder::new(payload);
    let mut inflated = Vec::new();
    decoder
        .read_to_end(&mut inflated)
        .map_err(|e| DecodeError::Gzip(e.to_string()))?;
    Ok(Cow::Owned(inflated))
}

fn decode_layer(
    layer: &proto::Layer,
    coord: TileCoord,
    cancel: &CancellationToken,
    report: &mut DecodeReport,
) -> Option<DecodedLayer> {
    let extent = layer.extent();
    let mut features = Vec::with_capacity(layer.features.len());

    if extent == 0 {
        warn!(tile = %coord, layer = %layer.name, "Layer extent is zero, skipping layer");
        report.push(
            Some(&layer.name),
            None,
            DecodeError::MalformedGeometry("layer extent is zero".to_string()),
        );
        return Some(DecodedLayer {
            name: layer.name.clone(),
            extent,
            features,
        });
    }

    for (index, feature) in layer.features.iter().enumerate() {
        if cancel.is_cancelled() {
            return None;
        }

        match decode_feature(layer, feature, coord, extent) {
            Ok(data) => features.push(DecodedFeature {
                index,
                data: Arc::new(data),
            }),
            Err(e) if e.is_fatal_for_layer() => {
                warn!(
                    tile = %coord,
                    layer = %layer.name,
                    feature = index,
                    error = %e,
                    "Decode error, dropping rest of layer"
                );
                report.push(Some(&layer.name), Some(index), e);
                break;
            }
            Err(e) => {
                warn!(
                    tile = %coord,
                    layer = %layer.name,
                    feature = index,
                    error = %e,
                    "Skipping feature"
                );
                report.push(Some(&layer.name), Some(index), e);
            }
        }
    }

    Some(DecodedLayer {
        name: layer.name.clone(),
        extent,
        features,
    })
}

type Ring = Vec<[i64; 2]>;

fn decode_feature(
    layer: &proto::Layer,
    feature: &proto::Feature,
    coord: TileCoord,
    extent: u32,
) -> Result<FeatureData, DecodeError> {
    let rings = load_geometry(&feature.geometry)?;
    let projection = Projection::new(coord, extent);
    let project_ring =
        |ring: &Ring| -> Vec<Position> { ring.iter().map(|p| projection.apply(*p)).collect() };

    let geometry = match feature.r#type() {
        GeomType::Point => {
            let points: Vec<[i64; 2]> = rings.into_iter().flatten().collect();
            match points.as_slice() {
                [point] => Geometry::Point(projection.apply(*point)),
                [] => return Err(unsupported("empty Point")),
                _ => return Err(unsupported("MultiPoint")),
            }
        }
        GeomType::Linestring => match rings.as_slice() {
            [line] => Geometry::LineString(project_ring(line)),
            [] => return Err(unsupported("empty LineString")),
            _ => return Err(unsupported("MultiLineString")),
        },
        GeomType::Polygon => {
            if rings.is_empty() {
                return Err(unsupported("empty Polygon"));
            }
            let mut polygons: Vec<Vec<Vec<Position>>> = classify_rings(rings)
                .iter()
                .map(|polygon| polygon.iter().map(project_ring).collect())
                .collect();
            match polygons.len() {
                0 => return Err(unsupported("empty Polygon")),
                1 => Geometry::Polygon(polygons.remove(0)),
                _ => Geometry::MultiPolygon(polygons),
            }
        }
        GeomType::Unknown => return Err(unsupported("Unknown")),
    };

    Ok(FeatureData {
        geometry,
        properties: decode_tags(layer, feature),
        source_id: feature.id,
    })
}

fn unsupported(kind: &str) -> DecodeError {
    DecodeError::UnsupportedGeometry(kind.to_string())
}

/// Run the command stream into lines of absolute tile-local positions.
///
/// The cursor starts at the origin for every feature. A `MoveTo` starts a new
/// line; `ClosePath` repeats the first position of the current line.
fn load_geometry(stream: &[u32]) -> Result<Vec<Ring>, DecodeError> {
    let mut lines = Vec::new();
    let mut line: Ring = Vec::new();
    let (mut x, mut y) = (0i64, 0i64);
    let mut i = 0;

    while i < stream.len() {
        let command = stream[i];
        i += 1;
        let (id, count) = (command & 0x7, command >> 3);

        match id {
            CMD_MOVE_TO | CMD_LINE_TO => {
                for _ in 0..count {
                    let (Some(&dx), Some(&dy)) = (stream.get(i), stream.get(i + 1)) else {
                        return Err(DecodeError::MalformedGeometry(format!(
                            "command {} truncated at offset {}",
                            id, i
                        )));
                    };
                    i += 2;
                    x += i64::from(proto::unzigzag(dx));
                    y += i64::from(proto::unzigzag(dy));

                    if id == CMD_MOVE_TO && !line.is_empty() {
                        lines.push(std::mem::take(&mut line));
                    }
                    line.push([x, y]);
                }
            }
            CMD_CLOSE_PATH => {
                if let Some(&first) = line.first() {
                    line.push(first);
                }
            }
            other => return Err(DecodeError::UnknownCommand(other)),
        }
    }

    if !line.is_empty() {
        lines.push(line);
    }
    Ok(lines)
}

fn signed_area(ring: &Ring) -> f64 {
    let mut sum = 0.0;
    let mut j = ring.len().wrapping_sub(1);
    for (i, p1) in ring.iter().enumerate() {
        let p2 = ring[j];
        sum += (p2[0] - p1[0]) as f64 * (p1[1] + p2[1]) as f64;
        j = i;
    }
    sum
}

/// Group rings into polygons by winding order.
///
/// The first ring with non-zero area sets the exterior winding; every later
/// ring with the same winding starts a new polygon and the others become its
/// holes. Zero-area rings are dropped.
fn classify_rings(rings: Vec<Ring>) -> Vec<Vec<Ring>> {
    if rings.len() <= 1 {
        return vec![rings];
    }

    let mut polygons = Vec::new();
    let mut polygon: Option<Vec<Ring>> = None;
    let mut exterior_ccw: Option<bool> = None;

    for ring in rings {
        let area = signed_area(&ring);
        if area == 0.0 {
            continue;
        }
        let ccw = area < 0.0;
        let exterior = *exterior_ccw.get_or_insert(ccw);

        if ccw == exterior {
            if let Some(done) = polygon.take() {
                polygons.push(done);
            }
            polygon = Some(vec![ring]);
        } else if let Some(current) = polygon.as_mut() {
            current.push(ring);
        }
    }

    if let Some(done) = polygon {
        polygons.push(done);
    }
    polygons
}

/// Tile-local to longitude/latitude (spherical mercator inverse).
#[derive(Debug, Clone, Copy)]
struct Projection {
    size: f64,
    x0: f64,
    y0: f64,
}

impl Projection {
    fn new(coord: TileCoord, extent: u32) -> Self {
        let extent = f64::from(extent);
        Self {
            size: extent * 2f64.powi(i32::from(coord.z())),
            x0: extent * f64::from(coord.x()),
            y0: extent * f64::from(coord.y()),
        }
    }

    fn apply(&self, p: [i64; 2]) -> Position {
        let lon = (p[0] as f64 + self.x0) * 360.0 / self.size - 180.0;
        let y2 = 180.0 - (p[1] as f64 + self.y0) * 360.0 / self.size;
        let lat = 360.0 / PI * (y2 * PI / 180.0).exp().atan() - 90.0;
        [lon, lat]
    }
}

fn decode_tags(layer: &proto::Layer, feature: &proto::Feature) -> Properties {
    let mut properties = Properties::new();
    for pair in feature.tags.chunks_exact(2) {
        let key = layer.keys.get(pair[0] as usize);
        let value = layer
            .values
            .get(pair[1] as usize)
            .and_then(property_value);
        if let (Some(key), Some(value)) = (key, value) {
            properties.insert(key.clone(), value);
        }
    }
    properties
}

fn property_value(value: &proto::Value) -> Option<PropertyValue> {
    if let Some(s) = &value.string_value {
        return Some(PropertyValue::String(s.clone()));
    }
    value
        .float_value
        .map(f64::from)
        .or(value.double_value)
        .or(value.int_value.map(|n| n as f64))
        .or(value.uint_value.map(|n| n as f64))
        .or(value.sint_value.map(|n| n as f64))
        .map(PropertyValue::Number)
        .or(value.bool_value.map(PropertyValue::Bool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::proto::{command, zigzag};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn move_to(x: i32, y: i32) -> Vec<u32> {
        vec![command(CMD_MOVE_TO, 1), zigzag(x), zigzag(y)]
    }

    fn point_feature(x: i32, y: i32, tags: Vec<u32>) -> proto::Feature {
        proto::Feature {
            id: None,
            tags,
            r#type: Some(GeomType::Point as i32),
            geometry: move_to(x, y),
        }
    }

    fn square_ring(x: i32, y: i32, size: i32) -> Vec<u32> {
        let mut g = move_to(x, y);
        g.push(command(CMD_LINE_TO, 3));
        g.extend([zigzag(size), zigzag(0), zigzag(0), zigzag(size), zigzag(-size), zigzag(0)]);
        g.push(command(CMD_CLOSE_PATH, 1));
        g
    }

    fn layer(name: &str, features: Vec<proto::Feature>) -> proto::Layer {
        proto::Layer {
            version: 2,
            name: name.to_string(),
            features,
            keys: vec!["type".to_string(), "height".to_string()],
            values: vec![
                proto::Value {
                    string_value: Some("poi".to_string()),
                    ..Default::default()
                },
                proto::Value {
                    int_value: Some(12),
                    ..Default::default()
                },
            ],
            extent: Some(4096),
        }
    }

    fn encode(layers: Vec<proto::Layer>) -> Vec<u8> {
        proto::Tile { layers }.encode_to_vec()
    }

    fn decode(payload: &[u8]) -> DecodedTile {
        let coord = TileCoord::new(0, 0, 0).unwrap();
        decode_tile(payload, coord, Utc::now(), &CancellationToken::new()).unwrap()
    }

    #[test]
    fn test_center_point_projects_to_origin() {
        let tile = decode(&encode(vec![layer("pois", vec![point_feature(2048, 2048, vec![0, 0, 1, 1])])]));

        assert!(tile.report.is_clean());
        let feature = &tile.layers[0].features[0];
        match feature.data.geometry {
            Geometry::Point([lon, lat]) => {
                assert!(lon.abs() < 1e-9);
                assert!(lat.abs() < 1e-9);
            }
            ref other => panic!("unexpected geometry {:?}", other),
        }
        assert_eq!(feature.data.property("type"), Some(&PropertyValue::from("poi")));
        assert_eq!(feature.data.property("height"), Some(&PropertyValue::Number(12.0)));
    }

    #[test]
    fn test_top_left_corner() {
        let tile = decode(&encode(vec![layer("pois", vec![point_feature(0, 0, vec![])])]));
        let Geometry::Point([lon, lat]) = tile.layers[0].features[0].data.geometry else {
            panic!("expected point");
        };
        assert!((lon + 180.0).abs() < 1e-9);
        assert!((lat - 85.0511287798).abs() < 1e-6);
    }

    #[test]
    fn test_polygon_with_hole() {
        let mut geometry = square_ring(0, 0, 100);
        // Opposite winding hole; the cursor sits at (0,100) after the outer ring.
        geometry.extend(move_to(10, -90));
        geometry.push(command(CMD_LINE_TO, 3));
        geometry.extend([zigzag(0), zigzag(20), zigzag(20), zigzag(0), zigzag(0), zigzag(-20)]);
        geometry.push(command(CMD_CLOSE_PATH, 1));

        let feature = proto::Feature {
            r#type: Some(GeomType::Polygon as i32),
            geometry,
            ..Default::default()
        };
        let tile = decode(&encode(vec![layer("areas", vec![feature])]));

        match &tile.layers[0].features[0].data.geometry {
            Geometry::Polygon(rings) => {
                assert_eq!(rings.len(), 2);
                assert_eq!(rings[0].len(), 5);
                assert_eq!(rings[0].first(), rings[0].last());
            }
            other => panic!("expected polygon, got {:?}", other),
        }
    }

    #[test]
    fn test_two_exteriors_become_multipolygon() {
        let mut geometry = square_ring(0, 0, 10);
        geometry.extend(square_ring(100, 100, 10));
        let feature = proto::Feature {
            r#type: Some(GeomType::Polygon as i32),
            geometry,
            ..Default::default()
        };
        let tile = decode(&encode(vec![layer("areas", vec![feature])]));

        assert!(matches!(
            &tile.layers[0].features[0].data.geometry,
            Geometry::MultiPolygon(polygons) if polygons.len() == 2
        ));
    }

    #[test]
    fn test_unknown_command_keeps_earlier_features_and_other_layers() {
        let bad = proto::Feature {
            r#type: Some(GeomType::Point as i32),
            geometry: vec![command(5, 1), 0, 0],
            ..Default::default()
        };
        let tile = decode(&encode(vec![
            layer("broken", vec![point_feature(1, 1, vec![]), bad, point_feature(2, 2, vec![])]),
            layer("fine", vec![point_feature(3, 3, vec![])]),
        ]));

        assert_eq!(tile.layers[0].features.len(), 1);
        assert_eq!(tile.layers[1].features.len(), 1);
        assert_eq!(tile.report.fatal_count(), 1);
        assert_eq!(
            tile.report.diagnostics[0].error,
            DecodeError::UnknownCommand(5)
        );
        assert_eq!(tile.report.diagnostics[0].layer.as_deref(), Some("broken"));
    }

    #[test]
    fn test_unsupported_geometry_is_skipped() {
        let multipoint = proto::Feature {
            r#type: Some(GeomType::Point as i32),
            geometry: vec![command(CMD_MOVE_TO, 2), zigzag(1), zigzag(1), zigzag(2), zigzag(2)],
            ..Default::default()
        };
        let unknown = proto::Feature {
            geometry: move_to(1, 1),
            ..Default::default()
        };
        let tile = decode(&encode(vec![layer(
            "pois",
            vec![multipoint, unknown, point_feature(5, 5, vec![])],
        )]));

        assert_eq!(tile.layers[0].features.len(), 1);
        assert_eq!(tile.layers[0].features[0].index, 2);
        assert_eq!(tile.report.skipped_count(), 2);
        assert_eq!(tile.report.fatal_count(), 0);
    }

    #[test]
    fn test_truncated_geometry_is_fatal_for_layer() {
        let truncated = proto::Feature {
            r#type: Some(GeomType::Linestring as i32),
            geometry: vec![command(CMD_MOVE_TO, 1), zigzag(1)],
            ..Default::default()
        };
        let tile = decode(&encode(vec![layer("roads", vec![truncated, point_feature(1, 1, vec![])])]));

        assert!(tile.layers[0].features.is_empty());
        assert!(matches!(
            tile.report.diagnostics[0].error,
            DecodeError::MalformedGeometry(_)
        ));
    }

    #[test]
    fn test_garbage_payload_reports_error() {
        let tile = decode(&[0xff, 0xff, 0xff]);
        assert!(tile.layers.is_empty());
        assert!(matches!(
            tile.report.diagnostics[0].error,
            DecodeError::Protobuf(_)
        ));
    }

    #[test]
    fn test_gzip_payload() {
        let raw = encode(vec![layer("pois", vec![point_feature(1, 1, vec![])])]);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        let gzipped = encoder.finish().unwrap();

        let inflated = decode(&gzipped);
        assert!(inflated.report.is_clean());
        assert_eq!(inflated.layers, decode(&raw).layers);
    }

    #[test]
    fn test_cancelled_decode_returns_none() {
        let token = CancellationToken::new();
        token.cancel();
        let coord = TileCoord::new(0, 0, 0).unwrap();
        let payload = encode(vec![layer("pois", vec![point_feature(1, 1, vec![])])]);

        assert!(decode_tile(&payload, coord, Utc::now(), &token).is_none());
    }

    #[test]
    fn test_load_geometry_line() {
        let mut stream = move_to(2, 2);
        stream.push(command(CMD_LINE_TO, 2));
        stream.extend([zigzag(0), zigzag(8), zigzag(8), zigzag(0)]);

        let lines = load_geometry(&stream).unwrap();
        assert_eq!(lines, vec![vec![[2, 2], [2, 10], [10, 10]]]);
    }
}
