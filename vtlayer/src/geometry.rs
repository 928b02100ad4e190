//! Decoded feature payloads: geometry, bounding boxes and properties.
//!
//! Geometry is a closed enum over the shapes the store can index and render.
//! Bounding boxes are computed by matching on it; points yield a degenerate
//! box, every other shape its true extent.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A `[x, y]` position. For reprojected tiles this is `[lon, lat]`.
pub type Position = [f64; 2];

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bbox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Degenerate box around a single position.
    pub fn from_point(p: Position) -> Self {
        Self::new(p[0], p[1], p[0], p[1])
    }

    /// Smallest box containing every position, `None` when empty.
    pub fn from_positions<'a, I>(positions: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Position>,
    {
        positions.into_iter().fold(None, |acc, p| {
            Some(match acc {
                None => Self::from_point(*p),
                Some(b) => b.extend(*p),
            })
        })
    }

    fn extend(self, p: Position) -> Self {
        Self::new(
            self.min_x.min(p[0]),
            self.min_y.min(p[1]),
            self.max_x.max(p[0]),
            self.max_y.max(p[1]),
        )
    }

    /// Inclusive intersection test.
    pub fn intersects(&self, other: &Bbox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }
}

/// Supported feature geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    LineString(Vec<Position>),
    /// Exterior ring first, then holes.
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

impl Geometry {
    /// Short type name, as used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::LineString(_) => "LineString",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// Bounding box of the geometry, `None` for an empty shape.
    pub fn bbox(&self) -> Option<Bbox> {
        match self {
            Geometry::Point(p) => Some(Bbox::from_point(*p)),
            Geometry::LineString(line) => Bbox::from_positions(line),
            Geometry::Polygon(rings) => Bbox::from_positions(rings.iter().flatten()),
            Geometry::MultiPolygon(polygons) => {
                Bbox::from_positions(polygons.iter().flatten().flatten())
            }
        }
    }
}

/// A feature property value.
///
/// Numeric protobuf values (float, double, int, uint, sint) all collapse to
/// `Number`, so `5` and `5.0` compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl PropertyValue {
    fn number_bits(n: f64) -> u64 {
        // +0.0 and -0.0 compare equal, so they must hash equal
        if n == 0.0 {
            0
        } else {
            n.to_bits()
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropertyValue::Bool(a), PropertyValue::Bool(b)) => a == b,
            (PropertyValue::Number(a), PropertyValue::Number(b)) => {
                Self::number_bits(*a) == Self::number_bits(*b)
            }
            (PropertyValue::String(a), PropertyValue::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for PropertyValue {}

impl Hash for PropertyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            PropertyValue::Bool(b) => b.hash(state),
            PropertyValue::Number(n) => Self::number_bits(*n).hash(state),
            PropertyValue::String(s) => s.hash(state),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Number(n) => write!(f, "{}", n),
            PropertyValue::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<f64> for PropertyValue {
    fn from(n: f64) -> Self {
        PropertyValue::Number(n)
    }
}

impl From<i64> for PropertyValue {
    fn from(n: i64) -> Self {
        PropertyValue::Number(n as f64)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

/// Feature properties keyed by name.
pub type Properties = BTreeMap<String, PropertyValue>;

/// The immutable geometry+properties payload of a decoded feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureData {
    pub geometry: Geometry,
    pub properties: Properties,
    /// Feature id carried by the protobuf encoding, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<u64>,
}

impl FeatureData {
    pub fn new(geometry: Geometry, properties: Properties) -> Self {
        Self {
            geometry,
            properties,
            source_id: None,
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// True when `properties[name] == value`.
    pub fn matches(&self, name: &str, value: &PropertyValue) -> bool {
        self.properties.get(name) == Some(value)
    }
}
