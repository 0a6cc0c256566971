//! Geometry model and codecs
//!
//! Query results carry geometry either as hex-encoded well-known binary
//! (PostGIS default text output for `geometry` columns) or as well-known text
//! (`ST_AsText`). This module decodes both into a small typed [`Geometry`]
//! model and classifies whole result sets into renderable layers.
//!
//! Only planar x/y coordinates are kept; Z and M ordinates are parsed and
//! dropped.

pub mod classify;
pub mod wkb;
pub mod wkt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

pub use classify::{
    classify, detect_encoding, find_geometry_column, infer_type, AttributeTable, Feature,
    FeatureCollection, ResultLayer,
};

/// Errors raised while decoding a single geometry value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("unexpected end of WKB: needed {needed} bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },

    #[error("invalid byte order marker: {0:#04x}")]
    InvalidByteOrder(u8),

    #[error("unsupported WKB geometry type code: {0}")]
    UnsupportedType(u32),

    #[error("nested geometry type mismatch: expected {expected}, found {found}")]
    NestedTypeMismatch {
        expected: GeometryType,
        found: GeometryType,
    },

    #[error("geometry nesting too deep")]
    TooDeep,

    #[error("invalid WKT at offset {offset}: {message}")]
    InvalidWkt { offset: usize, message: String },
}

/// The six geometry types a layer can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryType {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
}

impl GeometryType {
    /// Combine a base kind with a multi flag
    pub fn from_parts(base: BaseKind, multi: bool) -> Self {
        match (base, multi) {
            (BaseKind::Point, false) => Self::Point,
            (BaseKind::Point, true) => Self::MultiPoint,
            (BaseKind::Line, false) => Self::LineString,
            (BaseKind::Line, true) => Self::MultiLineString,
            (BaseKind::Polygon, false) => Self::Polygon,
            (BaseKind::Polygon, true) => Self::MultiPolygon,
        }
    }

    pub fn base(&self) -> BaseKind {
        match self {
            Self::Point | Self::MultiPoint => BaseKind::Point,
            Self::LineString | Self::MultiLineString => BaseKind::Line,
            Self::Polygon | Self::MultiPolygon => BaseKind::Polygon,
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(
            self,
            Self::MultiPoint | Self::MultiLineString | Self::MultiPolygon
        )
    }

    /// Upper-case WKT keyword
    pub fn wkt_keyword(&self) -> &'static str {
        match self {
            Self::Point => "POINT",
            Self::LineString => "LINESTRING",
            Self::Polygon => "POLYGON",
            Self::MultiPoint => "MULTIPOINT",
            Self::MultiLineString => "MULTILINESTRING",
            Self::MultiPolygon => "MULTIPOLYGON",
        }
    }
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Point => "Point",
            Self::LineString => "LineString",
            Self::Polygon => "Polygon",
            Self::MultiPoint => "MultiPoint",
            Self::MultiLineString => "MultiLineString",
            Self::MultiPolygon => "MultiPolygon",
        };
        f.write_str(name)
    }
}

/// Dimensional family of a geometry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseKind {
    Point,
    Line,
    Polygon,
}

/// How geometry values are encoded in a result column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryEncoding {
    WkbHex,
    WktText,
}

impl fmt::Display for GeometryEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WkbHex => f.write_str("WKB"),
            Self::WktText => f.write_str("WKT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn to_json(self) -> Value {
        json!([self.x, self.y])
    }
}

pub type Ring = Vec<Coord>;

/// A decoded geometry value
///
/// `Point(None)` is the empty point.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Option<Coord>),
    LineString(Vec<Coord>),
    Polygon(Vec<Ring>),
    MultiPoint(Vec<Coord>),
    MultiLineString(Vec<Vec<Coord>>),
    MultiPolygon(Vec<Vec<Ring>>),
    GeometryCollection(Vec<Geometry>),
}

impl Geometry {
    /// The layer type of this geometry; `None` for collections
    pub fn geometry_type(&self) -> Option<GeometryType> {
        match self {
            Self::Point(_) => Some(GeometryType::Point),
            Self::LineString(_) => Some(GeometryType::LineString),
            Self::Polygon(_) => Some(GeometryType::Polygon),
            Self::MultiPoint(_) => Some(GeometryType::MultiPoint),
            Self::MultiLineString(_) => Some(GeometryType::MultiLineString),
            Self::MultiPolygon(_) => Some(GeometryType::MultiPolygon),
            Self::GeometryCollection(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Point(p) => p.is_none(),
            Self::LineString(coords) | Self::MultiPoint(coords) => coords.is_empty(),
            Self::Polygon(rings) => rings.iter().all(|r| r.is_empty()),
            Self::MultiLineString(lines) => lines.iter().all(|l| l.is_empty()),
            Self::MultiPolygon(polys) => polys.iter().flatten().all(|r| r.is_empty()),
            Self::GeometryCollection(members) => members.iter().all(|g| g.is_empty()),
        }
    }

    /// Fit this geometry into a layer of type `target`
    ///
    /// Single geometries are promoted into the matching multi type. Returns
    /// `None` when the base kinds differ.
    pub fn conform_to(self, target: GeometryType) -> Option<Geometry> {
        let own = self.geometry_type()?;
        if own == target {
            return Some(self);
        }
        if !target.is_multi() || own.is_multi() || own.base() != target.base() {
            return None;
        }
        match self {
            Self::Point(Some(c)) => Some(Self::MultiPoint(vec![c])),
            Self::Point(None) => Some(Self::MultiPoint(Vec::new())),
            Self::LineString(line) => Some(Self::MultiLineString(vec![line])),
            Self::Polygon(rings) => Some(Self::MultiPolygon(vec![rings])),
            _ => None,
        }
    }

    /// GeoJSON geometry object
    pub fn to_geojson(&self) -> Value {
        fn line(coords: &[Coord]) -> Value {
            Value::Array(coords.iter().map(|c| c.to_json()).collect())
        }
        fn poly(rings: &[Ring]) -> Value {
            Value::Array(rings.iter().map(|r| line(r)).collect())
        }

        match self {
            Self::Point(Some(c)) => json!({"type": "Point", "coordinates": c.to_json()}),
            Self::Point(None) => json!({"type": "Point", "coordinates": []}),
            Self::LineString(coords) => json!({"type": "LineString", "coordinates": line(coords)}),
            Self::Polygon(rings) => json!({"type": "Polygon", "coordinates": poly(rings)}),
            Self::MultiPoint(coords) => json!({"type": "MultiPoint", "coordinates": line(coords)}),
            Self::MultiLineString(lines) => json!({
                "type": "MultiLineString",
                "coordinates": lines.iter().map(|l| line(l)).collect::<Vec<_>>(),
            }),
            Self::MultiPolygon(polys) => json!({
                "type": "MultiPolygon",
                "coordinates": polys.iter().map(|p| poly(p)).collect::<Vec<_>>(),
            }),
            Self::GeometryCollection(members) => json!({
                "type": "GeometryCollection",
                "geometries": members.iter().map(|g| g.to_geojson()).collect::<Vec<_>>(),
            }),
        }
    }
}
