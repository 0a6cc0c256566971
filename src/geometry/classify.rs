//! Result set classification
//!
//! Turns a successful [`QueryResult`] into something the rendering side can
//! draw: a typed feature collection, an attribute-only table, or a distinct
//! empty outcome when a geometry column exists but no row decoded.
//!
//! The order of checks matters and is fixed: column names first, then
//! content sniffing of the first row. A text value made only of hex digits
//! is treated as WKB.

use super::{wkb, wkt, Geometry, GeometryEncoding, GeometryError, GeometryType};
use crate::database::QueryResult;
use serde_json::{json, Map, Value};

/// Column names that always mark the geometry column (compared lower-case)
pub const GEOMETRY_COLUMN_KEYWORDS: &[&str] = &[
    "geom",
    "geometry",
    "the_geom",
    "wkb_geometry",
    "shape",
    "wkt_geometry",
];

/// WKT tags recognised when sniffing values
const WKT_SNIFF_TAGS: &[&str] = &[
    "POINT(",
    "LINESTRING(",
    "POLYGON((",
    "MULTIPOINT(",
    "MULTILINESTRING(",
    "MULTIPOLYGON(",
];

/// How many leading characters of a value are sniffed
const SNIFF_PREFIX_CHARS: usize = 50;

/// Coordinate reference system of every emitted layer
pub const LAYER_CRS: &str = "EPSG:4326";

/// One decoded row
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Source row index in the query result
    pub row: usize,
    pub geometry: Geometry,
    /// Values aligned with [`FeatureCollection::fields`]
    pub attributes: Vec<Option<String>>,
}

/// Typed features ready for rendering
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureCollection {
    pub geometry_type: GeometryType,
    pub encoding: GeometryEncoding,
    pub crs: &'static str,
    pub geometry_column: String,
    /// Attribute schema: every column except the geometry column
    pub fields: Vec<String>,
    pub features: Vec<Feature>,
    /// Rows dropped because their geometry was missing, invalid, or empty
    pub skipped: usize,
}

impl FeatureCollection {
    /// Attributes of `feature` keyed by field name
    pub fn properties(&self, feature: &Feature) -> Map<String, Value> {
        self.fields
            .iter()
            .zip(&feature.attributes)
            .map(|(name, value)| {
                let value = value.clone().map(Value::String).unwrap_or(Value::Null);
                (name.clone(), value)
            })
            .collect()
    }

    /// GeoJSON FeatureCollection
    pub fn to_geojson(&self) -> Value {
        let features: Vec<Value> = self
            .features
            .iter()
            .map(|f| {
                json!({
                    "type": "Feature",
                    "geometry": f.geometry.to_geojson(),
                    "properties": self.properties(f),
                })
            })
            .collect();
        json!({ "type": "FeatureCollection", "features": features })
    }
}

/// Rows with no geometry column
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttributeTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

/// Outcome of classifying a result set
#[derive(Debug, Clone, PartialEq)]
pub enum ResultLayer {
    /// At least one feature decoded
    Features(FeatureCollection),
    /// No geometry column was found
    AttributesOnly(AttributeTable),
    /// A geometry column was found but no row produced a feature
    Empty {
        geometry_column: String,
        geometry_type: GeometryType,
        encoding: GeometryEncoding,
        skipped: usize,
    },
}

impl ResultLayer {
    /// Short tag used in API payloads
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Features(_) => "features",
            Self::AttributesOnly(_) => "attributes",
            Self::Empty { .. } => "empty",
        }
    }

    /// Number of rows skipped during decoding
    pub fn skipped(&self) -> usize {
        match self {
            Self::Features(fc) => fc.skipped,
            Self::AttributesOnly(_) => 0,
            Self::Empty { skipped, .. } => *skipped,
        }
    }

    /// Payload handed to the rendering side
    pub fn to_json(&self) -> Value {
        match self {
            Self::Features(fc) => json!({
                "kind": self.kind(),
                "geometry_type": fc.geometry_type.to_string(),
                "crs": fc.crs,
                "encoding": fc.encoding,
                "geometry_column": fc.geometry_column,
                "fields": fc.fields,
                "feature_count": fc.features.len(),
                "skipped": fc.skipped,
                "geojson": fc.to_geojson(),
            }),
            Self::AttributesOnly(table) => json!({
                "kind": self.kind(),
                "columns": table.columns,
                "rows": table.rows,
                "row_count": table.rows.len(),
            }),
            Self::Empty {
                geometry_column,
                geometry_type,
                encoding,
                skipped,
            } => json!({
                "kind": self.kind(),
                "geometry_type": geometry_type.to_string(),
                "crs": LAYER_CRS,
                "encoding": encoding,
                "geometry_column": geometry_column,
                "skipped": skipped,
                "message": "No valid geometries found in query results",
            }),
        }
    }
}

/// Locate the geometry column
///
/// Name match wins over content; content sniffing only looks at the first
/// row.
pub fn find_geometry_column(columns: &[String], first_row: Option<&[Option<String>]>) -> Option<usize> {
    if let Some(idx) = columns
        .iter()
        .position(|c| GEOMETRY_COLUMN_KEYWORDS.contains(&c.to_lowercase().as_str()))
    {
        return Some(idx);
    }

    first_row?.iter().position(|value| {
        value.as_deref().is_some_and(|v| {
            let prefix: String = v.chars().take(SNIFF_PREFIX_CHARS).collect::<String>().to_uppercase();
            WKT_SNIFF_TAGS.iter().any(|tag| prefix.contains(tag))
        })
    })
}

/// Decide between hex WKB and WKT for a non-empty value
pub fn detect_encoding(value: &str) -> GeometryEncoding {
    let mut digits = value.chars().filter(|c| !c.is_whitespace()).peekable();
    if digits.peek().is_some() && digits.all(|c| c.is_ascii_hexdigit()) {
        GeometryEncoding::WkbHex
    } else {
        GeometryEncoding::WktText
    }
}

/// Infer the layer type from one value, falling back to Point
pub fn infer_type(value: &str, encoding: GeometryEncoding) -> GeometryType {
    match encoding {
        GeometryEncoding::WkbHex => wkb::header_type(value).unwrap_or(GeometryType::Point),
        GeometryEncoding::WktText => {
            let upper = value.to_uppercase();
            [
                GeometryType::MultiPolygon,
                GeometryType::Polygon,
                GeometryType::MultiLineString,
                GeometryType::LineString,
                GeometryType::MultiPoint,
            ]
            .into_iter()
            .find(|t| upper.contains(t.wkt_keyword()))
            .unwrap_or(GeometryType::Point)
        }
    }
}

/// Decode one value with a known encoding
pub fn decode_value(value: &str, encoding: GeometryEncoding) -> Result<Geometry, GeometryError> {
    match encoding {
        GeometryEncoding::WkbHex => wkb::decode_hex(value),
        GeometryEncoding::WktText => wkt::parse(value),
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Classify a query result
///
/// A failed result has no columns and classifies as an empty attribute
/// table; callers report the failure itself.
pub fn classify(result: &QueryResult) -> ResultLayer {
    let Some(geom_idx) = find_geometry_column(&result.columns, result.rows.first().map(|r| r.as_slice()))
    else {
        tracing::debug!(columns = result.columns.len(), "No geometry column found");
        return ResultLayer::AttributesOnly(AttributeTable {
            columns: result.columns.clone(),
            rows: result.rows.clone(),
        });
    };

    let geometry_column = result.columns[geom_idx].clone();
    let first_value = result.rows.iter().find_map(|row| non_blank(&row[geom_idx]));
    let encoding = first_value
        .map(detect_encoding)
        .unwrap_or(GeometryEncoding::WktText);
    let geometry_type = first_value
        .map(|v| infer_type(v, encoding))
        .unwrap_or(GeometryType::Point);

    tracing::debug!(
        column = %geometry_column,
        index = geom_idx,
        %encoding,
        %geometry_type,
        "Detected geometry column"
    );

    let fields: Vec<String> = result
        .columns
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != geom_idx)
        .map(|(_, c)| c.clone())
        .collect();

    let mut features = Vec::new();
    let mut skipped = 0;

    for (row_idx, row) in result.rows.iter().enumerate() {
        let Some(value) = non_blank(&row[geom_idx]) else {
            skipped += 1;
            continue;
        };

        let geometry = match decode_value(value, encoding) {
            Ok(g) if g.is_empty() => {
                tracing::debug!(row = row_idx, "Skipping empty geometry");
                skipped += 1;
                continue;
            }
            Ok(g) => g,
            Err(e) => {
                tracing::debug!(row = row_idx, error = %e, "Skipping undecodable geometry");
                skipped += 1;
                continue;
            }
        };

        let found = geometry.geometry_type();
        let Some(geometry) = geometry.conform_to(geometry_type) else {
            tracing::debug!(
                row = row_idx,
                found = ?found,
                expected = %geometry_type,
                "Skipping geometry of a different type"
            );
            skipped += 1;
            continue;
        };

        let attributes = row
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != geom_idx)
            .map(|(_, v)| v.clone())
            .collect();

        features.push(Feature {
            row: row_idx,
            geometry,
            attributes,
        });
    }

    if features.is_empty() {
        tracing::warn!(
            column = %geometry_column,
            rows = result.rows.len(),
            skipped,
            "No valid geometries found in query results"
        );
        return ResultLayer::Empty {
            geometry_column,
            geometry_type,
            encoding,
            skipped,
        };
    }

    if skipped > 0 {
        tracing::warn!(skipped, decoded = features.len(), "Some rows had no usable geometry");
    } else {
        tracing::info!(decoded = features.len(), %geometry_type, "Decoded features");
    }

    ResultLayer::Features(FeatureCollection {
        geometry_type,
        encoding,
        crs: LAYER_CRS,
        geometry_column,
        fields,
        features,
        skipped,
    })
}
