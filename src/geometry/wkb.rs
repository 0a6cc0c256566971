//! Well-known binary codec
//!
//! Accepts ISO WKB (Z/M/ZM as +1000/+2000/+3000) and PostGIS extended WKB
//! (high-bit Z/M/SRID flags with an embedded SRID). Byte order is read per
//! geometry, so nested members may differ from their parent.

use super::{BaseKind, Coord, Geometry, GeometryError, GeometryType, Ring};
use bytes::{Buf, BufMut};

const EWKB_Z: u32 = 0x8000_0000;
const EWKB_M: u32 = 0x4000_0000;
const EWKB_SRID: u32 = 0x2000_0000;
const EWKB_FLAGS: u32 = EWKB_Z | EWKB_M | EWKB_SRID;

const MAX_DEPTH: usize = 32;

/// Parsed geometry header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    little_endian: bool,
    code: u32,
    dims: usize,
}

/// Strip whitespace and hex-decode
pub fn hex_to_bytes(text: &str) -> Result<Vec<u8>, GeometryError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&compact).map_err(|e| GeometryError::InvalidHex(e.to_string()))
}

/// Decode a hex-encoded WKB value
pub fn decode_hex(text: &str) -> Result<Geometry, GeometryError> {
    decode(&hex_to_bytes(text)?)
}

/// Decode a WKB byte buffer
///
/// Trailing bytes after the geometry are ignored.
pub fn decode(bytes: &[u8]) -> Result<Geometry, GeometryError> {
    let mut buf = bytes;
    read_geometry(&mut buf, 0)
}

/// Infer the layer type from the header of a hex-encoded WKB value
///
/// Curve and surface codes are mapped onto the closest simple type.
/// Returns `None` when the header cannot be read or the code is unknown.
pub fn header_type(text: &str) -> Option<GeometryType> {
    let bytes = hex_to_bytes(text).ok()?;
    let mut buf = bytes.as_slice();
    let header = read_header(&mut buf).ok()?;
    let (base, multi) = match header.code {
        1 => (BaseKind::Point, false),
        2 | 8 | 9 | 13 => (BaseKind::Line, false),
        3 | 10 | 14 | 17 => (BaseKind::Polygon, false),
        4 => (BaseKind::Point, true),
        5 | 11 => (BaseKind::Line, true),
        6 | 12 | 15 | 16 => (BaseKind::Polygon, true),
        _ => return None,
    };
    Some(GeometryType::from_parts(base, multi))
}

fn ensure(buf: &&[u8], needed: usize) -> Result<(), GeometryError> {
    if buf.remaining() < needed {
        return Err(GeometryError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

fn read_u32(buf: &mut &[u8], little_endian: bool) -> Result<u32, GeometryError> {
    ensure(buf, 4)?;
    Ok(if little_endian {
        buf.get_u32_le()
    } else {
        buf.get_u32()
    })
}

fn read_f64(buf: &mut &[u8], little_endian: bool) -> Result<f64, GeometryError> {
    ensure(buf, 8)?;
    Ok(if little_endian {
        buf.get_f64_le()
    } else {
        buf.get_f64()
    })
}

fn read_header(buf: &mut &[u8]) -> Result<Header, GeometryError> {
    ensure(buf, 1)?;
    let little_endian = match buf.get_u8() {
        0 => false,
        1 => true,
        other => return Err(GeometryError::InvalidByteOrder(other)),
    };

    let raw = read_u32(buf, little_endian)?;
    let mut has_z = raw & EWKB_Z != 0;
    let mut has_m = raw & EWKB_M != 0;
    if raw & EWKB_SRID != 0 {
        read_u32(buf, little_endian)?;
    }

    let iso = raw & !EWKB_FLAGS;
    match iso / 1000 {
        0 => {}
        1 => has_z = true,
        2 => has_m = true,
        3 => {
            has_z = true;
            has_m = true;
        }
        _ => return Err(GeometryError::UnsupportedType(raw)),
    }

    Ok(Header {
        little_endian,
        code: iso % 1000,
        dims: 2 + usize::from(has_z) + usize::from(has_m),
    })
}

fn read_count(
    buf: &mut &[u8],
    little_endian: bool,
    min_item_bytes: usize,
) -> Result<usize, GeometryError> {
    let count = read_u32(buf, little_endian)? as usize;
    // Reject counts the remaining bytes cannot possibly hold before allocating.
    ensure(buf, count.saturating_mul(min_item_bytes))?;
    Ok(count)
}

fn read_coord(buf: &mut &[u8], header: &Header) -> Result<Coord, GeometryError> {
    let x = read_f64(buf, header.little_endian)?;
    let y = read_f64(buf, header.little_endian)?;
    for _ in 2..header.dims {
        read_f64(buf, header.little_endian)?;
    }
    Ok(Coord::new(x, y))
}

fn read_coords(buf: &mut &[u8], header: &Header) -> Result<Vec<Coord>, GeometryError> {
    let count = read_count(buf, header.little_endian, header.dims * 8)?;
    (0..count).map(|_| read_coord(buf, header)).collect()
}

fn read_rings(buf: &mut &[u8], header: &Header) -> Result<Vec<Ring>, GeometryError> {
    let count = read_count(buf, header.little_endian, 4)?;
    (0..count).map(|_| read_coords(buf, header)).collect()
}

fn read_geometry(buf: &mut &[u8], depth: usize) -> Result<Geometry, GeometryError> {
    if depth > MAX_DEPTH {
        return Err(GeometryError::TooDeep);
    }
    let header = read_header(buf)?;

    match header.code {
        1 => {
            let c = read_coord(buf, &header)?;
            // An empty point is encoded with NaN ordinates.
            if c.x.is_nan() && c.y.is_nan() {
                Ok(Geometry::Point(None))
            } else {
                Ok(Geometry::Point(Some(c)))
            }
        }
        2 => Ok(Geometry::LineString(read_coords(buf, &header)?)),
        3 => Ok(Geometry::Polygon(read_rings(buf, &header)?)),
        4 => {
            let members = read_members(buf, &header, depth, GeometryType::Point)?;
            Ok(Geometry::MultiPoint(
                members
                    .into_iter()
                    .filter_map(|g| match g {
                        Geometry::Point(c) => c,
                        _ => None,
                    })
                    .collect(),
            ))
        }
        5 => {
            let members = read_members(buf, &header, depth, GeometryType::LineString)?;
            Ok(Geometry::MultiLineString(
                members
                    .into_iter()
                    .filter_map(|g| match g {
                        Geometry::LineString(line) => Some(line),
                        _ => None,
                    })
                    .collect(),
            ))
        }
        6 => {
            let members = read_members(buf, &header, depth, GeometryType::Polygon)?;
            Ok(Geometry::MultiPolygon(
                members
                    .into_iter()
                    .filter_map(|g| match g {
                        Geometry::Polygon(rings) => Some(rings),
                        _ => None,
                    })
                    .collect(),
            ))
        }
        7 => {
            let count = read_count(buf, header.little_endian, 5)?;
            let members = (0..count)
                .map(|_| read_geometry(buf, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Geometry::GeometryCollection(members))
        }
        other => Err(GeometryError::UnsupportedType(other)),
    }
}

fn read_members(
    buf: &mut &[u8],
    header: &Header,
    depth: usize,
    expected: GeometryType,
) -> Result<Vec<Geometry>, GeometryError> {
    let count = read_count(buf, header.little_endian, 5)?;
    let mut members = Vec::with_capacity(count);
    for _ in 0..count {
        let member = read_geometry(buf, depth + 1)?;
        match member.geometry_type() {
            Some(found) if found == expected => members.push(member),
            Some(found) => return Err(GeometryError::NestedTypeMismatch { expected, found }),
            None => return Err(GeometryError::UnsupportedType(7)),
        }
    }
    Ok(members)
}

/// Encode as little-endian 2D ISO WKB
pub fn encode(geometry: &Geometry) -> Vec<u8> {
    let mut out = Vec::new();
    write_geometry(&mut out, geometry);
    out
}

/// Encode as upper-case hex WKB, the way PostGIS prints geometry columns
pub fn encode_hex(geometry: &Geometry) -> String {
    hex::encode_upper(encode(geometry))
}

fn write_header(out: &mut Vec<u8>, code: u32) {
    out.put_u8(1);
    out.put_u32_le(code);
}

fn write_coords(out: &mut Vec<u8>, coords: &[Coord]) {
    out.put_u32_le(coords.len() as u32);
    for c in coords {
        out.put_f64_le(c.x);
        out.put_f64_le(c.y);
    }
}

fn write_rings(out: &mut Vec<u8>, rings: &[Ring]) {
    out.put_u32_le(rings.len() as u32);
    for ring in rings {
        write_coords(out, ring);
    }
}

fn write_geometry(out: &mut Vec<u8>, geometry: &Geometry) {
    match geometry {
        Geometry::Point(c) => {
            write_header(out, 1);
            let c = c.unwrap_or(Coord::new(f64::NAN, f64::NAN));
            out.put_f64_le(c.x);
            out.put_f64_le(c.y);
        }
        Geometry::LineString(coords) => {
            write_header(out, 2);
            write_coords(out, coords);
        }
        Geometry::Polygon(rings) => {
            write_header(out, 3);
            write_rings(out, rings);
        }
        Geometry::MultiPoint(coords) => {
            write_header(out, 4);
            out.put_u32_le(coords.len() as u32);
            for c in coords {
                write_geometry(out, &Geometry::Point(Some(*c)));
            }
        }
        Geometry::MultiLineString(lines) => {
            write_header(out, 5);
            out.put_u32_le(lines.len() as u32);
            for line in lines {
                write_header(out, 2);
                write_coords(out, line);
            }
        }
        Geometry::MultiPolygon(polys) => {
            write_header(out, 6);
            out.put_u32_le(polys.len() as u32);
            for rings in polys {
                write_header(out, 3);
                write_rings(out, rings);
            }
        }
        Geometry::GeometryCollection(members) => {
            write_header(out, 7);
            out.put_u32_le(members.len() as u32);
            for member in members {
                write_geometry(out, member);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // SELECT ST_GeomFromText('POINT(10 20)') as printed by psql
    const POINT_LE: &str = "010100000000000000000024400000000000003440";
    // Same point, big-endian
    const POINT_BE: &str = "000000000140240000000000004034000000000000";
    // SELECT ST_SetSRID(ST_MakePoint(1, 2), 4326)
    const EWKB_POINT_SRID: &str = "0101000020E6100000000000000000F03F0000000000000040";
    // POINT EMPTY
    const EMPTY_POINT: &str = "0101000000000000000000F87F000000000000F87F";

    #[test]
    fn test_decode_little_endian_point() {
        let geom = decode_hex(POINT_LE).unwrap();
        assert_eq!(geom, Geometry::Point(Some(Coord::new(10.0, 20.0))));
    }

    #[test]
    fn test_decode_big_endian_point() {
        let geom = decode_hex(POINT_BE).unwrap();
        assert_eq!(geom, Geometry::Point(Some(Coord::new(10.0, 20.0))));
    }

    #[test]
    fn test_decode_ewkb_with_srid() {
        let geom = decode_hex(EWKB_POINT_SRID).unwrap();
        assert_eq!(geom, Geometry::Point(Some(Coord::new(1.0, 2.0))));
        assert_eq!(header_type(EWKB_POINT_SRID), Some(GeometryType::Point));
    }

    #[test]
    fn test_decode_empty_point() {
        let geom = decode_hex(EMPTY_POINT).unwrap();
        assert!(geom.is_empty());
    }

    #[test]
    fn test_decode_iso_point_z_drops_z() {
        let mut bytes = vec![1u8];
        bytes.put_u32_le(1001);
        bytes.put_f64_le(3.0);
        bytes.put_f64_le(4.0);
        bytes.put_f64_le(99.0);
        assert_eq!(
            decode(&bytes).unwrap(),
            Geometry::Point(Some(Coord::new(3.0, 4.0)))
        );
    }

    #[test]
    fn test_decode_ewkb_z_flag() {
        let mut bytes = vec![1u8];
        bytes.put_u32_le(2 | EWKB_Z);
        bytes.put_u32_le(2);
        for v in [0.0, 0.0, 5.0, 1.0, 1.0, 6.0] {
            bytes.put_f64_le(v);
        }
        assert_eq!(
            decode(&bytes).unwrap(),
            Geometry::LineString(vec![Coord::new(0.0, 0.0), Coord::new(1.0, 1.0)])
        );
    }

    #[test]
    fn test_decode_multipolygon() {
        let square = vec![
            Coord::new(0.0, 0.0),
            Coord::new(1.0, 0.0),
            Coord::new(1.0, 1.0),
            Coord::new(0.0, 0.0),
        ];
        let geom = Geometry::MultiPolygon(vec![vec![square.clone()], vec![square]]);
        let decoded = decode_hex(&encode_hex(&geom)).unwrap();
        assert_eq!(decoded, geom);
        assert_eq!(
            header_type(&encode_hex(&geom)),
            Some(GeometryType::MultiPolygon)
        );
    }

    #[test]
    fn test_decode_truncated() {
        let err = decode_hex("0101000000000000000000").unwrap_err();
        assert!(matches!(err, GeometryError::Truncated { .. }));
    }

    #[test]
    fn test_decode_invalid_byte_order() {
        let err = decode_hex("0501000000").unwrap_err();
        assert_eq!(err, GeometryError::InvalidByteOrder(5));
    }

    #[test]
    fn test_huge_count_rejected_without_allocating() {
        let mut bytes = vec![1u8];
        bytes.put_u32_le(2);
        bytes.put_u32_le(u32::MAX);
        assert!(matches!(
            decode(&bytes).unwrap_err(),
            GeometryError::Truncated { .. }
        ));
    }

    #[test]
    fn test_multipoint_with_wrong_member_type() {
        let mut bytes = vec![1u8];
        bytes.put_u32_le(4);
        bytes.put_u32_le(1);
        write_header(&mut bytes, 2);
        bytes.put_u32_le(0);
        assert!(matches!(
            decode(&bytes).unwrap_err(),
            GeometryError::NestedTypeMismatch { .. }
        ));
    }

    #[test]
    fn test_header_type_maps_curves() {
        let mut bytes = vec![1u8];
        bytes.put_u32_le(12); // MultiSurface
        assert_eq!(
            header_type(&hex::encode(&bytes)),
            Some(GeometryType::MultiPolygon)
        );

        let mut bytes = vec![1u8];
        bytes.put_u32_le(1009); // CompoundCurve Z
        assert_eq!(
            header_type(&hex::encode(&bytes)),
            Some(GeometryType::LineString)
        );
    }

    #[test]
    fn test_header_type_unknown_or_broken() {
        assert_eq!(header_type("zz"), None);
        assert_eq!(header_type("01"), None);
        let mut bytes = vec![1u8];
        bytes.put_u32_le(7);
        assert_eq!(header_type(&hex::encode(&bytes)), None);
    }

    #[test]
    fn test_hex_with_spaces() {
        let spaced = "01 01000000 0000000000002440 0000000000003440";
        assert_eq!(
            decode_hex(spaced).unwrap(),
            Geometry::Point(Some(Coord::new(10.0, 20.0)))
        );
    }
}
