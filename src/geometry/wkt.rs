//! Well-known text parser and writer
//!
//! Accepts the forms PostGIS emits from `ST_AsText` / `ST_AsEWKT`:
//! an optional `SRID=n;` prefix, `Z`/`M`/`ZM` dimension tags, `EMPTY`,
//! both MULTIPOINT spellings, and GEOMETRYCOLLECTION.

use super::{Coord, Geometry, GeometryError, Ring};
use std::fmt::{self, Write as _};

const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Number(f64),
    LParen,
    RParen,
    Comma,
}

struct Lexer<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn tokenize(text: &'a str) -> Result<Vec<(usize, Token)>, GeometryError> {
        let mut lexer = Lexer { text, pos: 0 };
        let mut tokens = Vec::new();
        while let Some(token) = lexer.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> GeometryError {
        GeometryError::InvalidWkt {
            offset,
            message: message.into(),
        }
    }

    fn next_token(&mut self) -> Result<Option<(usize, Token)>, GeometryError> {
        let bytes = self.text.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        let start = self.pos;
        let Some(&b) = bytes.get(start) else {
            return Ok(None);
        };

        let token = match b {
            b'(' => {
                self.pos += 1;
                Token::LParen
            }
            b')' => {
                self.pos += 1;
                Token::RParen
            }
            b',' => {
                self.pos += 1;
                Token::Comma
            }
            b if b.is_ascii_alphabetic() => {
                while self.pos < bytes.len() && bytes[self.pos].is_ascii_alphabetic() {
                    self.pos += 1;
                }
                Token::Word(self.text[start..self.pos].to_ascii_uppercase())
            }
            b if b.is_ascii_digit() || b == b'-' || b == b'+' || b == b'.' => {
                self.pos += 1;
                while self.pos < bytes.len() {
                    let c = bytes[self.pos];
                    let exponent_sign =
                        (c == b'-' || c == b'+') && matches!(bytes[self.pos - 1], b'e' | b'E');
                    if c.is_ascii_digit() || c == b'.' || c == b'e' || c == b'E' || exponent_sign {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                let literal = &self.text[start..self.pos];
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| self.error(start, format!("invalid number '{}'", literal)))?;
                Token::Number(value)
            }
            _ => {
                let c = self.text[start..].chars().next().unwrap_or('?');
                return Err(self.error(start, format!("unexpected character '{}'", c)));
            }
        };
        Ok(Some((start, token)))
    }
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    index: usize,
    end: usize,
}

impl Parser {
    fn offset(&self) -> usize {
        self.tokens
            .get(self.index)
            .map(|(offset, _)| *offset)
            .unwrap_or(self.end)
    }

    fn error(&self, message: impl Into<String>) -> GeometryError {
        GeometryError::InvalidWkt {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index).map(|(_, t)| t)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).map(|(_, t)| t.clone());
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), GeometryError> {
        match self.next() {
            Some(ref t) if *t == expected => Ok(()),
            Some(t) => {
                self.index -= 1;
                Err(self.error(format!("expected {:?}, found {:?}", expected, t)))
            }
            None => Err(self.error(format!("expected {:?}, found end of input", expected))),
        }
    }

    fn word(&mut self) -> Result<String, GeometryError> {
        match self.peek() {
            Some(Token::Word(w)) => {
                let w = w.clone();
                self.index += 1;
                Ok(w)
            }
            _ => Err(self.error("expected geometry keyword")),
        }
    }

    fn number(&mut self) -> Result<f64, GeometryError> {
        match self.peek() {
            Some(Token::Number(n)) => {
                let n = *n;
                self.index += 1;
                Ok(n)
            }
            _ => Err(self.error("expected number")),
        }
    }

    /// Consume an optional dimension tag (`Z`, `M`, `ZM`)
    fn skip_dimension_tag(&mut self) {
        if let Some(Token::Word(w)) = self.peek() {
            if matches!(w.as_str(), "Z" | "M" | "ZM") {
                self.index += 1;
            }
        }
    }

    /// True and consumed if the next token is `EMPTY`
    fn take_empty(&mut self) -> bool {
        if let Some(Token::Word(w)) = self.peek() {
            if w == "EMPTY" {
                self.index += 1;
                return true;
            }
        }
        false
    }

    fn coord(&mut self) -> Result<Coord, GeometryError> {
        let x = self.number()?;
        let y = self.number()?;
        // Optional Z and M ordinates
        for _ in 0..2 {
            if matches!(self.peek(), Some(Token::Number(_))) {
                self.index += 1;
            }
        }
        Ok(Coord::new(x, y))
    }

    fn list<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<T, GeometryError>,
    ) -> Result<Vec<T>, GeometryError> {
        if self.take_empty() {
            return Ok(Vec::new());
        }
        self.expect(Token::LParen)?;
        let mut items = vec![item(self)?];
        while matches!(self.peek(), Some(Token::Comma)) {
            self.index += 1;
            items.push(item(self)?);
        }
        self.expect(Token::RParen)?;
        Ok(items)
    }

    fn coords(&mut self) -> Result<Vec<Coord>, GeometryError> {
        self.list(Self::coord)
    }

    fn rings(&mut self) -> Result<Vec<Ring>, GeometryError> {
        self.list(Self::coords)
    }

    /// MULTIPOINT members, either `(1 2)` or bare `1 2`
    fn multipoint_member(&mut self) -> Result<Option<Coord>, GeometryError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.index += 1;
                let c = self.coord()?;
                self.expect(Token::RParen)?;
                Ok(Some(c))
            }
            Some(Token::Word(w)) if w == "EMPTY" => {
                self.index += 1;
                Ok(None)
            }
            _ => self.coord().map(Some),
        }
    }

    fn geometry(&mut self, depth: usize) -> Result<Geometry, GeometryError> {
        if depth > MAX_DEPTH {
            return Err(GeometryError::TooDeep);
        }
        let keyword = self.word()?;
        self.skip_dimension_tag();

        match keyword.as_str() {
            "POINT" => {
                if self.take_empty() {
                    return Ok(Geometry::Point(None));
                }
                self.expect(Token::LParen)?;
                let c = self.coord()?;
                self.expect(Token::RParen)?;
                Ok(Geometry::Point(Some(c)))
            }
            "LINESTRING" => Ok(Geometry::LineString(self.coords()?)),
            "POLYGON" => Ok(Geometry::Polygon(self.rings()?)),
            "MULTIPOINT" => Ok(Geometry::MultiPoint(
                self.list(Self::multipoint_member)?
                    .into_iter()
                    .flatten()
                    .collect(),
            )),
            "MULTILINESTRING" => Ok(Geometry::MultiLineString(self.list(Self::coords)?)),
            "MULTIPOLYGON" => Ok(Geometry::MultiPolygon(self.list(Self::rings)?)),
            "GEOMETRYCOLLECTION" => Ok(Geometry::GeometryCollection(
                self.list(|p| p.geometry(depth + 1))?,
            )),
            other => {
                self.index = self.index.saturating_sub(1);
                Err(self.error(format!("unknown geometry type '{}'", other)))
            }
        }
    }
}

/// Parse a WKT or EWKT string
pub fn parse(text: &str) -> Result<Geometry, GeometryError> {
    let trimmed = text.trim();
    let (body, base) = match trimmed.find(';') {
        Some(idx) if trimmed[..idx].trim().to_ascii_uppercase().starts_with("SRID=") => {
            (&trimmed[idx + 1..], idx + 1)
        }
        _ => (trimmed, 0),
    };

    let tokens = Lexer::tokenize(body).map_err(|e| shift_offset(e, base))?;
    let mut parser = Parser {
        tokens,
        index: 0,
        end: body.len(),
    };
    let geometry = parser.geometry(0).map_err(|e| shift_offset(e, base))?;
    if parser.peek().is_some() {
        return Err(shift_offset(parser.error("trailing input"), base));
    }
    Ok(geometry)
}

fn shift_offset(err: GeometryError, base: usize) -> GeometryError {
    match err {
        GeometryError::InvalidWkt { offset, message } => GeometryError::InvalidWkt {
            offset: offset + base,
            message,
        },
        other => other,
    }
}

fn write_coords(out: &mut String, coords: &[Coord]) -> fmt::Result {
    if coords.is_empty() {
        return out.write_str("EMPTY");
    }
    out.write_char('(')?;
    for (i, c) in coords.iter().enumerate() {
        if i > 0 {
            out.write_char(',')?;
        }
        write!(out, "{} {}", c.x, c.y)?;
    }
    out.write_char(')')
}

fn write_rings(out: &mut String, rings: &[Ring]) -> fmt::Result {
    if rings.is_empty() {
        return out.write_str("EMPTY");
    }
    out.write_char('(')?;
    for (i, ring) in rings.iter().enumerate() {
        if i > 0 {
            out.write_char(',')?;
        }
        write_coords(out, ring)?;
    }
    out.write_char(')')
}

fn write_body(out: &mut String, geometry: &Geometry) -> fmt::Result {
    match geometry {
        Geometry::Point(Some(c)) => write!(out, "({} {})", c.x, c.y),
        Geometry::Point(None) => out.write_str("EMPTY"),
        Geometry::LineString(coords) | Geometry::MultiPoint(coords) => write_coords(out, coords),
        Geometry::Polygon(rings) | Geometry::MultiLineString(rings) => write_rings(out, rings),
        Geometry::MultiPolygon(polys) => {
            if polys.is_empty() {
                return out.write_str("EMPTY");
            }
            out.write_char('(')?;
            for (i, rings) in polys.iter().enumerate() {
                if i > 0 {
                    out.write_char(',')?;
                }
                write_rings(out, rings)?;
            }
            out.write_char(')')
        }
        Geometry::GeometryCollection(members) => {
            if members.is_empty() {
                return out.write_str("EMPTY");
            }
            out.write_char('(')?;
            for (i, member) in members.iter().enumerate() {
                if i > 0 {
                    out.write_char(',')?;
                }
                write!(out, "{}", member)?;
            }
            out.write_char(')')
        }
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = match self.geometry_type() {
            Some(t) => t.wkt_keyword(),
            None => "GEOMETRYCOLLECTION",
        };
        let mut body = String::new();
        write_body(&mut body, self)?;
        if body == "EMPTY" {
            write!(f, "{} EMPTY", keyword)
        } else {
            write!(f, "{}{}", keyword, body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point() {
        assert_eq!(
            parse("POINT(10 20)").unwrap(),
            Geometry::Point(Some(Coord::new(10.0, 20.0)))
        );
    }

    #[test]
    fn test_parse_is_case_insensitive_and_spacing_tolerant() {
        assert_eq!(
            parse("  point ( -1.5e2   2.25 ) ").unwrap(),
            Geometry::Point(Some(Coord::new(-150.0, 2.25)))
        );
    }

    #[test]
    fn test_parse_ewkt_prefix_and_z() {
        let geom = parse("SRID=4326;LINESTRING Z (0 0 1,1 1 2)").unwrap();
        assert_eq!(
            geom,
            Geometry::LineString(vec![Coord::new(0.0, 0.0), Coord::new(1.0, 1.0)])
        );
    }

    #[test]
    fn test_parse_polygon_with_hole() {
        let geom = parse("POLYGON((0 0,10 0,10 10,0 0),(1 1,2 1,2 2,1 1))").unwrap();
        match geom {
            Geometry::Polygon(rings) => {
                assert_eq!(rings.len(), 2);
                assert_eq!(rings[1][0], Coord::new(1.0, 1.0));
            }
            other => panic!("expected polygon, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_multipoint_both_forms() {
        let expected = Geometry::MultiPoint(vec![Coord::new(1.0, 2.0), Coord::new(3.0, 4.0)]);
        assert_eq!(parse("MULTIPOINT((1 2),(3 4))").unwrap(), expected);
        assert_eq!(parse("MULTIPOINT(1 2, 3 4)").unwrap(), expected);
    }

    #[test]
    fn test_parse_multipolygon() {
        let geom = parse("MULTIPOLYGON(((0 0,1 0,1 1,0 0)),((5 5,6 5,6 6,5 5)))").unwrap();
        assert!(matches!(geom, Geometry::MultiPolygon(ref p) if p.len() == 2));
    }

    #[test]
    fn test_parse_empty_forms() {
        assert!(parse("POINT EMPTY").unwrap().is_empty());
        assert!(parse("POLYGON EMPTY").unwrap().is_empty());
        assert!(parse("GEOMETRYCOLLECTION EMPTY").unwrap().is_empty());
    }

    #[test]
    fn test_parse_collection() {
        let geom = parse("GEOMETRYCOLLECTION(POINT(1 2),LINESTRING(0 0,1 1))").unwrap();
        match geom {
            Geometry::GeometryCollection(members) => assert_eq!(members.len(), 2),
            other => panic!("expected collection, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("").is_err());
        assert!(parse("POINT(1)").is_err());
        assert!(parse("POINT(1 2").is_err());
        assert!(parse("CIRCLE(1 2)").is_err());
        assert!(parse("POINT(1 2) extra").is_err());
        assert!(parse("Metropolis").is_err());
    }

    #[test]
    fn test_error_offset_points_at_problem() {
        match parse("POINT(1 x)").unwrap_err() {
            GeometryError::InvalidWkt { offset, .. } => assert_eq!(offset, 8),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_display_round_trips() {
        for text in [
            "POINT(10 20)",
            "LINESTRING(0 0,1 1)",
            "POLYGON((0 0,1 0,1 1,0 0))",
            "MULTIPOINT(1 2,3 4)",
            "MULTIPOLYGON(((0 0,1 0,1 1,0 0)))",
            "POINT EMPTY",
        ] {
            assert_eq!(parse(text).unwrap().to_string(), text);
        }
    }
}
