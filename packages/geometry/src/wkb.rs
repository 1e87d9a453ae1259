//! Well-known binary reading and writing.
//!
//! The reader accepts ISO WKB (Z/M/ZM via the +1000/+2000/+3000 type
//! offsets) and PostGIS EWKB (high-bit Z/M flags plus optional SRID) in
//! either byte order. Z and M ordinates are read and dropped. The writer
//! always emits little-endian 2D ISO WKB.

use geo::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};

use crate::CodecError;

const WKB_BE: u8 = 0;
const WKB_LE: u8 = 1;

const WKB_POINT: u32 = 1;
const WKB_LINESTRING: u32 = 2;
const WKB_POLYGON: u32 = 3;
const WKB_MULTIPOINT: u32 = 4;
const WKB_MULTILINESTRING: u32 = 5;
const WKB_MULTIPOLYGON: u32 = 6;
const WKB_GEOMETRYCOLLECTION: u32 = 7;

const EWKB_Z: u32 = 0x8000_0000;
const EWKB_M: u32 = 0x4000_0000;
const EWKB_SRID: u32 = 0x2000_0000;

/// Collections nested deeper than this are rejected.
const MAX_DEPTH: usize = 32;

/// Decodes a WKB or EWKB byte buffer into a geometry.
///
/// # Errors
///
/// Returns [`CodecError`] if the buffer is truncated, uses an unknown type
/// code, has trailing bytes, or describes an empty point.
pub fn read_wkb(bytes: &[u8]) -> Result<Geometry<f64>, CodecError> {
    let mut reader = WkbReader { bytes, pos: 0 };
    let geometry = reader.read_geometry(0)?;
    if reader.pos != bytes.len() {
        return Err(CodecError::Wkb(format!(
            "{} trailing bytes after geometry",
            bytes.len() - reader.pos
        )));
    }
    Ok(geometry)
}

struct Header {
    little_endian: bool,
    kind: u32,
    extra_dims: usize,
}

struct WkbReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl WkbReader<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let end = self.pos + N;
        let slice = self.bytes.get(self.pos..end).ok_or_else(|| {
            CodecError::Wkb(format!("unexpected end of buffer at byte {}", self.pos))
        })?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn read_u32(&mut self, le: bool) -> Result<u32, CodecError> {
        let raw = self.take::<4>()?;
        Ok(if le {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    }

    fn read_f64(&mut self, le: bool) -> Result<f64, CodecError> {
        let raw = self.take::<8>()?;
        Ok(if le {
            f64::from_le_bytes(raw)
        } else {
            f64::from_be_bytes(raw)
        })
    }

    /// Reads a count and checks the remaining buffer could hold it.
    fn read_count(&mut self, le: bool, min_item_bytes: usize) -> Result<usize, CodecError> {
        let count = self.read_u32(le)? as usize;
        let remaining = self.bytes.len() - self.pos;
        if count.saturating_mul(min_item_bytes) > remaining {
            return Err(CodecError::Wkb(format!(
                "count {count} exceeds remaining {remaining} bytes"
            )));
        }
        Ok(count)
    }

    fn read_header(&mut self) -> Result<Header, CodecError> {
        let [order] = self.take::<1>()?;
        let little_endian = match order {
            WKB_LE => true,
            WKB_BE => false,
            other => return Err(CodecError::Wkb(format!("invalid byte order {other}"))),
        };

        let raw = self.read_u32(little_endian)?;
        let mut extra_dims = usize::from(raw & EWKB_Z != 0) + usize::from(raw & EWKB_M != 0);
        if raw & EWKB_SRID != 0 {
            let _srid = self.read_u32(little_endian)?;
        }

        let base = raw & 0x0FFF_FFFF;
        extra_dims += match base / 1000 {
            0 => 0,
            1 | 2 => 1,
            3 => 2,
            _ => return Err(CodecError::Wkb(format!("unknown geometry type {raw:#x}"))),
        };

        Ok(Header {
            little_endian,
            kind: base % 1000,
            extra_dims,
        })
    }

    fn read_coord(&mut self, header: &Header) -> Result<Coord<f64>, CodecError> {
        let x = self.read_f64(header.little_endian)?;
        let y = self.read_f64(header.little_endian)?;
        for _ in 0..header.extra_dims {
            self.read_f64(header.little_endian)?;
        }
        Ok(Coord { x, y })
    }

    fn read_line_string(&mut self, header: &Header) -> Result<LineString<f64>, CodecError> {
        let count = self.read_count(header.little_endian, 16)?;
        let coords = (0..count)
            .map(|_| self.read_coord(header))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LineString::from(coords))
    }

    fn read_polygon(&mut self, header: &Header) -> Result<Polygon<f64>, CodecError> {
        let rings = self.read_count(header.little_endian, 4)?;
        if rings == 0 {
            return Ok(Polygon::new(LineString::new(vec![]), vec![]));
        }
        let exterior = self.read_line_string(header)?;
        let interiors = (1..rings)
            .map(|_| self.read_line_string(header))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Polygon::new(exterior, interiors))
    }

    fn read_point(&mut self, header: &Header) -> Result<Point<f64>, CodecError> {
        let coord = self.read_coord(header)?;
        if coord.x.is_nan() && coord.y.is_nan() {
            return Err(CodecError::EmptyGeometry("Point"));
        }
        Ok(Point::from(coord))
    }

    /// Reads a nested part and requires it to be of `kind`.
    fn read_part(&mut self, kind: u32) -> Result<Header, CodecError> {
        let header = self.read_header()?;
        if header.kind != kind {
            return Err(CodecError::Wkb(format!(
                "expected part type {kind}, got {}",
                header.kind
            )));
        }
        Ok(header)
    }

    fn read_geometry(&mut self, depth: usize) -> Result<Geometry<f64>, CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::Wkb("geometry collection nested too deeply".into()));
        }

        let header = self.read_header()?;
        let le = header.little_endian;

        Ok(match header.kind {
            WKB_POINT => Geometry::Point(self.read_point(&header)?),
            WKB_LINESTRING => Geometry::LineString(self.read_line_string(&header)?),
            WKB_POLYGON => Geometry::Polygon(self.read_polygon(&header)?),
            WKB_MULTIPOINT => {
                let count = self.read_count(le, 21)?;
                let mut points = Vec::with_capacity(count);
                for _ in 0..count {
                    let part = self.read_part(WKB_POINT)?;
                    points.push(self.read_point(&part)?);
                }
                Geometry::MultiPoint(MultiPoint(points))
            }
            WKB_MULTILINESTRING => {
                let count = self.read_count(le, 9)?;
                let mut lines = Vec::with_capacity(count);
                for _ in 0..count {
                    let part = self.read_part(WKB_LINESTRING)?;
                    lines.push(self.read_line_string(&part)?);
                }
                Geometry::MultiLineString(MultiLineString(lines))
            }
            WKB_MULTIPOLYGON => {
                let count = self.read_count(le, 9)?;
                let mut polygons = Vec::with_capacity(count);
                for _ in 0..count {
                    let part = self.read_part(WKB_POLYGON)?;
                    polygons.push(self.read_polygon(&part)?);
                }
                Geometry::MultiPolygon(MultiPolygon(polygons))
            }
            WKB_GEOMETRYCOLLECTION => {
                let count = self.read_count(le, 5)?;
                let mut parts = Vec::with_capacity(count);
                for _ in 0..count {
                    parts.push(self.read_geometry(depth + 1)?);
                }
                Geometry::GeometryCollection(GeometryCollection(parts))
            }
            other => return Err(CodecError::Wkb(format!("unsupported geometry type {other}"))),
        })
    }
}

// ── Writing ──────────────────────────────────────────────────────

/// Encodes a geometry as little-endian 2D ISO WKB.
///
/// `Line`, `Rect`, and `Triangle` are written as their `LineString` /
/// `Polygon` equivalents.
#[must_use]
pub fn write_wkb(geometry: &Geometry<f64>) -> Vec<u8> {
    let mut out = Vec::new();
    write_geometry(&mut out, geometry);
    out
}

fn write_header(out: &mut Vec<u8>, kind: u32) {
    out.push(WKB_LE);
    out.extend_from_slice(&kind.to_le_bytes());
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    // WKB counts are u32; anything larger cannot be represented.
    let len = u32::try_from(len).unwrap_or(u32::MAX);
    out.extend_from_slice(&len.to_le_bytes());
}

fn write_coord(out: &mut Vec<u8>, coord: Coord<f64>) {
    out.extend_from_slice(&coord.x.to_le_bytes());
    out.extend_from_slice(&coord.y.to_le_bytes());
}

fn write_ring(out: &mut Vec<u8>, ring: &LineString<f64>) {
    write_len(out, ring.0.len());
    for coord in &ring.0 {
        write_coord(out, *coord);
    }
}

fn write_polygon_body(out: &mut Vec<u8>, polygon: &Polygon<f64>) {
    if polygon.exterior().0.is_empty() {
        write_len(out, 0);
        return;
    }
    write_len(out, 1 + polygon.interiors().len());
    write_ring(out, polygon.exterior());
    for interior in polygon.interiors() {
        write_ring(out, interior);
    }
}

fn write_geometry(out: &mut Vec<u8>, geometry: &Geometry<f64>) {
    match geometry {
        Geometry::Point(p) => {
            write_header(out, WKB_POINT);
            write_coord(out, p.0);
        }
        Geometry::Line(line) => {
            write_header(out, WKB_LINESTRING);
            write_ring(out, &LineString::from(vec![line.start, line.end]));
        }
        Geometry::LineString(ls) => {
            write_header(out, WKB_LINESTRING);
            write_ring(out, ls);
        }
        Geometry::Polygon(polygon) => {
            write_header(out, WKB_POLYGON);
            write_polygon_body(out, polygon);
        }
        Geometry::Rect(rect) => {
            write_header(out, WKB_POLYGON);
            write_polygon_body(out, &rect.to_polygon());
        }
        Geometry::Triangle(triangle) => {
            write_header(out, WKB_POLYGON);
            write_polygon_body(out, &triangle.to_polygon());
        }
        Geometry::MultiPoint(mp) => {
            write_header(out, WKB_MULTIPOINT);
            write_len(out, mp.0.len());
            for point in &mp.0 {
                write_header(out, WKB_POINT);
                write_coord(out, point.0);
            }
        }
        Geometry::MultiLineString(mls) => {
            write_header(out, WKB_MULTILINESTRING);
            write_len(out, mls.0.len());
            for ls in &mls.0 {
                write_header(out, WKB_LINESTRING);
                write_ring(out, ls);
            }
        }
        Geometry::MultiPolygon(mp) => {
            write_header(out, WKB_MULTIPOLYGON);
            write_len(out, mp.0.len());
            for polygon in &mp.0 {
                write_header(out, WKB_POLYGON);
                write_polygon_body(out, polygon);
            }
        }
        Geometry::GeometryCollection(gc) => {
            write_header(out, WKB_GEOMETRYCOLLECTION);
            write_len(out, gc.0.len());
            for part in &gc.0 {
                write_geometry(out, part);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use geo::{Rect, coord, polygon};

    use super::*;

    fn square() -> Polygon<f64> {
        polygon![
            (x: -79.39, y: 43.64),
            (x: -79.38, y: 43.64),
            (x: -79.38, y: 43.65),
            (x: -79.39, y: 43.65),
            (x: -79.39, y: 43.64),
        ]
    }

    #[test]
    fn reads_what_it_writes_for_every_type() {
        let geometries = vec![
            Geometry::Point(Point::new(-79.4, 43.7)),
            Geometry::LineString(LineString::from(vec![(0.0, 0.0), (1.0, 1.0)])),
            Geometry::Polygon(square()),
            Geometry::MultiPoint(MultiPoint(vec![Point::new(1.0, 2.0), Point::new(3.0, 4.0)])),
            Geometry::MultiLineString(MultiLineString(vec![LineString::from(vec![
                (0.0, 0.0),
                (2.0, 2.0),
            ])])),
            Geometry::MultiPolygon(MultiPolygon(vec![square(), square()])),
            Geometry::GeometryCollection(GeometryCollection(vec![
                Geometry::Point(Point::new(5.0, 6.0)),
                Geometry::Polygon(square()),
            ])),
        ];

        for geometry in geometries {
            let decoded = read_wkb(&write_wkb(&geometry)).unwrap();
            assert_eq!(decoded, geometry);
        }
    }

    #[test]
    fn rect_is_written_as_polygon() {
        let rect = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 });
        let decoded = read_wkb(&write_wkb(&Geometry::Rect(rect))).unwrap();
        assert_eq!(decoded, Geometry::Polygon(rect.to_polygon()));
    }

    #[test]
    fn reads_big_endian_point() {
        let mut bytes = vec![WKB_BE];
        bytes.extend_from_slice(&WKB_POINT.to_be_bytes());
        bytes.extend_from_slice(&1.5f64.to_be_bytes());
        bytes.extend_from_slice(&(-2.5f64).to_be_bytes());
        assert_eq!(read_wkb(&bytes).unwrap(), Geometry::Point(Point::new(1.5, -2.5)));
    }

    #[test]
    fn reads_ewkb_point_with_srid_and_z() {
        let mut bytes = vec![WKB_LE];
        bytes.extend_from_slice(&(WKB_POINT | EWKB_Z | EWKB_SRID).to_le_bytes());
        bytes.extend_from_slice(&4326u32.to_le_bytes());
        bytes.extend_from_slice(&10.0f64.to_le_bytes());
        bytes.extend_from_slice(&20.0f64.to_le_bytes());
        bytes.extend_from_slice(&99.0f64.to_le_bytes());
        assert_eq!(read_wkb(&bytes).unwrap(), Geometry::Point(Point::new(10.0, 20.0)));
    }

    #[test]
    fn reads_iso_zm_linestring() {
        let mut bytes = vec![WKB_LE];
        bytes.extend_from_slice(&3002u32.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        for value in [0.0f64, 0.0, 5.0, 7.0, 1.0, 1.0, 5.0, 7.0] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        assert_eq!(
            read_wkb(&bytes).unwrap(),
            Geometry::LineString(LineString::from(vec![(0.0, 0.0), (1.0, 1.0)]))
        );
    }

    #[test]
    fn rejects_truncated_and_garbage() {
        let bytes = write_wkb(&Geometry::Polygon(square()));
        assert!(read_wkb(&bytes[..bytes.len() - 3]).is_err());
        assert!(read_wkb(&[7, 1, 0, 0, 0]).is_err());
        assert!(read_wkb(&[]).is_err());

        let mut trailing = write_wkb(&Geometry::Point(Point::new(1.0, 1.0)));
        trailing.push(0);
        assert!(read_wkb(&trailing).is_err());
    }

    #[test]
    fn rejects_absurd_counts_without_allocating() {
        let mut bytes = vec![WKB_LE];
        bytes.extend_from_slice(&WKB_LINESTRING.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(read_wkb(&bytes).is_err());
    }

    #[test]
    fn empty_point_is_an_error() {
        let bytes = write_wkb(&Geometry::Point(Point::new(f64::NAN, f64::NAN)));
        assert!(matches!(read_wkb(&bytes), Err(CodecError::EmptyGeometry(_))));
    }
}
