#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geometry codec for feature partitions and API payloads.
//!
//! Decodes the binary and text geometry encodings found in the wild into
//! `geo` geometries, writes canonical WKB, and converts to and from
//! `GeoJSON`. A malformed geometry in a batch is skipped with a warning and
//! counted; it never aborts the batch.

pub mod encoding;
pub mod metric;
pub mod wkb;

pub use encoding::{GeometryEncoding, WrappedBinary};

use geo::MultiPolygon;

/// Errors produced while decoding a single geometry.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Structurally invalid WKB.
    #[error("Invalid WKB: {0}")]
    Wkb(String),

    /// Hex or base64 text that did not decode.
    #[error("Invalid geometry text: {0}")]
    Text(String),

    /// `GeoJSON` that could not be converted.
    #[error("Invalid GeoJSON geometry: {0}")]
    GeoJson(String),

    /// A value that is not any supported encoding.
    #[error("Unrecognised geometry encoding: {0}")]
    UnknownEncoding(String),

    /// An empty geometry where a concrete one is required.
    #[error("Empty {0} geometry")]
    EmptyGeometry(&'static str),
}

/// Converts a geometry to a `GeoJSON` geometry object.
#[must_use]
pub fn to_geojson(geometry: &geo::Geometry<f64>) -> geojson::Geometry {
    geojson::Geometry::new(geojson::Value::from(geometry))
}

/// Parses a `GeoJSON` geometry string.
///
/// # Errors
///
/// Returns [`CodecError::GeoJson`] if the string is not a geometry object.
pub fn parse_geojson(text: &str) -> Result<geo::Geometry<f64>, CodecError> {
    match text.parse::<geojson::GeoJson>() {
        Ok(geojson::GeoJson::Geometry(geometry)) => GeometryEncoding::GeoJson(geometry).decode(),
        Ok(_) => Err(CodecError::GeoJson("expected a geometry object".into())),
        Err(e) => Err(CodecError::GeoJson(e.to_string())),
    }
}

/// Narrows an areal geometry to a [`MultiPolygon`].
///
/// Returns `None` for non-areal geometries.
#[must_use]
pub fn to_multipolygon(geometry: geo::Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Rect(r) => Some(MultiPolygon(vec![r.to_polygon()])),
        geo::Geometry::Triangle(t) => Some(MultiPolygon(vec![t.to_polygon()])),
        _ => None,
    }
}

/// Decodes a batch of `(id, encoding)` pairs.
///
/// Undecodable entries are logged and dropped. Returns the decoded pairs in
/// input order together with the number skipped.
#[must_use]
pub fn decode_batch<I>(items: I) -> (Vec<(String, geo::Geometry<f64>)>, usize)
where
    I: IntoIterator<Item = (String, GeometryEncoding)>,
{
    let mut decoded = Vec::new();
    let mut skipped = 0;

    for (id, encoding) in items {
        match encoding.decode() {
            Ok(geometry) => decoded.push((id, geometry)),
            Err(e) => {
                log::warn!("Skipping feature {id}: {} geometry: {e}", encoding.kind());
                skipped += 1;
            }
        }
    }

    (decoded, skipped)
}

#[cfg(test)]
mod tests {
    use geo::{Point, polygon};

    use super::*;
    use crate::wkb::write_wkb;

    #[test]
    fn geojson_to_wkb_to_geojson_preserves_coordinates() {
        let text = r#"{"type":"Polygon","coordinates":[[[-79.39,43.64],[-79.38,43.64],[-79.38,43.65],[-79.39,43.65],[-79.39,43.64]]]}"#;
        let geometry = parse_geojson(text).unwrap();
        let restored = wkb::read_wkb(&write_wkb(&geometry)).unwrap();
        let json = to_geojson(&restored);

        let geojson::GeoJson::Geometry(original) = text.parse::<geojson::GeoJson>().unwrap() else {
            panic!("expected geometry");
        };
        assert_eq!(json.value, original.value);
    }

    #[test]
    fn malformed_geometry_is_skipped_and_batch_continues() {
        let good = write_wkb(&geo::Geometry::Point(Point::new(1.0, 2.0)));
        let items = vec![
            ("a".to_string(), GeometryEncoding::Wkb(good.clone())),
            ("b".to_string(), GeometryEncoding::Hex("deadbeef".into())),
            ("c".to_string(), GeometryEncoding::Wkb(good)),
        ];

        let (decoded, skipped) = decode_batch(items);
        assert_eq!(skipped, 1);
        let ids: Vec<_> = decoded.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn multipolygon_narrowing() {
        let poly = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 0.0)];
        assert_eq!(
            to_multipolygon(geo::Geometry::Polygon(poly.clone())),
            Some(MultiPolygon(vec![poly]))
        );
        assert!(to_multipolygon(geo::Geometry::Point(Point::new(0.0, 0.0))).is_none());
    }
}
