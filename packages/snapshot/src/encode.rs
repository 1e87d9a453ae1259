//! Artifact encoding: `GeoJSON` feature collections and gzip.

use std::io::{Read as _, Write as _};

use canvass_territory_models::{AddressPoint, Feature};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

/// Builds a `GeoJSON` feature collection. Feature ids are set and the
/// stored properties carried over.
#[must_use]
pub fn feature_collection(features: &[Feature]) -> geojson::FeatureCollection {
    geojson::FeatureCollection {
        bbox: None,
        features: features
            .iter()
            .map(|f| geojson::Feature {
                bbox: None,
                geometry: Some(canvass_geometry::to_geojson(&f.geometry)),
                id: Some(geojson::feature::Id::String(f.id.clone())),
                properties: Some(f.properties.clone()),
                foreign_members: None,
            })
            .collect(),
        foreign_members: None,
    }
}

/// Gzip-compresses a buffer.
///
/// # Errors
///
/// Returns an I/O error if compression fails.
pub fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

/// Decompresses a gzip buffer.
///
/// # Errors
///
/// Returns an I/O error if the buffer is not valid gzip.
pub fn gunzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Gzipped `GeoJSON` for a theme.
///
/// # Errors
///
/// Returns an error if serialization or compression fails.
pub fn encode_features(features: &[Feature]) -> Result<Vec<u8>, crate::SnapshotError> {
    let json = serde_json::to_vec(&feature_collection(features))?;
    Ok(gzip(&json)?)
}

/// Gzipped JSON array of address points.
///
/// # Errors
///
/// Returns an error if serialization or compression fails.
pub fn encode_addresses(addresses: &[AddressPoint]) -> Result<Vec<u8>, crate::SnapshotError> {
    let json = serde_json::to_vec(addresses)?;
    Ok(gzip(&json)?)
}

#[cfg(test)]
mod tests {
    use canvass_territory_models::Theme;
    use geo::{Geometry, Point};

    use super::*;

    #[test]
    fn features_survive_encoding() {
        let mut properties = serde_json::Map::new();
        properties.insert("height".into(), serde_json::json!(12.5));
        let features = vec![Feature {
            id: "b1".into(),
            theme: Theme::Buildings,
            geometry: Geometry::Point(Point::new(-79.35, 43.65)),
            properties,
        }];

        let bytes = encode_features(&features).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
        let json: serde_json::Value = serde_json::from_slice(&gunzip(&bytes).unwrap()).unwrap();
        assert_eq!(json["type"], "FeatureCollection");
        assert_eq!(json["features"][0]["id"], "b1");
        assert_eq!(json["features"][0]["properties"]["height"], 12.5);
        assert_eq!(
            json["features"][0]["geometry"]["coordinates"],
            serde_json::json!([-79.35, 43.65])
        );
    }

    #[test]
    fn empty_collection_is_valid() {
        let bytes = encode_features(&[]).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&gunzip(&bytes).unwrap()).unwrap();
        assert_eq!(json["features"], serde_json::json!([]));
    }
}
