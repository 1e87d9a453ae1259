//! Tagged geometry encodings and their decoders.
//!
//! Feature partitions and upstream APIs hand geometries over in several
//! shapes. Each shape is a variant of [`GeometryEncoding`] with its own
//! decoder, so nothing downstream has to guess at types.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::CodecError;
use crate::wkb::read_wkb;

/// The JSON shape produced when a binary buffer is serialized directly,
/// e.g. `{"type": "Buffer", "data": [1, 1, 0, 0, 0, ...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedBinary {
    /// Wrapper tag; `Buffer` in practice but not checked.
    #[serde(rename = "type")]
    pub kind: String,
    /// Raw WKB bytes.
    pub data: Vec<u8>,
}

/// A geometry in one of the accepted wire encodings.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryEncoding {
    /// Raw WKB / EWKB bytes.
    Wkb(Vec<u8>),
    /// WKB as a hex string (optionally `\x` or `0x` prefixed).
    Hex(String),
    /// WKB as a base64 string.
    Base64(String),
    /// An already-decoded `GeoJSON` geometry.
    GeoJson(geojson::Geometry),
    /// WKB wrapped in a `{type, data}` object.
    Wrapped(WrappedBinary),
}

impl GeometryEncoding {
    /// Classifies a text column value.
    ///
    /// JSON objects are parsed as `GeoJSON` or wrapped binary; strings made
    /// entirely of hex digits with even length are hex; anything else is
    /// treated as base64.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.starts_with('{')
            && let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed)
            && let Ok(encoding) = Self::from_json(&value)
        {
            return encoding;
        }

        let digits = strip_hex_prefix(trimmed);
        if !digits.is_empty()
            && digits.len() % 2 == 0
            && digits.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Self::Hex(trimmed.to_string());
        }

        Self::Base64(trimmed.to_string())
    }

    /// Classifies a JSON value (API payloads, stored properties).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownEncoding`] for values that are none of
    /// a string, a byte array, a wrapped-binary object, or a `GeoJSON`
    /// geometry.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, CodecError> {
        match value {
            serde_json::Value::String(s) => Ok(Self::from_text(s)),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|v| {
                    v.as_u64()
                        .and_then(|n| u8::try_from(n).ok())
                        .ok_or_else(|| CodecError::UnknownEncoding("non-byte array".into()))
                })
                .collect::<Result<Vec<u8>, _>>()
                .map(Self::Wkb),
            serde_json::Value::Object(map) if map.contains_key("data") => {
                serde_json::from_value::<WrappedBinary>(value.clone())
                    .map(Self::Wrapped)
                    .map_err(|e| CodecError::UnknownEncoding(e.to_string()))
            }
            serde_json::Value::Object(map) if map.contains_key("type") => {
                serde_json::from_value::<geojson::Geometry>(value.clone())
                    .map(Self::GeoJson)
                    .map_err(|e| CodecError::GeoJson(e.to_string()))
            }
            other => Err(CodecError::UnknownEncoding(format!(
                "unsupported JSON geometry value: {other}"
            ))),
        }
    }

    /// Short name of the variant, for log lines.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Wkb(_) => "wkb",
            Self::Hex(_) => "hex",
            Self::Base64(_) => "base64",
            Self::GeoJson(_) => "geojson",
            Self::Wrapped(_) => "wrapped",
        }
    }

    /// Decodes to a `geo` geometry.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the payload is malformed.
    pub fn decode(&self) -> Result<geo::Geometry<f64>, CodecError> {
        match self {
            Self::Wkb(bytes) => read_wkb(bytes),
            Self::Hex(text) => decode_hex(text),
            Self::Base64(text) => decode_base64(text),
            Self::GeoJson(geometry) => decode_geojson(geometry),
            Self::Wrapped(wrapped) => read_wkb(&wrapped.data),
        }
    }
}

fn strip_hex_prefix(text: &str) -> &str {
    text.strip_prefix("\\x")
        .or_else(|| text.strip_prefix("0x"))
        .unwrap_or(text)
}

fn decode_hex(text: &str) -> Result<geo::Geometry<f64>, CodecError> {
    let bytes = hex::decode(strip_hex_prefix(text.trim()))
        .map_err(|e| CodecError::Text(format!("hex: {e}")))?;
    read_wkb(&bytes)
}

fn decode_base64(text: &str) -> Result<geo::Geometry<f64>, CodecError> {
    let text = text.trim();
    let bytes = STANDARD
        .decode(text)
        .or_else(|_| STANDARD_NO_PAD.decode(text))
        .or_else(|_| URL_SAFE_NO_PAD.decode(text.trim_end_matches('=')))
        .map_err(|e| CodecError::Text(format!("base64: {e}")))?;
    read_wkb(&bytes)
}

fn decode_geojson(geometry: &geojson::Geometry) -> Result<geo::Geometry<f64>, CodecError> {
    geometry
        .clone()
        .try_into()
        .map_err(|e: geojson::Error| CodecError::GeoJson(e.to_string()))
}

#[cfg(test)]
mod tests {
    use geo::{Point, polygon};

    use super::*;
    use crate::wkb::write_wkb;

    fn building() -> geo::Geometry<f64> {
        geo::Geometry::Polygon(polygon![
            (x: -79.39, y: 43.64),
            (x: -79.38, y: 43.64),
            (x: -79.38, y: 43.65),
            (x: -79.39, y: 43.64),
        ])
    }

    #[test]
    fn decodes_every_variant() {
        let geometry = building();
        let wkb = write_wkb(&geometry);

        let variants = vec![
            GeometryEncoding::Wkb(wkb.clone()),
            GeometryEncoding::Hex(hex::encode(&wkb)),
            GeometryEncoding::Hex(format!("\\x{}", hex::encode(&wkb))),
            GeometryEncoding::Base64(STANDARD.encode(&wkb)),
            GeometryEncoding::GeoJson(geojson::Geometry::new(geojson::Value::from(&geometry))),
            GeometryEncoding::Wrapped(WrappedBinary {
                kind: "Buffer".into(),
                data: wkb,
            }),
        ];

        for variant in variants {
            assert_eq!(variant.decode().unwrap(), geometry, "variant {}", variant.kind());
        }
    }

    #[test]
    fn classifies_text() {
        let wkb = write_wkb(&geo::Geometry::Point(Point::new(1.0, 2.0)));
        assert_eq!(GeometryEncoding::from_text(&hex::encode(&wkb)).kind(), "hex");
        assert_eq!(GeometryEncoding::from_text(&hex::encode_upper(&wkb)).kind(), "hex");
        assert_eq!(GeometryEncoding::from_text(&STANDARD.encode(&wkb)).kind(), "base64");
        assert_eq!(
            GeometryEncoding::from_text(r#"{"type":"Point","coordinates":[1.0,2.0]}"#).kind(),
            "geojson"
        );
        assert_eq!(
            GeometryEncoding::from_text(r#"{"type":"Buffer","data":[1,2]}"#).kind(),
            "wrapped"
        );
    }

    #[test]
    fn classifies_json_values() {
        let wkb = write_wkb(&geo::Geometry::Point(Point::new(1.0, 2.0)));
        let array = serde_json::Value::from(wkb.clone());
        assert_eq!(GeometryEncoding::from_json(&array).unwrap(), GeometryEncoding::Wkb(wkb));

        assert!(GeometryEncoding::from_json(&serde_json::json!(42)).is_err());
        assert!(GeometryEncoding::from_json(&serde_json::json!([1, 300])).is_err());
    }

    #[test]
    fn malformed_payloads_error() {
        assert!(GeometryEncoding::Hex("0102zz".into()).decode().is_err());
        assert!(GeometryEncoding::Base64("!!!not base64!!!".into()).decode().is_err());
        assert!(GeometryEncoding::Wkb(vec![1, 2, 3]).decode().is_err());
    }
}
