//! Territory input parsing.

use canvass_territory_models::{TerritoryPolygon, ValidationError};
use serde_json::Value;

fn position(index: usize, value: &Value) -> Result<(f64, f64), ValidationError> {
    let coords = value.as_array().filter(|c| c.len() >= 2).ok_or_else(|| {
        ValidationError::Unsupported(format!("position {index} is not a [lon, lat] pair"))
    })?;
    match (coords[0].as_f64(), coords[1].as_f64()) {
        (Some(lon), Some(lat)) => Ok((lon, lat)),
        _ => Err(ValidationError::Unsupported(format!(
            "position {index} has non-numeric coordinates"
        ))),
    }
}

fn ring(value: &Value) -> Result<Vec<(f64, f64)>, ValidationError> {
    value
        .as_array()
        .ok_or_else(|| ValidationError::Unsupported("ring is not an array".to_string()))?
        .iter()
        .enumerate()
        .map(|(i, p)| position(i, p))
        .collect()
}

/// Parses a territory from a `GeoJSON` `Polygon`, a `Feature` wrapping
/// one, or a bare `[[lon, lat], ...]` ring.
///
/// # Errors
///
/// Returns [`ValidationError`] for any other shape or an invalid ring.
pub fn parse_territory(value: &Value) -> Result<TerritoryPolygon, ValidationError> {
    if value.is_array() {
        return TerritoryPolygon::new(ring(value)?);
    }

    match value.get("type").and_then(Value::as_str) {
        Some("Feature") => value.get("geometry").map_or_else(
            || Err(ValidationError::Unsupported("feature has no geometry".to_string())),
            parse_territory,
        ),
        Some("Polygon") => {
            let rings = value
                .get("coordinates")
                .and_then(Value::as_array)
                .filter(|r| !r.is_empty())
                .ok_or_else(|| {
                    ValidationError::Unsupported("polygon has no coordinates".to_string())
                })?;
            let exterior = ring(&rings[0])?;
            let holes = rings[1..].iter().map(ring).collect::<Result<Vec<_>, _>>()?;
            TerritoryPolygon::with_holes(exterior, holes)
        }
        Some(other) => Err(ValidationError::Unsupported(other.to_string())),
        None => Err(ValidationError::Unsupported(
            "expected a GeoJSON Polygon or a coordinate ring".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_bare_rings_polygons_and_features() {
        let ring = json!([[-79.4, 43.6], [-79.3, 43.6], [-79.3, 43.7], [-79.4, 43.6]]);
        let polygon = json!({ "type": "Polygon", "coordinates": [ring.clone()] });
        let feature = json!({ "type": "Feature", "properties": {}, "geometry": polygon.clone() });

        let a = parse_territory(&ring).unwrap();
        let b = parse_territory(&polygon).unwrap();
        let c = parse_territory(&feature).unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.exterior().len(), 4);
    }

    #[test]
    fn rejects_other_geometries_and_bad_rings() {
        let point = json!({ "type": "Point", "coordinates": [-79.4, 43.6] });
        assert!(matches!(
            parse_territory(&point),
            Err(ValidationError::Unsupported(_))
        ));

        let open = json!([[-79.4, 43.6], [-79.3, 43.6], [-79.3, 43.7], [-79.4, 43.7]]);
        assert!(matches!(
            parse_territory(&open),
            Err(ValidationError::NotClosed { .. })
        ));

        let short = json!([[-79.4, 43.6], [-79.3, 43.6], [-79.4, 43.6]]);
        assert!(matches!(
            parse_territory(&short),
            Err(ValidationError::TooFewPositions { count: 3 })
        ));

        let text = json!([["a", "b"], [-79.3, 43.6], [-79.3, 43.7], ["a", "b"]]);
        assert!(parse_territory(&text).is_err());
    }
}
