//! Linker inputs derived from extracted features.

use canvass_geometry::metric::area_sqm;
use canvass_territory_models::{BuildingFootprint, Feature};

const HOUSE_NUMBER_KEYS: &[&str] = &["primary_street_number", "house_number", "number"];
const STREET_KEYS: &[&str] = &["primary_street_name", "street_name", "street"];

fn text_property(feature: &Feature, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match feature.properties.get(*k)? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Converts building features to footprints, dropping non-areal ones.
#[must_use]
pub fn buildings_from_features(features: &[Feature]) -> Vec<BuildingFootprint> {
    features
        .iter()
        .filter_map(|f| {
            let footprint = canvass_geometry::to_multipolygon(f.geometry.clone())?;
            Some(BuildingFootprint {
                id: f.id.clone(),
                area_sqm: area_sqm(&footprint),
                footprint,
                house_number: text_property(f, HOUSE_NUMBER_KEYS),
                street_name: text_property(f, STREET_KEYS),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use canvass_territory_models::Theme;
    use geo::{Geometry, Point, polygon};

    use super::*;

    #[test]
    fn keeps_areal_features_with_address_properties() {
        let mut properties = serde_json::Map::new();
        properties.insert("primary_street_number".into(), serde_json::json!(221));
        properties.insert("primary_street_name".into(), serde_json::json!(" Baker St "));
        let features = vec![
            Feature {
                id: "b1".into(),
                theme: Theme::Buildings,
                geometry: Geometry::Polygon(polygon![
                    (x: -79.35, y: 43.65),
                    (x: -79.3499, y: 43.65),
                    (x: -79.3499, y: 43.6501),
                    (x: -79.35, y: 43.6501),
                    (x: -79.35, y: 43.65),
                ]),
                properties,
            },
            Feature {
                id: "p1".into(),
                theme: Theme::Buildings,
                geometry: Geometry::Point(Point::new(0.0, 0.0)),
                properties: serde_json::Map::new(),
            },
        ];

        let buildings = buildings_from_features(&features);
        assert_eq!(buildings.len(), 1);
        assert_eq!(buildings[0].house_number.as_deref(), Some("221"));
        assert_eq!(buildings[0].street_name.as_deref(), Some("Baker St"));
        // ~8 m x 11 m at this latitude.
        assert!(buildings[0].area_sqm > 80.0 && buildings[0].area_sqm < 100.0);
    }
}
