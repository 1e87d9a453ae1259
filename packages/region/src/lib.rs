#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Region registry, loaded from embedded TOML configs.
//!
//! Each `.toml` file in `packages/region/regions/` describes one extraction
//! region: its bounding box, which themes are tile-partitioned (and at what
//! tile size), and the linker tuning for that region's address density.
//! Adding a region is a matter of dropping in a TOML file and listing it
//! below.

use std::collections::BTreeMap;

use canvass_linker_models::LinkerConfig;
use canvass_territory_models::{BoundingBox, Theme};
use serde::Deserialize;

/// TOML configs embedded at compile time.
const REGION_TOMLS: &[(&str, &str)] = &[
    // ── Canada ───────────────────────────────────────────────────────
    ("on", include_str!("../regions/on.toml")),
    ("qc", include_str!("../regions/qc.toml")),
    ("bc", include_str!("../regions/bc.toml")),
    ("ab", include_str!("../regions/ab.toml")),
    // ── United States ────────────────────────────────────────────────
    ("ny", include_str!("../regions/ny.toml")),
    ("ca", include_str!("../regions/ca.toml")),
    ("tx", include_str!("../regions/tx.toml")),
    ("fl", include_str!("../regions/fl.toml")),
];

/// Total number of configured regions (used in tests).
#[cfg(test)]
const EXPECTED_REGION_COUNT: usize = 8;

/// Partition layout for one theme in a region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct ThemeLayout {
    /// Tile size in degrees; `None` means a single per-region partition.
    pub tile_deg: Option<f64>,
}

/// One extraction region.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegionDefinition {
    /// Short code used in partition paths (`region=ON`).
    pub code: String,
    /// Display name.
    pub name: String,
    /// ISO country code.
    pub country: String,
    /// `[west, south, east, north]`.
    pub bbox: [f64; 4],
    /// Per-theme partition layout.
    #[serde(default)]
    pub themes: BTreeMap<Theme, ThemeLayout>,
    /// Linker tuning.
    #[serde(default)]
    pub linker: LinkerConfig,
}

impl RegionDefinition {
    /// Region bounds.
    #[must_use]
    pub const fn bounds(&self) -> BoundingBox {
        BoundingBox::new(self.bbox[0], self.bbox[1], self.bbox[2], self.bbox[3])
    }

    /// Layout for a theme; themes not listed are treated as grid-less.
    #[must_use]
    pub fn layout(&self, theme: Theme) -> ThemeLayout {
        self.themes.get(&theme).copied().unwrap_or_default()
    }

    fn encloses(&self, bbox: &BoundingBox) -> bool {
        let bounds = self.bounds();
        bounds.contains(bbox.west, bbox.south) && bounds.contains(bbox.east, bbox.north)
    }
}

/// Parses a single region TOML document.
///
/// # Errors
///
/// Returns the TOML error message if the document is malformed.
pub fn parse_region_toml(toml_str: &str) -> Result<RegionDefinition, String> {
    toml::de::from_str(toml_str).map_err(|e| e.to_string())
}

/// Returns all configured regions, parsed from embedded TOML.
///
/// # Panics
///
/// Panics if any TOML config is malformed (the configs are embedded, so
/// this is caught by the registry tests).
#[must_use]
pub fn all_regions() -> Vec<RegionDefinition> {
    REGION_TOMLS
        .iter()
        .map(|(name, toml)| {
            parse_region_toml(toml).unwrap_or_else(|e| panic!("Failed to parse {name}.toml: {e}"))
        })
        .collect()
}

/// Looks up a region by code (case-insensitive).
#[must_use]
pub fn find_region(code: &str) -> Option<RegionDefinition> {
    all_regions()
        .into_iter()
        .find(|r| r.code.eq_ignore_ascii_case(code))
}

/// Why a territory could not be matched to a single region.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegionLookupError {
    /// No region code matches.
    #[error("Unknown region: {0}")]
    Unknown(String),

    /// No region encloses the territory.
    #[error("Territory is outside every configured region")]
    NotCovered,

    /// Several regions enclose the territory; the caller must pick one.
    #[error("Territory lies in overlapping regions {0:?}; specify a region")]
    Ambiguous(Vec<String>),
}

/// Picks the region for a territory bounding box.
///
/// The territory must lie entirely inside exactly one region's bounds.
/// Region boxes overlap along borders (Toronto sits inside both the Ontario
/// and New York boxes), so overlaps are reported rather than guessed.
///
/// # Errors
///
/// Returns [`RegionLookupError`] if zero or several regions enclose the box.
pub fn resolve_region(bbox: &BoundingBox) -> Result<RegionDefinition, RegionLookupError> {
    let mut enclosing: Vec<RegionDefinition> = all_regions()
        .into_iter()
        .filter(|r| r.encloses(bbox))
        .collect();

    match enclosing.len() {
        0 => Err(RegionLookupError::NotCovered),
        1 => Ok(enclosing.remove(0)),
        _ => Err(RegionLookupError::Ambiguous(
            enclosing.into_iter().map(|r| r.code).collect(),
        )),
    }
}

/// Resolves an explicit region code, or falls back to [`resolve_region`].
///
/// An explicit region that does not enclose the territory is still used;
/// the caller knows its partitions better than the bounding boxes do.
///
/// # Errors
///
/// Returns [`RegionLookupError`] if the code is unknown or the fallback
/// lookup fails.
pub fn select_region(
    code: Option<&str>,
    bbox: &BoundingBox,
) -> Result<RegionDefinition, RegionLookupError> {
    match code {
        Some(code) => find_region(code).ok_or_else(|| RegionLookupError::Unknown(code.to_string())),
        None => resolve_region(bbox),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_all_regions() {
        assert_eq!(all_regions().len(), EXPECTED_REGION_COUNT);
    }

    #[test]
    fn region_codes_are_unique() {
        let regions = all_regions();
        let mut codes: Vec<&str> = regions.iter().map(|r| r.code.as_str()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), EXPECTED_REGION_COUNT);
    }

    #[test]
    fn all_regions_have_sane_config() {
        for region in &all_regions() {
            let b = region.bounds();
            assert!(b.west < b.east && b.south < b.north, "{}: bad bbox", region.code);
            assert!(
                region.layout(Theme::Buildings).tile_deg.is_some(),
                "{}: buildings must be gridded",
                region.code
            );
            assert!(
                region.layout(Theme::Addresses).tile_deg.is_none(),
                "{}: addresses are a single partition",
                region.code
            );
            let ladder = &region.linker.proximity_ladder_m;
            assert!(!ladder.is_empty(), "{}: empty ladder", region.code);
            assert!(
                ladder.windows(2).all(|w| w[0] < w[1]),
                "{}: ladder must ascend",
                region.code
            );
        }
    }

    #[test]
    fn resolves_unique_enclosing_region() {
        let montreal = BoundingBox::new(-73.60, 45.49, -73.55, 45.52);
        assert_eq!(resolve_region(&montreal).unwrap().code, "QC");

        let los_angeles = BoundingBox::new(-118.30, 34.00, -118.20, 34.10);
        assert_eq!(resolve_region(&los_angeles).unwrap().code, "CA");

        let atlantic = BoundingBox::new(-40.0, 30.0, -39.0, 31.0);
        assert_eq!(resolve_region(&atlantic), Err(RegionLookupError::NotCovered));
    }

    #[test]
    fn overlapping_regions_need_an_explicit_code() {
        let toronto = BoundingBox::new(-79.42, 43.63, -79.36, 43.67);
        let Err(RegionLookupError::Ambiguous(codes)) = resolve_region(&toronto) else {
            panic!("expected ambiguity");
        };
        assert!(codes.contains(&"ON".to_string()));
        assert!(codes.contains(&"NY".to_string()));

        assert_eq!(select_region(Some("on"), &toronto).unwrap().code, "ON");
        assert_eq!(
            select_region(Some("zz"), &toronto),
            Err(RegionLookupError::Unknown("zz".into()))
        );
    }

    #[test]
    fn regional_linker_tuning_is_loaded() {
        let ny = find_region("ny").unwrap();
        assert!((ny.linker.max_radius_m() - 40.0).abs() < f64::EPSILON);
        assert!((ny.linker.street_match_threshold - 0.75).abs() < f64::EPSILON);
        // Omitted keys fall back to defaults.
        assert!((ny.linker.text_fallback_confidence - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_linker_table_uses_defaults() {
        let region = parse_region_toml(
            r#"
            code = "XX"
            name = "Test"
            country = "ZZ"
            bbox = [0.0, 0.0, 1.0, 1.0]

            [linker]
            tie_margin_m = 5.0
            "#,
        )
        .unwrap();
        assert!((region.linker.tie_margin_m - 5.0).abs() < f64::EPSILON);
        assert_eq!(region.linker.proximity_ladder_m, vec![10.0, 25.0, 50.0]);
        assert!(region.layout(Theme::Buildings).tile_deg.is_none());
    }
}
