#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Territory, theme, and snapshot types shared across the canvass pipeline.
//!
//! A territory is the user-drawn polygon a campaign covers. Everything
//! downstream (tile coverage, feature extraction, linking) is keyed off the
//! validated [`TerritoryPolygon`] and the [`Theme`] being extracted.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use geo::{Area, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum_macros::{AsRefStr, Display, EnumString};

// ── Themes ───────────────────────────────────────────────────────

/// A feature theme in the partitioned feature store.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Theme {
    /// Building footprints.
    Buildings,
    /// Road segments.
    Roads,
    /// Administrative division areas.
    Divisions,
    /// Address points.
    Addresses,
}

impl Theme {
    /// All themes in extraction order.
    pub const ALL: [Self; 4] = [Self::Buildings, Self::Roads, Self::Divisions, Self::Addresses];
}

// ── Bounding boxes ───────────────────────────────────────────────

/// A geographic bounding box in WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western longitude boundary.
    pub west: f64,
    /// Southern latitude boundary.
    pub south: f64,
    /// Eastern longitude boundary.
    pub east: f64,
    /// Northern latitude boundary.
    pub north: f64,
}

impl BoundingBox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Smallest box containing every `(lon, lat)` pair, or `None` when empty.
    #[must_use]
    pub fn from_coords(coords: &[(f64, f64)]) -> Option<Self> {
        let (first, rest) = coords.split_first()?;
        let mut bbox = Self::new(first.0, first.1, first.0, first.1);
        for &(lon, lat) in rest {
            bbox.west = bbox.west.min(lon);
            bbox.east = bbox.east.max(lon);
            bbox.south = bbox.south.min(lat);
            bbox.north = bbox.north.max(lat);
        }
        Some(bbox)
    }

    /// Grows the box by `degrees` on every side.
    #[must_use]
    pub fn buffered(&self, degrees: f64) -> Self {
        Self::new(
            self.west - degrees,
            self.south - degrees,
            self.east + degrees,
            self.north + degrees,
        )
    }

    /// Whether the point lies inside the box (edges included).
    #[must_use]
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.west && lon <= self.east && lat >= self.south && lat <= self.north
    }

    /// Whether two boxes overlap (touching counts).
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.west <= other.east
            && other.west <= self.east
            && self.south <= other.north
            && other.south <= self.north
    }
}

// ── Territory polygon ────────────────────────────────────────────

/// Reasons a territory polygon is rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// The ring has fewer than four positions.
    #[error("Polygon ring needs at least 4 positions, got {count}")]
    TooFewPositions {
        /// Number of positions supplied.
        count: usize,
    },

    /// The first and last positions differ.
    #[error("Polygon ring is not closed: first {first:?} != last {last:?}")]
    NotClosed {
        /// First position.
        first: (f64, f64),
        /// Last position.
        last: (f64, f64),
    },

    /// Fewer than three distinct vertices.
    #[error("Polygon ring needs at least 3 unique vertices, got {count}")]
    TooFewUniqueVertices {
        /// Number of distinct vertices.
        count: usize,
    },

    /// A coordinate is NaN, infinite, or outside WGS84 range.
    #[error("Invalid coordinate at position {index}: ({lon}, {lat})")]
    InvalidCoordinate {
        /// Position index in the ring.
        index: usize,
        /// Longitude.
        lon: f64,
        /// Latitude.
        lat: f64,
    },

    /// The ring encloses no area.
    #[error("Polygon ring encloses zero area")]
    ZeroArea,

    /// The input was not a polygon at all.
    #[error("Unsupported territory geometry: {0}")]
    Unsupported(String),
}

/// A validated, closed territory polygon in `(lon, lat)` order.
///
/// Construction goes through [`TerritoryPolygon::new`], so any value of this
/// type satisfies: closed ring, at least three unique vertices, finite WGS84
/// coordinates, and non-zero area. Holes are carried for containment tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerritoryPolygon {
    exterior: Vec<(f64, f64)>,
    holes: Vec<Vec<(f64, f64)>>,
}

impl TerritoryPolygon {
    /// Validates an exterior ring.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the ring is not a usable polygon.
    pub fn new(exterior: Vec<(f64, f64)>) -> Result<Self, ValidationError> {
        Self::with_holes(exterior, Vec::new())
    }

    /// Validates an exterior ring plus interior rings.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if any ring is not a usable polygon ring.
    pub fn with_holes(
        exterior: Vec<(f64, f64)>,
        holes: Vec<Vec<(f64, f64)>>,
    ) -> Result<Self, ValidationError> {
        validate_ring(&exterior)?;
        for hole in &holes {
            validate_ring(hole)?;
        }

        let polygon = Self { exterior, holes };
        if polygon.to_polygon().unsigned_area() <= 0.0 {
            return Err(ValidationError::ZeroArea);
        }
        Ok(polygon)
    }

    /// Exterior ring positions, closing position included.
    #[must_use]
    pub fn exterior(&self) -> &[(f64, f64)] {
        &self.exterior
    }

    /// Interior rings.
    #[must_use]
    pub fn holes(&self) -> &[Vec<(f64, f64)>] {
        &self.holes
    }

    /// Bounding box of the exterior ring.
    #[must_use]
    pub fn bbox(&self) -> BoundingBox {
        // Validated rings are never empty.
        BoundingBox::from_coords(&self.exterior).unwrap_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0))
    }

    /// Converts to a `geo` polygon.
    #[must_use]
    pub fn to_polygon(&self) -> Polygon<f64> {
        Polygon::new(
            LineString::from(self.exterior.clone()),
            self.holes
                .iter()
                .map(|h| LineString::from(h.clone()))
                .collect(),
        )
    }

    /// Hex SHA-256 fingerprint of the rings at 7 decimal places.
    ///
    /// Two submissions of the same drawn territory hash identically, which
    /// lets a re-provisioned snapshot be recognised as unchanged.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut canonical = String::new();
        for ring in std::iter::once(&self.exterior).chain(self.holes.iter()) {
            for (lon, lat) in ring {
                let _ = write!(canonical, "{lon:.7},{lat:.7};");
            }
            canonical.push('|');
        }
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }
}

fn validate_ring(ring: &[(f64, f64)]) -> Result<(), ValidationError> {
    for (index, &(lon, lat)) in ring.iter().enumerate() {
        if !lon.is_finite()
            || !lat.is_finite()
            || !(-180.0..=180.0).contains(&lon)
            || !(-90.0..=90.0).contains(&lat)
        {
            return Err(ValidationError::InvalidCoordinate { index, lon, lat });
        }
    }

    if ring.len() < 4 {
        return Err(ValidationError::TooFewPositions { count: ring.len() });
    }

    let first = ring[0];
    let last = ring[ring.len() - 1];
    if first != last {
        return Err(ValidationError::NotClosed { first, last });
    }

    let unique: BTreeSet<(u64, u64)> = ring[..ring.len() - 1]
        .iter()
        .map(|(lon, lat)| (lon.to_bits(), lat.to_bits()))
        .collect();
    if unique.len() < 3 {
        return Err(ValidationError::TooFewUniqueVertices {
            count: unique.len(),
        });
    }

    Ok(())
}

// ── Tiles ────────────────────────────────────────────────────────

/// Integer tile coordinate on a fixed-degree grid.
///
/// Ordering is row-major: by `y`, then `x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    /// Column index: `floor((lon + 180) / tile_deg)`.
    pub x: i32,
    /// Row index: `floor((lat + 90) / tile_deg)`.
    pub y: i32,
}

impl TileCoord {
    /// Creates a tile coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl Ord for TileCoord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.y, self.x).cmp(&(other.y, other.x))
    }
}

impl PartialOrd for TileCoord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// ── Features ─────────────────────────────────────────────────────

/// A decoded feature from a single theme.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Stable feature id (`gers_id`).
    pub id: String,
    /// Theme this feature belongs to.
    pub theme: Theme,
    /// Decoded geometry in WGS84.
    pub geometry: geo::Geometry<f64>,
    /// Remaining scalar columns.
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// An address point extracted for a territory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressPoint {
    /// Stable address id.
    pub id: String,
    /// Longitude.
    pub lon: f64,
    /// Latitude.
    pub lat: f64,
    /// House number as printed (may contain letters, e.g. "12B").
    pub house_number: Option<String>,
    /// Street name.
    pub street_name: Option<String>,
    /// City / municipality.
    pub locality: Option<String>,
    /// Postal or ZIP code.
    pub postal_code: Option<String>,
    /// Building id supplied by the source, if any.
    pub building_ref: Option<String>,
}

/// A building footprint used for address linking.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildingFootprint {
    /// Stable building id.
    pub id: String,
    /// Footprint geometry.
    pub footprint: MultiPolygon<f64>,
    /// Footprint area in square metres.
    pub area_sqm: f64,
    /// Primary house number recorded on the building.
    pub house_number: Option<String>,
    /// Primary street name recorded on the building.
    pub street_name: Option<String>,
}

// ── Limits and diagnostics ───────────────────────────────────────

/// Optional per-theme caps on returned feature counts.
///
/// Caps are applied after dedupe and id sort, and any truncation is
/// surfaced in [`ScanDiagnostics::truncated`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeLimits {
    /// Maximum buildings.
    pub buildings: Option<usize>,
    /// Maximum roads.
    pub roads: Option<usize>,
    /// Maximum divisions.
    pub divisions: Option<usize>,
    /// Maximum addresses.
    pub addresses: Option<usize>,
}

impl ThemeLimits {
    /// Cap for the given theme.
    #[must_use]
    pub const fn for_theme(&self, theme: Theme) -> Option<usize> {
        match theme {
            Theme::Buildings => self.buildings,
            Theme::Roads => self.roads,
            Theme::Divisions => self.divisions,
            Theme::Addresses => self.addresses,
        }
    }
}

/// What a single theme scan touched and produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanDiagnostics {
    /// Theme scanned.
    pub theme: Theme,
    /// Partitions in the covering set.
    pub requested_tiles: usize,
    /// Partitions actually read.
    pub scanned_tiles: usize,
    /// Partitions that did not exist.
    pub missing_tiles: usize,
    /// Rows returned by the storage scan before precise filtering.
    pub rows_read: usize,
    /// Rows dropped because their geometry could not be decoded.
    pub skipped_geometries: usize,
    /// Features returned.
    pub features: usize,
    /// Wall-clock scan time.
    pub elapsed_ms: u64,
    /// Whether a per-theme cap cut the result.
    pub truncated: bool,
}

impl ScanDiagnostics {
    /// Empty diagnostics for a theme.
    #[must_use]
    pub const fn new(theme: Theme) -> Self {
        Self {
            theme,
            requested_tiles: 0,
            scanned_tiles: 0,
            missing_tiles: 0,
            rows_read: 0,
            skipped_geometries: 0,
            features: 0,
            elapsed_ms: 0,
            truncated: false,
        }
    }
}

// ── Snapshots ────────────────────────────────────────────────────

/// One stored theme collection within a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeArtifact {
    /// Theme stored.
    pub theme: Theme,
    /// Object key.
    pub key: String,
    /// Number of features in the persisted collection.
    pub count: usize,
    /// Short-lived signed URL, if one was issued.
    pub url: Option<String>,
}

/// Metadata describing a campaign snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Owning campaign.
    pub campaign_id: String,
    /// Region the territory was resolved against.
    pub region: String,
    /// Dataset release tag.
    pub release: String,
    /// Territory fingerprint (see [`TerritoryPolygon::fingerprint`]).
    pub polygon_hash: String,
    /// Territory bounding box.
    pub bbox: BoundingBox,
    /// Key prefix shared by every artifact.
    pub prefix: String,
    /// Stored collections.
    pub artifacts: Vec<ThemeArtifact>,
    /// Per-theme scan diagnostics.
    pub diagnostics: Vec<ScanDiagnostics>,
    /// First creation time (preserved across re-provisioning).
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
    /// Retention expiry.
    pub expires_at: DateTime<Utc>,
}

impl SnapshotMetadata {
    /// Persisted feature count for a theme (0 when absent).
    #[must_use]
    pub fn count(&self, theme: Theme) -> usize {
        self.artifacts
            .iter()
            .find(|a| a.theme == theme)
            .map_or(0, |a| a.count)
    }
}
