#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the canvass server.
//!
//! All types serialize with camelCase field names for the JS frontend.

use canvass_linker_models::{Match, Orphan, QualitySummary};
use canvass_territory_models::{
    BoundingBox, ScanDiagnostics, SnapshotMetadata, ThemeArtifact, ThemeLimits,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the service is healthy.
    pub healthy: bool,
    /// Service version.
    pub version: String,
}

/// Error body returned with every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Human-readable cause, including the underlying storage or query
    /// error for server failures.
    pub error: String,
}

impl ApiError {
    /// Wraps any displayable error.
    #[must_use]
    pub fn new(error: impl std::fmt::Display) -> Self {
        Self {
            error: error.to_string(),
        }
    }
}

/// One configured extraction region.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRegion {
    /// Partition code (`ON`, `NY`, ...).
    pub code: String,
    /// Display name.
    pub name: String,
    /// ISO country code.
    pub country: String,
    /// Region bounds.
    pub bbox: BoundingBox,
}

/// `POST /api/snapshots` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRequestBody {
    /// Campaign the snapshot belongs to.
    pub campaign_id: String,
    /// Region code; resolved from the polygon when absent.
    pub region: Option<String>,
    /// Territory as a coordinate ring, a GeoJSON `Polygon`, or a `Feature`.
    pub polygon: serde_json::Value,
    /// Optional per-theme caps.
    #[serde(default)]
    pub limits: ThemeLimits,
    /// Include the roads theme.
    #[serde(default = "default_true")]
    pub include_roads: bool,
    /// Include the divisions theme.
    #[serde(default = "default_true")]
    pub include_divisions: bool,
}

const fn default_true() -> bool {
    true
}

/// Snapshot metadata as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    /// Owning campaign.
    pub campaign_id: String,
    /// Region the snapshot was read from.
    pub region: String,
    /// Dataset release.
    pub release: String,
    /// Territory fingerprint.
    pub polygon_hash: String,
    /// Territory bounds.
    pub bbox: BoundingBox,
    /// Storage prefix of the artifacts.
    pub prefix: String,
    /// Per-theme artifacts with signed URLs.
    pub artifacts: Vec<ThemeArtifact>,
    /// Per-theme scan diagnostics.
    pub diagnostics: Vec<ScanDiagnostics>,
    /// Building count.
    pub building_count: usize,
    /// Address count.
    pub address_count: usize,
    /// First generation time.
    pub created_at: DateTime<Utc>,
    /// Last regeneration time.
    pub updated_at: DateTime<Utc>,
    /// When the artifacts are purged.
    pub expires_at: DateTime<Utc>,
}

impl From<SnapshotMetadata> for SnapshotResponse {
    fn from(meta: SnapshotMetadata) -> Self {
        use canvass_territory_models::Theme;

        Self {
            building_count: meta.count(Theme::Buildings),
            address_count: meta.count(Theme::Addresses),
            campaign_id: meta.campaign_id,
            region: meta.region,
            release: meta.release,
            polygon_hash: meta.polygon_hash,
            bbox: meta.bbox,
            prefix: meta.prefix,
            artifacts: meta.artifacts,
            diagnostics: meta.diagnostics,
            created_at: meta.created_at,
            updated_at: meta.updated_at,
            expires_at: meta.expires_at,
        }
    }
}

/// Result of `POST /api/campaigns/{id}/link`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkResponse {
    /// Campaign that was linked.
    pub campaign_id: String,
    /// Match rows written by this pass.
    pub computed_matches: usize,
    /// Review rows written by this pass.
    pub review_rows: usize,
    /// Manual overrides left in place.
    pub manual: usize,
    /// Quality summary after the pass.
    pub summary: QualitySummary,
}

/// Result of `GET /api/campaigns/{id}/matches`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchesResponse {
    /// Every match for the campaign, by address id.
    pub matches: Vec<Match>,
    /// Quality summary.
    pub summary: QualitySummary,
}

/// Result of `GET /api/campaigns/{id}/orphans`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphansResponse {
    /// Reviewable rows, nearest first.
    pub orphans: Vec<Orphan>,
    /// Number of rows.
    pub total: usize,
}

/// `POST /api/campaigns/{id}/addresses/{address_id}/manual` body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualOverrideBody {
    /// Chosen building; `null` records that the address has none.
    #[serde(default)]
    pub building_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_body_defaults() {
        let body: SnapshotRequestBody = serde_json::from_value(serde_json::json!({
            "campaignId": "c1",
            "polygon": [[-79.4, 43.6], [-79.3, 43.6], [-79.3, 43.7], [-79.4, 43.6]],
        }))
        .unwrap();
        assert_eq!(body.campaign_id, "c1");
        assert!(body.region.is_none());
        assert!(body.include_roads);
        assert!(body.include_divisions);
        assert_eq!(body.limits, ThemeLimits::default());
    }

    #[test]
    fn manual_override_accepts_null() {
        let body: ManualOverrideBody =
            serde_json::from_value(serde_json::json!({ "buildingId": null })).unwrap();
        assert!(body.building_id.is_none());
        let body: ManualOverrideBody =
            serde_json::from_value(serde_json::json!({ "buildingId": "b1" })).unwrap();
        assert_eq!(body.building_id.as_deref(), Some("b1"));
    }
}
