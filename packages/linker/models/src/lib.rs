#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Address-to-building link types.
//!
//! A linking pass gives every address in a campaign either a [`Match`]
//! (tiered and scored) or an [`Orphan`] review row, and sometimes both when
//! a fallback match still needs a human to confirm it.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// How an address was linked to its building.
///
/// Variants are declared strongest first; [`MatchTier::rank`] gives the
/// ordering used when comparing tiers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchTier {
    /// Point strictly inside the footprint.
    ContainmentVerified,
    /// Point on (or within a hair of) the footprint boundary.
    PointOnSurface,
    /// Unique nearby building whose street agrees.
    ProximityVerified,
    /// Nearby building chosen without street agreement or among ties.
    ProximityFallback,
    /// Set by a reviewer.
    Manual,
}

impl MatchTier {
    /// Strength rank, 0 being the strongest spatial evidence.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::ContainmentVerified => 0,
            Self::PointOnSurface => 1,
            Self::ProximityVerified => 2,
            Self::ProximityFallback => 3,
            Self::Manual => 4,
        }
    }

    /// Whether the tier counts as a verified link (no review needed).
    #[must_use]
    pub const fn is_verified(self) -> bool {
        !matches!(self, Self::ProximityFallback)
    }
}

/// Review state of an orphan address.
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
pub enum OrphanStatus {
    /// No building within the search radius.
    Pending,
    /// Only a text-based suggestion exists; a reviewer must confirm.
    PendingReview,
    /// Several buildings tied within the tie-break margin.
    AmbiguousMatch,
    /// Closed by a manual decision.
    Resolved,
}

impl OrphanStatus {
    /// Statuses that belong in the review queue.
    pub const REVIEWABLE: [Self; 3] = [Self::Pending, Self::PendingReview, Self::AmbiguousMatch];
}

/// A link from an address to a building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    /// Address id.
    pub address_id: String,
    /// Linked building; `None` only for a manual "no building" decision.
    pub building_id: Option<String>,
    /// Tier that produced the link.
    pub tier: MatchTier,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Distance from the address to the footprint in metres.
    pub distance_m: f64,
    /// Street similarity, when it was part of the decision.
    pub street_score: Option<f64>,
}

/// A building offered to a reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Building id.
    pub building_id: String,
    /// Distance in metres; `None` for text-only suggestions.
    pub distance_m: Option<f64>,
    /// Street similarity in `[0, 1]`.
    pub street_score: f64,
    /// Suggested confidence if accepted.
    pub confidence: f64,
}

/// An address awaiting (or past) manual review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Orphan {
    /// Address id.
    pub address_id: String,
    /// Nearest building over the whole campaign, if any buildings exist.
    pub nearest_building_id: Option<String>,
    /// Distance to that building in metres.
    pub nearest_distance_m: Option<f64>,
    /// Street recorded on that building.
    pub nearest_street: Option<String>,
    /// Similarity of the address street to `nearest_street`.
    pub street_match_score: Option<f64>,
    /// Ranked suggestions.
    pub suggestions: Vec<Candidate>,
    /// Review state.
    pub status: OrphanStatus,
}

/// Tuning for a linking pass. Loaded per region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    /// Boundary distance that still counts as on the surface.
    pub surface_epsilon_m: f64,
    /// Proximity search radii, ascending; the last is the max radius.
    pub proximity_ladder_m: Vec<f64>,
    /// Candidates this close to the nearest are treated as tied.
    pub tie_margin_m: f64,
    /// Minimum street similarity for a verified proximity match.
    pub street_match_threshold: f64,
    /// Suggestions attached to each orphan.
    pub max_suggestions: usize,
    /// Confidence ceiling for text-only suggestions.
    pub text_fallback_confidence: f64,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            surface_epsilon_m: 1.0,
            proximity_ladder_m: vec![10.0, 25.0, 50.0],
            tie_margin_m: 2.0,
            street_match_threshold: 0.7,
            max_suggestions: 3,
            text_fallback_confidence: 0.2,
        }
    }
}

impl LinkerConfig {
    /// Largest proximity radius.
    #[must_use]
    pub fn max_radius_m(&self) -> f64 {
        self.proximity_ladder_m
            .iter()
            .copied()
            .fold(0.0, f64::max)
    }
}

/// Per-tier counts and averages for a campaign's links.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualitySummary {
    /// Addresses considered.
    pub total: usize,
    /// Containment matches.
    pub containment_verified: usize,
    /// Point-on-surface matches.
    pub point_on_surface: usize,
    /// Verified proximity matches.
    pub proximity_verified: usize,
    /// Fallback proximity matches.
    pub proximity_fallback: usize,
    /// Manual matches.
    pub manual: usize,
    /// Addresses with no match at all.
    pub orphan: usize,
    /// Orphans holding only a text suggestion.
    pub pending_review: usize,
    /// Orphans with tied candidates.
    pub ambiguous: usize,
    /// Mean match confidence (0 when there are no matches).
    pub avg_confidence: f64,
    /// Mean match distance in metres (0 when there are no matches).
    pub avg_distance_m: f64,
}
