//! The per-address linking decision.
//!
//! Tiers are tried strongest first and the first one that produces a
//! building wins: containment, point-on-surface, then the proximity
//! ladder. An address nothing reaches becomes a `pending` orphan. Manual
//! overrides are never recomputed.

use std::collections::BTreeMap;

use canvass_geometry::metric::area_sqm;
use canvass_linker_models::{Candidate, LinkerConfig, Match, MatchTier, Orphan, OrphanStatus};
use canvass_territory_models::{AddressPoint, BuildingFootprint};
use rayon::prelude::*;

use crate::LinkError;
use crate::index::{BuildingIndex, Nearby};
use crate::normalize::{address_key, street_similarity};

/// Confidence ceiling for suggestions that are not spatial matches.
pub const SUGGESTION_CEILING: f64 = 0.2;

/// Result for one address: a match, an orphan row, or both (ambiguous).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressDecision {
    /// Link, when a tier succeeded.
    pub link: Option<Match>,
    /// Review row, when one is needed.
    pub orphan: Option<Orphan>,
}

/// Output of a linking pass, sorted by address id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkOutcome {
    /// Computed matches (manual ones excluded).
    pub matches: Vec<Match>,
    /// Orphan and ambiguous review rows.
    pub orphans: Vec<Orphan>,
    /// Addresses skipped because a manual override exists.
    pub manual: usize,
}

/// Applies one [`LinkerConfig`] to campaign datasets.
#[derive(Debug, Clone)]
pub struct Linker {
    config: LinkerConfig,
}

impl Linker {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::InvalidConfig`] if the ladder is empty, not
    /// strictly ascending, or has a non-positive rung, or if any other
    /// setting is out of range.
    pub fn new(config: LinkerConfig) -> Result<Self, LinkError> {
        let invalid = |message: &str| Err(LinkError::InvalidConfig(message.to_string()));

        if config.proximity_ladder_m.is_empty() {
            return invalid("proximity ladder is empty");
        }
        if config
            .proximity_ladder_m
            .iter()
            .any(|r| !r.is_finite() || *r <= 0.0)
        {
            return invalid("proximity radii must be positive");
        }
        if config.proximity_ladder_m.windows(2).any(|w| w[0] >= w[1]) {
            return invalid("proximity ladder must be strictly ascending");
        }
        if !(config.surface_epsilon_m.is_finite() && config.surface_epsilon_m > 0.0) {
            return invalid("surface epsilon must be positive");
        }
        if !(config.tie_margin_m.is_finite() && config.tie_margin_m >= 0.0) {
            return invalid("tie margin must be non-negative");
        }
        if !(0.0..=1.0).contains(&config.street_match_threshold) {
            return invalid("street match threshold must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&config.text_fallback_confidence) {
            return invalid("text fallback confidence must be within [0, 1]");
        }
        Ok(Self { config })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &LinkerConfig {
        &self.config
    }

    /// Links every address of a campaign.
    ///
    /// Addresses with an entry in `overrides` are skipped and counted in
    /// [`LinkOutcome::manual`].
    #[must_use]
    pub fn link_campaign(
        &self,
        buildings: Vec<BuildingFootprint>,
        addresses: &[AddressPoint],
        overrides: &BTreeMap<String, Option<String>>,
    ) -> LinkOutcome {
        let index = BuildingIndex::new(buildings);
        let (manual, pending): (Vec<&AddressPoint>, Vec<&AddressPoint>) = addresses
            .iter()
            .partition(|a| overrides.contains_key(&a.id));

        let decisions: Vec<AddressDecision> = pending
            .into_par_iter()
            .map(|address| self.link_address(&index, address))
            .collect();

        let mut outcome = LinkOutcome {
            manual: manual.len(),
            ..LinkOutcome::default()
        };
        for decision in decisions {
            outcome.matches.extend(decision.link);
            outcome.orphans.extend(decision.orphan);
        }
        outcome.matches.sort_by(|a, b| a.address_id.cmp(&b.address_id));
        outcome.orphans.sort_by(|a, b| a.address_id.cmp(&b.address_id));

        log::info!(
            "Linked {} addresses against {} buildings: {} matches, {} review rows, {} manual",
            addresses.len(),
            index.len(),
            outcome.matches.len(),
            outcome.orphans.len(),
            outcome.manual
        );
        outcome
    }

    /// Decides one address.
    #[must_use]
    pub fn link_address(&self, index: &BuildingIndex, address: &AddressPoint) -> AddressDecision {
        let (lon, lat) = (address.lon, address.lat);

        // Containment
        let mut inside = index.containing(lon, lat);
        inside.sort_by(|a, b| {
            area_sqm(&a.footprint)
                .total_cmp(&area_sqm(&b.footprint))
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(building) = inside.first() {
            return linked(address, building, MatchTier::ContainmentVerified, 1.0, 0.0, None);
        }

        // Point on surface
        let epsilon = self.config.surface_epsilon_m;
        if let Some(near) = index.within(lon, lat, epsilon).first() {
            let confidence = 0.05f64.mul_add(-(near.distance_m / epsilon), 0.95);
            return linked(
                address,
                near.building,
                MatchTier::PointOnSurface,
                confidence,
                near.distance_m,
                None,
            );
        }

        // Proximity ladder
        for &radius in &self.config.proximity_ladder_m {
            let found = index.within(lon, lat, radius);
            let Some(nearest) = found.first().copied() else {
                continue;
            };
            return self.decide_proximity(address, nearest, &found);
        }

        AddressDecision {
            link: None,
            orphan: Some(self.orphan(index, address)),
        }
    }

    fn proximity_confidence(&self, distance_m: f64, similarity: f64, verified: bool) -> f64 {
        let closeness = (1.0 - distance_m / self.config.max_radius_m()).clamp(0.0, 1.0);
        if verified {
            0.10f64.mul_add(similarity, 0.25f64.mul_add(closeness, 0.60))
        } else {
            0.10f64.mul_add(similarity, 0.20f64.mul_add(closeness, 0.30))
        }
    }

    fn decide_proximity(
        &self,
        address: &AddressPoint,
        nearest: Nearby<'_>,
        found: &[Nearby<'_>],
    ) -> AddressDecision {
        let street = address.street_name.as_deref();
        let mut group: Vec<(Nearby<'_>, f64)> = found
            .iter()
            .filter(|n| n.distance_m <= nearest.distance_m + self.config.tie_margin_m)
            .map(|&n| (n, street_similarity(street, n.building.street_name.as_deref())))
            .collect();
        group.sort_by(|(a, sa), (b, sb)| {
            sb.total_cmp(sa)
                .then_with(|| a.building.id.cmp(&b.building.id))
        });

        let (best, similarity) = group[0];
        let verified = group.len() == 1 && similarity >= self.config.street_match_threshold;
        let tier = if verified {
            MatchTier::ProximityVerified
        } else {
            MatchTier::ProximityFallback
        };
        let confidence = self.proximity_confidence(best.distance_m, similarity, verified);
        let mut decision = linked(
            address,
            best.building,
            tier,
            confidence,
            best.distance_m,
            Some(similarity),
        );

        if group.len() > 1 {
            let suggestions = group
                .iter()
                .map(|&(n, s)| Candidate {
                    building_id: n.building.id.clone(),
                    distance_m: Some(n.distance_m),
                    street_score: s,
                    confidence: self.proximity_confidence(n.distance_m, s, false),
                })
                .collect();
            decision.orphan = Some(Orphan {
                address_id: address.id.clone(),
                nearest_building_id: Some(nearest.building.id.clone()),
                nearest_distance_m: Some(nearest.distance_m),
                nearest_street: nearest.building.street_name.clone(),
                street_match_score: Some(street_similarity(
                    street,
                    nearest.building.street_name.as_deref(),
                )),
                suggestions,
                status: OrphanStatus::AmbiguousMatch,
            });
        }
        decision
    }

    fn orphan(&self, index: &BuildingIndex, address: &AddressPoint) -> Orphan {
        let street = address.street_name.as_deref();
        let max_radius = self.config.max_radius_m();
        let nearest = index.nearest(address.lon, address.lat, self.config.max_suggestions.max(1));

        let mut suggestions: Vec<Candidate> = Vec::new();
        if let Some(key) = address_key(address.house_number.as_deref(), street) {
            let mut text: Vec<&BuildingFootprint> = index
                .buildings()
                .iter()
                .filter(|b| {
                    address_key(b.house_number.as_deref(), b.street_name.as_deref()).as_ref()
                        == Some(&key)
                })
                .collect();
            text.sort_by(|a, b| a.id.cmp(&b.id));
            suggestions.extend(text.into_iter().map(|b| Candidate {
                building_id: b.id.clone(),
                distance_m: None,
                street_score: 1.0,
                confidence: self.config.text_fallback_confidence.min(SUGGESTION_CEILING),
            }));
        }
        let status = if suggestions.is_empty() {
            OrphanStatus::Pending
        } else {
            OrphanStatus::PendingReview
        };
        let keep = self.config.max_suggestions.max(suggestions.len());

        for n in nearest.iter().take(self.config.max_suggestions) {
            if suggestions.len() >= keep {
                break;
            }
            if suggestions.iter().any(|c| c.building_id == n.building.id) {
                continue;
            }
            let similarity = street_similarity(street, n.building.street_name.as_deref());
            let reach = if n.distance_m > 0.0 {
                (max_radius / n.distance_m).min(1.0)
            } else {
                1.0
            };
            suggestions.push(Candidate {
                building_id: n.building.id.clone(),
                distance_m: Some(n.distance_m),
                street_score: similarity,
                confidence: SUGGESTION_CEILING * reach * 0.5f64.mul_add(similarity, 0.5),
            });
        }

        let first = nearest.first();
        Orphan {
            address_id: address.id.clone(),
            nearest_building_id: first.map(|n| n.building.id.clone()),
            nearest_distance_m: first.map(|n| n.distance_m),
            nearest_street: first.and_then(|n| n.building.street_name.clone()),
            street_match_score: first
                .map(|n| street_similarity(street, n.building.street_name.as_deref())),
            suggestions,
            status,
        }
    }
}

fn linked(
    address: &AddressPoint,
    building: &BuildingFootprint,
    tier: MatchTier,
    confidence: f64,
    distance_m: f64,
    street_score: Option<f64>,
) -> AddressDecision {
    AddressDecision {
        link: Some(Match {
            address_id: address.id.clone(),
            building_id: Some(building.id.clone()),
            tier,
            confidence: confidence.clamp(0.0, 1.0),
            distance_m,
            street_score,
        }),
        orphan: None,
    }
}
