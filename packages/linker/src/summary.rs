//! Link quality aggregation and the review queue.

use std::collections::BTreeSet;

use canvass_linker_models::{Match, MatchTier, Orphan, OrphanStatus, QualitySummary};

/// Per-tier counts and averages over a campaign's links.
///
/// `orphan` counts open review rows whose address has no match, so an
/// ambiguous address (which has a fallback match) is counted once as a
/// match and again under `ambiguous`.
#[must_use]
pub fn summarize(matches: &[Match], orphans: &[Orphan]) -> QualitySummary {
    let mut summary = QualitySummary::default();
    for m in matches {
        match m.tier {
            MatchTier::ContainmentVerified => summary.containment_verified += 1,
            MatchTier::PointOnSurface => summary.point_on_surface += 1,
            MatchTier::ProximityVerified => summary.proximity_verified += 1,
            MatchTier::ProximityFallback => summary.proximity_fallback += 1,
            MatchTier::Manual => summary.manual += 1,
        }
    }

    let linked: BTreeSet<&str> = matches.iter().map(|m| m.address_id.as_str()).collect();
    for orphan in orphans.iter().filter(|o| o.status != OrphanStatus::Resolved) {
        match orphan.status {
            OrphanStatus::PendingReview => summary.pending_review += 1,
            OrphanStatus::AmbiguousMatch => summary.ambiguous += 1,
            OrphanStatus::Pending | OrphanStatus::Resolved => {}
        }
        if !linked.contains(orphan.address_id.as_str()) {
            summary.orphan += 1;
        }
    }

    summary.total = matches.len() + summary.orphan;
    if !matches.is_empty() {
        #[allow(clippy::cast_precision_loss)]
        let n = matches.len() as f64;
        summary.avg_confidence = matches.iter().map(|m| m.confidence).sum::<f64>() / n;
        summary.avg_distance_m = matches.iter().map(|m| m.distance_m).sum::<f64>() / n;
    }
    summary
}

/// Open review rows, nearest first (unknown distances last), then by
/// address id.
#[must_use]
pub fn review_queue(orphans: &[Orphan]) -> Vec<Orphan> {
    let mut queue: Vec<Orphan> = orphans
        .iter()
        .filter(|o| OrphanStatus::REVIEWABLE.contains(&o.status))
        .cloned()
        .collect();
    queue.sort_by(|a, b| {
        let by_distance = match (a.nearest_distance_m, b.nearest_distance_m) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        };
        by_distance.then_with(|| a.address_id.cmp(&b.address_id))
    });
    queue
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(address: &str, tier: MatchTier, confidence: f64, distance_m: f64) -> Match {
        Match {
            address_id: address.into(),
            building_id: Some("b".into()),
            tier,
            confidence,
            distance_m,
            street_score: None,
        }
    }

    fn orphan(address: &str, distance: Option<f64>, status: OrphanStatus) -> Orphan {
        Orphan {
            address_id: address.into(),
            nearest_building_id: None,
            nearest_distance_m: distance,
            nearest_street: None,
            street_match_score: None,
            suggestions: Vec::new(),
            status,
        }
    }

    #[test]
    fn counts_tiers_and_averages() {
        let matches = vec![
            link("a1", MatchTier::ContainmentVerified, 1.0, 0.0),
            link("a2", MatchTier::ProximityFallback, 0.5, 12.0),
            link("a3", MatchTier::Manual, 1.0, 3.0),
        ];
        let orphans = vec![
            orphan("a2", Some(12.0), OrphanStatus::AmbiguousMatch),
            orphan("a4", Some(80.0), OrphanStatus::Pending),
            orphan("a5", None, OrphanStatus::PendingReview),
            orphan("a6", Some(90.0), OrphanStatus::Resolved),
        ];
        let summary = summarize(&matches, &orphans);
        assert_eq!(summary.containment_verified, 1);
        assert_eq!(summary.proximity_fallback, 1);
        assert_eq!(summary.manual, 1);
        assert_eq!(summary.orphan, 2);
        assert_eq!(summary.ambiguous, 1);
        assert_eq!(summary.pending_review, 1);
        assert_eq!(summary.total, 5);
        assert!((summary.avg_confidence - 2.5 / 3.0).abs() < 1e-9);
        assert!((summary.avg_distance_m - 5.0).abs() < 1e-9);
    }

    #[test]
    fn empty_summary_has_zero_averages() {
        let summary = summarize(&[], &[]);
        assert_eq!(summary, QualitySummary::default());
    }

    #[test]
    fn review_queue_orders_by_distance_with_unknowns_last() {
        let queue = review_queue(&[
            orphan("c", None, OrphanStatus::PendingReview),
            orphan("b", Some(60.0), OrphanStatus::Pending),
            orphan("z", Some(5.0), OrphanStatus::Resolved),
            orphan("a", Some(60.0), OrphanStatus::AmbiguousMatch),
            orphan("d", Some(55.0), OrphanStatus::Pending),
        ]);
        let ids: Vec<&str> = queue.iter().map(|o| o.address_id.as_str()).collect();
        assert_eq!(ids, vec!["d", "a", "b", "c"]);
    }
}
