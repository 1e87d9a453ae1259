//! Address match and orphan rows.
//!
//! A linking pass replaces every non-manual result for its campaign in one
//! transaction. Manual decisions are written separately and survive later
//! passes untouched.

use std::collections::BTreeMap;
use std::str::FromStr as _;

use canvass_linker_models::{Match, MatchTier, Orphan, OrphanStatus};
use chrono::Utc;
use duckdb::Connection;

use crate::{DbError, format_ts};

/// Replaces the campaign's link results.
///
/// Deletes non-manual matches and unresolved orphans for the campaign, then
/// inserts `matches` and `orphans`. Manual matches in `matches` overwrite
/// their existing row.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails; the previous results are
/// left intact then.
pub fn commit_link_run(
    conn: &mut Connection,
    campaign_id: &str,
    matches: &[Match],
    orphans: &[Orphan],
) -> Result<(), DbError> {
    let now = format_ts(Utc::now());
    let tx = conn.transaction()?;

    tx.execute(
        "DELETE FROM address_matches WHERE campaign_id = ? AND tier <> ?",
        duckdb::params![campaign_id, MatchTier::Manual.as_ref()],
    )?;
    tx.execute(
        "DELETE FROM address_orphans WHERE campaign_id = ? AND status <> ?",
        duckdb::params![campaign_id, OrphanStatus::Resolved.as_ref()],
    )?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO address_matches
                (campaign_id, address_id, building_id, tier, confidence, distance_m,
                 street_score, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (campaign_id, address_id) DO UPDATE SET
                building_id = excluded.building_id,
                tier = excluded.tier,
                confidence = excluded.confidence,
                distance_m = excluded.distance_m,
                street_score = excluded.street_score,
                updated_at = excluded.updated_at",
        )?;
        for m in matches {
            stmt.execute(duckdb::params![
                campaign_id,
                m.address_id,
                m.building_id.as_deref(),
                m.tier.as_ref(),
                m.confidence,
                m.distance_m,
                m.street_score,
                now,
            ])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO address_orphans
                (campaign_id, address_id, nearest_building_id, nearest_distance_m,
                 nearest_street, street_match_score, suggestions, status, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (campaign_id, address_id) DO UPDATE SET
                nearest_building_id = excluded.nearest_building_id,
                nearest_distance_m = excluded.nearest_distance_m,
                nearest_street = excluded.nearest_street,
                street_match_score = excluded.street_match_score,
                suggestions = excluded.suggestions,
                status = excluded.status,
                updated_at = excluded.updated_at",
        )?;
        for o in orphans {
            stmt.execute(duckdb::params![
                campaign_id,
                o.address_id,
                o.nearest_building_id.as_deref(),
                o.nearest_distance_m,
                o.nearest_street.as_deref(),
                o.street_match_score,
                serde_json::to_string(&o.suggestions)?,
                o.status.as_ref(),
                now,
            ])?;
        }
    }

    tx.commit()?;
    log::info!(
        "Committed link run for campaign {campaign_id}: {} matches, {} orphans",
        matches.len(),
        orphans.len()
    );
    Ok(())
}

/// Records a manual decision and resolves the address's orphan row.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the address is not part of the
/// campaign dataset, or [`DbError`] if a statement fails.
pub fn set_manual_override(
    conn: &mut Connection,
    campaign_id: &str,
    address_id: &str,
    building_id: Option<&str>,
    distance_m: f64,
) -> Result<Match, DbError> {
    let now = format_ts(Utc::now());
    let tx = conn.transaction()?;

    let known: i64 = tx.query_row(
        "SELECT count(*) FROM campaign_addresses WHERE campaign_id = ? AND address_id = ?",
        [campaign_id, address_id],
        |row| row.get(0),
    )?;
    if known == 0 {
        return Err(DbError::NotFound(format!(
            "address {address_id} in campaign {campaign_id}"
        )));
    }

    let manual = Match {
        address_id: address_id.to_string(),
        building_id: building_id.map(String::from),
        tier: MatchTier::Manual,
        confidence: 1.0,
        distance_m,
        street_score: None,
    };

    tx.execute(
        "INSERT INTO address_matches
            (campaign_id, address_id, building_id, tier, confidence, distance_m,
             street_score, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, NULL, ?)
         ON CONFLICT (campaign_id, address_id) DO UPDATE SET
            building_id = excluded.building_id,
            tier = excluded.tier,
            confidence = excluded.confidence,
            distance_m = excluded.distance_m,
            street_score = NULL,
            updated_at = excluded.updated_at",
        duckdb::params![
            campaign_id,
            address_id,
            building_id,
            MatchTier::Manual.as_ref(),
            manual.confidence,
            distance_m,
            now,
        ],
    )?;
    tx.execute(
        "UPDATE address_orphans SET status = ?, updated_at = ?
         WHERE campaign_id = ? AND address_id = ?",
        duckdb::params![OrphanStatus::Resolved.as_ref(), now, campaign_id, address_id],
    )?;

    tx.commit()?;
    log::info!("Manual override for {campaign_id}/{address_id} -> {building_id:?}");
    Ok(manual)
}

/// Manual decisions for a campaign, keyed by address id.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn manual_overrides(
    conn: &Connection,
    campaign_id: &str,
) -> Result<BTreeMap<String, Option<String>>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT address_id, building_id FROM address_matches
         WHERE campaign_id = ? AND tier = ?",
    )?;
    stmt.raw_bind_parameter(1, campaign_id)?;
    stmt.raw_bind_parameter(2, MatchTier::Manual.as_ref())?;
    stmt.raw_execute()?;

    let mut results = BTreeMap::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        results.insert(row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?);
    }
    Ok(results)
}

/// All matches for a campaign, sorted by address id.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a stored tier is unknown.
pub fn load_matches(conn: &Connection, campaign_id: &str) -> Result<Vec<Match>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT address_id, building_id, tier, confidence, distance_m, street_score
         FROM address_matches WHERE campaign_id = ? ORDER BY address_id",
    )?;
    stmt.raw_bind_parameter(1, campaign_id)?;
    stmt.raw_execute()?;

    let mut results = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        let tier: String = row.get(2)?;
        results.push(Match {
            address_id: row.get(0)?,
            building_id: row.get(1)?,
            tier: MatchTier::from_str(&tier).map_err(|_| DbError::Conversion {
                message: format!("unknown match tier {tier:?}"),
            })?,
            confidence: row.get(3)?,
            distance_m: row.get(4)?,
            street_score: row.get(5)?,
        });
    }
    Ok(results)
}

/// Orphans for a campaign with one of `statuses`.
///
/// Sorted by nearest distance ascending (rows without a distance last),
/// then address id.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a stored column is corrupt.
pub fn load_orphans(
    conn: &Connection,
    campaign_id: &str,
    statuses: &[OrphanStatus],
) -> Result<Vec<Orphan>, DbError> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = statuses.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let sql = format!(
        "SELECT address_id, nearest_building_id, nearest_distance_m, nearest_street,
                street_match_score, suggestions, status
         FROM address_orphans
         WHERE campaign_id = ? AND status IN ({placeholders})
         ORDER BY nearest_distance_m ASC NULLS LAST, address_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.raw_bind_parameter(1, campaign_id)?;
    for (i, status) in statuses.iter().enumerate() {
        stmt.raw_bind_parameter(i + 2, status.as_ref())?;
    }
    stmt.raw_execute()?;

    let mut results = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        let suggestions: String = row.get(5)?;
        let status: String = row.get(6)?;
        results.push(Orphan {
            address_id: row.get(0)?,
            nearest_building_id: row.get(1)?,
            nearest_distance_m: row.get(2)?,
            nearest_street: row.get(3)?,
            street_match_score: row.get(4)?,
            suggestions: serde_json::from_str(&suggestions)?,
            status: OrphanStatus::from_str(&status).map_err(|_| DbError::Conversion {
                message: format!("unknown orphan status {status:?}"),
            })?,
        });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use canvass_linker_models::Candidate;

    use super::*;
    use crate::open_in_memory;

    fn seed(conn: &Connection, ids: &[&str]) {
        for id in ids {
            conn.execute(
                "INSERT INTO campaign_addresses (campaign_id, address_id, lon, lat) VALUES ('c1', ?, 0, 0)",
                [id],
            )
            .unwrap();
        }
    }

    fn matched(address: &str, building: &str, tier: MatchTier) -> Match {
        Match {
            address_id: address.into(),
            building_id: Some(building.into()),
            tier,
            confidence: 0.9,
            distance_m: 0.0,
            street_score: Some(1.0),
        }
    }

    fn orphan(address: &str, distance: Option<f64>, status: OrphanStatus) -> Orphan {
        Orphan {
            address_id: address.into(),
            nearest_building_id: distance.map(|_| "b9".to_string()),
            nearest_distance_m: distance,
            nearest_street: None,
            street_match_score: None,
            suggestions: vec![Candidate {
                building_id: "b9".into(),
                distance_m: distance,
                street_score: 0.0,
                confidence: 0.1,
            }],
            status,
        }
    }

    #[test]
    fn link_run_replaces_previous_results_but_keeps_manual() {
        let mut conn = open_in_memory().unwrap();
        seed(&conn, &["a1", "a2", "a3"]);

        commit_link_run(
            &mut conn,
            "c1",
            &[matched("a1", "b1", MatchTier::ContainmentVerified)],
            &[orphan("a2", Some(80.0), OrphanStatus::Pending)],
        )
        .unwrap();
        set_manual_override(&mut conn, "c1", "a2", Some("b2"), 80.0).unwrap();

        commit_link_run(
            &mut conn,
            "c1",
            &[matched("a3", "b3", MatchTier::ProximityVerified)],
            &[],
        )
        .unwrap();

        let matches = load_matches(&conn, "c1").unwrap();
        let summary: Vec<(&str, MatchTier)> = matches
            .iter()
            .map(|m| (m.address_id.as_str(), m.tier))
            .collect();
        assert_eq!(
            summary,
            vec![("a2", MatchTier::Manual), ("a3", MatchTier::ProximityVerified)]
        );
        assert_eq!(
            manual_overrides(&conn, "c1").unwrap().get("a2"),
            Some(&Some("b2".to_string()))
        );
        let resolved = load_orphans(&conn, "c1", &[OrphanStatus::Resolved]).unwrap();
        assert_eq!(resolved.len(), 1);
        assert!(load_orphans(&conn, "c1", &OrphanStatus::REVIEWABLE).unwrap().is_empty());
    }

    #[test]
    fn orphans_sort_by_distance_with_missing_last() {
        let mut conn = open_in_memory().unwrap();
        commit_link_run(
            &mut conn,
            "c1",
            &[],
            &[
                orphan("z", Some(5.0), OrphanStatus::AmbiguousMatch),
                orphan("b", None, OrphanStatus::Pending),
                orphan("a", Some(60.0), OrphanStatus::Pending),
                orphan("c", Some(5.0), OrphanStatus::PendingReview),
            ],
        )
        .unwrap();

        let ids: Vec<String> = load_orphans(&conn, "c1", &OrphanStatus::REVIEWABLE)
            .unwrap()
            .into_iter()
            .map(|o| o.address_id)
            .collect();
        assert_eq!(ids, vec!["c", "z", "a", "b"]);
    }

    #[test]
    fn manual_override_for_unknown_address_is_not_found() {
        let mut conn = open_in_memory().unwrap();
        let err = set_manual_override(&mut conn, "c1", "ghost", Some("b1"), 0.0).unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
        assert!(load_matches(&conn, "c1").unwrap().is_empty());
    }
}
