//! Snapshot metadata and the campaign dataset captured with it.

use canvass_geometry::wkb::{read_wkb, write_wkb};
use canvass_territory_models::{
    AddressPoint, BoundingBox, BuildingFootprint, SnapshotMetadata, Theme,
};
use chrono::{DateTime, Utc};
use duckdb::Connection;

use crate::{DbError, format_ts, parse_ts};

const SNAPSHOT_COLUMNS: &str = "campaign_id, region, release, polygon_hash, bbox, prefix, \
     artifacts, diagnostics, created_at, updated_at, expires_at";

/// Records a snapshot and replaces the campaign dataset, in one transaction.
///
/// An existing row for the campaign keeps its original `created_at`; every
/// other field is refreshed. Returns the metadata as stored.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails; nothing is written then.
pub fn upsert_snapshot(
    conn: &mut Connection,
    meta: &SnapshotMetadata,
    buildings: &[BuildingFootprint],
    addresses: &[AddressPoint],
) -> Result<SnapshotMetadata, DbError> {
    let tx = conn.transaction()?;

    let existing_created: Option<String> = match tx.query_row(
        "SELECT created_at FROM campaign_snapshots WHERE campaign_id = ?",
        [&meta.campaign_id],
        |row| row.get(0),
    ) {
        Ok(created) => Some(created),
        Err(duckdb::Error::QueryReturnedNoRows) => None,
        Err(e) => return Err(e.into()),
    };
    let created_at = match existing_created {
        Some(text) => parse_ts(&text)?,
        None => meta.created_at,
    };

    let count = |theme: Theme| i64::try_from(meta.count(theme)).unwrap_or(i64::MAX);
    tx.execute(
        "INSERT INTO campaign_snapshots (
            campaign_id, region, release, polygon_hash, bbox, prefix, artifacts, diagnostics,
            buildings_count, roads_count, divisions_count, addresses_count,
            created_at, updated_at, expires_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (campaign_id) DO UPDATE SET
            region = excluded.region,
            release = excluded.release,
            polygon_hash = excluded.polygon_hash,
            bbox = excluded.bbox,
            prefix = excluded.prefix,
            artifacts = excluded.artifacts,
            diagnostics = excluded.diagnostics,
            buildings_count = excluded.buildings_count,
            roads_count = excluded.roads_count,
            divisions_count = excluded.divisions_count,
            addresses_count = excluded.addresses_count,
            updated_at = excluded.updated_at,
            expires_at = excluded.expires_at",
        duckdb::params![
            meta.campaign_id,
            meta.region,
            meta.release,
            meta.polygon_hash,
            serde_json::to_string(&meta.bbox)?,
            meta.prefix,
            serde_json::to_string(&meta.artifacts)?,
            serde_json::to_string(&meta.diagnostics)?,
            count(Theme::Buildings),
            count(Theme::Roads),
            count(Theme::Divisions),
            count(Theme::Addresses),
            format_ts(created_at),
            format_ts(meta.updated_at),
            format_ts(meta.expires_at),
        ],
    )?;

    replace_dataset(&tx, &meta.campaign_id, buildings, addresses)?;
    tx.commit()?;

    log::info!(
        "Recorded snapshot for campaign {} ({} buildings, {} addresses)",
        meta.campaign_id,
        buildings.len(),
        addresses.len()
    );

    Ok(SnapshotMetadata {
        created_at,
        ..meta.clone()
    })
}

fn replace_dataset(
    conn: &Connection,
    campaign_id: &str,
    buildings: &[BuildingFootprint],
    addresses: &[AddressPoint],
) -> Result<(), DbError> {
    conn.execute("DELETE FROM campaign_buildings WHERE campaign_id = ?", [campaign_id])?;
    conn.execute("DELETE FROM campaign_addresses WHERE campaign_id = ?", [campaign_id])?;

    let mut stmt = conn.prepare(
        "INSERT INTO campaign_buildings
            (campaign_id, building_id, footprint, area_sqm, house_number, street_name)
         VALUES (?, ?, ?, ?, ?, ?)",
    )?;
    for b in buildings {
        let wkb = write_wkb(&geo::Geometry::MultiPolygon(b.footprint.clone()));
        stmt.execute(duckdb::params![
            campaign_id,
            b.id,
            wkb,
            b.area_sqm,
            b.house_number.as_deref(),
            b.street_name.as_deref(),
        ])?;
    }

    let mut stmt = conn.prepare(
        "INSERT INTO campaign_addresses
            (campaign_id, address_id, lon, lat, house_number, street_name, locality,
             postal_code, building_ref)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    for a in addresses {
        stmt.execute(duckdb::params![
            campaign_id,
            a.id,
            a.lon,
            a.lat,
            a.house_number.as_deref(),
            a.street_name.as_deref(),
            a.locality.as_deref(),
            a.postal_code.as_deref(),
            a.building_ref.as_deref(),
        ])?;
    }

    Ok(())
}

/// Loads the snapshot metadata for a campaign.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a stored column is corrupt.
pub fn get_snapshot(
    conn: &Connection,
    campaign_id: &str,
) -> Result<Option<SnapshotMetadata>, DbError> {
    let sql = format!("SELECT {SNAPSHOT_COLUMNS} FROM campaign_snapshots WHERE campaign_id = ?");
    let mut stmt = conn.prepare(&sql)?;
    stmt.raw_bind_parameter(1, campaign_id)?;
    stmt.raw_execute()?;
    let mut rows = stmt.raw_query();
    match rows.next()? {
        Some(row) => Ok(Some(snapshot_from_row(row)?)),
        None => Ok(None),
    }
}

/// Snapshots whose `expires_at` is at or before `now`.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn list_expired(
    conn: &Connection,
    now: DateTime<Utc>,
) -> Result<Vec<SnapshotMetadata>, DbError> {
    let sql = format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM campaign_snapshots WHERE expires_at <= ? ORDER BY campaign_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.raw_bind_parameter(1, format_ts(now))?;
    stmt.raw_execute()?;

    let mut results = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        results.push(snapshot_from_row(row)?);
    }
    Ok(results)
}

/// Deletes a campaign's snapshot row and dataset. Link results are kept.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails.
pub fn delete_snapshot(conn: &mut Connection, campaign_id: &str) -> Result<(), DbError> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM campaign_snapshots WHERE campaign_id = ?", [campaign_id])?;
    tx.execute("DELETE FROM campaign_buildings WHERE campaign_id = ?", [campaign_id])?;
    tx.execute("DELETE FROM campaign_addresses WHERE campaign_id = ?", [campaign_id])?;
    tx.commit()?;
    Ok(())
}

fn snapshot_from_row(row: &duckdb::Row<'_>) -> Result<SnapshotMetadata, DbError> {
    let bbox: String = row.get(4)?;
    let artifacts: String = row.get(6)?;
    let diagnostics: String = row.get(7)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    let expires_at: String = row.get(10)?;

    Ok(SnapshotMetadata {
        campaign_id: row.get(0)?,
        region: row.get(1)?,
        release: row.get(2)?,
        polygon_hash: row.get(3)?,
        bbox: serde_json::from_str::<BoundingBox>(&bbox)?,
        prefix: row.get(5)?,
        artifacts: serde_json::from_str(&artifacts)?,
        diagnostics: serde_json::from_str(&diagnostics)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        expires_at: parse_ts(&expires_at)?,
    })
}

/// Loads the campaign's buildings, sorted by id.
///
/// Rows whose footprint no longer decodes are skipped with a warning.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn load_buildings(
    conn: &Connection,
    campaign_id: &str,
) -> Result<Vec<BuildingFootprint>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT building_id, footprint, area_sqm, house_number, street_name
         FROM campaign_buildings WHERE campaign_id = ? ORDER BY building_id",
    )?;
    stmt.raw_bind_parameter(1, campaign_id)?;
    stmt.raw_execute()?;

    let mut results = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let wkb: Vec<u8> = row.get(1)?;
        let Some(footprint) = read_wkb(&wkb)
            .ok()
            .and_then(canvass_geometry::to_multipolygon)
        else {
            log::warn!("Skipping building {id} in campaign {campaign_id}: unreadable footprint");
            continue;
        };
        results.push(BuildingFootprint {
            id,
            footprint,
            area_sqm: row.get(2)?,
            house_number: row.get(3)?,
            street_name: row.get(4)?,
        });
    }
    Ok(results)
}

/// Loads the campaign's addresses, sorted by id.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn load_addresses(conn: &Connection, campaign_id: &str) -> Result<Vec<AddressPoint>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT address_id, lon, lat, house_number, street_name, locality, postal_code,
                building_ref
         FROM campaign_addresses WHERE campaign_id = ? ORDER BY address_id",
    )?;
    stmt.raw_bind_parameter(1, campaign_id)?;
    stmt.raw_execute()?;

    let mut results = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        results.push(AddressPoint {
            id: row.get(0)?,
            lon: row.get(1)?,
            lat: row.get(2)?,
            house_number: row.get(3)?,
            street_name: row.get(4)?,
            locality: row.get(5)?,
            postal_code: row.get(6)?,
            building_ref: row.get(7)?,
        });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use canvass_territory_models::{ScanDiagnostics, ThemeArtifact};
    use chrono::TimeZone as _;
    use geo::{MultiPolygon, polygon};

    use super::*;
    use crate::open_in_memory;

    fn meta(at: DateTime<Utc>, buildings: usize) -> SnapshotMetadata {
        SnapshotMetadata {
            campaign_id: "c1".into(),
            region: "ON".into(),
            release: "2026-01-21.0".into(),
            polygon_hash: "abc".into(),
            bbox: BoundingBox::new(-79.4, 43.6, -79.3, 43.7),
            prefix: "campaigns/c1/snapshot/".into(),
            artifacts: vec![ThemeArtifact {
                theme: Theme::Buildings,
                key: "campaigns/c1/snapshot/buildings.geojson.gz".into(),
                count: buildings,
                url: None,
            }],
            diagnostics: vec![ScanDiagnostics::new(Theme::Buildings)],
            created_at: at,
            updated_at: at,
            expires_at: at + chrono::Duration::days(30),
        }
    }

    fn building(id: &str) -> BuildingFootprint {
        BuildingFootprint {
            id: id.into(),
            footprint: MultiPolygon(vec![polygon![
                (x: -79.35, y: 43.65),
                (x: -79.349, y: 43.65),
                (x: -79.349, y: 43.651),
                (x: -79.35, y: 43.65),
            ]]),
            area_sqm: 42.0,
            house_number: Some("10".into()),
            street_name: Some("King St W".into()),
        }
    }

    fn address(id: &str) -> AddressPoint {
        AddressPoint {
            id: id.into(),
            lon: -79.3495,
            lat: 43.6502,
            house_number: Some("10".into()),
            street_name: Some("King Street West".into()),
            locality: Some("Toronto".into()),
            postal_code: None,
            building_ref: None,
        }
    }

    #[test]
    fn upsert_preserves_created_at_and_replaces_dataset() {
        let mut conn = open_in_memory().unwrap();
        let first = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2026, 2, 2, 12, 0, 0).unwrap();

        upsert_snapshot(&mut conn, &meta(first, 2), &[building("b1"), building("b2")], &[address("a1")])
            .unwrap();
        let stored = upsert_snapshot(&mut conn, &meta(second, 1), &[building("b3")], &[])
            .unwrap();

        assert_eq!(stored.created_at, first);
        assert_eq!(stored.updated_at, second);

        let loaded = get_snapshot(&conn, "c1").unwrap().unwrap();
        assert_eq!(loaded.created_at, first);
        assert_eq!(loaded.updated_at, second);
        assert_eq!(loaded.count(Theme::Buildings), 1);
        assert_eq!(loaded.bbox, BoundingBox::new(-79.4, 43.6, -79.3, 43.7));

        let rows: i64 = conn
            .query_row("SELECT count(*) FROM campaign_snapshots", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);

        let buildings = load_buildings(&conn, "c1").unwrap();
        assert_eq!(buildings.len(), 1);
        assert_eq!(buildings[0].id, "b3");
        assert_eq!(buildings[0].footprint, building("b3").footprint);
        assert!(load_addresses(&conn, "c1").unwrap().is_empty());
    }

    #[test]
    fn dataset_round_trips() {
        let mut conn = open_in_memory().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap();
        upsert_snapshot(&mut conn, &meta(at, 1), &[building("b1")], &[address("a2"), address("a1")])
            .unwrap();

        let addresses = load_addresses(&conn, "c1").unwrap();
        assert_eq!(addresses, vec![address("a1"), address("a2")]);
        assert!(get_snapshot(&conn, "other").unwrap().is_none());
    }

    #[test]
    fn expired_snapshots_are_listed_and_deleted() {
        let mut conn = open_in_memory().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap();
        upsert_snapshot(&mut conn, &meta(at, 1), &[building("b1")], &[]).unwrap();

        assert!(list_expired(&conn, at + chrono::Duration::days(29)).unwrap().is_empty());
        let expired = list_expired(&conn, at + chrono::Duration::days(31)).unwrap();
        assert_eq!(expired.len(), 1);

        delete_snapshot(&mut conn, "c1").unwrap();
        assert!(get_snapshot(&conn, "c1").unwrap().is_none());
        assert!(load_buildings(&conn, "c1").unwrap().is_empty());
    }
}
