#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `DuckDB` persistence for campaigns.
//!
//! One database file holds snapshot metadata, the per-campaign dataset the
//! linker runs over (buildings and addresses captured at snapshot time),
//! and the link results. Every multi-table write happens in a single
//! transaction.

pub mod links;
pub mod paths;
pub mod snapshots;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use duckdb::Connection;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// I/O error creating the database directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON column (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },

    /// The referenced campaign row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Opens (or creates) the campaign database and ensures the schema exists.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open(path: &Path) -> Result<Connection, DbError> {
    if let Some(parent) = path.parent() {
        paths::ensure_dir(parent)?;
    }

    let conn = Connection::open(path)?;
    create_schema(&conn)?;
    log::debug!("Opened campaign database {}", path.display());
    Ok(conn)
}

/// Opens the campaign database at the default path.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open_default() -> Result<Connection, DbError> {
    open(&paths::campaign_db_path())
}

/// Opens a throwaway in-memory database with the schema applied.
///
/// # Errors
///
/// Returns [`DbError`] if schema creation fails.
pub fn open_in_memory() -> Result<Connection, DbError> {
    let conn = Connection::open_in_memory()?;
    create_schema(&conn)?;
    Ok(conn)
}

fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS campaign_snapshots (
            campaign_id TEXT NOT NULL PRIMARY KEY,
            region TEXT NOT NULL,
            release TEXT NOT NULL,
            polygon_hash TEXT NOT NULL,
            bbox TEXT NOT NULL,
            prefix TEXT NOT NULL,
            artifacts TEXT NOT NULL,
            diagnostics TEXT NOT NULL,
            buildings_count BIGINT NOT NULL,
            roads_count BIGINT NOT NULL,
            divisions_count BIGINT NOT NULL,
            addresses_count BIGINT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS campaign_buildings (
            campaign_id TEXT NOT NULL,
            building_id TEXT NOT NULL,
            footprint BLOB NOT NULL,
            area_sqm DOUBLE NOT NULL,
            house_number TEXT,
            street_name TEXT,
            PRIMARY KEY (campaign_id, building_id)
        );

        CREATE TABLE IF NOT EXISTS campaign_addresses (
            campaign_id TEXT NOT NULL,
            address_id TEXT NOT NULL,
            lon DOUBLE NOT NULL,
            lat DOUBLE NOT NULL,
            house_number TEXT,
            street_name TEXT,
            locality TEXT,
            postal_code TEXT,
            building_ref TEXT,
            PRIMARY KEY (campaign_id, address_id)
        );

        CREATE TABLE IF NOT EXISTS address_matches (
            campaign_id TEXT NOT NULL,
            address_id TEXT NOT NULL,
            building_id TEXT,
            tier TEXT NOT NULL,
            confidence DOUBLE NOT NULL,
            distance_m DOUBLE NOT NULL,
            street_score DOUBLE,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (campaign_id, address_id)
        );

        CREATE TABLE IF NOT EXISTS address_orphans (
            campaign_id TEXT NOT NULL,
            address_id TEXT NOT NULL,
            nearest_building_id TEXT,
            nearest_distance_m DOUBLE,
            nearest_street TEXT,
            street_match_score DOUBLE,
            suggestions TEXT NOT NULL,
            status TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (campaign_id, address_id)
        );",
    )?;
    Ok(())
}

/// Formats a timestamp for storage.
///
/// Fixed-width UTC RFC 3339, so stored values compare correctly as text.
#[must_use]
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a stored timestamp.
///
/// # Errors
///
/// Returns [`DbError::Conversion`] if the text is not RFC 3339.
pub fn parse_ts(text: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DbError::Conversion {
            message: format!("bad timestamp {text:?}: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_round_trip_and_sort_as_text() {
        let a = parse_ts("2026-01-21T10:00:00Z").unwrap();
        let b = parse_ts("2026-01-21T10:00:00.5+00:00").unwrap();
        assert_eq!(format_ts(a), "2026-01-21T10:00:00.000Z");
        assert!(format_ts(a) < format_ts(b));
        assert!(parse_ts("yesterday").is_err());
    }

    #[test]
    fn schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("canvass.duckdb");
        drop(open(&path).unwrap());
        let conn = open(&path).unwrap();
        let n: i64 = conn
            .query_row(
                "SELECT count(*) FROM information_schema.tables WHERE table_name LIKE 'campaign_%' OR table_name LIKE 'address_%'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(n, 5);
    }
}
