//! Address point extraction.
//!
//! Address partitions come from several producers, so the column layout is
//! detected from the schema: either a `lon`/`lat` style pair or a point
//! geometry column, plus whichever of the house number, street, locality,
//! postal code, and building reference columns are present. Candidate rows
//! are prefiltered on the territory bbox buffered by
//! [`ADDRESS_BUFFER_DEG`]; the point-in-polygon test is authoritative.

use std::collections::BTreeMap;
use std::time::Instant;

use canvass_territory_models::{AddressPoint, ScanDiagnostics, TerritoryPolygon, Theme};
use duckdb::Connection;
use duckdb::types::Value;
use geo::{Geometry, Intersects, Point};

use crate::query::{QueryEngine, Scanned, ThemeRequest};
use crate::schema::{self, ColumnInfo, GeometryColumn};
use crate::{ExtractError, sql};

/// Bbox buffer applied before the precise containment test.
pub const ADDRESS_BUFFER_DEG: f64 = 0.0005;

const ID_NAMES: &[&str] = &["gers_id", "id", "address_id"];
const LON_LAT_PAIRS: &[(&str, &str)] = &[
    ("lon", "lat"),
    ("longitude", "latitude"),
    ("lng", "lat"),
    ("x", "y"),
];
const HOUSE_NUMBER_NAMES: &[&str] = &["house_number", "number", "street_number", "housenumber"];
const STREET_NAMES: &[&str] = &["street_name", "street", "road"];
const LOCALITY_NAMES: &[&str] = &["locality", "city", "municipality", "town"];
const POSTAL_NAMES: &[&str] = &["postal_code", "postcode", "zip", "zipcode"];
const BUILDING_REF_NAMES: &[&str] = &["building_id", "building_ref", "building_gers_id"];

/// Where an address row keeps its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressPosition {
    /// Separate longitude and latitude columns.
    LonLat {
        /// Longitude column.
        lon: String,
        /// Latitude column.
        lat: String,
    },
    /// A point geometry column.
    Geometry(GeometryColumn),
}

/// Detected address column mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressColumns {
    /// Id column.
    pub id: String,
    /// Position columns.
    pub position: AddressPosition,
    /// House number column.
    pub house_number: Option<String>,
    /// Street name column.
    pub street_name: Option<String>,
    /// Locality column.
    pub locality: Option<String>,
    /// Postal code column.
    pub postal_code: Option<String>,
    /// Source-supplied building reference column.
    pub building_ref: Option<String>,
}

impl AddressColumns {
    /// Detects the mapping from a schema.
    ///
    /// Returns `None` when there is no id column or no usable position.
    #[must_use]
    pub fn detect(columns: &[ColumnInfo]) -> Option<Self> {
        let name_of = |names: &[&str]| schema::find_column(columns, names).map(|c| c.name.clone());

        let id = name_of(ID_NAMES)?;
        let position = LON_LAT_PAIRS
            .iter()
            .find_map(|&(lon, lat)| {
                Some(AddressPosition::LonLat {
                    lon: name_of(&[lon])?,
                    lat: name_of(&[lat])?,
                })
            })
            .or_else(|| GeometryColumn::detect(columns).map(AddressPosition::Geometry))?;

        Some(Self {
            id,
            position,
            house_number: name_of(HOUSE_NUMBER_NAMES),
            street_name: name_of(STREET_NAMES),
            locality: name_of(LOCALITY_NAMES),
            postal_code: name_of(POSTAL_NAMES),
            building_ref: name_of(BUILDING_REF_NAMES),
        })
    }

    fn optional_columns(&self) -> [Option<&String>; 5] {
        [
            self.house_number.as_ref(),
            self.street_name.as_ref(),
            self.locality.as_ref(),
            self.postal_code.as_ref(),
            self.building_ref.as_ref(),
        ]
    }
}

/// Addresses extracted for a territory.
#[derive(Debug, Clone)]
pub struct AddressExtraction {
    /// Address points sorted by id, unique by id.
    pub addresses: Vec<AddressPoint>,
    /// What the scan touched.
    pub diagnostics: ScanDiagnostics,
}

impl QueryEngine {
    /// Extracts address points inside the territory.
    ///
    /// `request.theme` is ignored; address partitions are always read.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Schema`] if the partitions have no
    /// recognisable id or position columns, or any other scan failure
    /// except missing partitions.
    pub async fn extract_addresses(
        &self,
        request: ThemeRequest,
    ) -> Result<AddressExtraction, ExtractError> {
        let start = Instant::now();
        let request = ThemeRequest {
            theme: Theme::Addresses,
            ..request
        };
        let candidates = request.candidate_paths(self.layout());
        let mut diagnostics = ScanDiagnostics::new(Theme::Addresses);
        diagnostics.requested_tiles = candidates.len();

        let polygon = request.polygon.clone();
        let scanned = self
            .scan_partitions(candidates, move |conn, files| scan_addresses(conn, files, &polygon))
            .await?;

        let mut addresses = Vec::new();
        if let Some(Scanned { value, scanned }) = scanned {
            diagnostics.scanned_tiles = scanned;
            diagnostics.rows_read = value.rows_read;
            diagnostics.skipped_geometries = value.skipped;
            addresses = value.addresses;
        }
        diagnostics.missing_tiles = diagnostics.requested_tiles - diagnostics.scanned_tiles;

        if let Some(limit) = request.limit
            && addresses.len() > limit
        {
            addresses.truncate(limit);
            diagnostics.truncated = true;
        }
        diagnostics.features = addresses.len();
        diagnostics.elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        log::info!(
            "{} addresses: {} points ({} rows, {} skipped) in {}ms",
            request.region,
            diagnostics.features,
            diagnostics.rows_read,
            diagnostics.skipped_geometries,
            diagnostics.elapsed_ms,
        );

        Ok(AddressExtraction {
            addresses,
            diagnostics,
        })
    }
}

struct AddressScan {
    addresses: Vec<AddressPoint>,
    rows_read: usize,
    skipped: usize,
}

fn scan_addresses(
    conn: &Connection,
    files: &[String],
    polygon: &TerritoryPolygon,
) -> Result<AddressScan, ExtractError> {
    let columns = schema::describe(conn, files)?;
    let mapping = AddressColumns::detect(&columns).ok_or_else(|| ExtractError::Schema {
        theme: Theme::Addresses.to_string(),
        path: files.first().cloned().unwrap_or_default(),
        message: "no id column or no lon/lat or point geometry column".to_string(),
    })?;

    let buffered = polygon.bbox().buffered(ADDRESS_BUFFER_DEG);
    let mut select = vec![format!("CAST({} AS VARCHAR)", sql::ident(&mapping.id))];
    let filter = match &mapping.position {
        AddressPosition::LonLat { lon, lat } => {
            let (lon, lat) = (
                format!("TRY_CAST({} AS DOUBLE)", sql::ident(lon)),
                format!("TRY_CAST({} AS DOUBLE)", sql::ident(lat)),
            );
            select.push(lon.clone());
            select.push(lat.clone());
            sql::where_clause(&[sql::point_filter(&lon, &lat, &buffered)])
        }
        AddressPosition::Geometry(geometry) => {
            select.push(geometry.select_expr());
            let conditions: Vec<String> = schema::detect_extent(&columns)
                .map(|extent| sql::overlap_filter(&extent, &buffered))
                .into_iter()
                .collect();
            sql::where_clause(&conditions)
        }
    };
    for column in mapping.optional_columns() {
        select.push(column.map_or_else(
            || "NULL".to_string(),
            |name| format!("CAST({} AS VARCHAR)", sql::ident(name)),
        ));
    }
    let offset = select.len() - 5;

    let query = format!(
        "SELECT {} FROM {} {filter}",
        select.join(", "),
        sql::read_parquet(files)
    );

    let territory = polygon.to_polygon();
    let mut by_id: BTreeMap<String, AddressPoint> = BTreeMap::new();
    let mut rows_read = 0;
    let mut skipped = 0;

    let mut stmt = conn.prepare(&query)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        rows_read += 1;
        let Some(id) = row.get::<_, Option<String>>(0)? else {
            skipped += 1;
            continue;
        };

        let position = match &mapping.position {
            AddressPosition::LonLat { .. } => schema::value_to_f64(&row.get::<_, Value>(1)?)
                .zip(schema::value_to_f64(&row.get::<_, Value>(2)?))
                .map(|(lon, lat)| Point::new(lon, lat)),
            AddressPosition::Geometry(_) => schema::geometry_encoding(row.get::<_, Value>(1)?)
                .and_then(|encoding| match encoding.decode() {
                    Ok(geometry) => as_point(geometry),
                    Err(e) => {
                        log::warn!("Skipping address {id}: {} geometry: {e}", encoding.kind());
                        None
                    }
                }),
        };
        let Some(point) = position else {
            skipped += 1;
            continue;
        };
        if !territory.intersects(&point) || by_id.contains_key(&id) {
            continue;
        }

        let text = |i: usize| -> Result<Option<String>, ExtractError> {
            Ok(schema::value_to_string(row.get::<_, Value>(offset + i)?))
        };
        let address = AddressPoint {
            id: id.clone(),
            lon: point.x(),
            lat: point.y(),
            house_number: text(0)?,
            street_name: text(1)?,
            locality: text(2)?,
            postal_code: text(3)?,
            building_ref: text(4)?,
        };
        by_id.insert(id, address);
    }

    Ok(AddressScan {
        addresses: by_id.into_values().collect(),
        rows_read,
        skipped,
    })
}

fn as_point(geometry: Geometry<f64>) -> Option<Point<f64>> {
    match geometry {
        Geometry::Point(p) => Some(p),
        Geometry::MultiPoint(mp) => mp.0.into_iter().next(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use canvass_tiles::{LocalProbe, PartitionLayout, TileExistenceCache, TileProbe};

    use super::*;
    use crate::test_support::{wkb_hex, write_table};
    use crate::{QuerySession, SessionConfig};

    fn territory() -> TerritoryPolygon {
        TerritoryPolygon::new(vec![
            (-73.60, 45.50),
            (-73.55, 45.50),
            (-73.55, 45.55),
            (-73.60, 45.50),
        ])
        .unwrap()
    }

    fn engine(root: &Path) -> QueryEngine {
        QueryEngine::new(
            Arc::new(QuerySession::new(SessionConfig::default())),
            PartitionLayout::new(root.to_string_lossy(), "r1"),
            Arc::new(TileExistenceCache::default()),
            Arc::new(LocalProbe) as Arc<dyn TileProbe>,
        )
    }

    fn request() -> ThemeRequest {
        ThemeRequest {
            theme: Theme::Addresses,
            region: "QC".into(),
            tiles: None,
            polygon: territory(),
            limit: None,
        }
    }

    #[test]
    fn detects_lon_lat_layout_with_aliases() {
        let col = |name: &str, ty: &str| ColumnInfo {
            name: name.into(),
            data_type: ty.into(),
        };
        let mapping = AddressColumns::detect(&[
            col("address_id", "BIGINT"),
            col("longitude", "DOUBLE"),
            col("latitude", "DOUBLE"),
            col("number", "VARCHAR"),
            col("street", "VARCHAR"),
            col("postcode", "VARCHAR"),
        ])
        .unwrap();
        assert_eq!(mapping.id, "address_id");
        assert_eq!(
            mapping.position,
            AddressPosition::LonLat {
                lon: "longitude".into(),
                lat: "latitude".into()
            }
        );
        assert_eq!(mapping.house_number.as_deref(), Some("number"));
        assert_eq!(mapping.locality, None);
        assert!(AddressColumns::detect(&[col("id", "VARCHAR"), col("street", "VARCHAR")]).is_none());
    }

    #[tokio::test]
    async fn extracts_points_inside_triangle_from_lon_lat_columns() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let path = engine.layout().region_path(Theme::Addresses, "QC");
        write_table(
            Path::new(&path),
            "CREATE TABLE fx AS SELECT * FROM (VALUES
                ('a2', -73.56, 45.51, '221', 'Rue Sainte-Catherine', 'Montréal', 'H2X 1K4'),
                ('a1', -73.555, 45.502, '12B', 'Rue Peel', NULL, NULL),
                ('hull', -73.59, 45.54, '5', 'Rue Drummond', NULL, NULL),
                ('buffer', -73.5498, 45.52, '7', 'Rue Guy', NULL, NULL),
                ('far', -73.40, 45.52, '9', 'Rue Guy', NULL, NULL)
            ) t(id, lon, lat, number, street, city, postcode)",
        );

        let result = engine.extract_addresses(request()).await.unwrap();
        let ids: Vec<&str> = result.addresses.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2"]);
        assert_eq!(result.addresses[0].house_number.as_deref(), Some("12B"));
        assert_eq!(result.addresses[1].locality.as_deref(), Some("Montréal"));
        assert_eq!(result.addresses[1].postal_code.as_deref(), Some("H2X 1K4"));
        assert_eq!(result.diagnostics.theme, Theme::Addresses);
        assert_eq!(result.diagnostics.missing_tiles, 0);
    }

    #[tokio::test]
    async fn extracts_points_from_wkb_geometry_column() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let path = engine.layout().region_path(Theme::Addresses, "QC");
        let inside = wkb_hex(&Geometry::Point(Point::new(-73.56, 45.51)));
        let outside = wkb_hex(&Geometry::Point(Point::new(-73.70, 45.51)));
        write_table(
            Path::new(&path),
            &format!(
                "CREATE TABLE fx AS SELECT * FROM (VALUES
                    ('g1', from_hex('{inside}'), '100', 'Boulevard Saint-Laurent', 'bld-1'),
                    ('g2', from_hex('{outside}'), '3', 'Rue Ontario', NULL),
                    ('g3', from_hex('0101'), '4', 'Rue Ontario', NULL)
                ) t(gers_id, geometry, house_number, street_name, building_id)"
            ),
        );

        let result = engine.extract_addresses(request()).await.unwrap();
        assert_eq!(result.addresses.len(), 1);
        let address = &result.addresses[0];
        assert_eq!(address.id, "g1");
        assert!((address.lon - -73.56).abs() < 1e-12);
        assert_eq!(address.building_ref.as_deref(), Some("bld-1"));
        assert_eq!(result.diagnostics.skipped_geometries, 1);
    }

    #[tokio::test]
    async fn missing_address_partition_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = engine(dir.path()).extract_addresses(request()).await.unwrap();
        assert!(result.addresses.is_empty());
        assert_eq!(result.diagnostics.missing_tiles, 1);
    }

    #[tokio::test]
    async fn unsupported_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        write_table(
            Path::new(&engine.layout().region_path(Theme::Addresses, "QC")),
            "CREATE TABLE fx AS SELECT 'x1' AS id, 'Rue Peel' AS street",
        );
        let err = engine.extract_addresses(request()).await.unwrap_err();
        assert!(matches!(err, ExtractError::Schema { .. }));
    }
}
