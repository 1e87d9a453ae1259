//! Spatial theme queries over an explicit partition file list.
//!
//! A query never globs the store. The covering tiles are turned into a
//! candidate file list, paths already known to be missing are dropped, and
//! the rest are read in one scan. If the scan fails because a file is
//! absent, existence is resolved with bounded concurrent probes and the
//! scan is re-issued against the confirmed files only.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use canvass_territory_models::{Feature, ScanDiagnostics, TerritoryPolygon, Theme, TileCoord};
use canvass_tiles::{PartitionLayout, TileExistenceCache, TileProbe};
use duckdb::Connection;
use duckdb::types::Value;
use geo::Intersects;

use crate::schema::{self, ColumnInfo, GeometryColumn};
use crate::{ExtractError, FailureKind, QuerySession, sql};

/// Default number of existence probes in flight.
pub const DEFAULT_PROBE_CONCURRENCY: usize = 16;

/// Columns consumed by the query itself rather than copied to properties.
const RESERVED_COLUMNS: &[&str] = &["xmin", "xmax", "ymin", "ymax", "bbox"];

/// One theme query.
#[derive(Debug, Clone)]
pub struct ThemeRequest {
    /// Theme to read.
    pub theme: Theme,
    /// Region code the partitions belong to.
    pub region: String,
    /// Covering tiles, or `None` for a grid-less theme.
    pub tiles: Option<BTreeSet<TileCoord>>,
    /// Territory the features must intersect.
    pub polygon: TerritoryPolygon,
    /// Optional cap on returned features.
    pub limit: Option<usize>,
}

impl ThemeRequest {
    /// Candidate partition files for this request.
    #[must_use]
    pub fn candidate_paths(&self, layout: &PartitionLayout) -> Vec<String> {
        match &self.tiles {
            Some(tiles) => layout.tile_paths(self.theme, &self.region, tiles),
            None => vec![layout.region_path(self.theme, &self.region)],
        }
    }
}

/// Features returned by a theme query.
#[derive(Debug, Clone)]
pub struct ThemeResult {
    /// Features sorted by id, unique by id.
    pub features: Vec<Feature>,
    /// What the scan touched.
    pub diagnostics: ScanDiagnostics,
}

/// Outcome of a scan over existing partitions.
pub(crate) struct Scanned<T> {
    pub value: T,
    pub scanned: usize,
}

/// Runs theme and address queries against the partitioned store.
pub struct QueryEngine {
    session: Arc<QuerySession>,
    layout: PartitionLayout,
    cache: Arc<TileExistenceCache>,
    probe: Arc<dyn TileProbe>,
    max_in_flight: usize,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("layout", &self.layout)
            .field("max_in_flight", &self.max_in_flight)
            .finish_non_exhaustive()
    }
}

impl QueryEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(
        session: Arc<QuerySession>,
        layout: PartitionLayout,
        cache: Arc<TileExistenceCache>,
        probe: Arc<dyn TileProbe>,
    ) -> Self {
        Self {
            session,
            layout,
            cache,
            probe,
            max_in_flight: DEFAULT_PROBE_CONCURRENCY,
        }
    }

    /// Overrides the probe concurrency bound.
    #[must_use]
    pub const fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Partition layout in use.
    #[must_use]
    pub const fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    /// Shared existence cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<TileExistenceCache> {
        &self.cache
    }

    /// Reads every feature of one theme intersecting the territory.
    ///
    /// Missing partitions are not errors; they are counted in the
    /// diagnostics. Undecodable geometries are skipped and counted.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] if the scan fails for any reason other than
    /// missing partitions.
    pub async fn query_theme(&self, request: ThemeRequest) -> Result<ThemeResult, ExtractError> {
        let start = Instant::now();
        let candidates = request.candidate_paths(&self.layout);
        let mut diagnostics = ScanDiagnostics::new(request.theme);
        diagnostics.requested_tiles = candidates.len();

        let theme = request.theme;
        let polygon = request.polygon.clone();
        let spatial = self.session.config().has_spatial();
        let scanned = self
            .scan_partitions(candidates, move |conn, files| {
                scan_features(conn, files, theme, &polygon, spatial)
            })
            .await?;

        let mut features = Vec::new();
        if let Some(Scanned { value, scanned }) = scanned {
            diagnostics.scanned_tiles = scanned;
            diagnostics.rows_read = value.rows_read;
            diagnostics.skipped_geometries = value.skipped;
            features = value.features;
        }
        diagnostics.missing_tiles = diagnostics.requested_tiles - diagnostics.scanned_tiles;

        if let Some(limit) = request.limit
            && features.len() > limit
        {
            features.truncate(limit);
            diagnostics.truncated = true;
        }
        diagnostics.features = features.len();
        diagnostics.elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        log::info!(
            "{} {}: {} features from {}/{} partitions ({} rows, {} skipped) in {}ms",
            request.region,
            request.theme,
            diagnostics.features,
            diagnostics.scanned_tiles,
            diagnostics.requested_tiles,
            diagnostics.rows_read,
            diagnostics.skipped_geometries,
            diagnostics.elapsed_ms,
        );

        Ok(ThemeResult {
            features,
            diagnostics,
        })
    }

    /// Scans the existing subset of `candidates`.
    ///
    /// Returns `None` when none of them exist.
    pub(crate) async fn scan_partitions<T, F>(
        &self,
        candidates: Vec<String>,
        scan: F,
    ) -> Result<Option<Scanned<T>>, ExtractError>
    where
        T: Send + 'static,
        F: Fn(&Connection, &[String]) -> Result<T, ExtractError> + Send + Sync + 'static,
    {
        let files: Vec<String> = candidates
            .into_iter()
            .filter(|p| self.cache.get(p) != Some(false))
            .collect();
        if files.is_empty() {
            return Ok(None);
        }

        let scan = Arc::new(scan);
        match self.blocking_scan(files.clone(), Arc::clone(&scan)).await {
            Ok(value) => {
                for path in &files {
                    self.cache.insert(path, true);
                }
                Ok(Some(Scanned {
                    value,
                    scanned: files.len(),
                }))
            }
            Err(e) if e.kind() == FailureKind::MissingFile => {
                log::debug!("Scan hit a missing partition, probing {} files: {e}", files.len());
                // Positive answers may predate a rewritten release.
                self.cache.invalidate(&files);
                let report = self
                    .cache
                    .probe_all(&files, self.probe.as_ref(), self.max_in_flight)
                    .await;
                if report.existing.is_empty() {
                    return Ok(None);
                }
                let scanned = report.existing.len();
                let value = self.blocking_scan(report.existing, scan).await?;
                Ok(Some(Scanned { value, scanned }))
            }
            Err(e) => Err(e),
        }
    }

    async fn blocking_scan<T, F>(&self, files: Vec<String>, scan: Arc<F>) -> Result<T, ExtractError>
    where
        T: Send + 'static,
        F: Fn(&Connection, &[String]) -> Result<T, ExtractError> + Send + Sync + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || session.with_retry(|conn| (*scan)(conn, &files))).await?
    }
}

struct FeatureScan {
    features: Vec<Feature>,
    rows_read: usize,
    skipped: usize,
}

fn scan_features(
    conn: &Connection,
    files: &[String],
    theme: Theme,
    polygon: &TerritoryPolygon,
    spatial: bool,
) -> Result<FeatureScan, ExtractError> {
    let columns = schema::describe(conn, files)?;
    let schema_error = |message: &str| ExtractError::Schema {
        theme: theme.to_string(),
        path: files.first().cloned().unwrap_or_default(),
        message: message.to_string(),
    };

    let id_column = schema::find_column(&columns, &["gers_id", "id"])
        .ok_or_else(|| schema_error("no id column"))?;
    let geometry = GeometryColumn::detect(&columns)
        .ok_or_else(|| schema_error("no readable geometry column"))?;
    let properties: Vec<&ColumnInfo> = columns
        .iter()
        .filter(|c| {
            c.name != id_column.name
                && c.name != geometry.name()
                && !RESERVED_COLUMNS.iter().any(|r| c.name.eq_ignore_ascii_case(r))
        })
        .collect();

    let mut select = vec![
        format!("CAST({} AS VARCHAR)", sql::ident(&id_column.name)),
        geometry.select_expr(),
    ];
    for column in &properties {
        if column.is_scalar() {
            select.push(sql::ident(&column.name));
        } else {
            select.push(format!("CAST({} AS VARCHAR)", sql::ident(&column.name)));
        }
    }

    let mut conditions: Vec<String> = schema::detect_extent(&columns)
        .map(|extent| sql::overlap_filter(&extent, &polygon.bbox()))
        .into_iter()
        .collect();
    if spatial && let Some(geom) = geometry.spatial_expr() {
        conditions.push(format!(
            "ST_Intersects({geom}, ST_GeomFromText({}))",
            sql::quote(&sql::polygon_wkt(polygon))
        ));
    }
    let filter = sql::where_clause(&conditions);
    let query = format!(
        "SELECT {} FROM {} {filter}",
        select.join(", "),
        sql::read_parquet(files)
    );

    let territory = polygon.to_polygon();
    let mut by_id: BTreeMap<String, Feature> = BTreeMap::new();
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
        let Some(encoding) = schema::geometry_encoding(row.get::<_, Value>(1)?) else {
            log::debug!("Skipping {theme} feature {id}: null geometry");
            skipped += 1;
            continue;
        };
        let decoded = match encoding.decode() {
            Ok(g) => g,
            Err(e) => {
                log::warn!("Skipping {theme} feature {id}: {} geometry: {e}", encoding.kind());
                skipped += 1;
                continue;
            }
        };
        if !territory.intersects(&decoded) || by_id.contains_key(&id) {
            continue;
        }

        let mut props = serde_json::Map::new();
        for (i, column) in properties.iter().enumerate() {
            if let Some(v) = schema::value_to_json(row.get::<_, Value>(i + 2)?) {
                props.insert(column.name.clone(), v);
            }
        }
        by_id.insert(
            id.clone(),
            Feature {
                id,
                theme,
                geometry: decoded,
                properties: props,
            },
        );
    }

    Ok(FeatureScan {
        features: by_id.into_values().collect(),
        rows_read,
        skipped,
    })
}
