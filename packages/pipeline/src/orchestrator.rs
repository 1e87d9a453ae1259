//! The pipeline object shared by the API server and the CLI.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use canvass_database::DbError;
use canvass_database::{links, snapshots};
use canvass_extract::{
    PartitionReport, PartitionRequest, PartitionTarget, Partitioner, QueryEngine, QuerySession,
    SessionConfig, ThemeRequest,
};
use canvass_geometry::metric::footprint_distance_m;
use canvass_linker::{Linker, review_queue, summarize};
use canvass_linker_models::{LinkerConfig, Match, Orphan, OrphanStatus, QualitySummary};
use canvass_region::{RegionDefinition, RegionLookupError, find_region, select_region};
use canvass_snapshot::{SnapshotInput, SnapshotWriter, ThemeOutput};
use canvass_storage::ObjectStore;
use canvass_territory_models::{
    SnapshotMetadata, TerritoryPolygon, Theme, ThemeLimits, TileCoord,
};
use canvass_tiles::cache::DEFAULT_MAX_ENTRIES;
use canvass_tiles::{PartitionLayout, TileExistenceCache, TileGrid, TileProbe};
use duckdb::Connection;
use futures::future::try_join_all;

use crate::progress::ProgressCallback;
use crate::recorder::DuckDbRecorder;
use crate::{PipelineConfig, PipelineError};

/// One snapshot generation request.
#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    /// Owning campaign; also the idempotency key.
    pub campaign_id: String,
    /// Explicit region code, or `None` to resolve from the territory.
    pub region: Option<String>,
    /// Validated territory.
    pub polygon: TerritoryPolygon,
    /// Per-theme caps.
    pub limits: ThemeLimits,
    /// Include the roads theme.
    pub include_roads: bool,
    /// Include the divisions theme.
    pub include_divisions: bool,
}

impl SnapshotRequest {
    /// Themes the snapshot reads. Buildings and addresses are always
    /// included.
    #[must_use]
    pub fn themes(&self) -> Vec<Theme> {
        let mut themes = vec![Theme::Buildings];
        if self.include_roads {
            themes.push(Theme::Roads);
        }
        if self.include_divisions {
            themes.push(Theme::Divisions);
        }
        themes.push(Theme::Addresses);
        themes
    }
}

/// Resolved region and covering tiles for a request.
#[derive(Debug, Clone)]
pub struct SnapshotPlan {
    /// Region whose partitions are read.
    pub region: RegionDefinition,
    /// Covering tiles per theme; `None` for grid-less themes.
    pub themes: Vec<(Theme, Option<BTreeSet<TileCoord>>)>,
}

/// Result of a linking pass.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRun {
    /// Matches computed in this pass.
    pub computed_matches: usize,
    /// Review rows written in this pass.
    pub review_rows: usize,
    /// Addresses left to their manual override.
    pub manual: usize,
    /// Summary over every stored match and open review row.
    pub summary: QualitySummary,
}

/// Owns the query session, the snapshot writer and the campaign database.
pub struct Pipeline {
    config: PipelineConfig,
    session: Arc<QuerySession>,
    engine: QueryEngine,
    partitioner: Partitioner,
    writer: SnapshotWriter,
    db: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .field("writer", &self.writer)
            .finish_non_exhaustive()
    }
}

fn validate_campaign_id(campaign_id: &str) -> Result<(), PipelineError> {
    if campaign_id.is_empty()
        || !campaign_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(PipelineError::InvalidRequest(format!(
            "campaign id must be non-empty ASCII letters, digits, '-' or '_': {campaign_id:?}"
        )));
    }
    Ok(())
}

fn linker_config(region: &str) -> LinkerConfig {
    find_region(region).map_or_else(
        || {
            log::warn!("Unknown region {region}, using default linker settings");
            LinkerConfig::default()
        },
        |r| r.linker,
    )
}

impl Pipeline {
    /// Assembles a pipeline from its parts.
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        session: Arc<QuerySession>,
        probe: Arc<dyn TileProbe>,
        store: Arc<dyn ObjectStore>,
        db: Connection,
    ) -> Self {
        let cache = Arc::new(TileExistenceCache::new(
            config.tile_cache_ttl,
            DEFAULT_MAX_ENTRIES,
        ));
        let layout = PartitionLayout::new(config.data_root.clone(), config.release.clone());
        let partitioner = Partitioner::new(Arc::clone(&session), layout.clone(), Arc::clone(&probe));
        let engine = QueryEngine::new(Arc::clone(&session), layout, cache, probe)
            .with_max_in_flight(config.probe_concurrency);
        let writer = SnapshotWriter::new(store)
            .with_url_ttl(config.url_ttl)
            .with_retention(chrono::Duration::days(config.retention_days));
        Self {
            config,
            session,
            engine,
            partitioner,
            writer,
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Builds a pipeline from environment configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the object store or database cannot be
    /// opened.
    pub fn from_env() -> Result<Self, PipelineError> {
        let config = PipelineConfig::from_env();
        let session = Arc::new(QuerySession::new(SessionConfig::from_env()));
        let probe = crate::probe::probe_for_root(&config.data_root)?;
        let store = canvass_storage::store_from_env()?;
        let db = canvass_database::open_default()?;
        log::info!(
            "Pipeline ready: partitions at {} (release {}), snapshots at {}",
            config.data_root,
            config.release,
            store.url_prefix()
        );
        Ok(Self::new(config, session, probe, store, db))
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The query session owned by this pipeline.
    #[must_use]
    pub const fn session(&self) -> &Arc<QuerySession> {
        &self.session
    }

    async fn with_db<T, F>(&self, op: F) -> Result<T, PipelineError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, DbError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = db.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            op(&mut conn)
        })
        .await??;
        Ok(result)
    }

    // ── Snapshots ────────────────────────────────────────────────

    /// Resolves the region and the covering tiles of every theme.
    ///
    /// Runs before any read or write, so an over-budget territory fails
    /// without touching storage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Region`] if no region applies and
    /// [`PipelineError::Coverage`] if any theme exceeds the tile budget.
    pub fn plan(&self, request: &SnapshotRequest) -> Result<SnapshotPlan, PipelineError> {
        let region = select_region(request.region.as_deref(), &request.polygon.bbox())?;
        let mut themes = Vec::new();
        for theme in request.themes() {
            let tiles = match region.layout(theme).tile_deg {
                Some(tile_deg) => Some(
                    TileGrid::new(tile_deg)
                        .with_ring(self.config.ring)
                        .covering_tiles(&request.polygon, self.config.max_tiles)?,
                ),
                None => None,
            };
            themes.push((theme, tiles));
        }
        Ok(SnapshotPlan { region, themes })
    }

    /// Extracts every requested theme for the territory, writes the
    /// artifacts and records the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] for invalid input, an over-budget
    /// territory, a query or storage failure, a failed metadata upsert, or
    /// when the configured timeout elapses.
    pub async fn generate_snapshot(
        &self,
        request: SnapshotRequest,
        progress: &dyn ProgressCallback,
    ) -> Result<SnapshotMetadata, PipelineError> {
        validate_campaign_id(&request.campaign_id)?;
        let timeout = self.config.timeout;
        tokio::time::timeout(timeout, self.generate(request, progress))
            .await
            .map_err(|_| PipelineError::Timeout {
                secs: timeout.as_secs(),
            })?
    }

    async fn generate(
        &self,
        request: SnapshotRequest,
        progress: &dyn ProgressCallback,
    ) -> Result<SnapshotMetadata, PipelineError> {
        progress.set_message(format!("Planning tiles for campaign {}", request.campaign_id));
        let plan = self.plan(&request)?;
        let code = plan.region.code.clone();
        progress.set_total(plan.themes.len() as u64 + 1);
        progress.set_message(format!("Querying {} themes in {code}", plan.themes.len()));

        let theme_request = |theme: Theme, tiles: Option<BTreeSet<TileCoord>>| ThemeRequest {
            theme,
            region: code.clone(),
            tiles,
            polygon: request.polygon.clone(),
            limit: request.limits.for_theme(theme),
        };

        let feature_queries = plan
            .themes
            .iter()
            .filter(|(theme, _)| *theme != Theme::Addresses)
            .map(|(theme, tiles)| {
                let query = theme_request(*theme, tiles.clone());
                async move {
                    let result = self.engine.query_theme(query).await;
                    progress.inc(1);
                    result.map(|r| ThemeOutput {
                        theme: r.diagnostics.theme,
                        features: r.features,
                        diagnostics: r.diagnostics,
                    })
                }
            });
        let address_tiles = plan
            .themes
            .iter()
            .find(|(theme, _)| *theme == Theme::Addresses)
            .and_then(|(_, tiles)| tiles.clone());
        let address_query = theme_request(Theme::Addresses, address_tiles);

        let (themes, addresses) = tokio::try_join!(
            async { try_join_all(feature_queries).await.map_err(PipelineError::from) },
            async {
                let result = self.engine.extract_addresses(address_query).await;
                progress.inc(1);
                result.map_err(PipelineError::from)
            },
        )?;

        progress.set_message("Writing snapshot".to_string());
        let input = SnapshotInput {
            campaign_id: request.campaign_id.clone(),
            region: code,
            release: self.config.release.clone(),
            polygon: request.polygon,
            themes,
            addresses: addresses.addresses,
            address_diagnostics: addresses.diagnostics,
        };
        let recorder = DuckDbRecorder::new(Arc::clone(&self.db));
        let meta = self.writer.write(input, &recorder).await?;
        progress.inc(1);
        progress.finish(format!(
            "Snapshot for {}: {} buildings, {} addresses",
            meta.campaign_id,
            meta.count(Theme::Buildings),
            meta.count(Theme::Addresses)
        ));
        Ok(meta)
    }

    /// Stored snapshot metadata with freshly signed URLs.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Db`] with [`DbError::NotFound`] if the
    /// campaign has no snapshot.
    pub async fn get_snapshot(&self, campaign_id: &str) -> Result<SnapshotMetadata, PipelineError> {
        let id = campaign_id.to_string();
        let meta = self
            .with_db(move |conn| {
                snapshots::get_snapshot(conn, &id)?
                    .ok_or_else(|| DbError::NotFound(format!("snapshot for campaign {id}")))
            })
            .await?;
        Ok(self.writer.refresh_urls(meta).await?)
    }

    /// Deletes expired snapshots: stored objects first, then the records.
    ///
    /// Returns the number of snapshots removed.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if listing, deleting, or the database
    /// fails. Snapshots purged before the failure stay purged.
    pub async fn purge_expired(&self) -> Result<usize, PipelineError> {
        let now = chrono::Utc::now();
        let expired = self
            .with_db(move |conn| snapshots::list_expired(conn, now))
            .await?;

        for meta in &expired {
            let objects = self.writer.delete_artifacts(&meta.prefix).await?;
            let id = meta.campaign_id.clone();
            self.with_db(move |conn| snapshots::delete_snapshot(conn, &id))
                .await?;
            log::info!(
                "Purged snapshot for campaign {} ({objects} objects, expired {})",
                meta.campaign_id,
                meta.expires_at
            );
        }
        Ok(expired.len())
    }

    // ── Partitioning ─────────────────────────────────────────────

    /// Builds a partitioning request for one theme of a configured region,
    /// using the region's bounds and tile size.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Region`] for an unknown region and
    /// [`PipelineError::InvalidRequest`] when no source is given.
    pub fn partition_request(
        &self,
        region: &str,
        theme: Theme,
        sources: Vec<String>,
        overwrite: bool,
    ) -> Result<PartitionRequest, PipelineError> {
        let definition = find_region(region)
            .ok_or_else(|| RegionLookupError::Unknown(region.to_string()))?;
        if sources.is_empty() {
            return Err(PipelineError::InvalidRequest(
                "at least one source file is required".to_string(),
            ));
        }
        Ok(PartitionRequest {
            theme,
            region: definition.code.clone(),
            bounds: definition.bounds(),
            tile_deg: definition.layout(theme).tile_deg,
            sources,
            overwrite,
        })
    }

    /// Partitions a request would write, with row counts. Writes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Extract`] if the sources cannot be read.
    pub async fn plan_partition(
        &self,
        request: &PartitionRequest,
    ) -> Result<Vec<PartitionTarget>, PipelineError> {
        Ok(self.partitioner.plan(request).await?)
    }

    /// Writes source files into the partition store and forgets cached
    /// existence answers for every partition written.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Extract`] if reading or writing fails.
    pub async fn partition(&self, request: PartitionRequest) -> Result<PartitionReport, PipelineError> {
        let report = self.partitioner.partition(request).await?;
        self.engine.cache().invalidate(&report.written);
        Ok(report)
    }

    // ── Linking ──────────────────────────────────────────────────

    /// Links every address of a campaign's snapshot to its buildings and
    /// commits the result in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the campaign has no snapshot, the
    /// region's linker settings are invalid, or the database fails.
    pub async fn run_linking(&self, campaign_id: &str) -> Result<LinkRun, PipelineError> {
        let id = campaign_id.to_string();
        let (meta, buildings, addresses, overrides) = self
            .with_db(move |conn| {
                let meta = snapshots::get_snapshot(conn, &id)?
                    .ok_or_else(|| DbError::NotFound(format!("snapshot for campaign {id}")))?;
                let buildings = snapshots::load_buildings(conn, &id)?;
                let addresses = snapshots::load_addresses(conn, &id)?;
                let overrides = links::manual_overrides(conn, &id)?;
                Ok((meta, buildings, addresses, overrides))
            })
            .await?;

        let linker = Linker::new(linker_config(&meta.region))?;
        let outcome = tokio::task::spawn_blocking(move || {
            linker.link_campaign(buildings, &addresses, &overrides)
        })
        .await?;

        let id = campaign_id.to_string();
        let computed_matches = outcome.matches.len();
        let review_rows = outcome.orphans.len();
        let manual = outcome.manual;
        let (matches, orphans) = self
            .with_db(move |conn| {
                links::commit_link_run(conn, &id, &outcome.matches, &outcome.orphans)?;
                Ok((
                    links::load_matches(conn, &id)?,
                    links::load_orphans(conn, &id, &OrphanStatus::REVIEWABLE)?,
                ))
            })
            .await?;

        Ok(LinkRun {
            computed_matches,
            review_rows,
            manual,
            summary: summarize(&matches, &orphans),
        })
    }

    /// Stored matches and their quality summary.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Db`] if the database fails.
    pub async fn matches(
        &self,
        campaign_id: &str,
    ) -> Result<(Vec<Match>, QualitySummary), PipelineError> {
        let id = campaign_id.to_string();
        let (matches, orphans) = self
            .with_db(move |conn| {
                Ok((
                    links::load_matches(conn, &id)?,
                    links::load_orphans(conn, &id, &OrphanStatus::REVIEWABLE)?,
                ))
            })
            .await?;
        let summary = summarize(&matches, &orphans);
        Ok((matches, summary))
    }

    /// Open review rows, nearest first.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Db`] if the database fails.
    pub async fn review_queue(&self, campaign_id: &str) -> Result<Vec<Orphan>, PipelineError> {
        let id = campaign_id.to_string();
        let orphans = self
            .with_db(move |conn| links::load_orphans(conn, &id, &OrphanStatus::REVIEWABLE))
            .await?;
        Ok(review_queue(&orphans))
    }

    /// Records a reviewer's decision for one address.
    ///
    /// `building_id = None` records that the address has no building. The
    /// decision survives later linking passes.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Db`] with [`DbError::NotFound`] if the
    /// address or building is not part of the campaign dataset.
    pub async fn set_manual_override(
        &self,
        campaign_id: &str,
        address_id: &str,
        building_id: Option<String>,
    ) -> Result<Match, PipelineError> {
        let id = campaign_id.to_string();
        let address_id = address_id.to_string();
        self.with_db(move |conn| {
            let address = snapshots::load_addresses(conn, &id)?
                .into_iter()
                .find(|a| a.id == address_id)
                .ok_or_else(|| {
                    DbError::NotFound(format!("address {address_id} in campaign {id}"))
                })?;
            let distance_m = match building_id.as_deref() {
                Some(building_id) => {
                    let building = snapshots::load_buildings(conn, &id)?
                        .into_iter()
                        .find(|b| b.id == building_id)
                        .ok_or_else(|| {
                            DbError::NotFound(format!("building {building_id} in campaign {id}"))
                        })?;
                    footprint_distance_m(address.lon, address.lat, &building.footprint)
                }
                None => 0.0,
            };
            links::set_manual_override(conn, &id, &address_id, building_id.as_deref(), distance_m)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use canvass_linker_models::MatchTier;
    use canvass_storage::MemoryStore;
    use canvass_tiles::{LocalProbe, TileError};
    use geo::{Geometry, polygon};

    use super::*;
    use crate::progress::NullProgress;

    fn pipeline(root: &Path, store: Arc<MemoryStore>, max_tiles: usize) -> Pipeline {
        let config = PipelineConfig {
            data_root: root.to_string_lossy().into_owned(),
            release: "r1".to_string(),
            max_tiles,
            ..PipelineConfig::default()
        };
        Pipeline::new(
            config,
            Arc::new(QuerySession::new(SessionConfig::default())),
            Arc::new(LocalProbe),
            store,
            canvass_database::open_in_memory().unwrap(),
        )
    }

    fn request(polygon: TerritoryPolygon) -> SnapshotRequest {
        SnapshotRequest {
            campaign_id: "c1".into(),
            region: Some("ON".into()),
            polygon,
            limits: ThemeLimits::default(),
            include_roads: false,
            include_divisions: false,
        }
    }

    fn rect(west: f64, south: f64, east: f64, north: f64) -> TerritoryPolygon {
        TerritoryPolygon::new(vec![
            (west, south),
            (east, south),
            (east, north),
            (west, north),
            (west, south),
        ])
        .unwrap()
    }

    fn footprint(west: f64, south: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: west, y: south),
            (x: west + 0.0001, y: south),
            (x: west + 0.0001, y: south + 0.0001),
            (x: west, y: south + 0.0001),
            (x: west, y: south),
        ])
    }

    fn copy_to_parquet(conn: &Connection, path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        conn.execute_batch(&format!(
            "COPY fx TO '{}' (FORMAT PARQUET)",
            path.to_string_lossy().replace('\'', "''")
        ))
        .unwrap();
    }

    /// Three buildings, all in one Toronto tile.
    fn write_buildings(path: &Path) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE fx (gers_id VARCHAR, geometry BLOB, xmin DOUBLE, xmax DOUBLE, \
             ymin DOUBLE, ymax DOUBLE, house_number VARCHAR, street_name VARCHAR)",
        )
        .unwrap();
        for (id, west, street) in [
            ("b1", -79.4000, None),
            ("b2", -79.3990, None),
            ("b3", -79.3980, Some("Queen St E")),
        ] {
            let wkb = canvass_geometry::wkb::write_wkb(&footprint(west, 43.65));
            conn.execute(
                "INSERT INTO fx VALUES (?, ?, ?, ?, ?, ?, NULL, ?)",
                duckdb::params![id, wkb, west, west + 0.0001, 43.65, 43.6501, street],
            )
            .unwrap();
        }
        copy_to_parquet(&conn, path);
    }

    /// [`write_buildings`] in their tile plus five addresses in the
    /// region-wide address file.
    fn write_fixtures(root: &Path) {
        let layout = PartitionLayout::new(root.to_string_lossy(), "r1");
        let tile = TileGrid::new(0.25).tile_of(-79.3995, 43.65);
        write_buildings(Path::new(&layout.tile_path(Theme::Buildings, "ON", tile)));

        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE fx (id VARCHAR, lon DOUBLE, lat DOUBLE, house_number VARCHAR, \
             street VARCHAR)",
        )
        .unwrap();
        let far_north = 43.6501 + 200.0 / 111_194.9;
        for (id, lon, lat, street) in [
            ("a1", -79.39995, 43.65005, None),
            ("a2", -79.39895, 43.65005, None),
            ("a3", -79.39795, 43.65005, None),
            ("a4", -79.3978, 43.65005, Some("Queen Street East")),
            ("a5", -79.39995, far_north, None),
        ] {
            conn.execute(
                "INSERT INTO fx VALUES (?, ?, ?, NULL, ?)",
                duckdb::params![id, lon, lat, street],
            )
            .unwrap();
        }
        copy_to_parquet(
            &conn,
            Path::new(&layout.region_path(Theme::Addresses, "ON")),
        );
    }

    #[tokio::test]
    async fn partitioned_source_is_visible_after_a_cached_miss() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let source = dir.path().join("source").join("buildings.parquet");
        write_buildings(&source);
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(&root, store, 400);
        let territory = rect(-79.401, 43.649, -79.397, 43.651);
        let building_count = |meta: &SnapshotMetadata| {
            meta.artifacts
                .iter()
                .find(|a| a.theme == Theme::Buildings)
                .map(|a| a.count)
        };

        let before = pipeline
            .generate_snapshot(request(territory.clone()), &NullProgress)
            .await
            .unwrap();
        assert_eq!(building_count(&before), Some(0));

        let partition = pipeline
            .partition_request("ON", Theme::Buildings, vec![source.to_string_lossy().into_owned()], false)
            .unwrap();
        let plan = pipeline.plan_partition(&partition).await.unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].rows, 3);
        let report = pipeline.partition(partition).await.unwrap();
        assert_eq!(report.written, vec![plan[0].path.clone()]);

        let after = pipeline
            .generate_snapshot(request(territory), &NullProgress)
            .await
            .unwrap();
        assert_eq!(building_count(&after), Some(3));
    }

    #[test]
    fn partition_request_uses_region_grid() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), Arc::new(MemoryStore::new()), 400);

        let request = pipeline
            .partition_request("ON", Theme::Buildings, vec!["a.parquet".into()], true)
            .unwrap();
        assert_eq!(request.tile_deg, Some(0.25));
        assert!(request.overwrite);

        assert!(matches!(
            pipeline.partition_request("ZZ", Theme::Buildings, vec!["a.parquet".into()], false),
            Err(PipelineError::Region(RegionLookupError::Unknown(_)))
        ));
        assert!(matches!(
            pipeline.partition_request("ON", Theme::Buildings, Vec::new(), false),
            Err(PipelineError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn over_budget_territory_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(dir.path(), Arc::clone(&store), 400);

        let err = pipeline
            .generate_snapshot(request(rect(-90.0, 46.0, -84.5, 51.0)), &NullProgress)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Coverage(TileError::CoverageTooLarge { max: 400, .. })
        ));
        assert_eq!(store.put_count(), 0);
        assert!(matches!(
            pipeline.get_snapshot("c1").await,
            Err(PipelineError::Db(DbError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn rejects_unsafe_campaign_ids() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), Arc::new(MemoryStore::new()), 400);
        let mut req = request(rect(-79.401, 43.649, -79.396, 43.653));
        req.campaign_id = "../etc".into();
        assert!(matches!(
            pipeline.generate_snapshot(req, &NullProgress).await,
            Err(PipelineError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn snapshot_then_link_then_override() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(dir.path(), Arc::clone(&store), 400);

        let meta = pipeline
            .generate_snapshot(request(rect(-79.401, 43.649, -79.396, 43.653)), &NullProgress)
            .await
            .unwrap();
        assert_eq!(meta.region, "ON");
        assert_eq!(meta.release, "r1");
        assert_eq!(meta.count(Theme::Buildings), 3);
        assert_eq!(meta.count(Theme::Addresses), 5);
        assert_eq!(store.put_count(), 2);

        let buildings = meta
            .diagnostics
            .iter()
            .find(|d| d.theme == Theme::Buildings)
            .unwrap();
        assert_eq!(buildings.requested_tiles, 9);
        assert_eq!(buildings.scanned_tiles, 1);
        assert_eq!(buildings.missing_tiles, 8);

        let run = pipeline.run_linking("c1").await.unwrap();
        assert_eq!(run.summary.containment_verified, 3);
        assert_eq!(run.summary.proximity_verified, 1);
        assert_eq!(run.summary.orphan, 1);
        assert_eq!(run.summary.total, 5);

        let queue = pipeline.review_queue("c1").await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].address_id, "a5");
        assert!(queue[0].nearest_distance_m.unwrap() > 50.0);

        let manual = pipeline
            .set_manual_override("c1", "a5", Some("b1".into()))
            .await
            .unwrap();
        assert_eq!(manual.tier, MatchTier::Manual);
        assert!((manual.confidence - 1.0).abs() < f64::EPSILON);
        assert!(pipeline.review_queue("c1").await.unwrap().is_empty());

        let rerun = pipeline.run_linking("c1").await.unwrap();
        assert_eq!(rerun.manual, 1);
        assert_eq!(rerun.summary.manual, 1);
        assert_eq!(rerun.summary.orphan, 0);
        assert_eq!(rerun.summary.total, 5);
        let (matches, _) = pipeline.matches("c1").await.unwrap();
        let a5 = matches.iter().find(|m| m.address_id == "a5").unwrap();
        assert_eq!(a5.tier, MatchTier::Manual);
        assert_eq!(a5.building_id.as_deref(), Some("b1"));

        // Regenerating keeps created_at and the key set.
        let keys = store.keys();
        let again = pipeline
            .generate_snapshot(request(rect(-79.401, 43.649, -79.396, 43.653)), &NullProgress)
            .await
            .unwrap();
        assert_eq!(again.created_at, meta.created_at);
        assert_eq!(store.keys(), keys);
    }

    #[tokio::test]
    async fn unknown_address_override_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let pipeline = pipeline(dir.path(), Arc::new(MemoryStore::new()), 400);
        pipeline
            .generate_snapshot(request(rect(-79.401, 43.649, -79.396, 43.653)), &NullProgress)
            .await
            .unwrap();

        let err = pipeline
            .set_manual_override("c1", "nope", None)
            .await
            .unwrap_err();
        assert_eq!(err.class(), crate::ErrorClass::NotFound);
    }
}
