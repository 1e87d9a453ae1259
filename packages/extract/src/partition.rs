//! Splitting source feature files into the tile-partitioned store.
//!
//! Source rows are kept when their extent overlaps the region bounds and
//! are assigned to the tile holding the centre of that extent:
//! `tile_x = floor(((xmin + xmax) / 2 + 180) / tile_deg)` and
//! `tile_y = floor(((ymin + ymax) / 2 + 90) / tile_deg)`. Each tile becomes
//! one `data.parquet` at [`PartitionLayout::tile_path`], rows ordered by
//! id. Grid-less themes are written as a single region partition.

use std::sync::Arc;
use std::time::Instant;

use canvass_territory_models::{BoundingBox, Theme, TileCoord};
use canvass_tiles::{PartitionLayout, TileProbe};
use duckdb::Connection;

use crate::schema::{self, ColumnInfo};
use crate::sql::{self, ExtentColumns};
use crate::{ExtractError, QuerySession};

const TILE_X: &str = "__canvass_tile_x";
const TILE_Y: &str = "__canvass_tile_y";
const STAGING_TABLE: &str = "__canvass_partition_rows";

/// One theme of one region to partition.
#[derive(Debug, Clone)]
pub struct PartitionRequest {
    /// Theme being written.
    pub theme: Theme,
    /// Region code used in the partition paths.
    pub region: String,
    /// Region bounds; rows whose extent misses them are dropped.
    pub bounds: BoundingBox,
    /// Tile size, or `None` for a grid-less theme.
    pub tile_deg: Option<f64>,
    /// Source Parquet files or globs.
    pub sources: Vec<String>,
    /// Rewrite partitions that already exist.
    pub overwrite: bool,
}

/// A partition file the request would produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTarget {
    /// Tile, or `None` for the region partition of a grid-less theme.
    pub tile: Option<TileCoord>,
    /// Destination path.
    pub path: String,
    /// Rows that land in it.
    pub rows: u64,
}

/// What a partitioning run wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionReport {
    /// Rows written.
    pub rows: u64,
    /// Partitions written.
    pub written: Vec<String>,
    /// Partitions left alone because they already existed.
    pub skipped: Vec<String>,
    /// Wall-clock duration.
    pub elapsed_ms: u64,
}

/// Writes source files into the partition layout.
pub struct Partitioner {
    session: Arc<QuerySession>,
    layout: PartitionLayout,
    probe: Arc<dyn TileProbe>,
}

impl std::fmt::Debug for Partitioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partitioner")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl Partitioner {
    /// Creates a partitioner writing under `layout`.
    ///
    /// `probe` decides whether a partition already exists.
    #[must_use]
    pub fn new(
        session: Arc<QuerySession>,
        layout: PartitionLayout,
        probe: Arc<dyn TileProbe>,
    ) -> Self {
        Self {
            session,
            layout,
            probe,
        }
    }

    /// Computes the partitions a request would write and their row counts,
    /// reading the sources but writing nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] if the sources cannot be read or carry no
    /// extent or id columns.
    pub async fn plan(&self, request: &PartitionRequest) -> Result<Vec<PartitionTarget>, ExtractError> {
        let session = Arc::clone(&self.session);
        let req = request.clone();
        let counts = tokio::task::spawn_blocking(move || {
            session.with_retry(|conn| count_tiles(conn, &req))
        })
        .await??;

        Ok(counts
            .into_iter()
            .map(|(tile, rows)| PartitionTarget {
                tile,
                path: self.target_path(request, tile),
                rows,
            })
            .collect())
    }

    /// Partitions the sources, skipping existing partitions unless the
    /// request asks to overwrite them.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] if the sources cannot be read, an existence
    /// check fails, or a partition cannot be written.
    pub async fn partition(&self, request: PartitionRequest) -> Result<PartitionReport, ExtractError> {
        let start = Instant::now();
        let targets = self.plan(&request).await?;

        let mut report = PartitionReport::default();
        let mut pending = Vec::new();
        for target in targets {
            if !request.overwrite && self.probe.exists(&target.path).await? {
                log::debug!("Partition {} exists, skipping", target.path);
                report.skipped.push(target.path);
            } else {
                pending.push(target);
            }
        }

        if !pending.is_empty() {
            let session = Arc::clone(&self.session);
            let req = request.clone();
            let jobs = pending.clone();
            tokio::task::spawn_blocking(move || {
                session.with_retry(|conn| write_targets(conn, &req, &jobs))
            })
            .await??;
        }

        report.rows = pending.iter().map(|t| t.rows).sum();
        report.written = pending.into_iter().map(|t| t.path).collect();
        report.elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        log::info!(
            "{} {}: wrote {} rows into {} partitions ({} existing skipped) in {}ms",
            request.region,
            request.theme,
            report.rows,
            report.written.len(),
            report.skipped.len(),
            report.elapsed_ms,
        );
        Ok(report)
    }

    fn target_path(&self, request: &PartitionRequest, tile: Option<TileCoord>) -> String {
        match tile {
            Some(tile) => self.layout.tile_path(request.theme, &request.region, tile),
            None => self.layout.region_path(request.theme, &request.region),
        }
    }
}

/// Source columns needed to partition.
struct SourceShape {
    extent: ExtentColumns,
    id: String,
}

fn source_shape(conn: &Connection, request: &PartitionRequest) -> Result<SourceShape, ExtractError> {
    let columns: Vec<ColumnInfo> = schema::describe(conn, &request.sources)?;
    let schema_error = |message: &str| ExtractError::Schema {
        theme: request.theme.to_string(),
        path: request.sources.first().cloned().unwrap_or_default(),
        message: message.to_string(),
    };
    let extent = schema::detect_extent(&columns)
        .ok_or_else(|| schema_error("no xmin/xmax/ymin/ymax or bbox extent columns"))?;
    let id = schema::find_column(&columns, &["gers_id", "id"])
        .ok_or_else(|| schema_error("no gers_id or id column"))?;
    Ok(SourceShape {
        extent,
        id: sql::ident(&id.name),
    })
}

/// `SELECT` over the sources with tile columns attached and the region
/// filter applied.
fn tiled_rows(request: &PartitionRequest, shape: &SourceShape) -> String {
    let e = &shape.extent;
    let tiles = request.tile_deg.map_or_else(String::new, |deg| {
        format!(
            ", CAST(FLOOR((({xmin} + {xmax}) / 2.0 + 180.0) / {deg}) AS INTEGER) AS {TILE_X}, \
             CAST(FLOOR((({ymin} + {ymax}) / 2.0 + 90.0) / {deg}) AS INTEGER) AS {TILE_Y}",
            xmin = e.xmin,
            xmax = e.xmax,
            ymin = e.ymin,
            ymax = e.ymax,
        )
    });
    format!(
        "SELECT *{tiles} FROM {} {}",
        sql::read_parquet(&request.sources),
        sql::where_clause(&[sql::overlap_filter(e, &request.bounds)]),
    )
}

fn count_tiles(
    conn: &Connection,
    request: &PartitionRequest,
) -> Result<Vec<(Option<TileCoord>, u64)>, ExtractError> {
    let shape = source_shape(conn, request)?;
    let rows = tiled_rows(request, &shape);

    if request.tile_deg.is_none() {
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM ({rows})"), [], |r| r.get(0))?;
        return Ok(if count > 0 {
            vec![(None, count.unsigned_abs())]
        } else {
            Vec::new()
        });
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT {TILE_Y}, {TILE_X}, COUNT(*) FROM ({rows}) \
         GROUP BY {TILE_Y}, {TILE_X} ORDER BY {TILE_Y}, {TILE_X}"
    ))?;
    let counts = stmt.query_map([], |row| {
        let y: i32 = row.get(0)?;
        let x: i32 = row.get(1)?;
        let count: i64 = row.get(2)?;
        Ok((Some(TileCoord::new(x, y)), count.unsigned_abs()))
    })?;
    Ok(counts.collect::<Result<Vec<_>, _>>()?)
}

fn write_targets(
    conn: &Connection,
    request: &PartitionRequest,
    targets: &[PartitionTarget],
) -> Result<(), ExtractError> {
    let shape = source_shape(conn, request)?;
    conn.execute_batch(&format!(
        "CREATE OR REPLACE TEMP TABLE {STAGING_TABLE} AS {}",
        tiled_rows(request, &shape)
    ))?;

    let result = targets.iter().try_for_each(|target| -> Result<(), ExtractError> {
        if !target.path.contains("://")
            && let Some(parent) = std::path::Path::new(&target.path).parent()
        {
            std::fs::create_dir_all(parent)?;
        }
        let select = match target.tile {
            Some(tile) => format!(
                "SELECT * EXCLUDE ({TILE_X}, {TILE_Y}) FROM {STAGING_TABLE} \
                 WHERE {TILE_Y} = {} AND {TILE_X} = {} ORDER BY {}",
                tile.y, tile.x, shape.id
            ),
            None => format!("SELECT * FROM {STAGING_TABLE} ORDER BY {}", shape.id),
        };
        conn.execute_batch(&format!(
            "COPY ({select}) TO {} (FORMAT PARQUET)",
            sql::quote(&target.path)
        ))?;
        log::debug!("Wrote {} rows to {}", target.rows, target.path);
        Ok(())
    });

    conn.execute_batch(&format!("DROP TABLE IF EXISTS {STAGING_TABLE}"))?;
    result
}
