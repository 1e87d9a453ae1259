//! Partition path layout of the feature store.
//!
//! Gridded themes live under
//! `{root}/{theme}/release={release}/region={code}/tile_y={y}/tile_x={x}/data.parquet`;
//! grid-less themes have one file per region at
//! `{root}/{theme}/release={release}/region={code}/data.parquet`.

use std::collections::BTreeSet;

use canvass_territory_models::{Theme, TileCoord};

/// File name inside every partition directory.
pub const PARTITION_FILE: &str = "data.parquet";

/// Resolves partition paths for one dataset release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLayout {
    root: String,
    release: String,
}

impl PartitionLayout {
    /// Layout rooted at a local directory or an `s3://bucket/prefix` URL.
    #[must_use]
    pub fn new(root: impl Into<String>, release: impl Into<String>) -> Self {
        let root: String = root.into();
        Self {
            root: root.trim_end_matches('/').to_string(),
            release: release.into(),
        }
    }

    /// Store root.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Dataset release tag.
    #[must_use]
    pub fn release(&self) -> &str {
        &self.release
    }

    /// Directory holding every partition of a theme in a region.
    #[must_use]
    pub fn region_dir(&self, theme: Theme, region: &str) -> String {
        format!(
            "{}/{theme}/release={}/region={region}",
            self.root, self.release
        )
    }

    /// Path of a single tile partition.
    #[must_use]
    pub fn tile_path(&self, theme: Theme, region: &str, tile: TileCoord) -> String {
        format!(
            "{}/tile_y={}/tile_x={}/{PARTITION_FILE}",
            self.region_dir(theme, region),
            tile.y,
            tile.x
        )
    }

    /// Path of the single partition of a grid-less theme.
    #[must_use]
    pub fn region_path(&self, theme: Theme, region: &str) -> String {
        format!("{}/{PARTITION_FILE}", self.region_dir(theme, region))
    }

    /// Explicit candidate file list for a set of tiles, in row-major order.
    #[must_use]
    pub fn tile_paths(&self, theme: Theme, region: &str, tiles: &BTreeSet<TileCoord>) -> Vec<String> {
        tiles
            .iter()
            .map(|&tile| self.tile_path(theme, region, tile))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_hive_style_paths() {
        let layout = PartitionLayout::new("s3://bucket/overture_extracts/", "2026-01-21.0");
        assert_eq!(
            layout.tile_path(Theme::Buildings, "ON", TileCoord::new(402, 534)),
            "s3://bucket/overture_extracts/buildings/release=2026-01-21.0/region=ON/tile_y=534/tile_x=402/data.parquet"
        );
        assert_eq!(
            layout.region_path(Theme::Addresses, "ON"),
            "s3://bucket/overture_extracts/addresses/release=2026-01-21.0/region=ON/data.parquet"
        );
    }

    #[test]
    fn tile_paths_follow_row_major_order() {
        let layout = PartitionLayout::new("/data", "r1");
        let tiles: BTreeSet<TileCoord> =
            [TileCoord::new(5, 2), TileCoord::new(1, 3), TileCoord::new(9, 2)]
                .into_iter()
                .collect();
        let paths = layout.tile_paths(Theme::Roads, "NY", &tiles);
        assert_eq!(
            paths,
            vec![
                "/data/roads/release=r1/region=NY/tile_y=2/tile_x=5/data.parquet",
                "/data/roads/release=r1/region=NY/tile_y=2/tile_x=9/data.parquet",
                "/data/roads/release=r1/region=NY/tile_y=3/tile_x=1/data.parquet",
            ]
        );
    }
}
