//! Covering-tile computation for territory polygons.
//!
//! A territory is covered by the tiles of its vertices, of points sampled
//! along each edge, and of every tile whose centre falls inside the
//! polygon. The set is then grown by a configurable ring so features whose
//! centroid sits just across a tile boundary are still scanned.

use std::collections::BTreeSet;

use canvass_territory_models::{TerritoryPolygon, TileCoord};
use geo::{Intersects, Point};

use crate::TileError;

/// A fixed-degree tile grid plus coverage tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileGrid {
    /// Tile edge length in degrees.
    pub tile_deg: f64,
    /// Chebyshev ring added around every covered tile.
    pub ring: u32,
    /// Edge samples per tile length.
    pub samples_per_tile: u32,
}

impl TileGrid {
    /// A grid with the default ring (1) and sample density (2).
    #[must_use]
    pub const fn new(tile_deg: f64) -> Self {
        Self {
            tile_deg,
            ring: 1,
            samples_per_tile: 2,
        }
    }

    /// Overrides the ring expansion.
    #[must_use]
    pub const fn with_ring(mut self, ring: u32) -> Self {
        self.ring = ring;
        self
    }

    /// Overrides the edge sample density.
    #[must_use]
    pub const fn with_samples_per_tile(mut self, samples: u32) -> Self {
        self.samples_per_tile = samples;
        self
    }

    #[allow(clippy::cast_possible_truncation)]
    fn max_x(&self) -> i32 {
        (360.0 / self.tile_deg).ceil() as i32 - 1
    }

    #[allow(clippy::cast_possible_truncation)]
    fn max_y(&self) -> i32 {
        (180.0 / self.tile_deg).ceil() as i32 - 1
    }

    /// Tile containing `(lon, lat)`.
    ///
    /// `tile_x = floor((lon + 180) / tile_deg)`,
    /// `tile_y = floor((lat + 90) / tile_deg)`, clamped to the grid so the
    /// antimeridian and poles land in the last column/row.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn tile_of(&self, lon: f64, lat: f64) -> TileCoord {
        let x = ((lon + 180.0) / self.tile_deg).floor() as i32;
        let y = ((lat + 90.0) / self.tile_deg).floor() as i32;
        TileCoord::new(x.clamp(0, self.max_x()), y.clamp(0, self.max_y()))
    }

    /// Centre of a tile as `(lon, lat)`.
    #[must_use]
    pub fn centre_of(&self, tile: TileCoord) -> (f64, f64) {
        (
            (f64::from(tile.x) + 0.5).mul_add(self.tile_deg, -180.0),
            (f64::from(tile.y) + 0.5).mul_add(self.tile_deg, -90.0),
        )
    }

    /// Computes the covering tile set for a territory.
    ///
    /// # Errors
    ///
    /// Returns [`TileError::CoverageTooLarge`] as soon as the set grows past
    /// `max_tiles`, and [`TileError::InvalidGrid`] for a non-positive tile
    /// size.
    pub fn covering_tiles(
        &self,
        polygon: &TerritoryPolygon,
        max_tiles: usize,
    ) -> Result<BTreeSet<TileCoord>, TileError> {
        if !(self.tile_deg.is_finite() && self.tile_deg > 0.0) {
            return Err(TileError::InvalidGrid(self.tile_deg));
        }

        let mut cover = Cover {
            grid: self,
            tiles: BTreeSet::new(),
            max_tiles,
        };

        let ring = polygon.exterior();
        for &(lon, lat) in ring {
            cover.insert(self.tile_of(lon, lat))?;
        }

        for edge in ring.windows(2) {
            let ((lon_a, lat_a), (lon_b, lat_b)) = (edge[0], edge[1]);
            let length = (lon_b - lon_a).hypot(lat_b - lat_a);
            let samples = edge_samples(length, self.tile_deg, self.samples_per_tile);
            for i in 1..samples {
                let t = f64::from(i) / f64::from(samples);
                let lon = t.mul_add(lon_b - lon_a, lon_a);
                let lat = t.mul_add(lat_b - lat_a, lat_a);
                cover.insert(self.tile_of(lon, lat))?;
            }
        }

        let bbox = polygon.bbox();
        let lower = self.tile_of(bbox.west, bbox.south);
        let upper = self.tile_of(bbox.east, bbox.north);
        let shape = polygon.to_polygon();
        for y in lower.y..=upper.y {
            for x in lower.x..=upper.x {
                let tile = TileCoord::new(x, y);
                let (lon, lat) = self.centre_of(tile);
                if shape.intersects(&Point::new(lon, lat)) {
                    cover.insert(tile)?;
                }
            }
        }

        Ok(cover.tiles)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn edge_samples(length: f64, tile_deg: f64, per_tile: u32) -> u32 {
    let samples = (length / tile_deg * f64::from(per_tile.max(1))).ceil();
    if samples < 1.0 {
        1
    } else if samples > f64::from(u32::MAX) {
        u32::MAX
    } else {
        samples as u32
    }
}

struct Cover<'a> {
    grid: &'a TileGrid,
    tiles: BTreeSet<TileCoord>,
    max_tiles: usize,
}

impl Cover<'_> {
    /// Adds a tile and its ring, failing once the budget is exceeded.
    fn insert(&mut self, centre: TileCoord) -> Result<(), TileError> {
        let ring = i32::try_from(self.grid.ring).unwrap_or(i32::MAX);
        for dy in -ring..=ring {
            for dx in -ring..=ring {
                let x = centre.x.saturating_add(dx);
                let y = centre.y.saturating_add(dy);
                if x < 0 || y < 0 || x > self.grid.max_x() || y > self.grid.max_y() {
                    continue;
                }
                self.tiles.insert(TileCoord::new(x, y));
                if self.tiles.len() > self.max_tiles {
                    return Err(TileError::CoverageTooLarge {
                        tiles: self.tiles.len(),
                        max: self.max_tiles,
                    });
                }
            }
        }
        Ok(())
    }
}
