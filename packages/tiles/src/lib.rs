#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Tile indexing for the partitioned feature store.
//!
//! Turns a territory polygon into an explicit list of partition files:
//! [`grid::TileGrid`] computes the covering tiles, [`layout::PartitionLayout`]
//! maps them to paths, and [`cache::TileExistenceCache`] remembers which of
//! those paths actually exist.

pub mod cache;
pub mod grid;
pub mod layout;
pub mod probe;

pub use cache::{ProbeReport, TileExistenceCache};
pub use grid::TileGrid;
pub use layout::PartitionLayout;
pub use probe::{LocalProbe, TileProbe};

/// Errors from tile coverage computation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TileError {
    /// The covering set exceeds the scan budget. Never retried.
    #[error("Territory covers at least {tiles} tiles (max {max}); draw a smaller area")]
    CoverageTooLarge {
        /// Tiles counted when the budget was exceeded.
        tiles: usize,
        /// Configured budget.
        max: usize,
    },

    /// Tile size is zero, negative, or not finite.
    #[error("Invalid tile size: {0}")]
    InvalidGrid(f64),
}
