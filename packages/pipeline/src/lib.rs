#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Campaign pipeline orchestration.
//!
//! [`Pipeline`] owns the query session, the partition engine, the snapshot
//! writer and the campaign database, and exposes the operations the HTTP
//! API and the CLI share: snapshot generation, linking runs, manual
//! overrides, match and review queries, and expiry cleanup.

pub mod config;
pub mod orchestrator;
pub mod probe;
pub mod progress;
pub mod recorder;
pub mod territory;

pub use config::PipelineConfig;
pub use orchestrator::{LinkRun, Pipeline, SnapshotPlan, SnapshotRequest};
pub use progress::{NullProgress, ProgressCallback, null_progress};
pub use territory::parse_territory;

use canvass_database::DbError;
use canvass_extract::ExtractError;
use canvass_linker::LinkError;
use canvass_region::RegionLookupError;
use canvass_snapshot::SnapshotError;
use canvass_storage::StorageError;
use canvass_territory_models::ValidationError;
use canvass_tiles::TileError;

/// How a caller should treat a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request itself is unusable.
    InvalidInput,
    /// The campaign or row does not exist.
    NotFound,
    /// Storage, query, or database failure.
    Internal,
}

/// Errors that can occur in a pipeline operation.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The request is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The territory polygon is invalid.
    #[error("Invalid territory: {0}")]
    Validation(#[from] ValidationError),

    /// No usable region for the territory.
    #[error(transparent)]
    Region(#[from] RegionLookupError),

    /// The covering tile set exceeds the budget, or the grid is invalid.
    #[error(transparent)]
    Coverage(#[from] TileError),

    /// A partition query failed.
    #[error("Query failed: {0}")]
    Extract(#[from] ExtractError),

    /// Writing or recording the snapshot failed.
    #[error("Snapshot failed: {0}")]
    Snapshot(#[from] SnapshotError),

    /// An object store operation failed.
    #[error("Storage failed: {0}")]
    Storage(#[from] StorageError),

    /// The campaign database failed.
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    /// A region's linker configuration is invalid.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Snapshot generation ran past its deadline.
    #[error("Snapshot timed out after {secs}s")]
    Timeout {
        /// Configured limit in seconds.
        secs: u64,
    },

    /// A blocking task panicked or was cancelled.
    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl PipelineError {
    /// Classification used for HTTP status codes and exit messages.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidRequest(_)
            | Self::Validation(_)
            | Self::Region(_)
            | Self::Coverage(_) => ErrorClass::InvalidInput,
            Self::Db(DbError::NotFound(_)) => ErrorClass::NotFound,
            Self::Extract(_)
            | Self::Snapshot(_)
            | Self::Storage(_)
            | Self::Db(_)
            | Self::Link(_)
            | Self::Timeout { .. }
            | Self::Join(_) => ErrorClass::Internal,
        }
    }
}
