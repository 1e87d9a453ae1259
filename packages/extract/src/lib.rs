#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Feature extraction over the tile-partitioned Parquet store.
//!
//! All reads go through a [`session::QuerySession`]: one lazily-opened
//! in-memory `DuckDB` database that is reused across queries and rebuilt
//! once when a connection failure is detected. [`query::QueryEngine`] turns
//! an explicit partition file list into decoded, deduplicated features and
//! [`address`] does the same for address points. [`partition`] writes that
//! store from source files.

pub mod address;
pub mod partition;
pub mod query;
pub mod schema;
pub mod session;
mod sql;
#[cfg(test)]
mod test_support;

pub use address::{AddressColumns, AddressExtraction};
pub use partition::{PartitionReport, PartitionRequest, PartitionTarget, Partitioner};
pub use query::{QueryEngine, ThemeRequest, ThemeResult};
pub use session::{QuerySession, SessionConfig};

/// Broad class of a storage or query failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A partition file is absent.
    MissingFile,
    /// The connection or a remote read broke; worth one retry.
    Connection,
    /// Anything else.
    Other,
}

/// Classifies a `DuckDB` error message.
///
/// Missing-file patterns are checked first: a 404 from object storage
/// surfaces as an HTTP error and must not be mistaken for a dropped
/// connection.
#[must_use]
pub fn classify_failure(message: &str) -> FailureKind {
    const MISSING: &[&str] = &[
        "no files found",
        "cannot open file",
        "could not open file",
        "does not exist",
        "no such file",
        "404",
        "file not found",
    ];
    const CONNECTION: &[&str] = &[
        "connection",
        "reset by peer",
        "broken pipe",
        "timed out",
        "timeout",
        "http error",
        "http get error",
        "io error",
        "unable to connect",
        "database has been invalidated",
    ];

    let lower = message.to_ascii_lowercase();
    if MISSING.iter().any(|p| lower.contains(p)) {
        FailureKind::MissingFile
    } else if CONNECTION.iter().any(|p| lower.contains(p)) {
        FailureKind::Connection
    } else {
        FailureKind::Other
    }
}

/// Errors that can occur during extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// `DuckDB` returned an error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// A connection failure persisted after the session was rebuilt.
    #[error("Transient storage failure after {attempts} attempts: {source}")]
    TransientStorage {
        /// Attempts made (always 2: the original and one retry).
        attempts: u32,
        /// The last underlying error.
        source: Box<ExtractError>,
    },

    /// The partition schema lacks a required column.
    #[error("Unsupported {theme} schema in {path}: {message}")]
    Schema {
        /// Theme being read.
        theme: String,
        /// File whose schema was inspected.
        path: String,
        /// What was missing.
        message: String,
    },

    /// Local file I/O or an existence check failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking task panicked or was cancelled.
    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ExtractError {
    /// Failure class of this error.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::DuckDb(e) => classify_failure(&e.to_string()),
            Self::TransientStorage { .. } => FailureKind::Connection,
            Self::Schema { .. } | Self::Io(_) | Self::Join(_) => FailureKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_messages() {
        for msg in [
            "IO Error: No files found that match the pattern \"s3://b/x/data.parquet\"",
            "IO Error: Cannot open file \"/data/tile_y=1/tile_x=2/data.parquet\": No such file or directory",
            "HTTP Error: Unable to connect to URL \"https://b.s3.amazonaws.com/x\": 404 (Not Found)",
        ] {
            assert_eq!(classify_failure(msg), FailureKind::MissingFile, "{msg}");
        }
    }

    #[test]
    fn connection_messages() {
        for msg in [
            "IO Error: Connection error for HTTP GET to 'https://b/x'",
            "HTTP Error: Unable to connect to URL: 503 Service Unavailable",
            "IO Error: Connection reset by peer",
            "Operation timed out",
        ] {
            assert_eq!(classify_failure(msg), FailureKind::Connection, "{msg}");
        }
    }

    #[test]
    fn other_messages() {
        assert_eq!(
            classify_failure("Binder Error: Referenced column \"foo\" not found in FROM clause!"),
            FailureKind::Other
        );
    }
}
