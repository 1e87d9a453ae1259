#![allow(clippy::module_name_repetitions)]
//! Canonical file paths for the `data/` directory.
//!
//! All defaults are relative to the project root's `data/` directory and
//! can be overridden through the environment.

use std::path::{Path, PathBuf};

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`, falling back to the
/// current directory when the layout is not the source tree.
#[must_use]
pub fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Returns the `data/` directory path.
#[must_use]
pub fn data_dir() -> PathBuf {
    project_root().join("data")
}

/// Returns the campaign database path (`CANVASS_DB_PATH` or
/// `data/canvass.duckdb`).
#[must_use]
pub fn campaign_db_path() -> PathBuf {
    std::env::var("CANVASS_DB_PATH")
        .ok()
        .filter(|p| !p.is_empty())
        .map_or_else(|| data_dir().join("canvass.duckdb"), PathBuf::from)
}

/// Returns the feature store root (`CANVASS_DATA_ROOT` or
/// `data/overture_extracts`). May be an `s3://` URL.
#[must_use]
pub fn feature_store_root() -> String {
    std::env::var("CANVASS_DATA_ROOT")
        .ok()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| data_dir().join("overture_extracts").display().to_string())
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
