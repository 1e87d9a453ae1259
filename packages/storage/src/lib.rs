#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Object stores for snapshot artifacts.
//!
//! Snapshot files are written through the [`ObjectStore`] trait so the
//! writer does not care where they land. Three stores are provided:
//!
//! | Store | URL form | Use |
//! |---|---|---|
//! | [`S3Store`] | presigned `https://` GET | production |
//! | [`LocalStore`] | `file://{path}?expires={unix}` | local runs |
//! | [`MemoryStore`] | `memory://{key}?expires={unix}` | tests, dry runs |
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `CANVASS_STORE` | `local` | `s3` or `local` |
//! | `CANVASS_SNAPSHOT_BUCKET` | required for `s3` | Bucket for snapshot objects |
//! | `CANVASS_SNAPSHOT_DIR` | `data/snapshots` | Root for the local store |
//! | `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` | required for `s3` | Credentials |
//! | `AWS_REGION` | `us-east-1` | Signing region |
//! | `S3_ENDPOINT_URL` | unset | S3-compatible endpoint (path-style) |

pub mod local;
pub mod memory;
pub mod s3;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use s3::S3Store;

/// Errors that can occur during object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Missing required environment variable.
    #[error("Missing environment variable: {name}")]
    MissingEnv {
        /// Name of the missing environment variable.
        name: String,
    },

    /// Unrecognised `CANVASS_STORE` value.
    #[error("Unknown store kind: {0} (expected \"s3\" or \"local\")")]
    UnknownStore(String),

    /// Reading an object failed.
    #[error("Failed to download {store}/{key}: {source}")]
    Download {
        /// Store location.
        store: String,
        /// Object key.
        key: String,
        /// Underlying error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Writing an object failed.
    #[error("Failed to upload {store}/{key}: {source}")]
    Upload {
        /// Store location.
        store: String,
        /// Object key.
        key: String,
        /// Underlying error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Checking an object failed.
    #[error("Failed to head {store}/{key}: {source}")]
    Head {
        /// Store location.
        store: String,
        /// Object key.
        key: String,
        /// Underlying error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Deleting an object failed.
    #[error("Failed to delete {store}/{key}: {source}")]
    Delete {
        /// Store location.
        store: String,
        /// Object key.
        key: String,
        /// Underlying error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Listing a prefix failed.
    #[error("Failed to list {store}/{prefix}: {source}")]
    List {
        /// Store location.
        store: String,
        /// Key prefix.
        prefix: String,
        /// Underlying error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Issuing a signed URL failed.
    #[error("Failed to sign {store}/{key}: {source}")]
    Sign {
        /// Store location.
        store: String,
        /// Object key.
        key: String,
        /// Underlying error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// I/O error reading or writing local files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A key/value blob store with expiring read URLs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Location prefix that keys are appended to, e.g. `s3://bucket/`.
    fn url_prefix(&self) -> String;

    /// Writes an object, replacing any existing one.
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        content_encoding: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Reads an object; `None` if it does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Whether an object exists.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// All keys under a prefix, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Deletes an object. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// A read URL valid for `ttl`.
    async fn sign(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// Builds the snapshot store selected by `CANVASS_STORE`.
///
/// # Errors
///
/// Returns [`StorageError::UnknownStore`] for an unrecognised kind, or
/// [`StorageError::MissingEnv`] when the S3 store lacks configuration.
pub fn store_from_env() -> Result<Arc<dyn ObjectStore>, StorageError> {
    let kind = std::env::var("CANVASS_STORE").unwrap_or_else(|_| "local".to_string());
    match kind.as_str() {
        "s3" => {
            let bucket = require_env("CANVASS_SNAPSHOT_BUCKET")?;
            Ok(Arc::new(S3Store::from_env(&bucket)?))
        }
        "local" => {
            let root = std::env::var("CANVASS_SNAPSHOT_DIR")
                .unwrap_or_else(|_| "data/snapshots".to_string());
            Ok(Arc::new(LocalStore::new(root)))
        }
        other => Err(StorageError::UnknownStore(other.to_string())),
    }
}

/// Reads a required environment variable.
pub(crate) fn require_env(name: &str) -> Result<String, StorageError> {
    std::env::var(name).map_err(|_| StorageError::MissingEnv {
        name: name.to_string(),
    })
}

/// Unix expiry timestamp for a URL issued now with the given lifetime.
pub(crate) fn expiry_timestamp(ttl: Duration) -> i64 {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    chrono::Utc::now()
        .checked_add_signed(ttl)
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC)
        .timestamp()
}

/// Splits an `s3://bucket/key` URL.
#[must_use]
pub fn parse_s3_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("s3://")?;
    let (bucket, key) = rest.split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_s3_urls() {
        assert_eq!(
            parse_s3_url("s3://data/overture_extracts/buildings/data.parquet"),
            Some(("data", "overture_extracts/buildings/data.parquet"))
        );
        assert_eq!(parse_s3_url("s3://data/"), None);
        assert_eq!(parse_s3_url("/local/path"), None);
    }

    #[test]
    fn expiry_is_in_the_future() {
        let now = chrono::Utc::now().timestamp();
        let expires = expiry_timestamp(Duration::from_secs(3600));
        assert!((expires - now - 3600).abs() <= 1);
    }
}
