//! Partition existence probes backed by an object store.

use std::sync::Arc;

use async_trait::async_trait;
use canvass_storage::{ObjectStore, S3Store, parse_s3_url};
use canvass_tiles::{LocalProbe, TileProbe};

use crate::PipelineError;

/// Answers existence probes for `{url_prefix}{key}` paths from a store.
pub struct StoreProbe {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl std::fmt::Debug for StoreProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreProbe")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl StoreProbe {
    /// Probe over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        let prefix = store.url_prefix();
        Self { store, prefix }
    }
}

#[async_trait]
impl TileProbe for StoreProbe {
    async fn exists(&self, path: &str) -> std::io::Result<bool> {
        let key = path.strip_prefix(&self.prefix).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{path} is outside {}", self.prefix),
            )
        })?;
        self.store.exists(key).await.map_err(std::io::Error::other)
    }
}

/// Probe matching a partition root: S3 roots are probed through the
/// object store, anything else on the local filesystem.
///
/// # Errors
///
/// Returns [`PipelineError::Storage`] if S3 credentials are incomplete.
pub fn probe_for_root(root: &str) -> Result<Arc<dyn TileProbe>, PipelineError> {
    let Some(rest) = root.strip_prefix("s3://") else {
        return Ok(Arc::new(LocalProbe));
    };
    let bucket = parse_s3_url(root).map_or(rest.trim_end_matches('/'), |(bucket, _)| bucket);
    let store: Arc<dyn ObjectStore> = Arc::new(S3Store::from_env(bucket)?);
    Ok(Arc::new(StoreProbe::new(store)))
}

#[cfg(test)]
mod tests {
    use canvass_storage::MemoryStore;

    use super::*;

    #[tokio::test]
    async fn strips_store_prefix_before_probing() {
        let store = Arc::new(MemoryStore::new());
        store
            .put("buildings/region=ON/data.parquet", vec![1], "application/octet-stream", None)
            .await
            .unwrap();
        let probe = StoreProbe::new(store);

        assert!(probe.exists("memory://buildings/region=ON/data.parquet").await.unwrap());
        assert!(!probe.exists("memory://roads/region=ON/data.parquet").await.unwrap());
        assert!(probe.exists("s3://other/buildings").await.is_err());
    }
}
