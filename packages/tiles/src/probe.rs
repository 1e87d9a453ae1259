//! Existence probes for partition files.

use async_trait::async_trait;

/// Checks whether a partition file exists.
#[async_trait]
pub trait TileProbe: Send + Sync {
    /// Returns whether `path` exists.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if existence cannot be determined. A missing
    /// file is `Ok(false)`, not an error.
    async fn exists(&self, path: &str) -> std::io::Result<bool>;
}

/// Probes the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalProbe;

#[async_trait]
impl TileProbe for LocalProbe {
    async fn exists(&self, path: &str) -> std::io::Result<bool> {
        let path = path.strip_prefix("file://").unwrap_or(path);
        tokio::fs::try_exists(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_probe_reports_presence() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("data.parquet");
        std::fs::write(&present, b"x").unwrap();

        let probe = LocalProbe;
        assert!(probe.exists(present.to_str().unwrap()).await.unwrap());
        let url = format!("file://{}", present.display());
        assert!(probe.exists(&url).await.unwrap());
        let missing = dir.path().join("missing.parquet");
        assert!(!probe.exists(missing.to_str().unwrap()).await.unwrap());
    }
}
