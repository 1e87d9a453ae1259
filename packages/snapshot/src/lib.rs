#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Campaign snapshot writer.
//!
//! Each extracted theme is written as a gzipped `GeoJSON` feature collection
//! and the addresses as a gzipped JSON array, all under
//! `campaigns/{campaign_id}/snapshot/`. Writes run concurrently; metadata is
//! recorded only after every write succeeded, so a failed snapshot leaves
//! the previous record untouched.

pub mod dataset;
pub mod encode;
pub mod recorder;

use std::sync::Arc;
use std::time::Duration;

use canvass_storage::{ObjectStore, StorageError};
use canvass_territory_models::{
    AddressPoint, BuildingFootprint, Feature, ScanDiagnostics, SnapshotMetadata,
    TerritoryPolygon, Theme, ThemeArtifact,
};
use chrono::Utc;
use futures::future::try_join_all;

pub use recorder::{MemoryRecorder, SnapshotRecorder};

/// Default lifetime of issued read URLs.
pub const DEFAULT_URL_TTL: Duration = Duration::from_secs(60 * 60);

/// Default snapshot retention.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Content type of theme artifacts.
pub const GEOJSON_CONTENT_TYPE: &str = "application/geo+json";

/// Content type of the address artifact.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Errors that can occur while writing a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// An object store operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Compression failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Recording the metadata failed.
    #[error("Failed to record snapshot for campaign {campaign_id}: {source}")]
    Record {
        /// Campaign being recorded.
        campaign_id: String,
        /// Underlying failure.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

// ── Keys ─────────────────────────────────────────────────────────

/// Key prefix shared by every artifact of a campaign snapshot.
#[must_use]
pub fn snapshot_prefix(campaign_id: &str) -> String {
    format!("campaigns/{campaign_id}/snapshot/")
}

/// Object key of a theme artifact.
#[must_use]
pub fn artifact_key(campaign_id: &str, theme: Theme) -> String {
    match theme {
        Theme::Addresses => format!("{}addresses.json.gz", snapshot_prefix(campaign_id)),
        other => format!("{}{other}.geojson.gz", snapshot_prefix(campaign_id)),
    }
}

// ── Writer ───────────────────────────────────────────────────────

/// Extracted content of one theme.
#[derive(Debug, Clone)]
pub struct ThemeOutput {
    /// Theme.
    pub theme: Theme,
    /// Features, already deduplicated and sorted.
    pub features: Vec<Feature>,
    /// Scan diagnostics.
    pub diagnostics: ScanDiagnostics,
}

/// Everything a snapshot is built from.
#[derive(Debug, Clone)]
pub struct SnapshotInput {
    /// Owning campaign.
    pub campaign_id: String,
    /// Resolved region code.
    pub region: String,
    /// Dataset release tag.
    pub release: String,
    /// Validated territory.
    pub polygon: TerritoryPolygon,
    /// Feature themes (buildings, roads, divisions).
    pub themes: Vec<ThemeOutput>,
    /// Address points.
    pub addresses: Vec<AddressPoint>,
    /// Address scan diagnostics.
    pub address_diagnostics: ScanDiagnostics,
}

/// Writes snapshot artifacts and records their metadata.
pub struct SnapshotWriter {
    store: Arc<dyn ObjectStore>,
    url_ttl: Duration,
    retention: chrono::Duration,
}

impl std::fmt::Debug for SnapshotWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotWriter")
            .field("store", &self.store.url_prefix())
            .field("url_ttl", &self.url_ttl)
            .field("retention", &self.retention)
            .finish()
    }
}

impl SnapshotWriter {
    /// Writer with default URL lifetime and retention.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            url_ttl: DEFAULT_URL_TTL,
            retention: chrono::Duration::days(DEFAULT_RETENTION_DAYS),
        }
    }

    /// Overrides the URL lifetime.
    #[must_use]
    pub const fn with_url_ttl(mut self, ttl: Duration) -> Self {
        self.url_ttl = ttl;
        self
    }

    /// Overrides the retention period.
    #[must_use]
    pub const fn with_retention(mut self, retention: chrono::Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Writes every artifact, then records the snapshot.
    ///
    /// Rewriting the same campaign overwrites the same keys, so repeated
    /// calls with the same input leave the store and the record in the
    /// same state.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] if encoding or any write fails (nothing is
    /// recorded then), or if recording fails.
    pub async fn write(
        &self,
        input: SnapshotInput,
        recorder: &dyn SnapshotRecorder,
    ) -> Result<SnapshotMetadata, SnapshotError> {
        let campaign_id = input.campaign_id.clone();
        let mut uploads: Vec<(Theme, String, Vec<u8>, &'static str, usize)> = Vec::new();
        for output in &input.themes {
            uploads.push((
                output.theme,
                artifact_key(&campaign_id, output.theme),
                encode::encode_features(&output.features)?,
                GEOJSON_CONTENT_TYPE,
                output.features.len(),
            ));
        }
        uploads.push((
            Theme::Addresses,
            artifact_key(&campaign_id, Theme::Addresses),
            encode::encode_addresses(&input.addresses)?,
            JSON_CONTENT_TYPE,
            input.addresses.len(),
        ));

        try_join_all(uploads.iter().map(|(_, key, body, content_type, _)| {
            self.store.put(key, body.clone(), content_type, Some("gzip"))
        }))
        .await?;

        let urls = try_join_all(
            uploads
                .iter()
                .map(|(_, key, ..)| self.store.sign(key, self.url_ttl)),
        )
        .await?;

        let artifacts: Vec<ThemeArtifact> = uploads
            .into_iter()
            .zip(urls)
            .map(|((theme, key, _, _, count), url)| ThemeArtifact {
                theme,
                key,
                count,
                url: Some(url),
            })
            .collect();

        let buildings: Vec<BuildingFootprint> = input
            .themes
            .iter()
            .find(|t| t.theme == Theme::Buildings)
            .map(|t| dataset::buildings_from_features(&t.features))
            .unwrap_or_default();

        let mut diagnostics: Vec<ScanDiagnostics> =
            input.themes.iter().map(|t| t.diagnostics.clone()).collect();
        diagnostics.push(input.address_diagnostics);

        let now = Utc::now();
        let meta = SnapshotMetadata {
            campaign_id: campaign_id.clone(),
            region: input.region,
            release: input.release,
            polygon_hash: input.polygon.fingerprint(),
            bbox: input.polygon.bbox(),
            prefix: snapshot_prefix(&campaign_id),
            artifacts,
            diagnostics,
            created_at: now,
            updated_at: now,
            expires_at: now + self.retention,
        };

        let stored = recorder.record(meta, buildings, input.addresses).await?;
        self.remove_stale_artifacts(&stored).await;
        log::info!(
            "Snapshot for campaign {campaign_id} written to {}{} ({} artifacts)",
            self.store.url_prefix(),
            stored.prefix,
            stored.artifacts.len()
        );
        Ok(stored)
    }

    /// Deletes objects under the snapshot prefix that the recorded
    /// metadata no longer references, e.g. a roads artifact after a
    /// regeneration without roads.
    ///
    /// The snapshot is already recorded, so failures are only logged.
    async fn remove_stale_artifacts(&self, meta: &SnapshotMetadata) {
        let keys = match self.store.list(&meta.prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                log::warn!("Could not list {} for stale artifacts: {e}", meta.prefix);
                return;
            }
        };
        for key in keys
            .iter()
            .filter(|k| !meta.artifacts.iter().any(|a| &a.key == *k))
        {
            match self.store.delete(key).await {
                Ok(()) => log::debug!("Removed stale artifact {key}"),
                Err(e) => log::warn!("Could not remove stale artifact {key}: {e}"),
            }
        }
    }

    /// Re-issues read URLs for stored metadata.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Storage`] if signing fails.
    pub async fn refresh_urls(
        &self,
        mut meta: SnapshotMetadata,
    ) -> Result<SnapshotMetadata, SnapshotError> {
        let urls = try_join_all(
            meta.artifacts
                .iter()
                .map(|a| self.store.sign(&a.key, self.url_ttl)),
        )
        .await?;
        for (artifact, url) in meta.artifacts.iter_mut().zip(urls) {
            artifact.url = Some(url);
        }
        Ok(meta)
    }

    /// Deletes every stored object under a snapshot prefix.
    ///
    /// Returns the number of objects deleted.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Storage`] if listing or deleting fails.
    pub async fn delete_artifacts(&self, prefix: &str) -> Result<usize, SnapshotError> {
        let keys = self.store.list(prefix).await?;
        try_join_all(keys.iter().map(|k| self.store.delete(k))).await?;
        Ok(keys.len())
    }
}
