//! Where snapshot metadata is recorded once every artifact is stored.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use canvass_territory_models::{AddressPoint, BuildingFootprint, SnapshotMetadata};

use crate::SnapshotError;

/// Persists snapshot metadata and the campaign dataset as one upsert.
#[async_trait]
pub trait SnapshotRecorder: Send + Sync {
    /// Records `meta`, keeping the first `created_at` for the campaign.
    /// Returns the metadata as stored.
    async fn record(
        &self,
        meta: SnapshotMetadata,
        buildings: Vec<BuildingFootprint>,
        addresses: Vec<AddressPoint>,
    ) -> Result<SnapshotMetadata, SnapshotError>;
}

/// Keeps records in memory. Can be told to fail every upsert.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    records: Mutex<BTreeMap<String, SnapshotMetadata>>,
    calls: AtomicUsize,
    fail_with: Mutex<Option<String>>,
}

impl MemoryRecorder {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent upsert fail with `message`.
    pub fn fail_records(&self, message: impl Into<String>) {
        *self
            .fail_with
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(message.into());
    }

    /// Number of upserts attempted.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Stored metadata for a campaign.
    #[must_use]
    pub fn get(&self, campaign_id: &str) -> Option<SnapshotMetadata> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(campaign_id)
            .cloned()
    }
}

#[async_trait]
impl SnapshotRecorder for MemoryRecorder {
    async fn record(
        &self,
        meta: SnapshotMetadata,
        _buildings: Vec<BuildingFootprint>,
        _addresses: Vec<AddressPoint>,
    ) -> Result<SnapshotMetadata, SnapshotError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failure = self
            .fail_with
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        if let Some(message) = failure {
            return Err(SnapshotError::Record {
                campaign_id: meta.campaign_id,
                source: message.into(),
            });
        }
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let created_at = records
            .get(&meta.campaign_id)
            .map_or(meta.created_at, |r| r.created_at);
        let stored = SnapshotMetadata { created_at, ..meta };
        records.insert(stored.campaign_id.clone(), stored.clone());
        Ok(stored)
    }
}
