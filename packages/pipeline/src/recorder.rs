//! Snapshot recorder backed by the campaign database.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use canvass_snapshot::{SnapshotError, SnapshotRecorder};
use canvass_territory_models::{AddressPoint, BuildingFootprint, SnapshotMetadata};
use duckdb::Connection;

/// Upserts snapshot metadata and the campaign dataset in one transaction.
#[derive(Debug, Clone)]
pub struct DuckDbRecorder {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbRecorder {
    /// Recorder over a shared connection.
    #[must_use]
    pub const fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SnapshotRecorder for DuckDbRecorder {
    async fn record(
        &self,
        meta: SnapshotMetadata,
        buildings: Vec<BuildingFootprint>,
        addresses: Vec<AddressPoint>,
    ) -> Result<SnapshotMetadata, SnapshotError> {
        let conn = Arc::clone(&self.conn);
        let campaign_id = meta.campaign_id.clone();
        let record_error = |source: Box<dyn std::error::Error + Send + Sync>| {
            SnapshotError::Record {
                campaign_id: campaign_id.clone(),
                source,
            }
        };
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            canvass_database::snapshots::upsert_snapshot(&mut conn, &meta, &buildings, &addresses)
        })
        .await
        .map_err(|e| record_error(Box::new(e)))?
        .map_err(|e| record_error(Box::new(e)))
    }
}
