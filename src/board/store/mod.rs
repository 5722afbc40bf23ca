//! Read-side data store contract. Records and stages are owned elsewhere; the
//! board only counts and scans them.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::MemoryBoardStore;
#[cfg(feature = "postgres")]
pub use postgres::PgBoardStore;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::predicate::BoardPredicate;
use super::types::{BoardRecord, Pipeline, RecordOrder, Stage};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Constraint violation: {0}")]
    Constraint(String),
}

/// Keyset position in the `(stage entry, created_at, id)` ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardCursor {
    #[serde(rename = "e")]
    pub entered_at: DateTime<Utc>,
    #[serde(rename = "c")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "i")]
    pub id: Uuid,
}

impl CardCursor {
    pub fn after(record: &BoardRecord) -> Self {
        Self {
            entered_at: record.effective_stage_entry(),
            created_at: record.created_at,
            id: record.id,
        }
    }

    pub fn key(&self) -> (DateTime<Utc>, DateTime<Utc>, Uuid) {
        (self.entered_at, self.created_at, self.id)
    }

    pub fn encode(&self) -> String {
        // Serializing three plain fields cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Malformed cursors decode to `None`, which restarts at the first page.
    pub fn decode(raw: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(raw.trim()).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

#[async_trait]
pub trait BoardStore: Send + Sync {
    async fn find_pipeline(
        &self,
        tenant_id: Uuid,
        pipeline_id: Uuid,
    ) -> Result<Option<Pipeline>, StoreError>;

    async fn find_stage(
        &self,
        tenant_id: Uuid,
        pipeline_id: Uuid,
        stage_id: Uuid,
    ) -> Result<Option<Stage>, StoreError>;

    async fn find_records(
        &self,
        predicate: &BoardPredicate,
        order: RecordOrder,
        limit: usize,
        after: Option<&CardCursor>,
    ) -> Result<Vec<BoardRecord>, StoreError>;

    async fn count_records(&self, predicate: &BoardPredicate) -> Result<u64, StoreError>;

    /// Counts grouped by stage id. Stages with no match are absent.
    async fn grouped_counts(
        &self,
        predicate: &BoardPredicate,
    ) -> Result<HashMap<Uuid, u64>, StoreError>;

    async fn find_first_record(
        &self,
        predicate: &BoardPredicate,
        order: RecordOrder,
    ) -> Result<Option<BoardRecord>, StoreError>;

    /// Earliest effective stage entry per stage, one distinct-by-stage scan.
    async fn oldest_per_stage(
        &self,
        predicate: &BoardPredicate,
    ) -> Result<HashMap<Uuid, DateTime<Utc>>, StoreError>;
}
