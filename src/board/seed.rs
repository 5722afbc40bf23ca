//! Fixture loading for the in-memory store.

use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::store::MemoryBoardStore;
use super::types::{BoardRecord, Pipeline};

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("Failed to read seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid seed file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub pipelines: Vec<Pipeline>,
    #[serde(default)]
    pub records: Vec<BoardRecord>,
}

impl SeedData {
    pub fn from_path(path: &Path) -> Result<Self, SeedError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub async fn load_into(self, store: &MemoryBoardStore) {
        let (pipelines, records) = (self.pipelines.len(), self.records.len());
        for pipeline in self.pipelines {
            store.insert_pipeline(pipeline).await;
        }
        for record in self.records {
            store.upsert_record(record).await;
        }
        info!("Seeded board store with {pipelines} pipelines and {records} records");
    }
}
