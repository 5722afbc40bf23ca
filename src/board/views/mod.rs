//! Saved board views: named filter presets per pipeline with at most one
//! default.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::MemoryViewStore;
#[cfg(feature = "postgres")]
pub use postgres::PgViewStore;

use async_trait::async_trait;
use uuid::Uuid;

use super::store::StoreError;
use super::types::{BoardView, CreateViewRequest, UpdateViewRequest};

#[derive(Debug, thiserror::Error)]
pub enum ViewStoreError {
    #[error("View not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait ViewStore: Send + Sync {
    /// Views of the pipeline ordered by creation time.
    async fn list(&self, pipeline_id: Uuid) -> Result<Vec<BoardView>, ViewStoreError>;

    async fn create(
        &self,
        pipeline_id: Uuid,
        request: CreateViewRequest,
    ) -> Result<BoardView, ViewStoreError>;

    async fn update(
        &self,
        pipeline_id: Uuid,
        view_id: Uuid,
        request: UpdateViewRequest,
    ) -> Result<BoardView, ViewStoreError>;

    async fn set_default(
        &self,
        pipeline_id: Uuid,
        view_id: Uuid,
    ) -> Result<BoardView, ViewStoreError> {
        self.update(pipeline_id, view_id, UpdateViewRequest::set_default())
            .await
    }

    /// Deleting an unknown view is a no-op.
    async fn delete(&self, pipeline_id: Uuid, view_id: Uuid) -> Result<(), ViewStoreError>;
}
