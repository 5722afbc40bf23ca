use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{ViewStore, ViewStoreError};
use crate::board::types::{BoardView, CreateViewRequest, UpdateViewRequest};

type PipelineViews = Arc<Mutex<Vec<BoardView>>>;

/// Process-local view store. Each pipeline's views sit behind their own mutex,
/// so the clear-then-set default sequence is serialized per pipeline while
/// other pipelines proceed independently.
#[derive(Default)]
pub struct MemoryViewStore {
    pipelines: RwLock<HashMap<Uuid, PipelineViews>>,
}

impl MemoryViewStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn views_for(&self, pipeline_id: Uuid) -> PipelineViews {
        if let Some(views) = self.pipelines.read().await.get(&pipeline_id) {
            return Arc::clone(views);
        }
        let mut pipelines = self.pipelines.write().await;
        Arc::clone(pipelines.entry(pipeline_id).or_default())
    }
}

fn clear_defaults(views: &mut [BoardView], except: Uuid) {
    let now = Utc::now();
    for view in views.iter_mut().filter(|v| v.is_default && v.id != except) {
        view.is_default = false;
        view.updated_at = now;
    }
}

#[async_trait]
impl ViewStore for MemoryViewStore {
    async fn list(&self, pipeline_id: Uuid) -> Result<Vec<BoardView>, ViewStoreError> {
        let views = self.views_for(pipeline_id).await;
        let mut snapshot = views.lock().await.clone();
        snapshot.sort_by_key(|v| v.created_at);
        Ok(snapshot)
    }

    async fn create(
        &self,
        pipeline_id: Uuid,
        request: CreateViewRequest,
    ) -> Result<BoardView, ViewStoreError> {
        let views = self.views_for(pipeline_id).await;
        let mut views = views.lock().await;
        let now = Utc::now();

        let view = BoardView {
            id: Uuid::new_v4(),
            pipeline_id,
            name: request.name,
            filters: request.filters,
            is_default: request.is_default,
            created_at: now,
            updated_at: now,
        };
        if view.is_default {
            clear_defaults(&mut views, view.id);
        }
        views.push(view.clone());
        Ok(view)
    }

    async fn update(
        &self,
        pipeline_id: Uuid,
        view_id: Uuid,
        request: UpdateViewRequest,
    ) -> Result<BoardView, ViewStoreError> {
        let views = self.views_for(pipeline_id).await;
        let mut views = views.lock().await;

        if !views.iter().any(|v| v.id == view_id) {
            return Err(ViewStoreError::NotFound);
        }
        if request.is_default == Some(true) {
            clear_defaults(&mut views, view_id);
        }

        let view = views
            .iter_mut()
            .find(|v| v.id == view_id)
            .ok_or(ViewStoreError::NotFound)?;
        if let Some(name) = request.name {
            view.name = name;
        }
        if let Some(filters) = request.filters {
            view.filters = filters;
        }
        if let Some(is_default) = request.is_default {
            view.is_default = is_default;
        }
        view.updated_at = Utc::now();
        Ok(view.clone())
    }

    async fn delete(&self, pipeline_id: Uuid, view_id: Uuid) -> Result<(), ViewStoreError> {
        let views = self.views_for(pipeline_id).await;
        views.lock().await.retain(|v| v.id != view_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(name: &str, is_default: bool) -> CreateViewRequest {
        CreateViewRequest {
            name: name.to_string(),
            filters: json!({ "queueId": "hot" }),
            is_default,
        }
    }

    fn default_count(views: &[BoardView]) -> usize {
        views.iter().filter(|v| v.is_default).count()
    }

    #[tokio::test]
    async fn test_create_default_clears_previous() {
        let store = MemoryViewStore::new();
        let pipeline = Uuid::new_v4();

        let first = store.create(pipeline, request("mine", true)).await.unwrap();
        let second = store.create(pipeline, request("team", true)).await.unwrap();

        let views = store.list(pipeline).await.unwrap();
        assert_eq!(views.len(), 2);
        assert_eq!(default_count(&views), 1);
        assert_eq!(views[0].id, first.id);
        assert!(!views[0].is_default);
        assert!(views[1].is_default && views[1].id == second.id);
    }

    #[tokio::test]
    async fn test_set_default_and_partial_update() {
        let store = MemoryViewStore::new();
        let pipeline = Uuid::new_v4();
        let a = store.create(pipeline, request("a", true)).await.unwrap();
        let b = store.create(pipeline, request("b", false)).await.unwrap();

        let b = store.set_default(pipeline, b.id).await.unwrap();
        assert!(b.is_default);

        let renamed = store
            .update(
                pipeline,
                a.id,
                UpdateViewRequest {
                    name: Some("renamed".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "renamed");
        assert!(!renamed.is_default);
        assert_eq!(renamed.filters, json!({ "queueId": "hot" }));

        assert_eq!(default_count(&store.list(pipeline).await.unwrap()), 1);
    }

    #[tokio::test]
    async fn test_unknown_view_errors_but_delete_is_silent() {
        let store = MemoryViewStore::new();
        let pipeline = Uuid::new_v4();

        let err = store.set_default(pipeline, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ViewStoreError::NotFound));
        assert!(store.delete(pipeline, Uuid::new_v4()).await.is_ok());
        assert!(store.list(pipeline).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pipelines_are_isolated() {
        let store = MemoryViewStore::new();
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        store.create(p1, request("one", true)).await.unwrap();
        store.create(p2, request("two", true)).await.unwrap();

        assert!(store.list(p1).await.unwrap()[0].is_default);
        assert!(store.list(p2).await.unwrap()[0].is_default);

        let foreign = store.list(p2).await.unwrap()[0].id;
        assert!(matches!(
            store.set_default(p1, foreign).await,
            Err(ViewStoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_defaults_leave_one() {
        let store = Arc::new(MemoryViewStore::new());
        let pipeline = Uuid::new_v4();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .create(pipeline, request(&format!("v{i}"), true))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let views = store.list(pipeline).await.unwrap();
        assert_eq!(views.len(), 16);
        assert_eq!(default_count(&views), 1);
    }
}
