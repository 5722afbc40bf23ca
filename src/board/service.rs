use chrono::{DateTime, Utc};
use log::{debug, info};
use std::sync::Arc;
use uuid::Uuid;

use super::aggregator::StageAggregator;
use super::cards::{apply_queue, derive_card};
use super::error::BoardError;
use super::filters::{parse_filters, BoardFilters};
use super::predicate::{build_predicate, StageScope};
use super::store::{BoardStore, CardCursor};
use super::stream::{BoardEvent, BoardEventBus};
use super::types::{
    BoardColumn, BoardRecord, BoardView, CardPage, CardsQuery, CreateViewRequest, Pipeline, RecordOrder,
    Stage, StageMetrics, UpdateViewRequest,
};
use super::views::ViewStore;
use crate::core::config::BoardSettings;
use crate::core::shared::state::AppState;

pub struct BoardService {
    store: Arc<dyn BoardStore>,
    views: Arc<dyn ViewStore>,
    events: BoardEventBus,
    settings: BoardSettings,
}

impl BoardService {
    pub fn new(
        store: Arc<dyn BoardStore>,
        views: Arc<dyn ViewStore>,
        events: BoardEventBus,
        settings: BoardSettings,
    ) -> Self {
        Self {
            store,
            views,
            events,
            settings,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            Arc::clone(&state.store),
            Arc::clone(&state.views),
            state.events.clone(),
            state.config.board.clone(),
        )
    }

    /// Pipelines of other tenants are indistinguishable from missing ones.
    pub async fn pipeline(&self, tenant_id: Uuid, pipeline_id: Uuid) -> Result<Pipeline, BoardError> {
        self.store
            .find_pipeline(tenant_id, pipeline_id)
            .await?
            .ok_or_else(|| BoardError::NotFound("Pipeline not found".to_string()))
    }

    async fn stage(
        &self,
        tenant_id: Uuid,
        pipeline_id: Uuid,
        stage_id: Uuid,
    ) -> Result<Stage, BoardError> {
        self.store
            .find_stage(tenant_id, pipeline_id, stage_id)
            .await?
            .ok_or_else(|| BoardError::NotFound("Stage not found".to_string()))
    }

    pub async fn columns(
        &self,
        tenant_id: Uuid,
        pipeline_id: Uuid,
        raw_filters: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<BoardColumn>, BoardError> {
        let pipeline = self.pipeline(tenant_id, pipeline_id).await?;
        let filters = parse_filters(raw_filters);
        let aggregator = StageAggregator::new(Arc::clone(&self.store));
        Ok(aggregator.columns(&pipeline, &filters, now).await?)
    }

    pub async fn stage_metrics(
        &self,
        tenant_id: Uuid,
        pipeline_id: Uuid,
        stage_id: Uuid,
        raw_filters: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<StageMetrics, BoardError> {
        let stage = self.stage(tenant_id, pipeline_id, stage_id).await?;
        let filters = parse_filters(raw_filters);
        let aggregator = StageAggregator::new(Arc::clone(&self.store));
        Ok(aggregator.stage_metrics(&stage, &filters, now).await?)
    }

    /// One page of a stage's cards, oldest stage entry first.
    ///
    /// The queue filter narrows the fetched page, so a page may hold fewer
    /// rows than requested while `next_cursor` still points past the last
    /// record scanned.
    pub async fn stage_cards(
        &self,
        tenant_id: Uuid,
        pipeline_id: Uuid,
        stage_id: Uuid,
        query: &CardsQuery,
        now: DateTime<Utc>,
    ) -> Result<CardPage, BoardError> {
        let stage = self.stage(tenant_id, pipeline_id, stage_id).await?;
        let filters = parse_filters(query.filters.as_deref());
        let limit = self.settings.page_size(query.limit);
        let cursor = query.cursor.as_deref().and_then(CardCursor::decode);
        if query.cursor.is_some() && cursor.is_none() {
            debug!("Ignoring malformed card cursor for stage {stage_id}");
        }

        let records = self
            .fetch_records(&stage, &filters, limit, cursor.as_ref(), now)
            .await?;

        let next_cursor = if records.len() == limit {
            records.last().map(|r| CardCursor::after(r).encode())
        } else {
            None
        };

        let cards = records
            .iter()
            .map(|record| derive_card(record, &stage, now))
            .collect();

        Ok(CardPage {
            rows: apply_queue(cards, filters.queue.as_ref()),
            next_cursor,
        })
    }

    async fn fetch_records(
        &self,
        stage: &Stage,
        filters: &BoardFilters,
        limit: usize,
        after: Option<&CardCursor>,
        now: DateTime<Utc>,
    ) -> Result<Vec<BoardRecord>, BoardError> {
        let predicate = build_predicate(
            stage.tenant_id,
            stage.pipeline_id,
            StageScope::One(stage.id),
            filters,
            now,
        );
        Ok(self
            .store
            .find_records(&predicate, RecordOrder::StageEntryAsc, limit, after)
            .await?)
    }

    pub async fn list_views(
        &self,
        tenant_id: Uuid,
        pipeline_id: Uuid,
    ) -> Result<Vec<BoardView>, BoardError> {
        self.pipeline(tenant_id, pipeline_id).await?;
        Ok(self.views.list(pipeline_id).await?)
    }

    pub async fn create_view(
        &self,
        tenant_id: Uuid,
        pipeline_id: Uuid,
        mut request: CreateViewRequest,
    ) -> Result<BoardView, BoardError> {
        self.pipeline(tenant_id, pipeline_id).await?;
        request.name = validate_name(&request.name)?;
        request.filters = validate_filters(request.filters)?;

        let view = self.views.create(pipeline_id, request).await?;
        info!("Created board view {} on pipeline {pipeline_id}", view.id);
        self.views_changed(pipeline_id, Some(view.id));
        Ok(view)
    }

    pub async fn update_view(
        &self,
        tenant_id: Uuid,
        pipeline_id: Uuid,
        view_id: Uuid,
        mut request: UpdateViewRequest,
    ) -> Result<BoardView, BoardError> {
        self.pipeline(tenant_id, pipeline_id).await?;
        if let Some(name) = request.name.as_deref() {
            request.name = Some(validate_name(name)?);
        }
        if let Some(filters) = request.filters.take() {
            request.filters = Some(validate_filters(filters)?);
        }

        let view = self.views.update(pipeline_id, view_id, request).await?;
        self.views_changed(pipeline_id, Some(view.id));
        Ok(view)
    }

    pub async fn set_default_view(
        &self,
        tenant_id: Uuid,
        pipeline_id: Uuid,
        view_id: Uuid,
    ) -> Result<BoardView, BoardError> {
        self.pipeline(tenant_id, pipeline_id).await?;
        let view = self.views.set_default(pipeline_id, view_id).await?;
        info!("Board view {view_id} is now the default of pipeline {pipeline_id}");
        self.views_changed(pipeline_id, Some(view.id));
        Ok(view)
    }

    pub async fn delete_view(
        &self,
        tenant_id: Uuid,
        pipeline_id: Uuid,
        view_id: Uuid,
    ) -> Result<(), BoardError> {
        self.pipeline(tenant_id, pipeline_id).await?;
        self.views.delete(pipeline_id, view_id).await?;
        self.views_changed(pipeline_id, Some(view_id));
        Ok(())
    }

    fn views_changed(&self, pipeline_id: Uuid, view_id: Option<Uuid>) {
        let delivered = self
            .events
            .publish(pipeline_id, BoardEvent::ViewsChanged { view_id });
        debug!("Views change on pipeline {pipeline_id} delivered to {delivered} subscribers");
    }
}

fn validate_name(name: &str) -> Result<String, BoardError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(BoardError::Validation("View name is required".to_string()));
    }
    Ok(trimmed.to_string())
}

/// Saved filters must be a JSON object; `null` stores an empty one.
fn validate_filters(filters: serde_json::Value) -> Result<serde_json::Value, BoardError> {
    match filters {
        serde_json::Value::Null => Ok(serde_json::json!({})),
        serde_json::Value::Object(_) => Ok(filters),
        _ => Err(BoardError::Validation(
            "View filters must be an object".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::filters::HOT_SCORE_THRESHOLD;
    use crate::board::store::MemoryBoardStore;
    use crate::board::test_support::{owned_by, pipeline_with, record_in, PIPELINE, TENANT};
    use crate::board::views::MemoryViewStore;
    use chrono::Duration;
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryBoardStore>,
        service: BoardService,
        stages: Vec<Uuid>,
        events: BoardEventBus,
    }

    async fn fixture(card_cap: usize) -> Fixture {
        let store = Arc::new(MemoryBoardStore::new());
        let (pipeline, stages) = pipeline_with(&[Some(60), None]);
        store.insert_pipeline(pipeline).await;
        let events = BoardEventBus::new(8);
        let service = BoardService::new(
            store.clone(),
            Arc::new(MemoryViewStore::new()),
            events.clone(),
            BoardSettings {
                card_cap,
                default_page_size: card_cap,
                seed_path: None,
            },
        );
        Fixture {
            store,
            service,
            stages,
            events,
        }
    }

    fn cards_query(limit: Option<usize>, cursor: Option<String>, filters: Option<&str>) -> CardsQuery {
        CardsQuery {
            limit,
            cursor,
            filters: filters.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_foreign_tenant_sees_not_found() {
        let f = fixture(200).await;
        let err = f
            .service
            .columns(Uuid::new_v4(), PIPELINE, None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::NotFound(_)));

        let err = f
            .service
            .stage_cards(TENANT, PIPELINE, Uuid::new_v4(), &CardsQuery::default(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cards_are_oldest_first_and_capped() {
        let f = fixture(3).await;
        let now = Utc::now();
        let mut by_minutes = std::collections::HashMap::new();
        for minutes in [5, 50, 20, 40, 10] {
            let record = record_in(f.stages[1], now - Duration::minutes(minutes));
            by_minutes.insert(minutes, record.id);
            f.store.upsert_record(record).await;
        }

        let page = f
            .service
            .stage_cards(TENANT, PIPELINE, f.stages[1], &CardsQuery::default(), now)
            .await
            .unwrap();
        assert_eq!(page.rows.len(), 3);
        let ids: Vec<Uuid> = page.rows.iter().map(|c| c.deal_id).collect();
        assert_eq!(ids, vec![by_minutes[&50], by_minutes[&40], by_minutes[&20]]);
        assert!(page.next_cursor.is_some());

        let rest = f
            .service
            .stage_cards(
                TENANT,
                PIPELINE,
                f.stages[1],
                &cards_query(None, page.next_cursor.clone(), None),
                now,
            )
            .await
            .unwrap();
        assert_eq!(rest.rows.len(), 2);
        assert!(rest.next_cursor.is_none());

        let mut seen: Vec<Uuid> = page.rows.iter().chain(&rest.rows).map(|c| c.deal_id).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn test_malformed_cursor_restarts() {
        let f = fixture(200).await;
        let now = Utc::now();
        f.store.upsert_record(record_in(f.stages[0], now)).await;

        let page = f
            .service
            .stage_cards(
                TENANT,
                PIPELINE,
                f.stages[0],
                &cards_query(None, Some("not-a-cursor".into()), Some("{broken")),
                now,
            )
            .await
            .unwrap();
        assert_eq!(page.rows.len(), 1);
    }

    #[tokio::test]
    async fn test_hot_queue_narrows_cards() {
        let f = fixture(200).await;
        let now = Utc::now();
        let mut hot = owned_by(record_in(f.stages[0], now), Uuid::new_v4());
        hot.lead_score = Some(HOT_SCORE_THRESHOLD + 5.0);
        let mut cold = record_in(f.stages[0], now);
        cold.lead_score = Some(10.0);
        f.store.upsert_record(hot.clone()).await;
        f.store.upsert_record(cold).await;

        let page = f
            .service
            .stage_cards(
                TENANT,
                PIPELINE,
                f.stages[0],
                &cards_query(None, None, Some(r#"{"queueId":"hot"}"#)),
                now,
            )
            .await
            .unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].deal_id, hot.id);
    }

    #[tokio::test]
    async fn test_view_mutations_validate_and_notify() {
        let f = fixture(200).await;
        let mut sub = f.events.subscribe(PIPELINE).unwrap();

        let bad = f
            .service
            .create_view(
                TENANT,
                PIPELINE,
                CreateViewRequest {
                    name: "  ".into(),
                    filters: json!({}),
                    is_default: false,
                },
            )
            .await;
        assert!(matches!(bad, Err(BoardError::Validation(_))));

        let view = f
            .service
            .create_view(
                TENANT,
                PIPELINE,
                CreateViewRequest {
                    name: " Mine ".into(),
                    filters: serde_json::Value::Null,
                    is_default: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(view.name, "Mine");
        assert_eq!(view.filters, json!({}));

        let notice = sub.receiver.recv().await.unwrap();
        assert_eq!(
            notice.event,
            BoardEvent::ViewsChanged {
                view_id: Some(view.id)
            }
        );

        let foreign = f.service.list_views(Uuid::new_v4(), PIPELINE).await;
        assert!(matches!(foreign, Err(BoardError::NotFound(_))));
    }
}
