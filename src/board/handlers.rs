use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use log::info;
use std::sync::Arc;
use uuid::Uuid;

use super::error::BoardError;
use super::service::BoardService;
use super::stream::{event_stream, sse_response};
use super::types::{
    BoardColumn, BoardView, CardPage, CardsQuery, CreateViewRequest, FiltersQuery, StageMetrics,
    UpdateViewRequest,
};
use crate::core::middleware::TenantContext;
use crate::core::shared::state::AppState;

pub async fn board_columns_handler(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(pipeline_id): Path<Uuid>,
    Query(query): Query<FiltersQuery>,
) -> Result<Json<Vec<BoardColumn>>, BoardError> {
    let service = BoardService::from_state(&state);
    let columns = service
        .columns(tenant.tenant_id, pipeline_id, query.filters.as_deref(), Utc::now())
        .await?;
    Ok(Json(columns))
}

pub async fn stage_cards_handler(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path((pipeline_id, stage_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<CardsQuery>,
) -> Result<Json<CardPage>, BoardError> {
    let service = BoardService::from_state(&state);
    let page = service
        .stage_cards(tenant.tenant_id, pipeline_id, stage_id, &query, Utc::now())
        .await?;
    Ok(Json(page))
}

pub async fn stage_metrics_handler(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path((pipeline_id, stage_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<FiltersQuery>,
) -> Result<Json<StageMetrics>, BoardError> {
    let service = BoardService::from_state(&state);
    let metrics = service
        .stage_metrics(
            tenant.tenant_id,
            pipeline_id,
            stage_id,
            query.filters.as_deref(),
            Utc::now(),
        )
        .await?;
    Ok(Json(metrics))
}

pub async fn list_views_handler(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(pipeline_id): Path<Uuid>,
) -> Result<Json<Vec<BoardView>>, BoardError> {
    let service = BoardService::from_state(&state);
    let views = service.list_views(tenant.tenant_id, pipeline_id).await?;
    Ok(Json(views))
}

pub async fn create_view_handler(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(pipeline_id): Path<Uuid>,
    Json(request): Json<CreateViewRequest>,
) -> Result<(StatusCode, Json<BoardView>), BoardError> {
    let service = BoardService::from_state(&state);
    let view = service
        .create_view(tenant.tenant_id, pipeline_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn update_view_handler(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path((pipeline_id, view_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateViewRequest>,
) -> Result<Json<BoardView>, BoardError> {
    let service = BoardService::from_state(&state);
    let view = service
        .update_view(tenant.tenant_id, pipeline_id, view_id, request)
        .await?;
    Ok(Json(view))
}

pub async fn set_default_view_handler(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path((pipeline_id, view_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<BoardView>, BoardError> {
    let service = BoardService::from_state(&state);
    let view = service
        .set_default_view(tenant.tenant_id, pipeline_id, view_id)
        .await?;
    Ok(Json(view))
}

pub async fn delete_view_handler(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path((pipeline_id, view_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, BoardError> {
    let service = BoardService::from_state(&state);
    service
        .delete_view(tenant.tenant_id, pipeline_id, view_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn board_stream_handler(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(pipeline_id): Path<Uuid>,
) -> Result<impl IntoResponse, BoardError> {
    let stream_config = &state.config.stream;
    if !stream_config.enabled {
        return Err(BoardError::Unavailable(
            "Live board updates are disabled".to_string(),
        ));
    }

    let service = BoardService::from_state(&state);
    service.pipeline(tenant.tenant_id, pipeline_id).await?;

    let subscription = state.events.subscribe(pipeline_id).ok_or_else(|| {
        BoardError::Unavailable("Too many live board connections".to_string())
    })?;
    info!(
        "Board stream opened for pipeline {pipeline_id} ({} open)",
        state.events.open_connections()
    );

    let headers = [
        (
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-transform"),
        ),
        (
            header::HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        ),
    ];
    Ok((headers, sse_response(event_stream(subscription), stream_config)))
}
