pub mod aggregator;
pub mod cards;
pub mod error;
pub mod filters;
pub mod handlers;
pub mod migration;
pub mod predicate;
pub mod seed;
pub mod service;
pub mod sla;
pub mod store;
pub mod stream;
pub mod types;
pub mod views;

#[cfg(test)]
pub(crate) mod test_support;

use axum::{
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;

use crate::core::shared::state::AppState;

pub use error::BoardError;
pub use handlers::*;
pub use service::BoardService;
pub use types::*;

pub fn configure_board_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/pipelines/:pipeline_id/board/columns",
            get(board_columns_handler),
        )
        .route(
            "/pipelines/:pipeline_id/board/stages/:stage_id/cards",
            get(stage_cards_handler),
        )
        .route(
            "/pipelines/:pipeline_id/board/stages/:stage_id/metrics",
            get(stage_metrics_handler),
        )
        .route(
            "/pipelines/:pipeline_id/board/views",
            get(list_views_handler).post(create_view_handler),
        )
        .route(
            "/pipelines/:pipeline_id/board/views/:view_id",
            patch(update_view_handler).delete(delete_view_handler),
        )
        .route(
            "/pipelines/:pipeline_id/board/views/:view_id/default",
            post(set_default_view_handler),
        )
        .route(
            "/pipelines/:pipeline_id/board/stream",
            get(board_stream_handler),
        )
}
