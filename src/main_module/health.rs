//! Health check handlers

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::state::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    // A lookup that matches nothing still exercises the store connection.
    let store_ok = state
        .store
        .find_pipeline(Uuid::nil(), Uuid::nil())
        .await
        .is_ok();

    let status = if store_ok { "healthy" } else { "degraded" };
    let code = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(serde_json::json!({
            "status": status,
            "service": "boardserver",
            "version": env!("CARGO_PKG_VERSION"),
            "store": store_ok,
            "streamConnections": state.events.open_connections()
        })),
    )
}
