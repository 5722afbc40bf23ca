use axum::{response::IntoResponse, Json};
use log::error;

use super::store::StoreError;
use super::views::ViewStoreError;

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for BoardError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Constraint(msg) => Self::Conflict(msg),
            other => Self::Store(other),
        }
    }
}

impl From<ViewStoreError> for BoardError {
    fn from(err: ViewStoreError) -> Self {
        match err {
            ViewStoreError::NotFound => Self::NotFound("View not found".to_string()),
            ViewStoreError::Store(e) => e.into(),
        }
    }
}

impl IntoResponse for BoardError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        let (status, message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            Self::Store(e) => {
                error!("Board store failure: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_store_detail_is_not_leaked() {
        let response =
            BoardError::from(StoreError::Query("relation board_records".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_view_errors_map_to_status() {
        let missing = BoardError::from(ViewStoreError::NotFound).into_response();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let clash = BoardError::from(ViewStoreError::Store(StoreError::Constraint(
            "board_views_one_default".into(),
        )))
        .into_response();
        assert_eq!(clash.status(), StatusCode::CONFLICT);
    }
}
