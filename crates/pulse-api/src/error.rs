use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use pulse_coordinator::error::CoordinatorError;

/// Bridges the coordinator's error taxonomy onto HTTP. The wire shape matches
/// the WebSocket error event: a stable code plus a human-readable message.
pub struct ApiError(pub CoordinatorError);

impl From<CoordinatorError> for ApiError {
    fn from(e: CoordinatorError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoordinatorError::Auth(_) => StatusCode::UNAUTHORIZED,
            CoordinatorError::Validation(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::NotFound(_) => StatusCode::NOT_FOUND,
            CoordinatorError::Authorization(_) => StatusCode::FORBIDDEN,
            CoordinatorError::State(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::DuplicateVote => StatusCode::CONFLICT,
            CoordinatorError::Storage(e) => {
                error!("request failed: {e:#}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match &self.0 {
            CoordinatorError::Storage(_) => "internal error".to_string(),
            other => other.to_string(),
        };

        (
            status,
            Json(json!({ "error": self.0.code(), "message": message })),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
