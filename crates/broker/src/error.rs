use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use broker_core::BrokerError;
use serde_json::json;

/// Maps [`BrokerError`] onto the status codes the reference broker returns.
pub struct ApiError(pub BrokerError);

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            BrokerError::NotFound => (StatusCode::NOT_FOUND, "job not found".to_string()),
            BrokerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            BrokerError::Internal(e) => {
                tracing::error!(error = %e, "internal broker error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "detail": message }))).into_response()
    }
}
