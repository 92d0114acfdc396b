use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use taskvault_shared::error::TaskVaultError;

/// `TaskVaultError` rendered as an HTTP response with an `{"error": ...}` body.
pub struct ServerError(pub TaskVaultError);

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            TaskVaultError::NotFound => (StatusCode::NOT_FOUND, self.0.to_string()),
            TaskVaultError::Unauthorized => (StatusCode::UNAUTHORIZED, self.0.to_string()),
            TaskVaultError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            TaskVaultError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            TaskVaultError::Internal(msg) | TaskVaultError::Crypto(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            TaskVaultError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<TaskVaultError> for ServerError {
    fn from(e: TaskVaultError) -> Self {
        ServerError(e)
    }
}
