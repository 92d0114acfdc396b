use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use taskvault_shared::constants::USER_ID_HEADER;
use taskvault_shared::ids::UserId;

use crate::state::AppState;

/// The acting user, taken from the `x-user-id` header. Authentication is
/// an upstream concern; this only identifies whose keys are addressed.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub UserId);

#[derive(Debug)]
pub struct CallerRejection;

impl IntoResponse for CallerRejection {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "unauthorized" })),
        )
            .into_response()
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = CallerRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                tracing::debug!("caller: missing or non-ASCII user id header");
                CallerRejection
            })?;

        let user_id: UserId = header.parse().map_err(|_| {
            tracing::debug!("caller: user id header is not a uuid");
            CallerRejection
        })?;

        Ok(Caller(user_id))
    }
}
