use axum::response::IntoResponse;
use axum::Json;

/// GET /health/live
/// Process liveness only; the in-memory store has no readiness check.
pub async fn liveness() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
