use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::middleware;
use axum::routing::{get, patch, post, put};
use taskvault_shared::constants::USER_ID_HEADER;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::handlers::{conversations, health, keys};
use crate::state::AppState;

const REQUEST_ID_HEADER: &str = "x-request-id";

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(USER_ID_HEADER)])
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)])
}

/// Key service and conversation routes, scoped under `/api`.
fn api_routes() -> axum::Router<AppState> {
    let workspace = axum::Router::new()
        .route("/keys", get(keys::get_workspace_keys))
        .route("/rotate-keys", post(keys::rotate_keys))
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        );

    axum::Router::new()
        .route("/user/keys", patch(keys::persist_keys))
        .nest("/workspaces/{workspace_id}", workspace)
        .route(
            "/conversations/{conversation_id}/messages",
            get(conversations::list_messages).post(conversations::send_message),
        )
        .route(
            "/messages/{message_id}/content",
            put(conversations::update_content),
        )
}

/// Builds the application router with all middleware and routes.
pub fn build_router(state: AppState) -> axum::Router {
    let cors = cors_layer(&state.config);
    let body_limit = DefaultBodyLimit::max(state.config.max_body_bytes);

    axum::Router::new()
        .route("/health/live", get(health::liveness))
        .nest("/api", api_routes())
        .layer(middleware::from_fn(tag_request_id))
        .layer(body_limit)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Stamp every response with a fresh request id.
async fn tag_request_id(
    request: axum::extract::Request,
    next: middleware::Next,
) -> axum::response::Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    tracing::Span::current().record("request_id", request_id.as_str());
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
