#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response};
use taskvault_shared::api::keys::WrappedPrivateKeyRecord;
use taskvault_shared::constants::USER_ID_HEADER;
use taskvault_shared::ids::UserId;
use tower::ServiceExt; // for `oneshot`

use taskvault_server::config::ServerConfig;
use taskvault_server::router::build_router;
use taskvault_server::state::AppState;

pub fn test_app() -> axum::Router {
    build_router(AppState::new(ServerConfig::default()))
}

pub fn json_request(
    method: &str,
    uri: &str,
    user: Option<UserId>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(USER_ID_HEADER, user.to_string());
    }
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn send(app: &axum::Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn response_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

pub fn public_key(tag: &str) -> String {
    format!("-----BEGIN PUBLIC KEY-----\n{tag}\n-----END PUBLIC KEY-----\n")
}

pub fn wrapped(tag: &str) -> WrappedPrivateKeyRecord {
    WrappedPrivateKeyRecord {
        encrypted_private_key: format!("ZW5j{tag}"),
        salt: "c2FsdHNhbHRzYWx0c2FsdA==".into(),
        iv: "aXZpdml2aXZpdml2".into(),
    }
}
