mod common;

use axum::http::StatusCode;
use taskvault_shared::ids::{ConversationId, MessageId, UserId, WorkspaceId};

use common::{json_request, response_json, send, test_app};

async fn create_conversation(app: &axum::Router, ws: WorkspaceId, user: UserId) -> String {
    let uri = format!("/api/workspaces/{ws}/conversations");
    let response = send(app, json_request("POST", &uri, Some(user), None)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    response_json(response).await["id"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_conversations_are_listed_per_workspace() {
    let app = test_app();
    let user = UserId::new();
    let ws = WorkspaceId::new();
    let first = create_conversation(&app, ws, user).await;
    let second = create_conversation(&app, ws, user).await;
    create_conversation(&app, WorkspaceId::new(), user).await;

    let uri = format!("/api/workspaces/{ws}/conversations");
    let json = response_json(send(&app, json_request("GET", &uri, Some(user), None)).await).await;
    assert_eq!(json["conversations"], serde_json::json!([first, second]));
}

#[tokio::test]
async fn test_send_and_list_messages_in_order() {
    let app = test_app();
    let user = UserId::new();
    let conv = create_conversation(&app, WorkspaceId::new(), user).await;
    let uri = format!("/api/conversations/{conv}/messages");

    for text in ["first", "second"] {
        let response = send(
            &app,
            json_request("POST", &uri, Some(user), Some(serde_json::json!({ "content": text }))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = response_json(response).await;
        assert_eq!(json["content"], text);
        assert_eq!(json["sender_id"], user.to_string());
    }

    let json = response_json(send(&app, json_request("GET", &uri, Some(user), None)).await).await;
    let contents: Vec<_> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(contents, vec!["first", "second"]);
}

#[tokio::test]
async fn test_update_content_rewrites_message() {
    let app = test_app();
    let user = UserId::new();
    let conv = create_conversation(&app, WorkspaceId::new(), user).await;
    let uri = format!("/api/conversations/{conv}/messages");
    let sent = response_json(
        send(
            &app,
            json_request("POST", &uri, Some(user), Some(serde_json::json!({ "content": "old" }))),
        )
        .await,
    )
    .await;

    let update_uri = format!("/api/messages/{}/content", sent["id"].as_str().unwrap());
    let response = send(
        &app,
        json_request("PUT", &update_uri, Some(user), Some(serde_json::json!({ "content": "new" }))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let json = response_json(send(&app, json_request("GET", &uri, Some(user), None)).await).await;
    assert_eq!(json[0]["content"], "new");
    assert_eq!(json[0]["id"], sent["id"]);
    assert_eq!(json[0]["created_at"], sent["created_at"]);
}

#[tokio::test]
async fn test_unknown_targets_are_404() {
    let app = test_app();
    let user = UserId::new();

    let uri = format!("/api/conversations/{}/messages", ConversationId::new());
    let response = send(&app, json_request("GET", &uri, Some(user), None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let uri = format!("/api/messages/{}/content", MessageId::new());
    let response = send(
        &app,
        json_request("PUT", &uri, Some(user), Some(serde_json::json!({ "content": "x" }))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_empty_content_is_rejected() {
    let app = test_app();
    let user = UserId::new();
    let conv = create_conversation(&app, WorkspaceId::new(), user).await;
    let uri = format!("/api/conversations/{conv}/messages");
    let response = send(
        &app,
        json_request("POST", &uri, Some(user), Some(serde_json::json!({ "content": "" }))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
