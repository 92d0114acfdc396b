use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use taskvault_shared::api::message::{
    ConversationListResponse, CreateConversationResponse, Message, SendMessageRequest,
    UpdateContentRequest,
};
use taskvault_shared::constants::MAX_MESSAGE_SIZE_BYTES;
use taskvault_shared::error::TaskVaultError;
use taskvault_shared::ids::{ConversationId, MessageId, WorkspaceId};

use crate::error::ServerError;
use crate::extractors::Caller;
use crate::state::AppState;

fn validate_content(content: &str) -> Result<(), ServerError> {
    if content.is_empty() {
        return Err(ServerError(TaskVaultError::Validation(
            "content must not be empty".into(),
        )));
    }
    if content.len() > MAX_MESSAGE_SIZE_BYTES {
        return Err(ServerError(TaskVaultError::Validation(format!(
            "content exceeds {MAX_MESSAGE_SIZE_BYTES} bytes"
        ))));
    }
    Ok(())
}

/// POST /api/workspaces/:workspace_id/conversations
pub async fn create_conversation(
    State(state): State<AppState>,
    _caller: Caller,
    Path(workspace_id): Path<WorkspaceId>,
) -> (StatusCode, Json<CreateConversationResponse>) {
    let id = state.store.create_conversation(workspace_id);
    tracing::debug!(workspace_id = %workspace_id, conversation_id = %id, "conversation created");
    (StatusCode::CREATED, Json(CreateConversationResponse { id }))
}

/// GET /api/workspaces/:workspace_id/conversations
pub async fn list_conversations(
    State(state): State<AppState>,
    _caller: Caller,
    Path(workspace_id): Path<WorkspaceId>,
) -> Json<ConversationListResponse> {
    Json(ConversationListResponse {
        conversations: state.store.list_conversations(workspace_id),
    })
}

/// GET /api/conversations/:conversation_id/messages
/// Every message in posting order. Content is returned as stored.
pub async fn list_messages(
    State(state): State<AppState>,
    _caller: Caller,
    Path(conversation_id): Path<ConversationId>,
) -> Result<Json<Vec<Message>>, ServerError> {
    Ok(Json(state.store.list_messages(conversation_id)?))
}

/// POST /api/conversations/:conversation_id/messages
pub async fn send_message(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(conversation_id): Path<ConversationId>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ServerError> {
    validate_content(&body.content)?;
    let message = state
        .store
        .add_message(conversation_id, user_id, body.content)?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// PUT /api/messages/:message_id/content
/// Used by key rotation to write re-encrypted content back.
pub async fn update_content(
    State(state): State<AppState>,
    _caller: Caller,
    Path(message_id): Path<MessageId>,
    Json(body): Json<UpdateContentRequest>,
) -> Result<StatusCode, ServerError> {
    validate_content(&body.content)?;
    state.store.update_content(message_id, body.content)?;
    Ok(StatusCode::NO_CONTENT)
}
