use crate::ids::{ConversationId, MessageId, UserId};
use serde::{Deserialize, Serialize};

/// A conversation message. `content` is either legacy plaintext or a
/// serialized encrypted packet; the key layer only ever rewrites `content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Request to post a new message to a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

/// Request to replace the content of an existing message (re-encryption).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateContentRequest {
    pub content: String,
}

/// Conversations belonging to a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationId>,
}

/// Response of creating a conversation in a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConversationResponse {
    pub id: ConversationId,
}
