//! In-memory backing store for published keys, conversations and messages.
//!
//! Key material is opaque here: public keys are PEM text and private keys
//! arrive already wrapped under the owner's password. The server never
//! holds anything it could decrypt with.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use taskvault_shared::api::keys::{
    KeyHistoryRecord, RotateKeysResponse, WorkspaceKeysResponse, WrappedPrivateKeyRecord,
};
use taskvault_shared::api::message::Message;
use taskvault_shared::error::TaskVaultError;
use taskvault_shared::ids::{ConversationId, MessageId, UserId, WorkspaceId};

#[derive(Debug, Clone)]
struct KeyEntry {
    public_key: String,
    private_key: WrappedPrivateKeyRecord,
    history: Vec<KeyHistoryRecord>,
}

#[derive(Debug, Clone)]
struct Conversation {
    workspace_id: WorkspaceId,
    messages: Vec<MessageId>,
}

pub struct MemoryStore {
    keys: DashMap<(UserId, WorkspaceId), KeyEntry>,
    conversations: DashMap<ConversationId, Conversation>,
    workspace_conversations: DashMap<WorkspaceId, Vec<ConversationId>>,
    messages: DashMap<MessageId, Message>,
    key_rotation_days: u32,
}

impl MemoryStore {
    pub fn new(key_rotation_days: u32) -> Self {
        Self {
            keys: DashMap::new(),
            conversations: DashMap::new(),
            workspace_conversations: DashMap::new(),
            messages: DashMap::new(),
            key_rotation_days,
        }
    }

    pub fn workspace_keys(
        &self,
        user_id: UserId,
        workspace_id: WorkspaceId,
    ) -> Option<WorkspaceKeysResponse> {
        self.keys
            .get(&(user_id, workspace_id))
            .map(|entry| WorkspaceKeysResponse {
                public_key: entry.public_key.clone(),
                private_key: entry.private_key.clone(),
                history: entry.history.clone(),
            })
    }

    /// First-use publish. A workspace that already has keys for this user
    /// must go through rotation instead.
    pub fn persist_keys(
        &self,
        user_id: UserId,
        workspace_id: WorkspaceId,
        public_key: String,
        private_key: WrappedPrivateKeyRecord,
    ) -> Result<(), TaskVaultError> {
        match self.keys.entry((user_id, workspace_id)) {
            Entry::Occupied(_) => Err(TaskVaultError::Conflict(
                "keys already published for this workspace".into(),
            )),
            Entry::Vacant(slot) => {
                slot.insert(KeyEntry {
                    public_key,
                    private_key,
                    history: Vec::new(),
                });
                Ok(())
            }
        }
    }

    /// Swap in a new active pair and push the superseded one to the front
    /// of the history. The entry lock is held for the whole swap, so
    /// concurrent rotations for one workspace serialize.
    pub fn rotate_keys(
        &self,
        user_id: UserId,
        workspace_id: WorkspaceId,
        new_public_key: String,
        new_private_key: WrappedPrivateKeyRecord,
    ) -> Result<RotateKeysResponse, TaskVaultError> {
        let mut entry = self
            .keys
            .get_mut(&(user_id, workspace_id))
            .ok_or(TaskVaultError::NotFound)?;

        if entry.public_key == new_public_key {
            return Err(TaskVaultError::Validation(
                "new public key matches the active key".into(),
            ));
        }

        let rotated_at = Utc::now();
        let old_public_key = std::mem::replace(&mut entry.public_key, new_public_key.clone());
        let old_private_key = std::mem::replace(&mut entry.private_key, new_private_key.clone());
        entry.history.insert(
            0,
            KeyHistoryRecord {
                public_key: old_public_key.clone(),
                private_key: old_private_key.clone(),
                rotated_at,
            },
        );

        Ok(RotateKeysResponse {
            old_public_key,
            old_private_key,
            new_public_key,
            new_private_key,
            rotated_at,
            expires_at: self.expiry_from(rotated_at),
        })
    }

    fn expiry_from(&self, rotated_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.key_rotation_days > 0)
            .then(|| rotated_at + Duration::days(i64::from(self.key_rotation_days)))
    }

    pub fn create_conversation(&self, workspace_id: WorkspaceId) -> ConversationId {
        let id = ConversationId::new();
        self.conversations.insert(
            id,
            Conversation {
                workspace_id,
                messages: Vec::new(),
            },
        );
        self.workspace_conversations
            .entry(workspace_id)
            .or_default()
            .push(id);
        id
    }

    pub fn list_conversations(&self, workspace_id: WorkspaceId) -> Vec<ConversationId> {
        self.workspace_conversations
            .get(&workspace_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    pub fn conversation_workspace(&self, conversation_id: ConversationId) -> Option<WorkspaceId> {
        self.conversations
            .get(&conversation_id)
            .map(|c| c.workspace_id)
    }

    /// Messages in the order they were posted.
    pub fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, TaskVaultError> {
        let ids = self
            .conversations
            .get(&conversation_id)
            .map(|c| c.messages.clone())
            .ok_or(TaskVaultError::NotFound)?;
        Ok(ids
            .iter()
            .filter_map(|id| self.messages.get(id).map(|m| m.clone()))
            .collect())
    }

    pub fn add_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: String,
    ) -> Result<Message, TaskVaultError> {
        let mut conversation = self
            .conversations
            .get_mut(&conversation_id)
            .ok_or(TaskVaultError::NotFound)?;
        let message = Message {
            id: MessageId::new(),
            conversation_id,
            sender_id,
            content,
            created_at: Utc::now(),
        };
        self.messages.insert(message.id, message.clone());
        conversation.messages.push(message.id);
        Ok(message)
    }

    /// Replace the content of a message. Nothing else about it changes.
    pub fn update_content(
        &self,
        message_id: MessageId,
        content: String,
    ) -> Result<(), TaskVaultError> {
        let mut message = self
            .messages
            .get_mut(&message_id)
            .ok_or(TaskVaultError::NotFound)?;
        message.content = content;
        Ok(())
    }
}
