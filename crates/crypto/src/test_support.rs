//! Shared fixtures for unit tests. RSA generation is the slow part of the
//! suite, so a few pairs are generated once per test binary and reused.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use taskvault_shared::api::keys::{
    KeyHistoryRecord, PersistKeysRequest, RotateKeysRequest, RotateKeysResponse,
    WorkspaceKeysResponse,
};
use taskvault_shared::api::message::Message;
use taskvault_shared::ids::{ConversationId, MessageId, UserId, WorkspaceId};

use crate::asymmetric::{generate_key_pair, KeyPair};
use crate::error::CryptoError;
use crate::remote::{ConversationStore, RemoteKeyService};
use crate::wrapping::KdfParams;

static KEY_A: LazyLock<KeyPair> = LazyLock::new(|| generate_key_pair(2048).unwrap());
static KEY_B: LazyLock<KeyPair> = LazyLock::new(|| generate_key_pair(2048).unwrap());
static KEY_C: LazyLock<KeyPair> = LazyLock::new(|| generate_key_pair(2048).unwrap());

pub fn key_a() -> &'static KeyPair {
    &KEY_A
}

pub fn key_b() -> &'static KeyPair {
    &KEY_B
}

pub fn key_c() -> &'static KeyPair {
    &KEY_C
}

/// Argon2id parameters small enough for tests.
pub fn fast_kdf() -> KdfParams {
    KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    }
}

fn offline_error() -> CryptoError {
    CryptoError::NetworkUnavailable("test service offline".into())
}

/// In-process key service with switches for failure injection.
#[derive(Default)]
pub struct MemoryKeyService {
    records: Mutex<HashMap<WorkspaceId, WorkspaceKeysResponse>>,
    pub offline: AtomicBool,
    pub reject_persist: AtomicBool,
    pub rotate_delay_ms: AtomicUsize,
    pub rotations: AtomicUsize,
}

impl MemoryKeyService {
    pub fn record(&self, workspace_id: WorkspaceId) -> Option<WorkspaceKeysResponse> {
        self.records.lock().unwrap().get(&workspace_id).cloned()
    }

    pub fn insert(&self, workspace_id: WorkspaceId, record: WorkspaceKeysResponse) {
        self.records.lock().unwrap().insert(workspace_id, record);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteKeyService for MemoryKeyService {
    async fn fetch_workspace_keys(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Option<WorkspaceKeysResponse>, CryptoError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(offline_error());
        }
        Ok(self.record(workspace_id))
    }

    async fn persist_keys(&self, request: &PersistKeysRequest) -> Result<(), CryptoError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(offline_error());
        }
        if self.reject_persist.load(Ordering::SeqCst) {
            return Err(CryptoError::RemoteError {
                status: 500,
                message: "persist rejected".into(),
            });
        }
        self.insert(
            request.workspace_id,
            WorkspaceKeysResponse {
                public_key: request.public_key.clone(),
                private_key: request.private_key.clone(),
                history: Vec::new(),
            },
        );
        Ok(())
    }

    async fn rotate_keys(
        &self,
        workspace_id: WorkspaceId,
        request: &RotateKeysRequest,
    ) -> Result<RotateKeysResponse, CryptoError> {
        let delay = self.rotate_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(offline_error());
        }
        let mut records = self.records.lock().unwrap();
        let current = records.get_mut(&workspace_id).ok_or(CryptoError::RemoteError {
            status: 404,
            message: "no keys".into(),
        })?;
        let rotated_at = Utc::now();
        let old_public_key = current.public_key.clone();
        let old_private_key = current.private_key.clone();
        current.history.insert(
            0,
            KeyHistoryRecord {
                public_key: old_public_key.clone(),
                private_key: old_private_key.clone(),
                rotated_at,
            },
        );
        current.public_key = request.new_public_key.clone();
        current.private_key = request.new_private_key.clone();
        self.rotations.fetch_add(1, Ordering::SeqCst);

        Ok(RotateKeysResponse {
            old_public_key,
            old_private_key,
            new_public_key: request.new_public_key.clone(),
            new_private_key: request.new_private_key.clone(),
            rotated_at,
            expires_at: None,
        })
    }
}

/// In-process conversation store.
#[derive(Default)]
pub struct MemoryConversationStore {
    conversations: Mutex<HashMap<WorkspaceId, Vec<ConversationId>>>,
    messages: Mutex<Vec<Message>>,
    pub failing_writes: Mutex<HashSet<MessageId>>,
}

impl MemoryConversationStore {
    pub fn add_conversation(&self, workspace_id: WorkspaceId) -> ConversationId {
        let id = ConversationId::new();
        self.conversations
            .lock()
            .unwrap()
            .entry(workspace_id)
            .or_default()
            .push(id);
        id
    }

    pub fn add_message(&self, conversation_id: ConversationId, content: &str) -> Message {
        let message = Message {
            id: MessageId::new(),
            conversation_id,
            sender_id: UserId::new(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        self.messages.lock().unwrap().push(message.clone());
        message
    }

    pub fn content(&self, message_id: MessageId) -> String {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == message_id)
            .map(|m| m.content.clone())
            .unwrap()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn list_conversations(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<ConversationId>, CryptoError> {
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .get(&workspace_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, CryptoError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<Message, CryptoError> {
        Ok(self.add_message(conversation_id, content))
    }

    async fn update_message_content(
        &self,
        message_id: MessageId,
        content: &str,
    ) -> Result<(), CryptoError> {
        if self.failing_writes.lock().unwrap().contains(&message_id) {
            return Err(CryptoError::RemoteError {
                status: 500,
                message: "write failed".into(),
            });
        }
        let mut messages = self.messages.lock().unwrap();
        let message = messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or(CryptoError::RemoteError {
                status: 404,
                message: "no such message".into(),
            })?;
        message.content = content.to_string();
        Ok(())
    }
}
