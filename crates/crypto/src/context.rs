//! Per-(user, workspace) key context.
//!
//! Holds the live key ring for one workspace and publishes its lifecycle
//! state. Readers take an `Arc<KeyRing>` snapshot; writers swap the whole
//! ring, so a half-updated pair is never observable.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use rsa::RsaPrivateKey;
use taskvault_shared::ids::{UserId, WorkspaceId};
use tokio::sync::{watch, Mutex};

use crate::asymmetric::KeyPair;
use crate::error::CryptoError;
use crate::hybrid::{
    decrypt_for_display, decrypt_message_content, encrypt_hybrid, EncryptedMessagePacket,
    MessageContent, LOCKED_PLACEHOLDER,
};
use crate::storage::HistoricalKeyPair;

/// Lifecycle of a workspace's keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Uninitialized,
    Generating,
    Unlocking,
    Ready,
    Rotating,
    Failed,
}

impl KeyState {
    /// Whether decrypt/encrypt can be served. Rotation keeps the previous
    /// ring readable until the new one is installed.
    pub fn is_usable(self) -> bool {
        matches!(self, KeyState::Ready | KeyState::Rotating)
    }
}

impl std::fmt::Display for KeyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            KeyState::Uninitialized => "uninitialized",
            KeyState::Generating => "generating",
            KeyState::Unlocking => "unlocking",
            KeyState::Ready => "ready",
            KeyState::Rotating => "rotating",
            KeyState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The active pair plus every retired pair, newest retirement first.
#[derive(Debug, Clone)]
pub struct KeyRing {
    active: KeyPair,
    history: Vec<HistoricalKeyPair>,
}

impl KeyRing {
    pub fn new(active: KeyPair, mut history: Vec<HistoricalKeyPair>) -> Self {
        history.retain(|h| h.keys != active);
        history.sort_by(|a, b| b.rotated_at.cmp(&a.rotated_at));
        let mut seen = Vec::with_capacity(history.len());
        history.retain(|h| {
            if seen.contains(&h.keys.public_key) {
                false
            } else {
                seen.push(h.keys.public_key.clone());
                true
            }
        });
        Self { active, history }
    }

    pub fn active(&self) -> &KeyPair {
        &self.active
    }

    pub fn history(&self) -> &[HistoricalKeyPair] {
        &self.history
    }

    /// Private keys in the order decryption should try them: active first,
    /// then history from most recently retired.
    pub fn decryption_candidates(&self) -> impl Iterator<Item = &RsaPrivateKey> + '_ {
        std::iter::once(&self.active.private_key)
            .chain(self.history.iter().map(|h| &h.keys.private_key))
    }

    /// A new ring with `next` active and the current active pair at the
    /// front of history.
    pub fn rotated(&self, next: KeyPair, rotated_at: DateTime<Utc>) -> KeyRing {
        let mut history = Vec::with_capacity(self.history.len() + 1);
        history.push(HistoricalKeyPair {
            keys: self.active.clone(),
            rotated_at,
        });
        history.extend(self.history.iter().cloned());
        KeyRing::new(next, history)
    }
}

/// Explicit key context for one user in one workspace. Every encrypt and
/// decrypt call for the workspace goes through here.
pub struct WorkspaceKeyContext {
    user_id: UserId,
    workspace_id: WorkspaceId,
    ring: RwLock<Option<Arc<KeyRing>>>,
    state: watch::Sender<KeyState>,
    pub(crate) rotation_lock: Mutex<()>,
}

impl std::fmt::Debug for WorkspaceKeyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceKeyContext")
            .field("user_id", &self.user_id)
            .field("workspace_id", &self.workspace_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl WorkspaceKeyContext {
    pub fn new(user_id: UserId, workspace_id: WorkspaceId) -> Self {
        let (state, _) = watch::channel(KeyState::Uninitialized);
        Self {
            user_id,
            workspace_id,
            ring: RwLock::new(None),
            state,
            rotation_lock: Mutex::new(()),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        self.workspace_id
    }

    pub fn state(&self) -> KeyState {
        *self.state.borrow()
    }

    /// Receiver that observes every subsequent state change.
    pub fn subscribe(&self) -> watch::Receiver<KeyState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, next: KeyState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!(
                workspace_id = %self.workspace_id,
                from = %previous,
                to = %next,
                "key state changed"
            );
        }
    }

    /// Snapshot of the current ring, if any keys have been loaded.
    pub fn keys(&self) -> Option<Arc<KeyRing>> {
        match self.ring.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn install(&self, ring: KeyRing) {
        let ring = Arc::new(ring);
        match self.ring.write() {
            Ok(mut guard) => *guard = Some(ring),
            Err(poisoned) => *poisoned.into_inner() = Some(ring),
        }
    }

    fn usable_keys(&self) -> Result<Arc<KeyRing>, CryptoError> {
        self.keys().ok_or_else(|| CryptoError::NotReady {
            state: self.state().to_string(),
        })
    }

    /// Encrypt `plaintext` for the workspace's active public key.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedMessagePacket, CryptoError> {
        let ring = self.usable_keys()?;
        encrypt_hybrid(plaintext, &ring.active().public_key)
    }

    /// Encrypt and serialize, ready to store as message content.
    pub fn encrypt_content(&self, plaintext: &str) -> Result<String, CryptoError> {
        self.encrypt(plaintext)?.to_json()
    }

    /// Decrypt stored message content. Plaintext content is returned as-is
    /// even when no keys are loaded.
    pub fn decrypt(&self, content: &str) -> Result<String, CryptoError> {
        match MessageContent::parse(content) {
            MessageContent::Plaintext(text) => Ok(text.to_string()),
            MessageContent::Encrypted(_) => {
                let ring = self.usable_keys()?;
                decrypt_message_content(content, ring.decryption_candidates())
            }
        }
    }

    /// Text to show for stored content. Never fails: unreadable messages
    /// become a placeholder.
    pub fn display(&self, content: &str) -> String {
        match self.keys() {
            Some(ring) => decrypt_for_display(content, ring.decryption_candidates()),
            None if MessageContent::parse(content).is_encrypted() => {
                LOCKED_PLACEHOLDER.to_string()
            }
            None => content.to_string(),
        }
    }
}
