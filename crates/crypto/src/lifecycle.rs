//! Workspace key lifecycle: first-use generation, unlock, and rotation.
//!
//! One `KeyLifecycleManager` serves one signed-in user. It hands out a
//! `WorkspaceKeyContext` per workspace and is the only writer of the key
//! rings inside them.
//!
//! The key service is the source of truth. The local store is a mirror that
//! is read only when the service cannot be reached.

use std::sync::Arc;

use dashmap::DashMap;
use taskvault_shared::api::keys::{
    PersistKeysRequest, RotateKeysRequest, WorkspaceKeysResponse, WrappedPrivateKeyRecord,
};
use taskvault_shared::api::message::Message;
use taskvault_shared::ids::{UserId, WorkspaceId};
use zeroize::Zeroizing;

use crate::asymmetric::{generate_key_pair, import_public_key, KeyPair};
use crate::config::CryptoConfig;
use crate::context::{KeyRing, KeyState, WorkspaceKeyContext};
use crate::error::CryptoError;
use crate::hybrid::{decrypt_hybrid, decrypt_with_fallback, encrypt_hybrid, MessageContent};
use crate::remote::{ConversationStore, RemoteKeyService};
use crate::storage::{HistoricalKeyPair, LocalKeyStore};
use crate::wrapping::{DeterministicSecret, KeyWrapper, WrappingSecret};

/// Outcome of re-encrypting a workspace's messages during rotation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationReport {
    /// Decrypted with a previous key and rewritten under the new one.
    pub reencrypted: usize,
    /// Already under the new key (e.g. sent after the new key was installed).
    pub already_current: usize,
    /// Encrypted under no known key, or an unknown packet version. Left untouched.
    pub skipped: usize,
    /// Legacy plaintext content. Left untouched.
    pub plaintext: usize,
    /// Re-encrypted but the conversation store rejected the write.
    pub failed_writes: usize,
}

enum Migration {
    Rewrite(String),
    AlreadyCurrent,
    Undecryptable,
    Plaintext,
}

pub struct KeyLifecycleManager {
    user_id: UserId,
    rsa_key_bits: usize,
    wrapper: KeyWrapper,
    secret: Arc<dyn WrappingSecret>,
    remote: Arc<dyn RemoteKeyService>,
    conversations: Arc<dyn ConversationStore>,
    local: Arc<LocalKeyStore>,
    contexts: DashMap<WorkspaceId, Arc<WorkspaceKeyContext>>,
}

impl std::fmt::Debug for KeyLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLifecycleManager")
            .field("user_id", &self.user_id)
            .field("workspaces", &self.contexts.len())
            .finish_non_exhaustive()
    }
}

impl KeyLifecycleManager {
    pub fn new(
        user_id: UserId,
        config: &CryptoConfig,
        remote: Arc<dyn RemoteKeyService>,
        conversations: Arc<dyn ConversationStore>,
        local: Arc<LocalKeyStore>,
    ) -> Self {
        Self {
            user_id,
            rsa_key_bits: config.rsa_key_bits,
            wrapper: KeyWrapper::new(config.kdf),
            secret: Arc::new(DeterministicSecret),
            remote,
            conversations,
            local,
            contexts: DashMap::new(),
        }
    }

    /// Replace the source of the wrapping password.
    pub fn with_secret(mut self, secret: Arc<dyn WrappingSecret>) -> Self {
        self.secret = secret;
        self
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The context for `workspace_id`, created on first request.
    pub fn context(&self, workspace_id: WorkspaceId) -> Arc<WorkspaceKeyContext> {
        self.contexts
            .entry(workspace_id)
            .or_insert_with(|| Arc::new(WorkspaceKeyContext::new(self.user_id, workspace_id)))
            .clone()
    }

    pub fn state(&self, workspace_id: WorkspaceId) -> KeyState {
        self.contexts
            .get(&workspace_id)
            .map(|ctx| ctx.state())
            .unwrap_or(KeyState::Uninitialized)
    }

    /// The active pair, if keys have been loaded.
    pub fn active_keys(&self, workspace_id: WorkspaceId) -> Option<KeyPair> {
        self.contexts
            .get(&workspace_id)
            .and_then(|ctx| ctx.keys())
            .map(|ring| ring.active().clone())
    }

    /// Retired pairs, most recently retired first. Empty if keys are not loaded.
    pub fn history_keys(&self, workspace_id: WorkspaceId) -> Vec<HistoricalKeyPair> {
        self.contexts
            .get(&workspace_id)
            .and_then(|ctx| ctx.keys())
            .map(|ring| ring.history().to_vec())
            .unwrap_or_default()
    }

    /// Load or create the user's keys for a workspace.
    ///
    /// Returns immediately if the workspace is already `Ready`. Falls back to
    /// the local store when the key service is unreachable.
    pub async fn initialize(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Arc<WorkspaceKeyContext>, CryptoError> {
        let ctx = self.context(workspace_id);
        let _guard = ctx.rotation_lock.lock().await;

        if ctx.state() == KeyState::Ready && ctx.keys().is_some() {
            return Ok(Arc::clone(&ctx));
        }

        match self.remote.fetch_workspace_keys(workspace_id).await {
            Ok(Some(record)) => self.unlock_remote(&ctx, record).await?,
            Ok(None) => self.generate(&ctx).await?,
            Err(e) if e.is_network() => {
                tracing::warn!(
                    workspace_id = %workspace_id,
                    error = %e,
                    "key service unreachable, falling back to local key store"
                );
                self.unlock_local(&ctx, e)?
            }
            Err(e) => {
                tracing::error!(workspace_id = %workspace_id, error = %e, "failed to fetch workspace keys");
                return Err(e);
            }
        }

        Ok(Arc::clone(&ctx))
    }

    async fn unlock_remote(
        &self,
        ctx: &WorkspaceKeyContext,
        record: WorkspaceKeysResponse,
    ) -> Result<(), CryptoError> {
        let workspace_id = ctx.workspace_id();
        ctx.set_state(KeyState::Unlocking);

        let result = self.unwrap_record(record).await;
        let ring = match result {
            Ok(ring) => ring,
            Err(e) => {
                tracing::error!(workspace_id = %workspace_id, error = %e, "failed to unlock workspace keys");
                ctx.set_state(KeyState::Failed);
                return Err(e);
            }
        };

        self.mirror_locally(workspace_id, &ring);
        tracing::info!(
            workspace_id = %workspace_id,
            history = ring.history().len(),
            "workspace keys unlocked"
        );
        ctx.install(ring);
        ctx.set_state(KeyState::Ready);
        Ok(())
    }

    async fn unwrap_record(&self, record: WorkspaceKeysResponse) -> Result<KeyRing, CryptoError> {
        let password = self.secret.password_for(&self.user_id)?;
        let wrapper = self.wrapper.clone();

        run_blocking(move || {
            let active = unwrap_pair(&wrapper, &record.public_key, &record.private_key, &password)?;
            let mut history = Vec::with_capacity(record.history.len());
            for entry in &record.history {
                match unwrap_pair(&wrapper, &entry.public_key, &entry.private_key, &password) {
                    Ok(keys) => history.push(HistoricalKeyPair {
                        keys,
                        rotated_at: entry.rotated_at,
                    }),
                    Err(e) => {
                        tracing::warn!(error = %e, rotated_at = %entry.rotated_at, "skipping unreadable historical key");
                    }
                }
            }
            Ok(KeyRing::new(active, history))
        })
        .await
    }

    async fn generate(&self, ctx: &WorkspaceKeyContext) -> Result<(), CryptoError> {
        let workspace_id = ctx.workspace_id();
        ctx.set_state(KeyState::Generating);

        let (keys, request) = match self.new_published_pair(workspace_id).await {
            Ok(generated) => generated,
            Err(e) => {
                ctx.set_state(KeyState::Uninitialized);
                return Err(e);
            }
        };

        if let Err(e) = self.remote.persist_keys(&request).await {
            tracing::error!(workspace_id = %workspace_id, error = %e, "failed to publish new workspace keys");
            ctx.set_state(KeyState::Uninitialized);
            return Err(CryptoError::KeyInitialization(e.to_string()));
        }

        let ring = KeyRing::new(keys, Vec::new());
        self.mirror_locally(workspace_id, &ring);
        tracing::info!(
            workspace_id = %workspace_id,
            fingerprint = %ring.active().fingerprint().unwrap_or_default(),
            "generated workspace keys"
        );
        ctx.install(ring);
        ctx.set_state(KeyState::Ready);
        Ok(())
    }

    /// Generate and wrap a pair, returning it with its first-use publish request.
    async fn new_published_pair(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<(KeyPair, PersistKeysRequest), CryptoError> {
        let (keys, wrapped) = self.generate_wrapped().await?;
        let request = PersistKeysRequest {
            workspace_id,
            public_key: keys.public_pem()?,
            private_key: wrapped,
        };
        Ok((keys, request))
    }

    async fn generate_wrapped(&self) -> Result<(KeyPair, WrappedPrivateKeyRecord), CryptoError> {
        let password = self.secret.password_for(&self.user_id)?;
        let wrapper = self.wrapper.clone();
        let bits = self.rsa_key_bits;

        run_blocking(move || {
            let keys = generate_key_pair(bits)?;
            let wrapped = wrapper.wrap(&keys.private_pem()?, &password)?;
            Ok((keys, wrapped))
        })
        .await
    }

    fn unlock_local(
        &self,
        ctx: &WorkspaceKeyContext,
        network_error: CryptoError,
    ) -> Result<(), CryptoError> {
        let workspace_id = ctx.workspace_id();
        ctx.set_state(KeyState::Unlocking);

        let active = match self.local.get_keys(&workspace_id) {
            Ok(Some(keys)) => keys,
            Ok(None) => {
                tracing::warn!(workspace_id = %workspace_id, "no local copy of workspace keys");
                ctx.set_state(KeyState::Uninitialized);
                return Err(network_error);
            }
            Err(e) => {
                tracing::error!(workspace_id = %workspace_id, error = %e, "local key store unreadable");
                ctx.set_state(KeyState::Failed);
                return Err(e);
            }
        };
        let history = match self.local.get_key_history(&workspace_id) {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(workspace_id = %workspace_id, error = %e, "local key history unreadable");
                Vec::new()
            }
        };

        tracing::info!(workspace_id = %workspace_id, "workspace keys loaded from local store");
        ctx.install(KeyRing::new(active, history));
        ctx.set_state(KeyState::Ready);
        Ok(())
    }

    /// Best effort: the local store only matters while offline.
    fn mirror_locally(&self, workspace_id: WorkspaceId, ring: &KeyRing) {
        let result = ring
            .history()
            .iter()
            .try_for_each(|h| self.local.record_history(&workspace_id, &h.keys, h.rotated_at))
            .and_then(|()| self.local.save_keys(&workspace_id, ring.active()));
        if let Err(e) = result {
            tracing::warn!(workspace_id = %workspace_id, error = %e, "failed to mirror keys to local store");
        }
    }

    /// Rotate the workspace to a fresh key pair and re-encrypt its messages.
    ///
    /// A second rotation for the same workspace while one is running fails
    /// with `RotationInProgress`. Messages that cannot be decrypted, and
    /// writes the conversation store rejects, are counted and left as they
    /// were.
    pub async fn rotate(&self, workspace_id: WorkspaceId) -> Result<RotationReport, CryptoError> {
        let ctx = self.context(workspace_id);
        let _guard = match ctx.rotation_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) if ctx.state() == KeyState::Rotating => {
                return Err(CryptoError::RotationInProgress {
                    workspace_id: workspace_id.to_string(),
                })
            }
            Err(_) => {
                return Err(CryptoError::NotReady {
                    state: ctx.state().to_string(),
                })
            }
        };

        let current = match ctx.keys() {
            Some(ring) if ctx.state() == KeyState::Ready => ring,
            _ => {
                return Err(CryptoError::NotReady {
                    state: ctx.state().to_string(),
                })
            }
        };

        ctx.set_state(KeyState::Rotating);
        // Until the request is answered the service may or may not hold the
        // new pair, so an abandoned rotation has to resync via `initialize`.
        let mut abandon = AbandonedRotation::new(&ctx, KeyState::Failed);
        tracing::info!(workspace_id = %workspace_id, "starting key rotation");

        let next = match self.publish_rotation(workspace_id, &current).await {
            Ok(ring) => ring,
            Err(e) => {
                tracing::error!(workspace_id = %workspace_id, error = %e, "key rotation aborted before publish");
                abandon.disarm();
                ctx.set_state(KeyState::Ready);
                return Err(e);
            }
        };

        // From here the service holds the new pair; new messages must use it.
        self.store_rotated_locally(workspace_id, &next);
        ctx.install(next);
        abandon.on_drop(KeyState::Ready);
        let ring = ctx.keys().ok_or_else(|| CryptoError::Rotation("key ring missing".into()))?;

        let outcome = self.reencrypt_workspace(workspace_id, ring).await;
        abandon.disarm();
        match outcome {
            Ok(report) => {
                tracing::info!(
                    workspace_id = %workspace_id,
                    reencrypted = report.reencrypted,
                    already_current = report.already_current,
                    skipped = report.skipped,
                    plaintext = report.plaintext,
                    failed_writes = report.failed_writes,
                    "key rotation complete"
                );
                ctx.set_state(KeyState::Ready);
                Ok(report)
            }
            Err(e) => {
                tracing::error!(workspace_id = %workspace_id, error = %e, "re-encryption interrupted");
                ctx.set_state(KeyState::Failed);
                Err(CryptoError::Rotation(e.to_string()))
            }
        }
    }

    /// Record the retired pair with the service's rotation time, then make
    /// the new pair current. Local failures are logged only.
    fn store_rotated_locally(&self, workspace_id: WorkspaceId, ring: &KeyRing) {
        let result = match ring.history().first() {
            Some(retired) => {
                self.local
                    .record_history(&workspace_id, &retired.keys, retired.rotated_at)
            }
            None => Ok(()),
        }
        .and_then(|()| self.local.save_keys(&workspace_id, ring.active()));
        if let Err(e) = result {
            tracing::warn!(workspace_id = %workspace_id, error = %e, "failed to store rotated keys locally");
        }
    }

    async fn publish_rotation(
        &self,
        workspace_id: WorkspaceId,
        current: &KeyRing,
    ) -> Result<KeyRing, CryptoError> {
        let (next, wrapped) = self.generate_wrapped().await?;
        let request = RotateKeysRequest {
            new_public_key: next.public_pem()?,
            new_private_key: wrapped,
        };
        let response = self.remote.rotate_keys(workspace_id, &request).await?;

        if import_public_key(&response.new_public_key)? != next.public_key {
            return Err(CryptoError::Rotation(
                "key service activated a different public key".into(),
            ));
        }
        Ok(current.rotated(next, response.rotated_at))
    }

    async fn reencrypt_workspace(
        &self,
        workspace_id: WorkspaceId,
        ring: Arc<KeyRing>,
    ) -> Result<RotationReport, CryptoError> {
        let mut report = RotationReport::default();

        for conversation_id in self.conversations.list_conversations(workspace_id).await? {
            let messages = self.conversations.list_messages(conversation_id).await?;
            for message in messages {
                let message_id = message.id;
                let ring = Arc::clone(&ring);
                match run_blocking(move || Ok(migrate(&message, &ring))).await? {
                    Migration::Rewrite(content) => {
                        match self
                            .conversations
                            .update_message_content(message_id, &content)
                            .await
                        {
                            Ok(()) => report.reencrypted += 1,
                            Err(e) => {
                                tracing::warn!(message_id = %message_id, error = %e, "failed to write re-encrypted message");
                                report.failed_writes += 1;
                            }
                        }
                    }
                    Migration::AlreadyCurrent => report.already_current += 1,
                    Migration::Undecryptable => {
                        tracing::debug!(message_id = %message_id, "message left under unknown key");
                        report.skipped += 1;
                    }
                    Migration::Plaintext => report.plaintext += 1,
                }
            }
        }

        Ok(report)
    }

    /// Drop the in-memory context and the local copy of a workspace's keys.
    pub fn forget_workspace(&self, workspace_id: WorkspaceId) -> Result<(), CryptoError> {
        self.contexts.remove(&workspace_id);
        self.local.delete_keys(&workspace_id)
    }
}

/// Moves a context out of `Rotating` if the rotation future is dropped
/// before it finishes.
struct AbandonedRotation<'a> {
    ctx: &'a WorkspaceKeyContext,
    state: Option<KeyState>,
}

impl<'a> AbandonedRotation<'a> {
    fn new(ctx: &'a WorkspaceKeyContext, state: KeyState) -> Self {
        Self {
            ctx,
            state: Some(state),
        }
    }

    fn on_drop(&mut self, state: KeyState) {
        self.state = Some(state);
    }

    fn disarm(&mut self) {
        self.state = None;
    }
}

impl Drop for AbandonedRotation<'_> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            tracing::warn!(
                workspace_id = %self.ctx.workspace_id(),
                state = %state,
                "key rotation abandoned"
            );
            self.ctx.set_state(state);
        }
    }
}

fn unwrap_pair(
    wrapper: &KeyWrapper,
    public_pem: &str,
    record: &WrappedPrivateKeyRecord,
    password: &Zeroizing<String>,
) -> Result<KeyPair, CryptoError> {
    let private_pem = wrapper.unwrap(record, password)?;
    KeyPair::from_pem(public_pem, &private_pem)
}

fn migrate(message: &Message, ring: &KeyRing) -> Migration {
    let packet = match MessageContent::parse(&message.content) {
        MessageContent::Plaintext(_) => return Migration::Plaintext,
        MessageContent::Encrypted(packet) => packet,
    };
    if decrypt_hybrid(&packet, &ring.active().private_key).is_ok() {
        return Migration::AlreadyCurrent;
    }

    let previous = ring.history().iter().map(|h| &h.keys.private_key);
    let plaintext = match decrypt_with_fallback(&packet, previous) {
        Ok(text) => text,
        Err(_) => return Migration::Undecryptable,
    };

    match encrypt_hybrid(&plaintext, &ring.active().public_key).and_then(|p| p.to_json()) {
        Ok(content) => Migration::Rewrite(content),
        Err(e) => {
            tracing::warn!(message_id = %message.id, error = %e, "failed to re-encrypt message");
            Migration::Undecryptable
        }
    }
}

/// Run CPU-heavy key work off the async executor.
async fn run_blocking<T, F>(f: F) -> Result<T, CryptoError>
where
    F: FnOnce() -> Result<T, CryptoError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CryptoError::TaskFailed(e.to_string()))?
}
