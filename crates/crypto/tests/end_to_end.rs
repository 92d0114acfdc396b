//! Full client flow against a real key service bound to a local port.

use std::sync::Arc;

use taskvault_crypto::config::CryptoConfig;
use taskvault_crypto::context::KeyState;
use taskvault_crypto::error::CryptoError;
use taskvault_crypto::hybrid::{decrypt_hybrid, decrypt_with_fallback, EncryptedMessagePacket};
use taskvault_crypto::lifecycle::KeyLifecycleManager;
use taskvault_crypto::master_key::MasterKeySource;
use taskvault_crypto::remote::{ConversationStore, HttpKeyService};
use taskvault_crypto::storage::LocalKeyStore;
use taskvault_crypto::sync::{MessageSync, SyncUpdate};
use taskvault_crypto::wrapping::KdfParams;
use taskvault_server::config::ServerConfig;
use taskvault_server::router::build_router;
use taskvault_server::state::AppState;
use taskvault_shared::api::realtime::{ChangeEvent, ChangeEventType};
use taskvault_shared::ids::{UserId, WorkspaceId};
use zeroize::Zeroizing;

fn fast_kdf() -> KdfParams {
    KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    }
}

async fn spawn_server() -> String {
    let app = build_router(AppState::new(ServerConfig::default()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A URL nothing is listening on.
async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

fn config(url: &str) -> CryptoConfig {
    CryptoConfig {
        kdf: fast_kdf(),
        key_service_url: url.to_string(),
        request_timeout_secs: 5,
        ..CryptoConfig::default()
    }
}

fn open_store(dir: &tempfile::TempDir) -> Arc<LocalKeyStore> {
    let cfg = CryptoConfig {
        key_store_path: dir.path().join("keys.db"),
        ..config("http://unused")
    };
    let source = MasterKeySource::Passphrase {
        passphrase: Zeroizing::new("device passphrase".to_string()),
        salt: [9u8; 16],
    };
    Arc::new(LocalKeyStore::open_with_config(&cfg, &source).unwrap())
}

struct Client {
    http: Arc<HttpKeyService>,
    manager: KeyLifecycleManager,
}

fn client(url: &str, user: UserId, store: Arc<LocalKeyStore>) -> Client {
    let cfg = config(url);
    let http = Arc::new(HttpKeyService::new(&cfg, user).unwrap());
    let manager = KeyLifecycleManager::new(user, &cfg, http.clone(), http.clone(), store);
    Client { http, manager }
}

#[tokio::test]
async fn first_use_then_rotation_keeps_history_readable() {
    let url = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let user = UserId::new();
    let ws = WorkspaceId::new();
    let c = client(&url, user, open_store(&dir));

    let ctx = c.manager.initialize(ws).await.unwrap();
    assert_eq!(ctx.state(), KeyState::Ready);
    let first_pair = c.manager.active_keys(ws).unwrap();

    let conversation = c.http.create_conversation(ws).await.unwrap();
    let sent = c
        .http
        .send_message(conversation, &ctx.encrypt_content("hello workspace").unwrap())
        .await
        .unwrap();
    c.http
        .send_message(conversation, "left over from before encryption")
        .await
        .unwrap();

    let report = c.manager.rotate(ws).await.unwrap();
    assert_eq!(report.reencrypted, 1);
    assert_eq!(report.plaintext, 1);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.failed_writes, 0);

    let second_pair = c.manager.active_keys(ws).unwrap();
    assert_ne!(first_pair.public_pem().unwrap(), second_pair.public_pem().unwrap());
    let history = c.manager.history_keys(ws);
    assert_eq!(history.len(), 1);
    assert_eq!(
        history[0].keys.public_pem().unwrap(),
        first_pair.public_pem().unwrap()
    );

    // The stored message is now under the new key only.
    let messages = c.http.list_messages(conversation).await.unwrap();
    let rewritten = messages.iter().find(|m| m.id == sent.id).unwrap();
    let packet: EncryptedMessagePacket = serde_json::from_str(&rewritten.content).unwrap();
    assert_eq!(
        decrypt_hybrid(&packet, &second_pair.private_key).unwrap(),
        "hello workspace"
    );
    assert_eq!(ctx.decrypt(&rewritten.content).unwrap(), "hello workspace");
    assert_eq!(messages[1].content, "left over from before encryption");
}

#[tokio::test]
async fn packet_from_before_rotation_decrypts_through_fallback() {
    let url = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let ws = WorkspaceId::new();
    let c = client(&url, UserId::new(), open_store(&dir));

    let ctx = c.manager.initialize(ws).await.unwrap();
    let pair_a = c.manager.active_keys(ws).unwrap();
    let p1 = ctx.encrypt("hello workspace").unwrap();
    assert_eq!(decrypt_hybrid(&p1, &pair_a.private_key).unwrap(), "hello workspace");

    c.manager.rotate(ws).await.unwrap();
    let pair_b = c.manager.active_keys(ws).unwrap();

    let plaintext =
        decrypt_with_fallback(&p1, [&pair_b.private_key, &pair_a.private_key]).unwrap();
    assert_eq!(plaintext, "hello workspace");
    assert_eq!(ctx.decrypt(&p1.to_json().unwrap()).unwrap(), "hello workspace");
}

#[tokio::test]
async fn concurrent_rotations_add_one_history_entry() {
    let url = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let user = UserId::new();
    let ws = WorkspaceId::new();
    let c = client(&url, user, open_store(&dir));
    c.manager.initialize(ws).await.unwrap();

    let (first, second) = tokio::join!(c.manager.rotate(ws), c.manager.rotate(ws));
    assert!(first.is_ok());
    assert!(matches!(
        second,
        Err(CryptoError::RotationInProgress { .. })
    ));

    // A fresh device sees the service's view: one rotation, one history entry.
    let other_dir = tempfile::tempdir().unwrap();
    let fresh = client(&url, user, open_store(&other_dir));
    fresh.manager.initialize(ws).await.unwrap();
    assert_eq!(fresh.manager.history_keys(ws).len(), 1);
    assert_eq!(
        fresh.manager.active_keys(ws).unwrap().public_pem().unwrap(),
        c.manager.active_keys(ws).unwrap().public_pem().unwrap()
    );
}

#[tokio::test]
async fn second_device_unlocks_published_keys() {
    let url = spawn_server().await;
    let user = UserId::new();
    let ws = WorkspaceId::new();

    let dir_one = tempfile::tempdir().unwrap();
    let one = client(&url, user, open_store(&dir_one));
    let ctx_one = one.manager.initialize(ws).await.unwrap();
    let content = ctx_one.encrypt_content("from device one").unwrap();

    let dir_two = tempfile::tempdir().unwrap();
    let two = client(&url, user, open_store(&dir_two));
    let ctx_two = two.manager.initialize(ws).await.unwrap();
    assert_eq!(ctx_two.decrypt(&content).unwrap(), "from device one");
}

#[tokio::test]
async fn offline_start_uses_local_store() {
    let url = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let user = UserId::new();
    let ws = WorkspaceId::new();

    let content = {
        let online = client(&url, user, open_store(&dir));
        let ctx = online.manager.initialize(ws).await.unwrap();
        ctx.encrypt_content("cached").unwrap()
    };

    let offline = client(&dead_url().await, user, open_store(&dir));
    let ctx = offline.manager.initialize(ws).await.unwrap();
    assert_eq!(ctx.state(), KeyState::Ready);
    assert_eq!(ctx.decrypt(&content).unwrap(), "cached");
}

#[tokio::test]
async fn offline_without_local_copy_reports_network_error() {
    let dir = tempfile::tempdir().unwrap();
    let ws = WorkspaceId::new();
    let offline = client(&dead_url().await, UserId::new(), open_store(&dir));

    let err = offline.manager.initialize(ws).await.unwrap_err();
    assert!(err.is_network());
    assert_eq!(offline.manager.state(ws), KeyState::Uninitialized);
}

#[tokio::test]
async fn realtime_events_decrypt_after_rotation() {
    let url = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let ws = WorkspaceId::new();
    let c = client(&url, UserId::new(), open_store(&dir));

    let ctx = c.manager.initialize(ws).await.unwrap();
    let conversation = c.http.create_conversation(ws).await.unwrap();
    let before = c
        .http
        .send_message(conversation, &ctx.encrypt_content("before").unwrap())
        .await
        .unwrap();
    c.manager.rotate(ws).await.unwrap();
    let after = c
        .http
        .send_message(conversation, &ctx.encrypt_content("after").unwrap())
        .await
        .unwrap();

    let mut sync = MessageSync::from_config(ctx.clone(), &config(&url)).for_conversation(conversation);
    let mut texts = Vec::new();
    for record in [before, after] {
        for update in sync.handle_event(ChangeEvent {
            event_type: ChangeEventType::Insert,
            record,
        }) {
            if let SyncUpdate::Message { text, .. } = update {
                texts.push(text);
            }
        }
    }
    assert_eq!(texts, vec!["before", "after"]);
}
