//! End-to-end encrypted workspace messaging.
//!
//! Hybrid RSA-OAEP + AES-256-GCM message packets, password-wrapped private
//! keys published to a key service, per-workspace key lifecycle with
//! rotation and legacy-key fallback, an encrypted local key store (SQLCipher)
//! for offline use, and decryption of real-time change events.

pub mod asymmetric;
pub mod config;
pub mod context;
pub mod error;
pub mod hybrid;
pub mod lifecycle;
pub mod master_key;
pub mod remote;
pub mod storage;
pub mod symmetric;
pub mod sync;
pub mod wrapping;

#[cfg(test)]
pub(crate) mod test_support;

pub use asymmetric::KeyPair;
pub use config::CryptoConfig;
pub use context::{KeyRing, KeyState, WorkspaceKeyContext};
pub use error::CryptoError;
pub use hybrid::EncryptedMessagePacket;
pub use lifecycle::{KeyLifecycleManager, RotationReport};
pub use storage::LocalKeyStore;
