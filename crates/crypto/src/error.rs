//! Error types for the taskvault-crypto crate.

use thiserror::Error;

/// Errors that can occur during key management and message encryption.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A key could not be imported from its textual encoding.
    #[error("malformed key: {0}")]
    KeyFormat(String),

    /// The provided key material or parameters are invalid (wrong length, too small, etc.).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Ciphertext failed authentication (tampered data, or mismatched key/iv).
    #[error("ciphertext authentication failed")]
    AuthenticationFailure,

    /// Decryption failed for a reason other than authentication (wrong private key,
    /// unsupported packet version, malformed packet fields).
    #[error("decryption failed: {0}")]
    DecryptionFailure(String),

    /// Every candidate key was tried and none could decrypt the packet.
    #[error("no matching key among {tried} candidates")]
    NoMatchingKey { tried: usize },

    /// A wrapped private key could not be unwrapped (wrong password or corrupted record).
    #[error("failed to unlock private key")]
    UnlockFailure,

    /// Keys were generated locally but could not be published to the key service.
    #[error("key initialization failed: {0}")]
    KeyInitialization(String),

    /// The remote key service could not be reached.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The remote key service answered with an error.
    #[error("key service error ({status}): {message}")]
    RemoteError { status: u16, message: String },

    /// Key rotation failed.
    #[error("key rotation failed: {0}")]
    Rotation(String),

    /// Another rotation is already running for the workspace.
    #[error("key rotation already in progress for workspace {workspace_id}")]
    RotationInProgress { workspace_id: String },

    /// The workspace keys are not in a state that allows the operation.
    #[error("workspace keys not ready (state: {state})")]
    NotReady { state: String },

    /// Local database storage error.
    #[error("storage error: {0}")]
    StorageError(String),

    /// OS keychain operation failed.
    #[error("keychain error: {0}")]
    KeychainError(String),

    /// No credential found in OS keychain for the requested entry.
    #[error("keychain entry not found")]
    KeychainEntryNotFound,

    /// OS keychain is not available on this platform; callers fall back to a passphrase.
    #[error("keychain unavailable")]
    KeychainUnavailable,

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// A blocking worker running key generation or derivation did not complete.
    #[error("background task failed: {0}")]
    TaskFailed(String),

    /// Configuration could not be loaded or is invalid.
    #[error("config error: {0}")]
    ConfigError(String),
}

impl CryptoError {
    /// Whether the error means the key service was unreachable, so a local
    /// fallback is appropriate.
    pub fn is_network(&self) -> bool {
        matches!(self, CryptoError::NetworkUnavailable(_))
    }
}

impl From<rusqlite::Error> for CryptoError {
    fn from(err: rusqlite::Error) -> Self {
        CryptoError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for CryptoError {
    fn from(err: serde_json::Error) -> Self {
        CryptoError::SerializationError(err.to_string())
    }
}

impl From<CryptoError> for taskvault_shared::error::TaskVaultError {
    fn from(err: CryptoError) -> Self {
        taskvault_shared::error::TaskVaultError::Crypto(err.to_string())
    }
}

impl From<keyring::Error> for CryptoError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::NoEntry => CryptoError::KeychainEntryNotFound,
            keyring::Error::NoStorageAccess(_) | keyring::Error::PlatformFailure(_) => {
                CryptoError::KeychainUnavailable
            }
            other => CryptoError::KeychainError(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for CryptoError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            return CryptoError::NetworkUnavailable(err.to_string());
        }
        match err.status() {
            Some(status) if status.is_server_error() => {
                CryptoError::NetworkUnavailable(err.to_string())
            }
            Some(status) => CryptoError::RemoteError {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None if err.is_decode() => CryptoError::SerializationError(err.to_string()),
            None => CryptoError::NetworkUnavailable(err.to_string()),
        }
    }
}
