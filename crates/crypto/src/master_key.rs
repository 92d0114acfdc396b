//! Unlocking the local key store.
//!
//! The store is a SQLCipher database. Its key is derived with HKDF-SHA256
//! from a 32-byte master key, which either lives in the OS keychain or is
//! derived from a user passphrase with Argon2id.

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;
use crate::wrapping::{KdfParams, KeyWrapper, SALT_SIZE};

const KEYCHAIN_SERVICE: &str = "com.taskvault.keys";
const KEYCHAIN_ACCOUNT: &str = "local_store_master_key";
const STORE_KEY_INFO: &[u8] = b"taskvault-local-key-store-v1";
const SQLITE_NOTADB: i32 = 26;

/// A 32-byte master key, wiped from memory on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; 32],
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl MasterKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// Derive a master key from a passphrase and a salt of at least 16 bytes.
    pub fn from_passphrase(
        passphrase: &str,
        salt: &[u8],
        kdf: &KdfParams,
    ) -> Result<Self, CryptoError> {
        let derived = KeyWrapper::new(*kdf).derive_key(passphrase, salt)?;
        Ok(Self {
            key: *derived.as_bytes(),
        })
    }

    /// Fetch the master key from the OS keychain, creating and storing a
    /// random one on first use.
    pub fn from_keychain() -> Result<Self, CryptoError> {
        let entry = keyring::Entry::new(KEYCHAIN_SERVICE, KEYCHAIN_ACCOUNT)
            .map_err(|_| CryptoError::KeychainUnavailable)?;

        match entry.get_password() {
            Ok(stored) => {
                let stored = Zeroizing::new(stored);
                let bytes = Zeroizing::new(hex_decode(&stored).ok_or_else(|| {
                    CryptoError::KeychainError("malformed master key in keychain".into())
                })?);
                let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                    CryptoError::KeychainError("malformed master key in keychain".into())
                })?;
                Ok(Self { key })
            }
            Err(keyring::Error::NoEntry) => {
                let mut key = [0u8; 32];
                rand::rng().fill_bytes(&mut key);
                let encoded = Zeroizing::new(hex_encode(&key));
                entry.set_password(&encoded)?;
                tracing::info!("created local key store master key in OS keychain");
                Ok(Self { key })
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Where the master key for the local store comes from.
pub enum MasterKeySource {
    Keychain,
    Passphrase {
        passphrase: Zeroizing<String>,
        salt: [u8; SALT_SIZE],
    },
}

impl std::fmt::Debug for MasterKeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MasterKeySource::Keychain => f.write_str("Keychain"),
            MasterKeySource::Passphrase { .. } => f.write_str("Passphrase([REDACTED])"),
        }
    }
}

impl MasterKeySource {
    pub fn resolve(&self, kdf: &KdfParams) -> Result<MasterKey, CryptoError> {
        match self {
            MasterKeySource::Keychain => MasterKey::from_keychain(),
            MasterKeySource::Passphrase { passphrase, salt } => {
                MasterKey::from_passphrase(passphrase, salt, kdf)
            }
        }
    }
}

/// SQLCipher raw key, kept in the `x'..'` form `PRAGMA key` expects.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct StoreKey {
    pragma_value: String,
}

impl std::fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreKey")
            .field("pragma_value", &"[REDACTED]")
            .finish()
    }
}

impl StoreKey {
    pub fn derive(master_key: &MasterKey) -> Result<Self, CryptoError> {
        let hk = Hkdf::<Sha256>::new(None, master_key.as_bytes());
        let mut okm = Zeroizing::new([0u8; 32]);
        hk.expand(STORE_KEY_INFO, &mut okm[..])
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

        let hex = Zeroizing::new(hex_encode(&okm[..]));
        Ok(Self {
            pragma_value: format!("x'{}'", hex.as_str()),
        })
    }

    pub fn as_pragma_value(&self) -> &str {
        &self.pragma_value
    }

    /// Key an open connection. Must run before any other statement.
    pub fn apply(&self, conn: &rusqlite::Connection) -> Result<(), CryptoError> {
        // A bound parameter would be treated as a passphrase and run through
        // SQLCipher's own KDF, so the raw-key literal is inlined.
        conn.execute_batch(&format!("PRAGMA key = \"{}\";", self.pragma_value))?;

        let cipher_version: String = conn
            .pragma_query_value(None, "cipher_version", |row| row.get(0))
            .map_err(|_| CryptoError::StorageError("SQLCipher not available".into()))?;
        if cipher_version.is_empty() {
            return Err(CryptoError::StorageError("SQLCipher not available".into()));
        }

        // First real read; fails here if the key is wrong.
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _) if err.extended_code == SQLITE_NOTADB => {
                CryptoError::UnlockFailure
            }
            other => other.into(),
        })?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }
}

/// Whether the database behind `conn` is unreadable without a key.
pub fn is_encrypted(conn: &rusqlite::Connection) -> Result<bool, CryptoError> {
    match conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    }) {
        Ok(_) => Ok(false),
        Err(rusqlite::Error::SqliteFailure(err, _)) if err.extended_code == SQLITE_NOTADB => {
            Ok(true)
        }
        Err(e) => Err(e.into()),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
