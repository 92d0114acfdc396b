//! Password-derived wrapping of private keys for storage on the key service.
//!
//! A 256-bit wrapping key is derived from the password and a fresh 16-byte
//! salt with Argon2id, then the PKCS#8 PEM text is sealed with AES-256-GCM
//! under a fresh IV. The server only ever stores the resulting
//! `{ encryptedPrivateKey, salt, iv }` record.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use taskvault_shared::ids::UserId;
use zeroize::Zeroizing;

pub use taskvault_shared::api::keys::WrappedPrivateKeyRecord;

use crate::error::CryptoError;
use crate::symmetric::{decrypt_symmetric, encrypt_symmetric, SymmetricKey, KEY_SIZE};

pub const SALT_SIZE: usize = 16;

const DETERMINISTIC_SECRET_INFO: &[u8] = b"taskvault-key-wrap-v1";

/// Argon2id cost parameters. Records can only be unwrapped with the same
/// parameters that wrapped them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

fn default_memory_kib() -> u32 {
    65536
}
fn default_iterations() -> u32 {
    3
}
fn default_parallelism() -> u32 {
    4
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
        }
    }
}

impl KdfParams {
    fn argon2(&self) -> Result<argon2::Argon2<'static>, CryptoError> {
        let params = argon2::Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(argon2::Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            params,
        ))
    }
}

/// Wraps and unwraps private key PEMs under password-derived keys.
#[derive(Debug, Clone, Default)]
pub struct KeyWrapper {
    params: KdfParams,
}

impl KeyWrapper {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    /// Derive the wrapping key for `password` and `salt`.
    pub fn derive_key(&self, password: &str, salt: &[u8]) -> Result<SymmetricKey, CryptoError> {
        if salt.len() < SALT_SIZE {
            return Err(CryptoError::InvalidKey("salt too short".into()));
        }
        let mut output = Zeroizing::new([0u8; KEY_SIZE]);
        self.params
            .argon2()?
            .hash_password_into(password.as_bytes(), salt, &mut output[..])
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(SymmetricKey::from_bytes(*output))
    }

    /// Encrypt a private key PEM under a key derived from `password` and a fresh salt.
    pub fn wrap(
        &self,
        private_key_pem: &str,
        password: &str,
    ) -> Result<WrappedPrivateKeyRecord, CryptoError> {
        let salt = generate_salt();
        let key = self.derive_key(password, &salt)?;
        let sealed = encrypt_symmetric(private_key_pem.as_bytes(), Some(&key))?;

        Ok(WrappedPrivateKeyRecord {
            encrypted_private_key: BASE64.encode(&sealed.ciphertext),
            salt: BASE64.encode(salt),
            iv: BASE64.encode(sealed.iv),
        })
    }

    /// Recover the private key PEM. Any mismatch (wrong password, wrong salt,
    /// corrupted record) is reported as `UnlockFailure`.
    pub fn unwrap(
        &self,
        record: &WrappedPrivateKeyRecord,
        password: &str,
    ) -> Result<Zeroizing<String>, CryptoError> {
        let ciphertext = decode(&record.encrypted_private_key)?;
        let salt = decode(&record.salt)?;
        let iv = decode(&record.iv)?;
        if salt.len() < SALT_SIZE {
            return Err(CryptoError::UnlockFailure);
        }

        let key = self.derive_key(password, &salt)?;
        let plaintext =
            Zeroizing::new(decrypt_symmetric(&ciphertext, &key, &iv).map_err(|_| CryptoError::UnlockFailure)?);

        std::str::from_utf8(&plaintext)
            .map(|pem| Zeroizing::new(pem.to_string()))
            .map_err(|_| CryptoError::UnlockFailure)
    }
}

/// Wrap a private key PEM with the default Argon2id parameters.
pub fn encrypt_private_key_with_password(
    private_key_pem: &str,
    password: &str,
) -> Result<WrappedPrivateKeyRecord, CryptoError> {
    KeyWrapper::default().wrap(private_key_pem, password)
}

/// Unwrap a private key PEM with the default Argon2id parameters.
pub fn decrypt_private_key_with_password(
    encrypted_private_key: &str,
    password: &str,
    salt: &str,
    iv: &str,
) -> Result<Zeroizing<String>, CryptoError> {
    let record = WrappedPrivateKeyRecord {
        encrypted_private_key: encrypted_private_key.to_string(),
        salt: salt.to_string(),
        iv: iv.to_string(),
    };
    KeyWrapper::default().unwrap(&record, password)
}

/// Generate a random 16-byte salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::rng().fill_bytes(&mut salt);
    salt
}

fn decode(value: &str) -> Result<Vec<u8>, CryptoError> {
    BASE64.decode(value).map_err(|_| CryptoError::UnlockFailure)
}

/// Source of the password used to wrap a user's private keys.
pub trait WrappingSecret: Send + Sync {
    fn password_for(&self, user_id: &UserId) -> Result<Zeroizing<String>, CryptoError>;
}

/// Derives the wrapping password from the user id alone, so any device can
/// unlock the keys without prompting.
///
/// Anyone holding both the wrapped record and the user id can reproduce this
/// password; confidentiality rests on the record staying private.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicSecret;

impl WrappingSecret for DeterministicSecret {
    fn password_for(&self, user_id: &UserId) -> Result<Zeroizing<String>, CryptoError> {
        let hk = Hkdf::<Sha256>::new(None, user_id.0.as_bytes());
        let mut okm = Zeroizing::new([0u8; 32]);
        hk.expand(DETERMINISTIC_SECRET_INFO, &mut okm[..])
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Zeroizing::new(
            okm.iter().map(|b| format!("{b:02x}")).collect(),
        ))
    }
}

/// A caller-supplied passphrase, identical for every user it is asked about.
pub struct PassphraseSecret {
    passphrase: Zeroizing<String>,
}

impl PassphraseSecret {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Zeroizing::new(passphrase.into()),
        }
    }
}

impl std::fmt::Debug for PassphraseSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassphraseSecret")
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}

impl WrappingSecret for PassphraseSecret {
    fn password_for(&self, _user_id: &UserId) -> Result<Zeroizing<String>, CryptoError> {
        Ok(self.passphrase.clone())
    }
}
