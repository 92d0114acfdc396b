//! Symmetric payload encryption using AES-256-GCM.
//!
//! Every call draws a fresh random 96-bit IV; unless the caller supplies one,
//! a fresh 256-bit key is generated too and handed back so it can be wrapped
//! for a recipient. The GCM tag is appended to the ciphertext, so any
//! modification of ciphertext, key, or IV surfaces as
//! `CryptoError::AuthenticationFailure`.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

pub const IV_SIZE: usize = 12; // 96-bit nonce for AES-256-GCM
pub const KEY_SIZE: usize = 32; // 256-bit key
pub const TAG_SIZE: usize = 16;

/// A 32-byte AES-256 key that is securely zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    key: [u8; KEY_SIZE],
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl SymmetricKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Build a key from raw bytes. Fails unless exactly 32 bytes are given.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "symmetric key must be {KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self { key })
    }

    pub(crate) fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

/// Output of `encrypt_symmetric`: `ciphertext || tag`, the IV used, and the key.
#[derive(Debug)]
pub struct SymmetricCiphertext {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_SIZE],
    pub key: SymmetricKey,
}

/// Encrypt `plaintext` under AES-256-GCM with a fresh IV.
///
/// When `key` is `None` a fresh key is generated and returned in the output.
pub fn encrypt_symmetric(
    plaintext: &[u8],
    key: Option<&SymmetricKey>,
) -> Result<SymmetricCiphertext, CryptoError> {
    let key = match key {
        Some(k) => k.clone(),
        None => SymmetricKey::generate(),
    };

    let mut iv = [0u8; IV_SIZE];
    rand::rng().fill_bytes(&mut iv);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(format!("encryption failed: {e}")))?;

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad: &[],
            },
        )
        .map_err(|_| CryptoError::InvalidKey("encryption failed".into()))?;

    Ok(SymmetricCiphertext {
        ciphertext,
        iv,
        key,
    })
}

/// Decrypt `ciphertext || tag` with the given key and IV.
pub fn decrypt_symmetric(
    ciphertext: &[u8],
    key: &SymmetricKey,
    iv: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != IV_SIZE {
        return Err(CryptoError::DecryptionFailure(format!(
            "iv must be {IV_SIZE} bytes, got {}",
            iv.len()
        )));
    }
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::AuthenticationFailure);
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(format!("decryption failed: {e}")))?;

    cipher
        .decrypt(
            Nonce::from_slice(iv),
            Payload {
                msg: ciphertext,
                aad: &[],
            },
        )
        .map_err(|_| CryptoError::AuthenticationFailure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_generates_key_when_none_supplied() {
        let out = encrypt_symmetric(b"hello world", None).unwrap();
        assert_eq!(out.iv.len(), IV_SIZE);
        assert_eq!(out.ciphertext.len(), b"hello world".len() + TAG_SIZE);
    }

    #[test]
    fn decrypt_roundtrip_with_generated_key() {
        let original = b"the quick brown fox jumps over the lazy dog";
        let out = encrypt_symmetric(original, None).unwrap();
        let decrypted = decrypt_symmetric(&out.ciphertext, &out.key, &out.iv).unwrap();
        assert_eq!(decrypted, original);
    }

    #[test]
    fn caller_supplied_key_is_used_and_returned() {
        let key = SymmetricKey::from_slice(&[7u8; 32]).unwrap();
        let out = encrypt_symmetric(b"payload", Some(&key)).unwrap();
        assert_eq!(out.key.as_bytes(), key.as_bytes());
        let decrypted = decrypt_symmetric(&out.ciphertext, &key, &out.iv).unwrap();
        assert_eq!(decrypted, b"payload");
    }

    #[test]
    fn iv_is_fresh_per_call_even_with_same_key() {
        let key = SymmetricKey::generate();
        let a = encrypt_symmetric(b"same", Some(&key)).unwrap();
        let b = encrypt_symmetric(b"same", Some(&key)).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn generated_keys_differ() {
        let a = encrypt_symmetric(b"x", None).unwrap();
        let b = encrypt_symmetric(b"x", None).unwrap();
        assert_ne!(a.key.as_bytes(), b.key.as_bytes());
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let out = encrypt_symmetric(b"secret data", None).unwrap();
        let wrong = SymmetricKey::from_slice(&[0xAB; 32]).unwrap();
        let result = decrypt_symmetric(&out.ciphertext, &wrong, &out.iv);
        assert!(matches!(result, Err(CryptoError::AuthenticationFailure)));
    }

    #[test]
    fn wrong_iv_fails_authentication() {
        let out = encrypt_symmetric(b"secret data", None).unwrap();
        let mut iv = out.iv;
        iv[0] ^= 0x01;
        let result = decrypt_symmetric(&out.ciphertext, &out.key, &iv);
        assert!(matches!(result, Err(CryptoError::AuthenticationFailure)));
    }

    #[test]
    fn every_flipped_bit_is_detected() {
        let out = encrypt_symmetric(b"tamper me", None).unwrap();
        for byte in 0..out.ciphertext.len() {
            for bit in 0..8 {
                let mut tampered = out.ciphertext.clone();
                tampered[byte] ^= 1 << bit;
                let result = decrypt_symmetric(&tampered, &out.key, &out.iv);
                assert!(
                    matches!(result, Err(CryptoError::AuthenticationFailure)),
                    "flip at byte {byte} bit {bit} was not detected"
                );
            }
        }
    }

    #[test]
    fn truncated_ciphertext_fails_authentication() {
        let key = SymmetricKey::generate();
        let result = decrypt_symmetric(&[0u8; 5], &key, &[0u8; IV_SIZE]);
        assert!(matches!(result, Err(CryptoError::AuthenticationFailure)));
    }

    #[test]
    fn bad_iv_length_is_rejected() {
        let out = encrypt_symmetric(b"x", None).unwrap();
        let result = decrypt_symmetric(&out.ciphertext, &out.key, &[0u8; 8]);
        assert!(matches!(result, Err(CryptoError::DecryptionFailure(_))));
    }

    #[test]
    fn key_from_slice_rejects_wrong_length() {
        assert!(matches!(
            SymmetricKey::from_slice(&[0u8; 16]),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let out = encrypt_symmetric(b"", None).unwrap();
        let decrypted = decrypt_symmetric(&out.ciphertext, &out.key, &out.iv).unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = SymmetricKey::from_slice(&[0x5A; 32]).unwrap();
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("5a"));
    }
}
