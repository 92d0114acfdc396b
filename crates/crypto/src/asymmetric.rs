//! RSA key pairs for wrapping per-message symmetric keys.
//!
//! Keys travel as PEM text: SPKI (`BEGIN PUBLIC KEY`) for public keys and
//! PKCS#8 (`BEGIN PRIVATE KEY`) for private keys. Encryption is RSA-OAEP with
//! SHA-256 and is only ever applied to short payloads such as a 32-byte
//! AES key, never to message bodies.

use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use taskvault_shared::constants::MIN_RSA_KEY_BITS;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// A workspace key pair. The private half is zeroized on drop by `rsa`.
#[derive(Clone, PartialEq)]
pub struct KeyPair {
    pub public_key: RsaPublicKey,
    pub private_key: RsaPrivateKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &fingerprint(&self.public_key).unwrap_or_default())
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

impl KeyPair {
    /// Rebuild a pair from its PEM encodings, checking that the halves match.
    pub fn from_pem(public_pem: &str, private_pem: &str) -> Result<Self, CryptoError> {
        let public_key = import_public_key(public_pem)?;
        let private_key = import_private_key(private_pem)?;
        if private_key.to_public_key() != public_key {
            return Err(CryptoError::KeyFormat(
                "public key does not match private key".into(),
            ));
        }
        Ok(Self {
            public_key,
            private_key,
        })
    }

    pub fn public_pem(&self) -> Result<String, CryptoError> {
        export_public_key(&self.public_key)
    }

    pub fn private_pem(&self) -> Result<Zeroizing<String>, CryptoError> {
        export_private_key(&self.private_key)
    }

    /// Short identifier of the public half, safe to log.
    pub fn fingerprint(&self) -> Result<String, CryptoError> {
        fingerprint(&self.public_key)
    }
}

/// Generate a fresh RSA key pair with a modulus of `bits` bits.
pub fn generate_key_pair(bits: usize) -> Result<KeyPair, CryptoError> {
    if bits < MIN_RSA_KEY_BITS {
        return Err(CryptoError::InvalidKey(format!(
            "RSA modulus must be at least {MIN_RSA_KEY_BITS} bits, got {bits}"
        )));
    }
    let private_key = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| CryptoError::InvalidKey(format!("key generation failed: {e}")))?;
    let public_key = private_key.to_public_key();
    Ok(KeyPair {
        public_key,
        private_key,
    })
}

/// Encode a public key as SPKI PEM.
pub fn export_public_key(key: &RsaPublicKey) -> Result<String, CryptoError> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| CryptoError::KeyFormat(e.to_string()))
}

/// Encode a private key as PKCS#8 PEM.
pub fn export_private_key(key: &RsaPrivateKey) -> Result<Zeroizing<String>, CryptoError> {
    key.to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CryptoError::KeyFormat(e.to_string()))
}

/// Decode an SPKI PEM public key.
pub fn import_public_key(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    let key = RsaPublicKey::from_public_key_pem(pem.trim())
        .map_err(|e| CryptoError::KeyFormat(format!("public key: {e}")))?;
    check_modulus(key.size())?;
    Ok(key)
}

/// Decode a PKCS#8 PEM private key.
pub fn import_private_key(pem: &str) -> Result<RsaPrivateKey, CryptoError> {
    let key = RsaPrivateKey::from_pkcs8_pem(pem.trim())
        .map_err(|e| CryptoError::KeyFormat(format!("private key: {e}")))?;
    check_modulus(key.size())?;
    Ok(key)
}

/// RSA-OAEP(SHA-256) encrypt a short payload, typically a symmetric key.
pub fn encrypt_key(public_key: &RsaPublicKey, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
    public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), payload)
        .map_err(|e| CryptoError::InvalidKey(format!("rsa-oaep encrypt failed: {e}")))
}

/// RSA-OAEP(SHA-256) decrypt. Fails with `DecryptionFailure` when the
/// ciphertext was not produced for this key.
pub fn decrypt_key(
    private_key: &RsaPrivateKey,
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    private_key
        .decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::DecryptionFailure("rsa-oaep unwrap failed".into()))
}

/// First 8 bytes of SHA-256 over the SPKI DER encoding, hex encoded.
pub fn fingerprint(key: &RsaPublicKey) -> Result<String, CryptoError> {
    let der = key
        .to_public_key_der()
        .map_err(|e| CryptoError::KeyFormat(e.to_string()))?;
    let digest = Sha256::digest(der.as_bytes());
    Ok(digest[..8].iter().map(|b| format!("{b:02x}")).collect())
}

fn check_modulus(size_bytes: usize) -> Result<(), CryptoError> {
    if size_bytes * 8 < MIN_RSA_KEY_BITS {
        return Err(CryptoError::KeyFormat(format!(
            "RSA modulus of {} bits is below the {MIN_RSA_KEY_BITS}-bit minimum",
            size_bytes * 8
        )));
    }
    Ok(())
}
