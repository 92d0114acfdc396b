//! Hybrid message encryption: AES-256-GCM for the body, RSA-OAEP for the
//! per-message AES key.
//!
//! Wire format (exact field names, all binary fields base64):
//!
//! ```json
//! {"v":"1","data":"<ciphertext||tag>","iv":"<12 bytes>","key":"<RSA-OAEP(aes key)>"}
//! ```
//!
//! Message bodies that do not match this shape are legacy plaintext and are
//! passed through untouched, never treated as errors.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use taskvault_shared::constants::PACKET_PROTOCOL_VERSION;

use crate::asymmetric::{decrypt_key, encrypt_key};
use crate::error::CryptoError;
use crate::symmetric::{decrypt_symmetric, encrypt_symmetric, SymmetricKey};

/// Protocol version written into every new packet.
pub const PROTOCOL_VERSION: &str = PACKET_PROTOCOL_VERSION;

/// Shown in place of a message that could not be decrypted with any known key.
pub const DECRYPTION_FAILED_PLACEHOLDER: &str = "[Unable to decrypt message]";

/// Shown in place of an encrypted message while workspace keys are unavailable.
pub const LOCKED_PLACEHOLDER: &str = "[Encrypted message: keys not loaded]";

/// A versioned hybrid-encrypted message envelope. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptedMessagePacket {
    #[serde(rename = "v")]
    pub version: String,
    pub data: String,
    pub iv: String,
    pub key: String,
}

impl EncryptedMessagePacket {
    /// Serialize to the compact wire JSON stored in `Message.content`.
    pub fn to_json(&self) -> Result<String, CryptoError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn is_supported_version(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }
}

/// A message body classified by the tolerant parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent<'a> {
    Encrypted(EncryptedMessagePacket),
    Plaintext(&'a str),
}

impl<'a> MessageContent<'a> {
    /// Classify a message body. Anything that is not exactly a packet object
    /// (`v`, `data`, `iv`, `key`, all strings, nothing else) is plaintext.
    pub fn parse(content: &'a str) -> Self {
        if !content.trim_start().starts_with('{') {
            return MessageContent::Plaintext(content);
        }
        match serde_json::from_str::<EncryptedMessagePacket>(content) {
            Ok(packet) => MessageContent::Encrypted(packet),
            Err(_) => MessageContent::Plaintext(content),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, MessageContent::Encrypted(_))
    }
}

/// Encrypt `plaintext` for the holder of `recipient`'s private key.
pub fn encrypt_hybrid(
    plaintext: &str,
    recipient: &RsaPublicKey,
) -> Result<EncryptedMessagePacket, CryptoError> {
    let sealed = encrypt_symmetric(plaintext.as_bytes(), None)?;
    let wrapped_key = encrypt_key(recipient, sealed.key.as_bytes())?;

    Ok(EncryptedMessagePacket {
        version: PROTOCOL_VERSION.to_string(),
        data: BASE64.encode(&sealed.ciphertext),
        iv: BASE64.encode(sealed.iv),
        key: BASE64.encode(wrapped_key),
    })
}

/// Decrypt a packet with a single private key.
///
/// Fails with `DecryptionFailure` for an unknown version or a packet that was
/// not encrypted for this key, and with `AuthenticationFailure` when the body
/// was tampered with.
pub fn decrypt_hybrid(
    packet: &EncryptedMessagePacket,
    private_key: &RsaPrivateKey,
) -> Result<String, CryptoError> {
    check_version(packet)?;

    let wrapped_key = decode_field("key", &packet.key)?;
    let key_bytes = decrypt_key(private_key, &wrapped_key)?;
    let key = SymmetricKey::from_slice(&key_bytes)
        .map_err(|_| CryptoError::DecryptionFailure("unwrapped key has wrong length".into()))?;

    let iv = decode_field("iv", &packet.iv)?;
    let data = decode_field("data", &packet.data)?;
    let plaintext = decrypt_symmetric(&data, &key, &iv)?;

    String::from_utf8(plaintext)
        .map_err(|_| CryptoError::DecryptionFailure("plaintext is not valid UTF-8".into()))
}

/// Try each candidate private key in order until one decrypts the packet.
///
/// Candidates are expected most recently rotated first. Returns
/// `NoMatchingKey` when every candidate fails, or `AuthenticationFailure` if a
/// candidate unwrapped the message key but the body failed authentication.
pub fn decrypt_with_fallback<'k, I>(
    packet: &EncryptedMessagePacket,
    candidates: I,
) -> Result<String, CryptoError>
where
    I: IntoIterator<Item = &'k RsaPrivateKey>,
{
    check_version(packet)?;

    let mut tried = 0;
    let mut tampered = false;
    for (index, key) in candidates.into_iter().enumerate() {
        tried += 1;
        match decrypt_hybrid(packet, key) {
            Ok(plaintext) => {
                if index > 0 {
                    tracing::debug!(candidate = index, "decrypted with a historical key");
                }
                return Ok(plaintext);
            }
            Err(CryptoError::AuthenticationFailure) => tampered = true,
            Err(_) => {}
        }
    }

    if tampered {
        Err(CryptoError::AuthenticationFailure)
    } else {
        Err(CryptoError::NoMatchingKey { tried })
    }
}

/// Decrypt a raw message body: plaintext passes through, packets go through
/// fallback decryption.
pub fn decrypt_message_content<'k, I>(content: &str, candidates: I) -> Result<String, CryptoError>
where
    I: IntoIterator<Item = &'k RsaPrivateKey>,
{
    match MessageContent::parse(content) {
        MessageContent::Plaintext(text) => Ok(text.to_string()),
        MessageContent::Encrypted(packet) => decrypt_with_fallback(&packet, candidates),
    }
}

/// Like `decrypt_message_content`, but a failure on this one message becomes
/// `DECRYPTION_FAILED_PLACEHOLDER` so the rest of a conversation still loads.
pub fn decrypt_for_display<'k, I>(content: &str, candidates: I) -> String
where
    I: IntoIterator<Item = &'k RsaPrivateKey>,
{
    match decrypt_message_content(content, candidates) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "message could not be decrypted");
            DECRYPTION_FAILED_PLACEHOLDER.to_string()
        }
    }
}

fn check_version(packet: &EncryptedMessagePacket) -> Result<(), CryptoError> {
    if packet.is_supported_version() {
        Ok(())
    } else {
        Err(CryptoError::DecryptionFailure(format!(
            "unsupported packet version {:?}",
            packet.version
        )))
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    BASE64
        .decode(value)
        .map_err(|_| CryptoError::DecryptionFailure(format!("packet field {name} is not base64")))
}
