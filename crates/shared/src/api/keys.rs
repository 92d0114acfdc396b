//! Key service contracts: published public keys and password-wrapped private keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::WorkspaceId;

/// A private key encrypted under a password-derived key. All fields are base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedPrivateKeyRecord {
    pub encrypted_private_key: String,
    pub salt: String,
    pub iv: String,
}

/// A superseded key pair kept for decrypting legacy ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyHistoryRecord {
    pub public_key: String,
    pub private_key: WrappedPrivateKeyRecord,
    pub rotated_at: DateTime<Utc>,
}

/// Response of `GET /api/workspaces/{workspace_id}/keys`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceKeysResponse {
    pub public_key: String,
    pub private_key: WrappedPrivateKeyRecord,
    /// Most recently rotated first.
    #[serde(default)]
    pub history: Vec<KeyHistoryRecord>,
}

/// Body of `PATCH /api/user/keys`, the first-use publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistKeysRequest {
    pub workspace_id: WorkspaceId,
    pub public_key: String,
    #[serde(flatten)]
    pub private_key: WrappedPrivateKeyRecord,
}

/// Body of `POST /api/workspaces/{workspace_id}/rotate-keys`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateKeysRequest {
    pub new_public_key: String,
    pub new_private_key: WrappedPrivateKeyRecord,
}

/// Response of a rotation: the superseded pair and the newly active one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateKeysResponse {
    pub old_public_key: String,
    pub old_private_key: WrappedPrivateKeyRecord,
    pub new_public_key: String,
    pub new_private_key: WrappedPrivateKeyRecord,
    pub rotated_at: DateTime<Utc>,
    /// Advisory time after which the new pair should itself be rotated.
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> WrappedPrivateKeyRecord {
        WrappedPrivateKeyRecord {
            encrypted_private_key: "ZW5j".into(),
            salt: "c2FsdA==".into(),
            iv: "aXY=".into(),
        }
    }

    #[test]
    fn wrapped_record_uses_camel_case_fields() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["encryptedPrivateKey"], "ZW5j");
        assert_eq!(json["salt"], "c2FsdA==");
        assert_eq!(json["iv"], "aXY=");
    }

    #[test]
    fn persist_request_flattens_wrapped_record() {
        let req = PersistKeysRequest {
            workspace_id: WorkspaceId::new(),
            public_key: "-----BEGIN PUBLIC KEY-----".into(),
            private_key: record(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("workspaceId").is_some());
        assert!(json.get("publicKey").is_some());
        assert_eq!(json["encryptedPrivateKey"], "ZW5j");
        assert!(json.get("privateKey").is_none());

        let back: PersistKeysRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back.private_key, record());
    }

    #[test]
    fn keys_response_history_defaults_to_empty() {
        let json = serde_json::json!({
            "publicKey": "pk",
            "privateKey": { "encryptedPrivateKey": "a", "salt": "b", "iv": "c" }
        });
        let resp: WorkspaceKeysResponse = serde_json::from_value(json).unwrap();
        assert!(resp.history.is_empty());
    }

    #[test]
    fn rotate_response_includes_all_fields() {
        let resp = RotateKeysResponse {
            old_public_key: "old".into(),
            old_private_key: record(),
            new_public_key: "new".into(),
            new_private_key: record(),
            rotated_at: Utc::now(),
            expires_at: None,
        };
        let json = serde_json::to_value(&resp).unwrap();
        for field in [
            "oldPublicKey",
            "oldPrivateKey",
            "newPublicKey",
            "newPrivateKey",
            "rotatedAt",
            "expiresAt",
        ] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
    }
}
