use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use taskvault_shared::api::keys::{
    PersistKeysRequest, RotateKeysRequest, RotateKeysResponse, WorkspaceKeysResponse,
    WrappedPrivateKeyRecord,
};
use taskvault_shared::error::TaskVaultError;
use taskvault_shared::ids::WorkspaceId;

use crate::error::ServerError;
use crate::extractors::Caller;
use crate::state::AppState;

const PUBLIC_KEY_PREFIX: &str = "-----BEGIN PUBLIC KEY-----";

fn validate_key_material(
    public_key: &str,
    private_key: &WrappedPrivateKeyRecord,
) -> Result<(), ServerError> {
    if !public_key.trim_start().starts_with(PUBLIC_KEY_PREFIX) {
        return Err(ServerError(TaskVaultError::Validation(
            "public key must be SPKI PEM".into(),
        )));
    }
    let missing = [
        ("encryptedPrivateKey", &private_key.encrypted_private_key),
        ("salt", &private_key.salt),
        ("iv", &private_key.iv),
    ]
    .into_iter()
    .find(|(_, value)| value.is_empty());
    if let Some((field, _)) = missing {
        return Err(ServerError(TaskVaultError::Validation(format!(
            "{field} must not be empty"
        ))));
    }
    Ok(())
}

/// GET /api/workspaces/:workspace_id/keys
/// The caller's active pair and rotation history for a workspace.
pub async fn get_workspace_keys(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(workspace_id): Path<WorkspaceId>,
) -> Result<Json<WorkspaceKeysResponse>, ServerError> {
    state
        .store
        .workspace_keys(user_id, workspace_id)
        .map(Json)
        .ok_or(ServerError(TaskVaultError::NotFound))
}

/// PATCH /api/user/keys
/// First publish of a workspace key pair.
pub async fn persist_keys(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Json(body): Json<PersistKeysRequest>,
) -> Result<StatusCode, ServerError> {
    validate_key_material(&body.public_key, &body.private_key)?;
    state.store.persist_keys(
        user_id,
        body.workspace_id,
        body.public_key,
        body.private_key,
    )?;
    tracing::info!(user_id = %user_id, workspace_id = %body.workspace_id, "workspace keys published");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/workspaces/:workspace_id/rotate-keys
/// Replace the active pair; the old one moves into history.
pub async fn rotate_keys(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(workspace_id): Path<WorkspaceId>,
    Json(body): Json<RotateKeysRequest>,
) -> Result<Json<RotateKeysResponse>, ServerError> {
    validate_key_material(&body.new_public_key, &body.new_private_key)?;
    let response = state.store.rotate_keys(
        user_id,
        workspace_id,
        body.new_public_key,
        body.new_private_key,
    )?;
    tracing::info!(user_id = %user_id, workspace_id = %workspace_id, "workspace keys rotated");
    Ok(Json(response))
}
