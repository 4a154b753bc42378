//! Ethereum key-manager API (`/eth/v1/keystores`, `/eth/v1/remotekeys`).

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::domain::KeyType;
use crate::error::SignerError;
use crate::keymanager::{DeleteKeystoreResult, ImportKeystoreResult, KeystoreImport};
use crate::server::AppState;
use crate::signing::ArtifactSigner;

#[derive(Debug, Serialize)]
pub struct ListedKeystore {
    pub validating_pubkey: String,
    pub derivation_path: String,
    pub readonly: bool,
}

#[derive(Debug, Serialize)]
pub struct ListKeystoresResponse {
    pub data: Vec<ListedKeystore>,
}

/// `GET /eth/v1/keystores`
pub async fn list_keystores(State(state): State<AppState>) -> Json<ListKeystoresResponse> {
    let snapshot = state.registry.snapshot();
    let data = snapshot
        .available()
        .into_iter()
        .filter(|identifier| {
            snapshot
                .get(identifier)
                .map(|signer| signer.key_type() == KeyType::Bls)
                .unwrap_or(false)
        })
        .map(|identifier| ListedKeystore {
            validating_pubkey: identifier,
            derivation_path: String::new(),
            readonly: false,
        })
        .collect();
    Json(ListKeystoresResponse { data })
}

#[derive(Debug, Deserialize)]
pub struct ImportKeystoresRequest {
    pub keystores: Vec<String>,
    pub passwords: Vec<String>,
    #[serde(default)]
    pub slashing_protection: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImportKeystoresResponse {
    pub data: Vec<ImportKeystoreResult>,
}

/// `POST /eth/v1/keystores`
pub async fn import_keystores(
    State(state): State<AppState>,
    Json(request): Json<ImportKeystoresRequest>,
) -> ApiResult<Json<ImportKeystoresResponse>> {
    let processor = state.import_processor.as_ref().ok_or_else(|| {
        ApiError(SignerError::BadRequest(
            "key manager API is not enabled".to_string(),
        ))
    })?;
    if request.keystores.len() != request.passwords.len() {
        return Err(ApiError(SignerError::BadRequest(
            "keystores and passwords must have the same length".to_string(),
        )));
    }

    let imports = request
        .keystores
        .into_iter()
        .zip(request.passwords)
        .map(|(keystore, password)| KeystoreImport { keystore, password })
        .collect();
    let data = processor
        .import(imports, request.slashing_protection.as_deref())
        .await?;
    Ok(Json(ImportKeystoresResponse { data }))
}

#[derive(Debug, Deserialize)]
pub struct DeleteKeystoresRequest {
    pub pubkeys: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteKeystoresResponse {
    pub data: Vec<DeleteKeystoreResult>,
    pub slashing_protection: String,
}

/// `DELETE /eth/v1/keystores`
pub async fn delete_keystores(
    State(state): State<AppState>,
    Json(request): Json<DeleteKeystoresRequest>,
) -> ApiResult<Json<DeleteKeystoresResponse>> {
    let processor = state.delete_processor.as_ref().ok_or_else(|| {
        ApiError(SignerError::BadRequest(
            "key manager API is not enabled".to_string(),
        ))
    })?;
    let (data, slashing_protection) = processor.delete(&request.pubkeys).await?;
    Ok(Json(DeleteKeystoresResponse {
        data,
        slashing_protection,
    }))
}

#[derive(Debug, Serialize)]
pub struct ListedRemoteKey {
    pub pubkey: String,
    pub url: String,
    pub readonly: bool,
}

#[derive(Debug, Serialize)]
pub struct ListRemoteKeysResponse {
    pub data: Vec<ListedRemoteKey>,
}

/// `GET /eth/v1/remotekeys`: lists vault/KMS-backed keys; they are managed
/// through configuration, so they appear read-only.
pub async fn list_remote_keys(State(state): State<AppState>) -> Json<ListRemoteKeysResponse> {
    let snapshot = state.registry.snapshot();
    let data = snapshot
        .available()
        .into_iter()
        .filter(|identifier| {
            snapshot
                .get(identifier)
                .map(|signer| matches!(signer.as_ref(), ArtifactSigner::SecpRemote(_)))
                .unwrap_or(false)
        })
        .map(|identifier| ListedRemoteKey {
            pubkey: identifier,
            url: String::new(),
            readonly: true,
        })
        .collect();
    Json(ListRemoteKeysResponse { data })
}

#[derive(Debug, Serialize)]
pub struct RemoteKeyActionResult {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RemoteKeyActionResponse {
    pub data: Vec<RemoteKeyActionResult>,
}

#[derive(Debug, Deserialize)]
pub struct ImportRemoteKeysRequest {
    pub remote_keys: Vec<serde_json::Value>,
}

/// `POST /eth/v1/remotekeys`: remote keys are configured via metadata
/// files, not this endpoint.
pub async fn import_remote_keys(
    Json(request): Json<ImportRemoteKeysRequest>,
) -> Json<RemoteKeyActionResponse> {
    let data = request
        .remote_keys
        .iter()
        .map(|_| RemoteKeyActionResult {
            status: "error".to_string(),
            message: "remote keys are managed through signer configuration".to_string(),
        })
        .collect();
    Json(RemoteKeyActionResponse { data })
}

#[derive(Debug, Deserialize)]
pub struct DeleteRemoteKeysRequest {
    pub pubkeys: Vec<String>,
}

/// `DELETE /eth/v1/remotekeys`
pub async fn delete_remote_keys(
    Json(request): Json<DeleteRemoteKeysRequest>,
) -> Json<RemoteKeyActionResponse> {
    let data = request
        .pubkeys
        .iter()
        .map(|_| RemoteKeyActionResult {
            status: "error".to_string(),
            message: "remote keys are managed through signer configuration".to_string(),
        })
        .collect();
    Json(RemoteKeyActionResponse { data })
}
