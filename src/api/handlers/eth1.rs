//! Execution-layer signing endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::domain::KeyType;
use crate::error::SignerError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct Eth1SignRequest {
    pub data: String,
}

/// `POST /api/v1/eth1/sign/{identifier}`: returns the 65-byte signature as
/// plain hex text.
pub async fn sign(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    Json(request): Json<Eth1SignRequest>,
) -> ApiResult<String> {
    let stripped = request
        .data
        .strip_prefix("0x")
        .or_else(|| request.data.strip_prefix("0X"))
        .unwrap_or(&request.data);
    let data = hex::decode(stripped)
        .map_err(|e| ApiError(SignerError::BadRequest(format!("data: {e}"))))?;
    let signature = state.dispatcher.sign_eth1(&identifier, &data).await?;
    Ok(signature)
}

/// `GET /api/v1/eth1/publicKeys`
pub async fn public_keys(State(state): State<AppState>) -> Json<Vec<String>> {
    let snapshot = state.registry.snapshot();
    let keys: Vec<String> = snapshot
        .available()
        .into_iter()
        .filter(|identifier| {
            snapshot
                .get(identifier)
                .map(|signer| signer.key_type() == KeyType::Secp256k1)
                .unwrap_or(false)
        })
        .collect();
    Json(keys)
}
