//! Consensus-layer signing endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::api::error::ApiResult;
use crate::dispatcher::Eth2SignRequest;
use crate::domain::KeyType;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct SignResponse {
    pub signature: String,
}

/// `POST /api/v1/eth2/sign/{identifier}`
pub async fn sign(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    Json(request): Json<Eth2SignRequest>,
) -> ApiResult<Json<SignResponse>> {
    let signature = state.dispatcher.sign_eth2(&identifier, request).await?;
    Ok(Json(SignResponse { signature }))
}

/// `GET /api/v1/eth2/publicKeys`
pub async fn public_keys(State(state): State<AppState>) -> Json<Vec<String>> {
    let snapshot = state.registry.snapshot();
    let keys: Vec<String> = snapshot
        .available()
        .into_iter()
        .filter(|identifier| {
            snapshot
                .get(identifier)
                .map(|signer| signer.key_type() == KeyType::Bls)
                .unwrap_or(false)
        })
        .collect();
    Json(keys)
}

/// `POST /reload`
pub async fn reload(State(state): State<AppState>) -> ApiResult<&'static str> {
    state.registry.reload().await?;
    Ok("")
}
