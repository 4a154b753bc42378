//! Commit-Boost signer endpoints.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::error::ApiResult;
use crate::dispatcher::{CommitBoostSignRequest, GenerateProxyKeyResponse};
use crate::server::AppState;
use crate::signing::ProxyScheme;

/// `POST /signer/v1/request_signature`
pub async fn request_signature(
    State(state): State<AppState>,
    Json(request): Json<CommitBoostSignRequest>,
) -> ApiResult<Json<Value>> {
    let signature = state.dispatcher.sign_commit_boost(request).await?;
    Ok(Json(json!(signature)))
}

#[derive(Debug, Deserialize)]
pub struct GenerateProxyKeyBody {
    pub pubkey: String,
    pub scheme: ProxyScheme,
}

/// `POST /signer/v1/generate_proxy_key`
pub async fn generate_proxy_key(
    State(state): State<AppState>,
    Json(body): Json<GenerateProxyKeyBody>,
) -> ApiResult<Json<GenerateProxyKeyResponse>> {
    let response = state
        .dispatcher
        .generate_proxy_key(&body.pubkey, body.scheme)
        .await?;
    Ok(Json(response))
}
