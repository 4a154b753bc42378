//! JSON-RPC endpoint for execution-layer mode.

use axum::extract::State;
use axum::Json;

use crate::jsonrpc::{handle_request, JsonRpcRequest, JsonRpcResponse};
use crate::server::AppState;

/// `POST /` (eth1 mode)
pub async fn json_rpc(
    State(state): State<AppState>,
    Json(request): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    Json(handle_request(&state.dispatcher, request).await)
}
