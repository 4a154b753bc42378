//! Execution-layer JSON-RPC result providers: `eth_sign` and
//! `eth_accounts`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::crypto::ecdsa::eth_address_hex;
use crate::crypto::hash::eth_sign_prefix;
use crate::dispatcher::SignDispatcher;

pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const SIGNING_FROM_IS_NOT_AN_UNLOCKED_ACCOUNT: i64 = -32024;

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i64, message: &str) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.to_string(),
            }),
        }
    }
}

/// Dispatch one JSON-RPC request.
pub async fn handle_request(
    dispatcher: &Arc<SignDispatcher>,
    request: JsonRpcRequest,
) -> JsonRpcResponse {
    debug!(method = %request.method, "json-rpc request");
    match request.method.as_str() {
        "eth_sign" => eth_sign(dispatcher, request).await,
        "eth_accounts" => eth_accounts(dispatcher, request),
        _ => JsonRpcResponse::error(request.id, METHOD_NOT_FOUND, "Method not found"),
    }
}

/// `eth_sign(address, message)`: prefix the message per the Ethereum signed
/// message convention and produce a recoverable signature.
async fn eth_sign(dispatcher: &Arc<SignDispatcher>, request: JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.clone();
    let Some((address, message)) = parse_eth_sign_params(request.params.as_ref()) else {
        return JsonRpcResponse::error(id, INVALID_PARAMS, "Invalid params");
    };

    let Some(signer) = dispatcher.registry().find_by_eth_address(&address) else {
        return JsonRpcResponse::error(
            id,
            SIGNING_FROM_IS_NOT_AN_UNLOCKED_ACCOUNT,
            "Signing from is not an unlocked account",
        );
    };

    match signer.sign(&eth_sign_prefix(&message)).await {
        Ok(signature) => JsonRpcResponse::result(id, json!(signature.to_hex())),
        Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, &format!("Internal error: {e}")),
    }
}

fn parse_eth_sign_params(params: Option<&Value>) -> Option<(String, Vec<u8>)> {
    let list = params?.as_array()?;
    if list.len() != 2 {
        return None;
    }
    let address = list[0].as_str()?.to_string();
    let raw = list[1].as_str()?;
    let message = if let Some(stripped) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"))
    {
        hex::decode(stripped).ok()?
    } else {
        raw.as_bytes().to_vec()
    };
    Some((address, message))
}

/// `eth_accounts()`: every execution-layer identifier in Ethereum address
/// form, lowercase, sorted ascending. Params must be absent or empty.
fn eth_accounts(dispatcher: &Arc<SignDispatcher>, request: JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.clone();
    match request.params.as_ref() {
        None | Some(Value::Null) => {}
        Some(Value::Array(list)) if list.is_empty() => {}
        _ => return JsonRpcResponse::error(id, INVALID_PARAMS, "Invalid params"),
    }

    let snapshot = dispatcher.registry().snapshot();
    let mut addresses: Vec<String> = snapshot
        .available()
        .iter()
        .filter_map(|identifier| snapshot.get(identifier))
        .filter_map(|signer| signer.eth_address().map(|bytes| eth_address_hex(&bytes)))
        .collect();
    addresses.sort();
    addresses.dedup();

    JsonRpcResponse::result(id, json!(addresses))
}
