//! JSON-RPC 2.0 wire types and the per-message dispatcher.
//!
//! Every message on the wire is either one request object or an array of
//! them (a batch). Responses carry exactly one of `result`/`error`; the
//! absent field is omitted, except that an explicit empty success is
//! serialized as `"result": null`.

mod dispatcher;

#[cfg(test)]
mod tests;

pub use dispatcher::Dispatcher;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client-visible server identity reported by `server.version`.
pub const SERVER_BANNER: &str = "ElectrumX 1.16.0";
/// Electrum protocol version spoken by this gateway.
pub const PROTOCOL_VERSION: &str = "1.4";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

fn default_jsonrpc() -> String {
    "2.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Build a response envelope carrying a result, an error, or a null success.
pub fn make_response(id: Value, result: Option<Value>, error: Option<&str>) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result,
        error: error.map(|message| Value::String(message.to_string())),
    }
}
