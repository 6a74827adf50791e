use std::sync::Arc;

use serde_json::{json, Value};

use crate::backend::ChainBackend;
use crate::cache::HistoryCache;

use super::{make_response, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, SERVER_BANNER};

/// Fixed linear fee estimator: rate per block of confirmation target.
const FEE_RATE_PER_BLOCK: f64 = 0.0001;

/// Routes parsed JSON-RPC requests to the backend session and history cache.
///
/// One instance is shared by every connection handler. Everything it touches
/// (the backend session, the cache store) is safe for concurrent use, so the
/// dispatcher itself carries no locks.
pub struct Dispatcher {
    backend: Arc<dyn ChainBackend>,
    cache: Arc<HistoryCache>,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn ChainBackend>, cache: Arc<HistoryCache>) -> Self {
        Self { backend, cache }
    }

    /// Handle one raw newline-framed message and produce the reply string.
    ///
    /// The message is tried as a single request object first, then as a
    /// batch array. Anything else gets one generic error envelope. Batch
    /// members are processed independently and answered in input order; a
    /// malformed member only poisons its own slot.
    pub async fn handle_message(&self, raw: &str) -> String {
        if let Ok(request) = serde_json::from_str::<JsonRpcRequest>(raw) {
            return serialize(&self.dispatch(request).await);
        }

        if let Ok(members) = serde_json::from_str::<Vec<Value>>(raw) {
            let mut responses = Vec::with_capacity(members.len());
            for member in members {
                let response = match serde_json::from_value::<JsonRpcRequest>(member) {
                    Ok(request) => self.dispatch(request).await,
                    Err(err) => {
                        log::debug!("[DISPATCH] bad batch member: {}", err);
                        make_response(Value::Null, None, Some("Invalid request"))
                    }
                };
                responses.push(response);
            }
            return serde_json::to_string(&responses).unwrap_or_else(|_| "[]".to_string());
        }

        log::debug!("[DISPATCH] invalid request: {}", raw.trim());
        serialize(&make_response(Value::Null, None, Some("Invalid request")))
    }

    async fn dispatch(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        log::trace!("[DISPATCH] method={} id={}", request.method, request.id);
        let JsonRpcRequest {
            id, method, params, ..
        } = request;

        match method.as_str() {
            "server.version" => {
                make_response(id, Some(json!([SERVER_BANNER, PROTOCOL_VERSION])), None)
            }
            "server.ping" => make_response(id, Some(Value::Null), None),
            "blockchain.headers.subscribe" => self.handle_headers_subscribe(id).await,
            "blockchain.scripthash.get_balance" => self.handle_get_balance(id, params).await,
            "blockchain.scripthash.get_history" => self.handle_get_history(id, params).await,
            "blockchain.scripthash.listunspent" => self.handle_listunspent(id, params).await,
            // Not implemented by design; clients fall back to get_history.
            "blockchain.scripthash.get_mempool" => make_response(id, Some(Value::Null), None),
            "mempool.get_fee_histogram" => self.handle_fee_histogram(id).await,
            "blockchain.estimatefee" => handle_estimatefee(id, params),
            "blockchain.transaction.get" => self.handle_transaction_get(id, params).await,
            "blockchain.transaction.broadcast" => self.handle_broadcast(id, params).await,
            _ => make_response(id, None, Some("unknown method")),
        }
    }

    async fn handle_headers_subscribe(&self, id: Value) -> JsonRpcResponse {
        match self.backend.latest_header().await {
            Ok(header) => make_response(
                id,
                Some(json!({ "height": header.height, "hex": header.hex })),
                None,
            ),
            Err(err) => {
                log::warn!("[DISPATCH] latest_header failed: {}", err);
                make_response(id, None, Some("failed to fetch latest header"))
            }
        }
    }

    async fn handle_get_balance(&self, id: Value, params: Vec<Value>) -> JsonRpcResponse {
        let scripthash = match scripthash_param(&params) {
            Ok(scripthash) => scripthash,
            Err(message) => return make_response(id, None, Some(message)),
        };
        match self.backend.balance(&scripthash).await {
            Ok(balance) => make_response(
                id,
                Some(json!({ "confirmed": balance.confirmed, "unconfirmed": balance.unconfirmed })),
                None,
            ),
            Err(err) => {
                log::warn!("[DISPATCH] balance for {} failed: {}", scripthash, err);
                make_response(id, None, Some("failed to fetch balance"))
            }
        }
    }

    async fn handle_get_history(&self, id: Value, params: Vec<Value>) -> JsonRpcResponse {
        let scripthash = match scripthash_param(&params) {
            Ok(scripthash) => scripthash,
            Err(message) => return make_response(id, None, Some(message)),
        };
        let history = self.cache.get(&scripthash).await;

        // A top entry at height 0 means the freshest thing we know about is
        // still in the mempool; those are suppressed at the protocol edge.
        match history.first() {
            Some(entry) if entry.height > 0 => make_response(id, Some(json!(history)), None),
            _ => make_response(id, Some(json!([])), None),
        }
    }

    async fn handle_listunspent(&self, id: Value, params: Vec<Value>) -> JsonRpcResponse {
        let scripthash = match scripthash_param(&params) {
            Ok(scripthash) => scripthash,
            Err(message) => return make_response(id, None, Some(message)),
        };
        match self.backend.utxos(&scripthash).await {
            Ok(utxos) => make_response(id, Some(json!(utxos)), None),
            Err(err) => {
                log::warn!("[DISPATCH] listunspent for {} failed: {}", scripthash, err);
                make_response(id, None, Some("failed to fetch utxos"))
            }
        }
    }

    async fn handle_fee_histogram(&self, id: Value) -> JsonRpcResponse {
        match self.backend.fee_histogram().await {
            Ok(histogram) => make_response(id, Some(json!(histogram)), None),
            Err(err) => {
                log::warn!("[DISPATCH] fee_histogram failed: {}", err);
                make_response(id, None, Some("failed to fetch fee histogram"))
            }
        }
    }

    async fn handle_transaction_get(&self, id: Value, params: Vec<Value>) -> JsonRpcResponse {
        if params.len() != 2 {
            return make_response(id, None, Some("invalid params"));
        }
        let txid = match params[0].as_str() {
            Some(txid) => txid.to_string(),
            None => return make_response(id, None, Some("invalid params")),
        };
        let verbose = match params[1].as_bool() {
            Some(verbose) => verbose,
            None => return make_response(id, None, Some("invalid params")),
        };

        match self.backend.transaction(&txid, verbose).await {
            Ok((_, Some(decoded))) if verbose => make_response(id, Some(decoded), None),
            Ok((hex, _)) if !verbose => make_response(id, Some(Value::String(hex)), None),
            Ok(_) => make_response(id, Some(Value::Null), None),
            Err(err) => {
                log::warn!("[DISPATCH] transaction {} failed: {}", txid, err);
                make_response(id, None, Some("failed to fetch transaction"))
            }
        }
    }

    async fn handle_broadcast(&self, id: Value, params: Vec<Value>) -> JsonRpcResponse {
        if params.len() != 1 {
            return make_response(id, None, Some("invalid params"));
        }
        let raw = match params[0].as_str() {
            Some(raw) => raw,
            None => return make_response(id, None, Some("invalid TransactionHash")),
        };

        // The payload must deserialize into a structurally valid transaction
        // before it is handed to the backend. A payload that fails to decode
        // is answered with a success-shaped null result rather than an error
        // envelope; clients treat the missing txid as a failed broadcast.
        let bytes = match hex::decode(raw) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::debug!("[DISPATCH] broadcast hex decode failed: {}", err);
                return make_response(id, Some(Value::Null), None);
            }
        };
        if bitcoin::consensus::encode::deserialize::<bitcoin::Transaction>(&bytes).is_err() {
            log::debug!("[DISPATCH] broadcast payload is not a valid transaction");
            return make_response(id, Some(Value::Null), None);
        }

        match self.backend.broadcast(raw).await {
            Ok(txid) => make_response(id, Some(Value::String(txid)), None),
            Err(err) => {
                log::warn!("[DISPATCH] broadcast failed: {}", err);
                make_response(id, Some(Value::Null), None)
            }
        }
    }
}

fn handle_estimatefee(id: Value, params: Vec<Value>) -> JsonRpcResponse {
    if params.len() != 1 {
        return make_response(id, None, Some("invalid params"));
    }
    let target = match params[0].as_f64() {
        Some(target) => target,
        None => return make_response(id, None, Some("invalid params")),
    };
    make_response(id, Some(json!(FEE_RATE_PER_BLOCK * target)), None)
}

/// Extract and lightly validate the single scripthash parameter.
fn scripthash_param(params: &[Value]) -> Result<String, &'static str> {
    if params.len() != 1 {
        return Err("invalid params");
    }
    let scripthash = params[0].as_str().ok_or("invalid scripthash")?;
    if scripthash.len() != 64 || !scripthash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err("invalid scripthash");
    }
    Ok(scripthash.to_ascii_lowercase())
}

fn serialize(response: &JsonRpcResponse) -> String {
    serde_json::to_string(response)
        .unwrap_or_else(|_| r#"{"jsonrpc":"2.0","id":null,"error":"internal error"}"#.to_string())
}
