use super::*;

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::backend::{Balance, BackendLookup, ChainBackend, HeaderInfo, Utxo};
use crate::cache::{HistoryCache, HistoryEntry, MemoryStore};

// Mainnet segwit spend, structurally valid.
const VALID_RAW_TX: &str = "02000000000101572ce1c3d8818d445883e0372a0b5923b1f017a4056dfeceeaf92a702a1aae620000000000000000800280841e0000000000160014b863ae8777f8387cfeb2f4424503616ab4a7841b827f902f00000000160014f26e60250c5d52753a46e86796d24870c9b51c4b02483045022100a1edc977b15680549f4ac69cc596e0bc32a88c750af4417153558358b6d77c81022017250d0672a543c42abbb955638baf8d06e759cc0525b44f704db7649b568cb40121031b08427f3a17132260d47a9b0b2edc2b31092c3ddff639e6c1121ed6e952e1e500000000";

/// Canned backend with recorded broadcasts.
#[derive(Default)]
struct MockBackend {
    confirmed: Vec<HistoryEntry>,
    mempool: Vec<HistoryEntry>,
    broadcasts: Mutex<Vec<String>>,
}

#[async_trait]
impl ChainBackend for MockBackend {
    async fn latest_header(&self) -> Result<HeaderInfo> {
        Ok(HeaderInfo {
            height: 800000,
            hex: "0000002000".to_string(),
        })
    }

    async fn balance(&self, _scripthash: &str) -> Result<Balance> {
        Ok(Balance {
            confirmed: 150_000,
            unconfirmed: -2_000,
        })
    }

    async fn history(
        &self,
        _scripthash: &str,
    ) -> Result<(Vec<HistoryEntry>, Vec<HistoryEntry>)> {
        Ok((self.confirmed.clone(), self.mempool.clone()))
    }

    async fn utxos(&self, _scripthash: &str) -> Result<Vec<Utxo>> {
        Ok(vec![Utxo {
            tx_hash: "cafe".repeat(16),
            tx_pos: 1,
            height: 799_999,
            value: 5000,
        }])
    }

    async fn transaction(&self, txid: &str, verbose: bool) -> Result<(String, Option<Value>)> {
        let decoded = verbose.then(|| json!({ "txid": txid, "size": 222 }));
        Ok(("deadbeef".to_string(), decoded))
    }

    async fn broadcast(&self, raw_hex: &str) -> Result<String> {
        self.broadcasts.lock().unwrap().push(raw_hex.to_string());
        Ok("feed".repeat(16))
    }

    async fn fee_histogram(&self) -> Result<Vec<(f64, u64)>> {
        Ok(vec![(0.1, 12000), (0.05, 30000)])
    }
}

fn dispatcher_with(backend: MockBackend) -> (Dispatcher, Arc<MockBackend>) {
    let backend = Arc::new(backend);
    let cache = Arc::new(HistoryCache::new(
        Arc::new(MemoryStore::new()),
        Arc::new(BackendLookup::new(backend.clone())),
    ));
    (Dispatcher::new(backend.clone(), cache), backend)
}

fn dispatcher() -> Dispatcher {
    dispatcher_with(MockBackend::default()).0
}

fn request(id: Value, method: &str, params: Value) -> String {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }).to_string()
}

async fn roundtrip(dispatcher: &Dispatcher, id: Value, method: &str, params: Value) -> Value {
    let reply = dispatcher
        .handle_message(&request(id, method, params))
        .await;
    serde_json::from_str(&reply).unwrap()
}

fn scripthash_fixture() -> String {
    "ab".repeat(32)
}

#[tokio::test]
async fn server_version_has_exact_shape() {
    let dispatcher = dispatcher();
    let reply = dispatcher
        .handle_message(&request(json!(1), "server.version", json!([])))
        .await;
    assert_eq!(
        reply,
        r#"{"jsonrpc":"2.0","id":1,"result":["ElectrumX 1.16.0","1.4"]}"#
    );
}

#[tokio::test]
async fn ping_answers_null_result() {
    let dispatcher = dispatcher();
    let reply: Value = roundtrip(&dispatcher, json!(7), "server.ping", json!([])).await;
    assert_eq!(reply["id"], json!(7));
    assert!(reply.as_object().unwrap().contains_key("result"));
    assert_eq!(reply["result"], Value::Null);
    assert!(!reply.as_object().unwrap().contains_key("error"));
}

#[tokio::test]
async fn repeated_requests_are_idempotent() {
    let dispatcher = dispatcher();
    let message = request(json!(1), "blockchain.headers.subscribe", json!([]));
    let first = dispatcher.handle_message(&message).await;
    let second = dispatcher.handle_message(&message).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn headers_subscribe_reports_the_tip() {
    let dispatcher = dispatcher();
    let reply = roundtrip(&dispatcher, json!(1), "blockchain.headers.subscribe", json!([])).await;
    assert_eq!(reply["result"]["height"], json!(800000));
    assert_eq!(reply["result"]["hex"], json!("0000002000"));
}

#[tokio::test]
async fn estimatefee_is_linear_in_the_target() {
    let dispatcher = dispatcher();
    let reply = roundtrip(&dispatcher, json!(1), "blockchain.estimatefee", json!([6])).await;
    assert_eq!(reply["result"].as_f64().unwrap(), 6.0 * 0.0001);
}

#[tokio::test]
async fn unknown_method_is_an_error() {
    let dispatcher = dispatcher();
    let reply = roundtrip(&dispatcher, json!(1), "blockchain.dance", json!([])).await;
    assert_eq!(reply["error"], json!("unknown method"));
    assert!(!reply.as_object().unwrap().contains_key("result"));
}

#[tokio::test]
async fn invalid_json_gets_one_error_envelope() {
    let dispatcher = dispatcher();
    let reply: Value = serde_json::from_str(&dispatcher.handle_message("{not json").await).unwrap();
    assert_eq!(reply["id"], Value::Null);
    assert_eq!(reply["error"], json!("Invalid request"));
}

#[tokio::test]
async fn batch_members_fail_independently_in_order() {
    let dispatcher = dispatcher();
    let batch = json!([
        { "jsonrpc": "2.0", "id": 1, "method": "server.version", "params": [] },
        42,
        { "jsonrpc": "2.0", "id": 3, "method": "server.ping", "params": [] },
    ]);
    let replies: Vec<Value> =
        serde_json::from_str(&dispatcher.handle_message(&batch.to_string()).await).unwrap();

    assert_eq!(replies.len(), 3);
    assert_eq!(replies[0]["id"], json!(1));
    assert_eq!(replies[0]["result"][0], json!("ElectrumX 1.16.0"));
    assert_eq!(replies[1]["id"], Value::Null);
    assert_eq!(replies[1]["error"], json!("Invalid request"));
    assert_eq!(replies[2]["id"], json!(3));
}

#[tokio::test]
async fn request_id_types_are_preserved() {
    let dispatcher = dispatcher();
    let numeric = roundtrip(&dispatcher, json!(42), "server.ping", json!([])).await;
    assert_eq!(numeric["id"], json!(42));
    let string = roundtrip(&dispatcher, json!("abc"), "server.ping", json!([])).await;
    assert_eq!(string["id"], json!("abc"));
}

#[tokio::test]
async fn scripthash_params_are_validated() {
    let dispatcher = dispatcher();
    let no_params = roundtrip(
        &dispatcher,
        json!(1),
        "blockchain.scripthash.get_balance",
        json!([]),
    )
    .await;
    assert_eq!(no_params["error"], json!("invalid params"));

    let wrong_type = roundtrip(
        &dispatcher,
        json!(1),
        "blockchain.scripthash.get_balance",
        json!([123]),
    )
    .await;
    assert_eq!(wrong_type["error"], json!("invalid scripthash"));

    let wrong_shape = roundtrip(
        &dispatcher,
        json!(1),
        "blockchain.scripthash.get_balance",
        json!(["zz".repeat(32)]),
    )
    .await;
    assert_eq!(wrong_shape["error"], json!("invalid scripthash"));
}

#[tokio::test]
async fn get_balance_reports_both_buckets() {
    let dispatcher = dispatcher();
    let reply = roundtrip(
        &dispatcher,
        json!(1),
        "blockchain.scripthash.get_balance",
        json!([scripthash_fixture()]),
    )
    .await;
    assert_eq!(reply["result"]["confirmed"], json!(150_000));
    assert_eq!(reply["result"]["unconfirmed"], json!(-2_000));
}

#[tokio::test]
async fn get_history_serves_confirmed_entries_newest_first() {
    let (dispatcher, _) = dispatcher_with(MockBackend {
        confirmed: vec![
            HistoryEntry {
                height: 800000,
                tx_hash: "bb".repeat(32),
            },
            HistoryEntry {
                height: 799999,
                tx_hash: "aa".repeat(32),
            },
        ],
        ..MockBackend::default()
    });
    let reply = roundtrip(
        &dispatcher,
        json!(1),
        "blockchain.scripthash.get_history",
        json!([scripthash_fixture()]),
    )
    .await;
    let history = reply["result"].as_array().unwrap();
    // The read-through fill only keeps the most recent entry on a cold cache.
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["height"], json!(800000));
    assert_eq!(history[0]["tx_hash"], json!("bb".repeat(32)));
}

#[tokio::test]
async fn get_history_hides_mempool_topped_lists() {
    let (dispatcher, _) = dispatcher_with(MockBackend {
        mempool: vec![HistoryEntry {
            height: 0,
            tx_hash: "cc".repeat(32),
        }],
        ..MockBackend::default()
    });
    let reply = roundtrip(
        &dispatcher,
        json!(1),
        "blockchain.scripthash.get_history",
        json!([scripthash_fixture()]),
    )
    .await;
    assert_eq!(reply["result"], json!([]));
}

#[tokio::test]
async fn get_history_for_unknown_scripthash_is_empty() {
    let dispatcher = dispatcher();
    let reply = roundtrip(
        &dispatcher,
        json!(1),
        "blockchain.scripthash.get_history",
        json!([scripthash_fixture()]),
    )
    .await;
    assert_eq!(reply["result"], json!([]));
}

#[tokio::test]
async fn get_mempool_is_a_null_success() {
    let dispatcher = dispatcher();
    let reply = roundtrip(
        &dispatcher,
        json!(1),
        "blockchain.scripthash.get_mempool",
        json!([scripthash_fixture()]),
    )
    .await;
    assert_eq!(reply["result"], Value::Null);
    assert!(!reply.as_object().unwrap().contains_key("error"));
}

#[tokio::test]
async fn listunspent_maps_backend_utxos() {
    let dispatcher = dispatcher();
    let reply = roundtrip(
        &dispatcher,
        json!(1),
        "blockchain.scripthash.listunspent",
        json!([scripthash_fixture()]),
    )
    .await;
    let utxos = reply["result"].as_array().unwrap();
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0]["tx_pos"], json!(1));
    assert_eq!(utxos[0]["value"], json!(5000));
}

#[tokio::test]
async fn fee_histogram_passes_through() {
    let dispatcher = dispatcher();
    let reply = roundtrip(&dispatcher, json!(1), "mempool.get_fee_histogram", json!([])).await;
    assert_eq!(reply["result"], json!([[0.1, 12000], [0.05, 30000]]));
}

#[tokio::test]
async fn transaction_get_respects_verbosity() {
    let dispatcher = dispatcher();
    let terse = roundtrip(
        &dispatcher,
        json!(1),
        "blockchain.transaction.get",
        json!(["ab".repeat(32), false]),
    )
    .await;
    assert_eq!(terse["result"], json!("deadbeef"));

    let verbose = roundtrip(
        &dispatcher,
        json!(2),
        "blockchain.transaction.get",
        json!(["ab".repeat(32), true]),
    )
    .await;
    assert_eq!(verbose["result"]["size"], json!(222));
}

#[tokio::test]
async fn broadcast_of_undecodable_payload_is_a_null_success() {
    let (dispatcher, backend) = dispatcher_with(MockBackend::default());
    let reply = roundtrip(
        &dispatcher,
        json!(1),
        "blockchain.transaction.broadcast",
        json!(["not-hex-at-all"]),
    )
    .await;
    assert_eq!(reply["result"], Value::Null);
    assert!(!reply.as_object().unwrap().contains_key("error"));
    // The backend never sees a payload that fails to decode.
    assert!(backend.broadcasts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn broadcast_of_valid_transaction_reaches_the_backend() {
    let (dispatcher, backend) = dispatcher_with(MockBackend::default());
    let reply = roundtrip(
        &dispatcher,
        json!(1),
        "blockchain.transaction.broadcast",
        json!([VALID_RAW_TX]),
    )
    .await;
    assert_eq!(reply["result"], json!("feed".repeat(16)));
    assert_eq!(*backend.broadcasts.lock().unwrap(), vec![VALID_RAW_TX]);
}
