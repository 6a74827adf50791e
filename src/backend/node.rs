use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::cache::HistoryEntry;

use super::{Balance, ChainBackend, HeaderInfo, Utxo};

struct NodeConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Backend session speaking newline-delimited JSON-RPC to a local node.
///
/// The node answers requests strictly in order, so one connection with
/// request/reply pairs under a single lock is enough; ids exist for log
/// correlation, not demultiplexing.
pub struct NodeBackend {
    connection: Mutex<NodeConnection>,
    next_id: AtomicU64,
}

impl NodeBackend {
    pub async fn connect(url: &str) -> Result<Self> {
        let stream = TcpStream::connect(url)
            .await
            .with_context(|| format!("failed to connect to node at {}", url))?;
        let (read_half, write_half) = stream.into_split();
        log::info!("[NODE] connected to {}", url);
        Ok(Self {
            connection: Mutex::new(NodeConnection {
                reader: BufReader::new(read_half),
                writer: write_half,
            }),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let mut connection = self.connection.lock().await;
        connection
            .writer
            .write_all(line.as_bytes())
            .await
            .context("failed to write node request")?;

        let mut reply = String::new();
        let read = connection
            .reader
            .read_line(&mut reply)
            .await
            .context("failed to read node reply")?;
        drop(connection);
        if read == 0 {
            return Err(anyhow!("node closed the connection"));
        }

        let envelope: Value =
            serde_json::from_str(reply.trim()).context("node reply is not valid JSON")?;
        if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
            return Err(anyhow!("node error for {}: {}", method, error));
        }
        envelope
            .get("result")
            .cloned()
            .ok_or_else(|| anyhow!("node reply for {} has no result", method))
    }
}

#[async_trait]
impl ChainBackend for NodeBackend {
    async fn latest_header(&self) -> Result<HeaderInfo> {
        let result = self.call("getlatestblock", json!([])).await?;
        Ok(serde_json::from_value(result).context("bad getlatestblock reply")?)
    }

    async fn balance(&self, scripthash: &str) -> Result<Balance> {
        let result = self
            .call("getbalancebyscripthash", json!([scripthash]))
            .await?;
        Ok(serde_json::from_value(result).context("bad getbalancebyscripthash reply")?)
    }

    async fn history(
        &self,
        scripthash: &str,
    ) -> Result<(Vec<HistoryEntry>, Vec<HistoryEntry>)> {
        let result = self
            .call("getscripthashhistory", json!([scripthash]))
            .await?;
        let entries: Vec<HistoryEntry> =
            serde_json::from_value(result).context("bad getscripthashhistory reply")?;
        // Height 0 marks entries the node has only seen in its mempool.
        let (mempool, confirmed) = entries.into_iter().partition(|e| e.height == 0);
        Ok((confirmed, mempool))
    }

    async fn utxos(&self, scripthash: &str) -> Result<Vec<Utxo>> {
        let result = self.call("getscripthashutxos", json!([scripthash])).await?;
        Ok(serde_json::from_value(result).context("bad getscripthashutxos reply")?)
    }

    async fn transaction(&self, txid: &str, verbose: bool) -> Result<(String, Option<Value>)> {
        let mut result = self.call("gettransaction", json!([txid])).await?;
        let hex = result
            .get("hex")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("gettransaction reply for {} has no hex", txid))?
            .to_string();
        if !verbose {
            return Ok((hex, None));
        }
        // Verbose replies carry the decoded fields without the raw hex.
        if let Some(fields) = result.as_object_mut() {
            fields.remove("hex");
        }
        Ok((hex, Some(result)))
    }

    async fn broadcast(&self, raw_hex: &str) -> Result<String> {
        let result = self.call("sendrawtransaction", json!([raw_hex])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("sendrawtransaction reply is not a txid"))
    }

    async fn fee_histogram(&self) -> Result<Vec<(f64, u64)>> {
        // The node keeps no fee-bucketed mempool view.
        Ok(Vec::new())
    }
}
