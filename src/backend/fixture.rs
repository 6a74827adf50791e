use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::cache::HistoryEntry;

use super::{Balance, ChainBackend, HeaderInfo, Utxo};

/// One per-scripthash record in a fixture file.
#[derive(Debug, Deserialize)]
struct FixtureRecord<T> {
    scripthash: String,
    #[serde(rename = "transaction")]
    payload: T,
}

/// Backend session serving canned chain data from JSON files on disk.
///
/// Used for demos and integration testing without a node or explorer.
/// Per-scripthash files hold arrays of `{scripthash, transaction}` records;
/// `header.json` and `feehistogram.json` are plain documents. Files are
/// re-read per call so fixtures can be edited while the gateway runs.
pub struct FixtureBackend {
    dir: PathBuf,
}

impl FixtureBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.dir.join(name);
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read fixture {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("failed to parse fixture {}", path.display()))
    }

    /// Payload for a scripthash from a record-array fixture, if present.
    fn lookup<T: DeserializeOwned>(&self, name: &str, scripthash: &str) -> Result<Option<T>> {
        let records: Vec<FixtureRecord<T>> = self.load(name)?;
        Ok(records
            .into_iter()
            .find(|record| record.scripthash == scripthash)
            .map(|record| record.payload))
    }
}

#[async_trait]
impl ChainBackend for FixtureBackend {
    async fn latest_header(&self) -> Result<HeaderInfo> {
        self.load("header.json")
    }

    async fn balance(&self, scripthash: &str) -> Result<Balance> {
        // Unknown scripthashes hold nothing, which is an answer, not an error.
        Ok(self
            .lookup("balance.json", scripthash)?
            .unwrap_or_default())
    }

    async fn history(
        &self,
        scripthash: &str,
    ) -> Result<(Vec<HistoryEntry>, Vec<HistoryEntry>)> {
        let entries: Vec<HistoryEntry> = self
            .lookup("txshistory.json", scripthash)?
            .unwrap_or_default();
        let (mempool, confirmed) = entries.into_iter().partition(|e| e.height == 0);
        Ok((confirmed, mempool))
    }

    async fn utxos(&self, scripthash: &str) -> Result<Vec<Utxo>> {
        Ok(self
            .lookup("utxo.json", scripthash)?
            .unwrap_or_default())
    }

    async fn transaction(&self, txid: &str, verbose: bool) -> Result<(String, Option<Value>)> {
        let mut transactions: HashMap<String, Value> = self.load("transactions.json")?;
        let mut detail = transactions
            .remove(txid)
            .ok_or_else(|| anyhow!("no fixture transaction {}", txid))?;
        let hex = detail
            .get("hex")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("fixture transaction {} has no hex", txid))?
            .to_string();
        if !verbose {
            return Ok((hex, None));
        }
        if let Some(fields) = detail.as_object_mut() {
            fields.remove("hex");
        }
        Ok((hex, Some(detail)))
    }

    async fn broadcast(&self, raw_hex: &str) -> Result<String> {
        // Nothing to submit to; the txid is computed locally so the client
        // sees the same reply shape as against a live backend.
        let bytes = hex::decode(raw_hex).context("broadcast payload is not hex")?;
        let tx: bitcoin::Transaction = bitcoin::consensus::encode::deserialize(&bytes)
            .context("broadcast payload is not a valid transaction")?;
        Ok(tx.compute_txid().to_string())
    }

    async fn fee_histogram(&self) -> Result<Vec<(f64, u64)>> {
        self.load("feehistogram.json")
    }
}
