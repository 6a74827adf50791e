//! Esplora-style REST client for upstream chain data.
//!
//! All endpoints are plain HTTP GETs returning text or JSON; a 429 status is
//! classified as [`SourceError::RateLimited`] so the indexer's backoff policy
//! can tell it apart from hard failures without inspecting message text.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("rate limited by upstream explorer")]
    RateLimited,
    #[error("unexpected status {0} from upstream explorer")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to decode upstream response: {0}")]
    Decode(String),
}

impl SourceError {
    /// Rate-limit classification used by the retry/backoff policy.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, SourceError::RateLimited)
    }
}

pub type SourceResult<T> = Result<T, SourceError>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxStatus {
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u64>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub block_time: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxOutput {
    #[serde(default)]
    pub scriptpubkey: String,
    #[serde(default)]
    pub scriptpubkey_address: Option<String>,
    #[serde(default)]
    pub value: u64,
}

/// Transaction detail as the explorer reports it, trimmed to the fields the
/// indexer and the history lookup read. Transient: fetched, translated into
/// history entries, discarded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExplorerTx {
    pub txid: String,
    #[serde(default)]
    pub vout: Vec<TxOutput>,
    #[serde(default)]
    pub status: TxStatus,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct StatTotals {
    #[serde(default)]
    pub funded_txo_sum: u64,
    #[serde(default)]
    pub spent_txo_sum: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ScripthashStats {
    #[serde(default)]
    pub chain_stats: StatTotals,
    #[serde(default)]
    pub mempool_stats: StatTotals,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UtxoEntry {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    #[serde(default)]
    pub status: TxStatus,
}

/// Transient view of one block: its height and ordered txids.
#[derive(Debug, Clone)]
pub struct BlockSummary {
    pub height: u64,
    pub txids: Vec<String>,
}

/// Upstream chain-data endpoints the indexer scans. Implemented by the
/// Esplora client, mocked in tests.
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn tip_height(&self) -> SourceResult<u64>;

    async fn block_hash(&self, height: u64) -> SourceResult<String>;

    async fn block_txids(&self, hash: &str) -> SourceResult<Vec<String>>;

    async fn transaction(&self, txid: &str) -> SourceResult<ExplorerTx>;

    /// Address history by forward-encoded scripthash, newest first.
    async fn scripthash_txs(&self, scripthash: &str) -> SourceResult<Vec<ExplorerTx>>;
}

#[async_trait]
impl<T: ChainSource + ?Sized> ChainSource for Arc<T> {
    async fn tip_height(&self) -> SourceResult<u64> {
        (**self).tip_height().await
    }

    async fn block_hash(&self, height: u64) -> SourceResult<String> {
        (**self).block_hash(height).await
    }

    async fn block_txids(&self, hash: &str) -> SourceResult<Vec<String>> {
        (**self).block_txids(hash).await
    }

    async fn transaction(&self, txid: &str) -> SourceResult<ExplorerTx> {
        (**self).transaction(txid).await
    }

    async fn scripthash_txs(&self, scripthash: &str) -> SourceResult<Vec<ExplorerTx>> {
        (**self).scripthash_txs(scripthash).await
    }
}

pub struct EsploraClient {
    http: reqwest::Client,
    base_url: String,
}

impl EsploraClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn get_text(&self, path: &str) -> SourceResult<String> {
        let url = format!("{}{}", self.base_url, path);
        log::trace!("[ESPLORA] GET {}", url);
        let response = self.http.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => Ok(response.text().await?),
            StatusCode::TOO_MANY_REQUESTS => Err(SourceError::RateLimited),
            status => Err(SourceError::Status(status.as_u16())),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SourceResult<T> {
        let body = self.get_text(path).await?;
        serde_json::from_str(&body).map_err(|err| SourceError::Decode(err.to_string()))
    }

    pub async fn header_hex(&self, hash: &str) -> SourceResult<String> {
        Ok(self
            .get_text(&format!("/block/{}/header", hash))
            .await?
            .trim()
            .to_string())
    }

    pub async fn transaction_hex(&self, txid: &str) -> SourceResult<String> {
        Ok(self
            .get_text(&format!("/tx/{}/hex", txid))
            .await?
            .trim()
            .to_string())
    }

    pub async fn transaction_json(&self, txid: &str) -> SourceResult<Value> {
        self.get_json(&format!("/tx/{}", txid)).await
    }

    pub async fn scripthash_stats(&self, scripthash: &str) -> SourceResult<ScripthashStats> {
        self.get_json(&format!("/scripthash/{}", scripthash)).await
    }

    pub async fn scripthash_utxos(&self, scripthash: &str) -> SourceResult<Vec<UtxoEntry>> {
        self.get_json(&format!("/scripthash/{}/utxo", scripthash))
            .await
    }

    pub async fn broadcast(&self, raw_hex: &str) -> SourceResult<String> {
        let url = format!("{}/tx", self.base_url);
        log::trace!("[ESPLORA] POST {}", url);
        let response = self.http.post(&url).body(raw_hex.to_string()).send().await?;
        match response.status() {
            StatusCode::OK => Ok(response.text().await?.trim().to_string()),
            StatusCode::TOO_MANY_REQUESTS => Err(SourceError::RateLimited),
            status => Err(SourceError::Status(status.as_u16())),
        }
    }
}

#[async_trait]
impl ChainSource for EsploraClient {
    async fn tip_height(&self) -> SourceResult<u64> {
        let body = self.get_text("/blocks/tip/height").await?;
        body.trim()
            .parse()
            .map_err(|_| SourceError::Decode(format!("bad tip height: {}", body.trim())))
    }

    async fn block_hash(&self, height: u64) -> SourceResult<String> {
        Ok(self
            .get_text(&format!("/block-height/{}", height))
            .await?
            .trim()
            .to_string())
    }

    async fn block_txids(&self, hash: &str) -> SourceResult<Vec<String>> {
        self.get_json(&format!("/block/{}/txids", hash)).await
    }

    async fn transaction(&self, txid: &str) -> SourceResult<ExplorerTx> {
        self.get_json(&format!("/tx/{}", txid)).await
    }

    async fn scripthash_txs(&self, scripthash: &str) -> SourceResult<Vec<ExplorerTx>> {
        self.get_json(&format!("/scripthash/{}/txs", scripthash))
            .await
    }
}
