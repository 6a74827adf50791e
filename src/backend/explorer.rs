use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::cache::HistoryEntry;
use crate::esplora::{ChainSource, EsploraClient};
use crate::scripthash::reverse_hex;

use super::{Balance, ChainBackend, HeaderInfo, Utxo};

/// Backend session serving chain data from an Esplora-style explorer.
///
/// Shares the same client the indexer scans with; all translation between
/// wire-encoded and forward scripthash encodings happens here.
pub struct ExplorerBackend {
    client: Arc<EsploraClient>,
}

impl ExplorerBackend {
    pub fn new(client: Arc<EsploraClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChainBackend for ExplorerBackend {
    async fn latest_header(&self) -> Result<HeaderInfo> {
        let height = self.client.tip_height().await?;
        let hash = self.client.block_hash(height).await?;
        let hex = self.client.header_hex(&hash).await?;
        Ok(HeaderInfo { height, hex })
    }

    async fn balance(&self, scripthash: &str) -> Result<Balance> {
        let forward = reverse_hex(scripthash)?;
        let stats = self.client.scripthash_stats(&forward).await?;
        Ok(Balance {
            confirmed: stats.chain_stats.funded_txo_sum as i64
                - stats.chain_stats.spent_txo_sum as i64,
            unconfirmed: stats.mempool_stats.funded_txo_sum as i64
                - stats.mempool_stats.spent_txo_sum as i64,
        })
    }

    async fn history(
        &self,
        scripthash: &str,
    ) -> Result<(Vec<HistoryEntry>, Vec<HistoryEntry>)> {
        let forward = reverse_hex(scripthash)?;
        let txs = self.client.scripthash_txs(&forward).await?;

        let mut confirmed = Vec::new();
        let mut mempool = Vec::new();
        for tx in txs {
            let entry = HistoryEntry {
                height: tx.status.block_height.unwrap_or(0),
                tx_hash: tx.txid,
            };
            if tx.status.confirmed {
                confirmed.push(entry);
            } else {
                mempool.push(entry);
            }
        }
        Ok((confirmed, mempool))
    }

    async fn utxos(&self, scripthash: &str) -> Result<Vec<Utxo>> {
        let forward = reverse_hex(scripthash)?;
        let entries = self.client.scripthash_utxos(&forward).await?;
        Ok(entries
            .into_iter()
            .map(|entry| Utxo {
                tx_hash: entry.txid,
                tx_pos: entry.vout,
                height: entry.status.block_height.unwrap_or(0),
                value: entry.value,
            })
            .collect())
    }

    async fn transaction(&self, txid: &str, verbose: bool) -> Result<(String, Option<Value>)> {
        let hex = self.client.transaction_hex(txid).await?;
        let decoded = if verbose {
            Some(self.client.transaction_json(txid).await?)
        } else {
            None
        };
        Ok((hex, decoded))
    }

    async fn broadcast(&self, raw_hex: &str) -> Result<String> {
        Ok(self.client.broadcast(raw_hex).await?)
    }

    async fn fee_histogram(&self) -> Result<Vec<(f64, u64)>> {
        // Esplora exposes no mempool histogram endpoint.
        Ok(Vec::new())
    }
}
