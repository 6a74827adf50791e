//! Background chain scanner populating the history cache.
//!
//! The indexer runs for the process lifetime, decoupled from client
//! traffic: resolve the chain tip, walk the most recent heights, record a
//! history entry for every address-bearing output it sees, sleep, repeat.
//! Rate-limited upstream responses are retried with doubling delays; hard
//! failures skip the block and the cycle carries on.


use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::Network;

use crate::cache::{HistoryCache, HistoryEntry, HistoryLookup};
use crate::esplora::{BlockSummary, ChainSource, EsploraClient, SourceResult};
use crate::scripthash::{address_scripthash, reverse_hex};

/// How many recent heights each cycle re-scans.
const SCAN_DEPTH: u64 = 20;

/// Pause between scan cycles.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(600);

/// Bounded retry with exponential backoff for rate-limited fetches.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay after failed attempt `attempt` (zero-based):
    /// base, 2x base, 4x base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

pub struct ChainIndexer<S> {
    source: S,
    cache: Arc<HistoryCache>,
    network: Network,
    interval: Duration,
    retry: RetryPolicy,
}

impl<S: ChainSource> ChainIndexer<S> {
    pub fn new(source: S, cache: Arc<HistoryCache>, network: Network) -> Self {
        Self {
            source,
            cache,
            network,
            interval: DEFAULT_SCAN_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Scan forever. Only process shutdown stops this loop.
    pub async fn run(self) {
        log::info!(
            "[INDEXER] starting: {} blocks per cycle, every {:?}",
            SCAN_DEPTH,
            self.interval
        );
        let mut cycle_backoff = self.retry.base_delay;
        loop {
            self.run_cycle(&mut cycle_backoff).await;
            tokio::time::sleep(self.interval).await;
        }
    }

    /// One driver iteration. A rate limit surfacing at cycle level backs the
    /// whole cycle off with a doubling delay; any completed cycle resets it
    /// along with the per-block retry accounting.
    async fn run_cycle(&self, cycle_backoff: &mut Duration) {
        match self.scan_recent_blocks().await {
            Ok(()) => {
                *cycle_backoff = self.retry.base_delay;
            }
            Err(err) if err.is_rate_limit() => {
                log::warn!("[INDEXER] cycle rate limited, backing off {:?}", cycle_backoff);
                tokio::time::sleep(*cycle_backoff).await;
                *cycle_backoff = cycle_backoff.saturating_mul(2);
            }
            Err(err) => {
                log::error!("[INDEXER] scan cycle failed: {}", err);
                *cycle_backoff = self.retry.base_delay;
            }
        }
    }

    /// One cycle: resolve the tip, then walk the most recent heights. A
    /// block that cannot be fetched is logged and skipped; the cycle never
    /// aborts for a single block.
    pub async fn scan_recent_blocks(&self) -> SourceResult<()> {
        let tip = self.source.tip_height().await?;
        log::debug!("[INDEXER] tip height {}", tip);

        for offset in 0..SCAN_DEPTH {
            let Some(height) = tip.checked_sub(offset) else {
                break;
            };
            match self.fetch_block_with_retry(height).await {
                Ok(block) => self.process_block(&block).await,
                Err(err) => log::warn!("[INDEXER] skipping block {}: {}", height, err),
            }
        }
        Ok(())
    }

    /// Fetch a block's txid list, retrying rate-limited responses with
    /// doubling delays up to the attempt ceiling. Hard failures abort
    /// immediately.
    async fn fetch_block_with_retry(&self, height: u64) -> SourceResult<BlockSummary> {
        let mut attempt = 0;
        loop {
            match self.fetch_block(height).await {
                Ok(block) => return Ok(block),
                Err(err) if err.is_rate_limit() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    log::warn!(
                        "[INDEXER] rate limited fetching block {}, retrying in {:?}",
                        height,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_block(&self, height: u64) -> SourceResult<BlockSummary> {
        let hash = self.source.block_hash(height).await?;
        let txids = self.source.block_txids(&hash).await?;
        Ok(BlockSummary { height, txids })
    }

    /// Record a history entry for every output that resolves to an address.
    /// Addresses, not outputs, are the index key: a transaction paying one
    /// address twice produces two appends, by design.
    async fn process_block(&self, block: &BlockSummary) {
        for txid in &block.txids {
            let tx = match self.source.transaction(txid).await {
                Ok(tx) => tx,
                Err(err) => {
                    log::warn!("[INDEXER] failed to fetch tx {}: {}", txid, err);
                    continue;
                }
            };
            for output in &tx.vout {
                let Some(address) = output.scriptpubkey_address.as_deref() else {
                    continue;
                };
                let scripthash = match address_scripthash(address, self.network) {
                    Ok(scripthash) => scripthash,
                    Err(err) => {
                        log::warn!("[INDEXER] no scripthash for address {}: {}", address, err);
                        continue;
                    }
                };
                let entry = HistoryEntry {
                    height: block.height,
                    tx_hash: txid.clone(),
                };
                if let Err(err) = self.cache.put(&scripthash, entry).await {
                    log::warn!("[INDEXER] cache update for {} failed: {}", scripthash, err);
                }
            }
        }
        log::debug!(
            "[INDEXER] processed block {} ({} txs)",
            block.height,
            block.txids.len()
        );
    }
}

/// On-demand scripthash lookup against the explorer, used by the cache's
/// read-through fallback when a client asks for history nobody indexed yet.
#[async_trait]
impl HistoryLookup for EsploraClient {
    async fn full_history(&self, scripthash: &str) -> anyhow::Result<Vec<HistoryEntry>> {
        // Esplora indexes by the forward scripthash encoding.
        let forward = reverse_hex(scripthash)?;
        let txs = self.scripthash_txs(&forward).await?;
        if txs.is_empty() {
            // Historical contract: no on-chain activity yields one zeroed
            // entry rather than an empty list.
            return Ok(vec![HistoryEntry::default()]);
        }
        Ok(txs
            .into_iter()
            .map(|tx| HistoryEntry {
                height: tx.status.block_height.unwrap_or(0),
                tx_hash: tx.txid,
            })
            .collect())
    }
}
