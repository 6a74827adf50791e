//! Read-through, capacity-bounded per-scripthash history cache.
//!
//! The cache is a thin policy layer over an external ordered-list store: the
//! indexer appends entries as it scans blocks, the dispatcher reads them,
//! and a miss falls through to an on-demand lookup against the source of
//! truth. There is no expiry; staleness is bounded only by how often the
//! indexer runs, and readers must tolerate lists observed mid-trim.

mod store;

pub use store::{ListStore, MemoryStore, RedisStore};

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Upper bound on stored entries per scripthash; older entries are trimmed.
pub const HISTORY_CAPACITY: usize = 2000;

/// One `(height, tx_hash)` observation for a scripthash.
///
/// Height 0 marks a transaction only seen in the mempool. Ordering within a
/// scripthash's list is insertion order, newest first, not chain order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub height: u64,
    pub tx_hash: String,
}

/// On-demand source of truth consulted when the store has nothing cached.
#[async_trait]
pub trait HistoryLookup: Send + Sync {
    /// Full history for a wire-encoded scripthash, newest first.
    async fn full_history(&self, scripthash: &str) -> Result<Vec<HistoryEntry>>;
}

pub struct HistoryCache {
    store: Arc<dyn ListStore>,
    lookup: Arc<dyn HistoryLookup>,
}

impl HistoryCache {
    pub fn new(store: Arc<dyn ListStore>, lookup: Arc<dyn HistoryLookup>) -> Self {
        Self { store, lookup }
    }

    /// Read the cached history for a scripthash, falling through to the
    /// on-demand lookup on a miss. Store and lookup failures degrade to an
    /// empty result; this never errors.
    pub async fn get(&self, scripthash: &str) -> Vec<HistoryEntry> {
        let cached = self.read_store(scripthash).await;
        if !cached.is_empty() {
            return cached;
        }

        let fetched = match self.lookup.full_history(scripthash).await {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!("[CACHE] on-demand lookup for {} failed: {}", scripthash, err);
                return Vec::new();
            }
        };

        if let Some(newest) = fetched.first() {
            log::debug!("[CACHE] filling {} from on-demand lookup", scripthash);
            if let Err(err) = self.put(scripthash, newest.clone()).await {
                log::warn!("[CACHE] failed to fill {}: {}", scripthash, err);
            }
            return self.read_store(scripthash).await;
        }
        Vec::new()
    }

    /// Append one entry at the front and trim to capacity. This is the only
    /// mutation path; duplicate appends are tolerated, not deduplicated.
    pub async fn put(&self, scripthash: &str, entry: HistoryEntry) -> Result<()> {
        let payload = serde_json::to_string(&entry)?;
        self.store.push_front(scripthash, &payload).await?;
        self.store
            .trim(scripthash, 0, HISTORY_CAPACITY as isize - 1)
            .await?;
        Ok(())
    }

    async fn read_store(&self, scripthash: &str) -> Vec<HistoryEntry> {
        let raw = match self.store.range(scripthash).await {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!("[CACHE] store read for {} failed: {}", scripthash, err);
                return Vec::new();
            }
        };
        raw.iter()
            .filter_map(|item| match serde_json::from_str(item) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    log::warn!("[CACHE] dropping undecodable entry for {}: {}", scripthash, err);
                    None
                }
            })
            .collect()
    }
}
