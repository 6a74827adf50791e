use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;

/// Ordered-list key-value store holding serialized history entries.
///
/// Mirrors the Redis list primitives the cache is built on; keys are
/// wire-encoded scripthashes, values JSON-serialized entries.
#[async_trait]
pub trait ListStore: Send + Sync {
    async fn push_front(&self, key: &str, value: &str) -> Result<()>;

    async fn trim(&self, key: &str, start: isize, stop: isize) -> Result<()>;

    /// All stored values for the key, front (newest) first.
    async fn range(&self, key: &str) -> Result<Vec<String>>;
}

/// Redis-backed store. The multiplexed connection is cloned per call and is
/// safe for concurrent use across connection handlers and the indexer.
pub struct RedisStore {
    connection: redis::aio::MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).with_context(|| format!("invalid redis url {}", url))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .with_context(|| format!("failed to connect to redis at {}", url))?;
        log::info!("[STORE] connected to redis at {}", url);
        Ok(Self { connection })
    }
}

#[async_trait]
impl ListStore for RedisStore {
    async fn push_front(&self, key: &str, value: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = connection.lpush(key, value).await?;
        Ok(())
    }

    async fn trim(&self, key: &str, start: isize, stop: isize) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = connection.ltrim(key, start, stop).await?;
        Ok(())
    }

    async fn range(&self, key: &str) -> Result<Vec<String>> {
        let mut connection = self.connection.clone();
        let values: Vec<String> = connection.lrange(key, 0, -1).await?;
        Ok(values)
    }
}

/// In-memory store used by fixture mode and tests.
#[derive(Default)]
pub struct MemoryStore {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ListStore for MemoryStore {
    async fn push_front(&self, key: &str, value: &str) -> Result<()> {
        let mut lists = self.lists.lock().unwrap();
        lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn trim(&self, key: &str, start: isize, stop: isize) -> Result<()> {
        let mut lists = self.lists.lock().unwrap();
        if let Some(list) = lists.get_mut(key) {
            let len = list.len() as isize;
            let start = start.clamp(0, len);
            let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
            let keep = (stop - start + 1).max(0) as usize;
            *list = list
                .iter()
                .skip(start as usize)
                .take(keep)
                .cloned()
                .collect();
        }
        Ok(())
    }

    async fn range(&self, key: &str) -> Result<Vec<String>> {
        let lists = self.lists.lock().unwrap();
        Ok(lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }
}
