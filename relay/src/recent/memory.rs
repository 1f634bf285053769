//! In-memory recent-request store for tests and local runs.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use super::{RecentLogError, RecentRequestStore};

#[derive(Default)]
struct Entry {
    items: VecDeque<Bytes>,
    ttl_secs: i64,
}

/// Lists kept in a mutex-guarded map. Expiry is recorded but not enforced.
#[derive(Default)]
pub struct MemoryRecentStore {
    lists: Mutex<HashMap<String, Entry>>,
}

impl MemoryRecentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expiry last set on `key`.
    pub async fn ttl_secs(&self, key: &str) -> Option<i64> {
        self.lists.lock().await.get(key).map(|e| e.ttl_secs)
    }
}

#[async_trait]
impl RecentRequestStore for MemoryRecentStore {
    async fn push(
        &self,
        key: &str,
        payload: Bytes,
        ttl_secs: i64,
        keep: Option<usize>,
    ) -> Result<(), RecentLogError> {
        let mut lists = self.lists.lock().await;
        let entry = lists.entry(key.to_string()).or_default();
        entry.items.push_front(payload);
        entry.ttl_secs = ttl_secs;
        if let Some(keep) = keep {
            entry.items.truncate(keep);
        }
        Ok(())
    }

    async fn range(&self, key: &str) -> Result<Vec<Bytes>, RecentLogError> {
        Ok(self
            .lists
            .lock()
            .await
            .get(key)
            .map(|e| e.items.iter().cloned().collect())
            .unwrap_or_default())
    }
}
