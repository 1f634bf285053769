//! Recent-request log: the last few raw payloads received on each address.
//!
//! Each address owns a list `"{address}:lreqs"`, most recent first. Every write
//! pushes the payload and resets the list's expiry; only a sample of writes
//! trims the list, so its length is bounded on average rather than on every
//! write.

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use crate::config::Config;
use crate::policy::should_trim_log;

pub use memory::MemoryRecentStore;
pub use redis::RedisRecentStore;

/// Errors from the recent-request store.
#[derive(Error, Debug)]
pub enum RecentLogError {
    #[error("redis error: {0}")]
    Redis(#[from] fred::error::Error),
    #[error("recent-request log write timed out after {0:?}")]
    Timeout(Duration),
}

/// Backend for the log. `push` must apply all of its steps atomically.
#[async_trait]
pub trait RecentRequestStore: Send + Sync {
    /// Prepend `payload` to `key`, set the list to expire after `ttl_secs`,
    /// and keep only the first `keep` entries when given.
    async fn push(
        &self,
        key: &str,
        payload: Bytes,
        ttl_secs: i64,
        keep: Option<usize>,
    ) -> Result<(), RecentLogError>;

    /// Entries of `key`, most recent first.
    async fn range(&self, key: &str) -> Result<Vec<Bytes>, RecentLogError>;
}

/// Bounded per-address payload history.
#[derive(Clone)]
pub struct RecentRequestLog {
    store: Arc<dyn RecentRequestStore>,
    max_entries: usize,
    ttl_secs: i64,
    trim_one_in: u32,
    write_timeout: Duration,
}

impl RecentRequestLog {
    pub fn new(store: Arc<dyn RecentRequestStore>, config: &Config) -> Self {
        Self {
            store,
            max_entries: config.recent_requests_max.max(1),
            ttl_secs: config.recent_requests_ttl_secs,
            trim_one_in: if config.recent_trim_every_write {
                1
            } else {
                config.recent_trim_one_in
            },
            write_timeout: config.recent_log_timeout(),
        }
    }

    /// Redis key holding an address's log.
    pub fn key(address: &str) -> String {
        format!("{address}:lreqs")
    }

    /// Roll whether the next write should trim.
    pub fn roll_trim<R: Rng>(&self, rng: &mut R) -> bool {
        should_trim_log(rng, self.trim_one_in)
    }

    /// Record a payload, sampling the trim decision from the thread RNG.
    ///
    /// Gives up after the configured write timeout so a stalled store cannot
    /// hold the caller.
    pub async fn record(&self, address: &str, payload: Bytes) -> Result<(), RecentLogError> {
        // ThreadRng is not Send; roll before awaiting.
        let trim = self.roll_trim(&mut rand::thread_rng());
        timeout(self.write_timeout, self.push(address, payload, trim))
            .await
            .map_err(|_| RecentLogError::Timeout(self.write_timeout))?
    }

    /// Record a payload with an explicit trim decision.
    pub async fn push(
        &self,
        address: &str,
        payload: Bytes,
        trim: bool,
    ) -> Result<(), RecentLogError> {
        let keep = trim.then_some(self.max_entries);
        self.store
            .push(&Self::key(address), payload, self.ttl_secs, keep)
            .await?;

        debug!(address = %address, trimmed = trim, "recent_request_recorded");
        Ok(())
    }

    /// Stored payloads for `address`, most recent first.
    pub async fn recent(&self, address: &str) -> Result<Vec<Bytes>, RecentLogError> {
        self.store.range(&Self::key(address)).await
    }
}
