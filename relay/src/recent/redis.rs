//! Redis-backed recent-request store.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fred::interfaces::{ListInterface, TransactionInterface};
use fred::prelude::*;
use tracing::info;

use super::{RecentLogError, RecentRequestStore};

/// Lists stored in Redis; push, expire and trim run in one `MULTI`/`EXEC`.
#[derive(Clone)]
pub struct RedisRecentStore {
    redis: Client,
}

impl RedisRecentStore {
    pub fn new(redis: Client) -> Self {
        Self { redis }
    }

    /// Connect to Redis and wait until the client is ready.
    ///
    /// Every command fails once `command_timeout` elapses without a reply.
    pub async fn connect(
        redis_url: &str,
        command_timeout: Duration,
    ) -> Result<Self, RecentLogError> {
        let config = Config::from_url(redis_url)?;
        let performance = PerformanceConfig {
            default_command_timeout: command_timeout,
            ..Default::default()
        };
        let client = Client::new(config, Some(performance), None, None);
        client.connect();
        client.wait_for_connect().await?;

        info!("redis_connected");
        Ok(Self::new(client))
    }
}

#[async_trait]
impl RecentRequestStore for RedisRecentStore {
    async fn push(
        &self,
        key: &str,
        payload: Bytes,
        ttl_secs: i64,
        keep: Option<usize>,
    ) -> Result<(), RecentLogError> {
        let trx = self.redis.multi();
        let _: () = trx.lpush(key, payload).await?;
        let _: () = trx.expire(key, ttl_secs, None).await?;
        if let Some(keep) = keep {
            let _: () = trx.ltrim(key, 0, keep.max(1) as i64 - 1).await?;
        }
        let _: () = trx.exec(true).await?;
        Ok(())
    }

    async fn range(&self, key: &str) -> Result<Vec<Bytes>, RecentLogError> {
        let items: Vec<Vec<u8>> = self.redis.lrange(key, 0, -1).await?;
        Ok(items.into_iter().map(Bytes::from).collect())
    }
}
