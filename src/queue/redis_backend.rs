use async_trait::async_trait;
use redis::AsyncCommands;

use super::EventQueue;
use crate::error::{Error, Result};
use crate::payload::Payload;

/// A Redis list per sync name, pushed to from the right and popped from the
/// left to realize FIFO (`original_source/pgsync/redisqueue.RedisQueue`).
pub struct RedisQueue {
    key: String,
    client: redis::Client,
}

impl RedisQueue {
    pub fn new(sync_name: &str, redis_url: String) -> Self {
        let client = redis::Client::open(redis_url).expect("invalid REDIS_URL");
        RedisQueue {
            key: format!("indexflow_queue:{sync_name}"),
            client,
        }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl EventQueue for RedisQueue {
    async fn push(&self, entries: Vec<Payload>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let serialized: Vec<String> = entries
            .iter()
            .map(|p| serde_json::to_string(p).expect("Payload always serializes"))
            .collect();
        let _: () = conn.rpush(&self.key, serialized).await?;
        Ok(())
    }

    async fn pop(&self, max: usize) -> Result<Vec<Payload>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let raw: Vec<String> = conn.lpop(&self.key, std::num::NonZeroUsize::new(max)).await?;
        raw.into_iter()
            .map(|s| serde_json::from_str(&s).map_err(|e| Error::parse("queue entry", e)))
            .collect()
    }

    async fn size(&self) -> Result<usize> {
        let mut conn = self.connection().await?;
        Ok(conn.llen(&self.key).await?)
    }

    async fn delete(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(&self.key).await?;
        Ok(())
    }
}
