use async_trait::async_trait;
use redis::AsyncCommands;

use super::Checkpoint;
use crate::error::{Error, Result};

/// A single key `<namespace>:<sync_name>` holding the decimal checkpoint
/// value (`spec.md` §6 "KV mode").
pub struct RedisCheckpoint {
    key: String,
    client: redis::Client,
}

impl RedisCheckpoint {
    pub fn new(sync_name: &str, namespace: &str, redis_url: String) -> Self {
        let client = redis::Client::open(redis_url).expect("invalid REDIS_URL");
        RedisCheckpoint {
            key: format!("{namespace}:{sync_name}"),
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
impl Checkpoint for RedisCheckpoint {
    async fn validate(&self) -> Result<()> {
        let mut conn = self.connection().await.map_err(|e| {
            Error::environment(format!("cannot reach checkpoint store: {e}"))
        })?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| Error::environment(format!("checkpoint store ping failed: {e}")))?;
        Ok(())
    }

    async fn get(&self) -> Result<Option<i64>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(&self.key).await?;
        match raw {
            Some(s) => s
                .parse::<i64>()
                .map(Some)
                .map_err(|e| Error::parse("checkpoint", e)),
            None => Ok(None),
        }
    }

    async fn set(&self, value: i64) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.set(&self.key, value.to_string()).await?;
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(&self.key).await?;
        Ok(())
    }
}
