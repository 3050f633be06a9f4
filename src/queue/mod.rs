//! Event queue (C2): durable FIFO of change notifications, keyed by sync
//! name.

mod memory;
mod redis_backend;

pub use memory::MemoryQueue;
pub use redis_backend::RedisQueue;

use async_trait::async_trait;

use crate::config::Settings;
use crate::error::Result;
use crate::payload::Payload;

#[async_trait]
pub trait EventQueue: Send + Sync {
    async fn push(&self, entries: Vec<Payload>) -> Result<()>;
    /// Non-blocking; returns up to `max` entries (`spec.md` §4.2).
    async fn pop(&self, max: usize) -> Result<Vec<Payload>>;
    async fn size(&self) -> Result<usize>;
    /// Removes the entire backing namespace. Used by teardown only.
    async fn delete(&self) -> Result<()>;
}

/// Builds the configured queue backend for `sync_name`. Falls back to an
/// in-process queue when no Redis URL is configured, so the crate runs
/// without external dependencies out of the box.
pub fn get_queue(sync_name: &str, settings: &Settings) -> Box<dyn EventQueue> {
    match &settings.redis_url {
        Some(url) => Box::new(RedisQueue::new(sync_name, url.clone())),
        None => Box::new(MemoryQueue::new()),
    }
}
