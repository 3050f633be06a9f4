//! Checkpoint store (C1): persists the single last-synced txid per sync.

mod file;
mod redis_backend;

pub use file::FileCheckpoint;
pub use redis_backend::RedisCheckpoint;

use async_trait::async_trait;

use crate::config::{CheckpointImpl, Settings};
use crate::error::Result;

#[async_trait]
pub trait Checkpoint: Send + Sync {
    async fn validate(&self) -> Result<()>;
    async fn get(&self) -> Result<Option<i64>>;
    /// Rejects `None` by construction: callers pass an `i64`, matching
    /// `spec.md` §4.1 ("`set(int)` (rejects nil)").
    async fn set(&self, value: i64) -> Result<()>;
    async fn teardown(&self) -> Result<()>;
}

/// Builds the configured checkpoint backend for `sync_name`
/// (`original_source/pgsync/checkpoint.py::get_checkpoint`).
pub fn get_checkpoint(sync_name: &str, settings: &Settings) -> Box<dyn Checkpoint> {
    match settings.checkpoint_impl {
        CheckpointImpl::File => Box::new(FileCheckpoint::new(sync_name, &settings.checkpoint_path)),
        CheckpointImpl::Redis => Box::new(RedisCheckpoint::new(
            sync_name,
            &settings.checkpoint_redis_namespace,
            settings.redis_url.clone().unwrap_or_default(),
        )),
    }
}
