use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::EventQueue;
use crate::error::Result;
use crate::payload::Payload;

/// In-process FIFO, used when no Redis URL is configured. Not durable
/// across restarts, which the caller accepts by not configuring a shared
/// backend.
pub struct MemoryQueue {
    entries: Mutex<VecDeque<Payload>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        MemoryQueue {
            entries: Mutex::new(VecDeque::new()),
        }
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventQueue for MemoryQueue {
    async fn push(&self, entries: Vec<Payload>) -> Result<()> {
        let mut guard = self.entries.lock().await;
        guard.extend(entries);
        Ok(())
    }

    async fn pop(&self, max: usize) -> Result<Vec<Payload>> {
        let mut guard = self.entries.lock().await;
        let n = max.min(guard.len());
        Ok(guard.drain(..n).collect())
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.entries.lock().await.len())
    }

    async fn delete(&self) -> Result<()> {
        self.entries.lock().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::TgOp;

    fn payload(table: &str) -> Payload {
        Payload {
            tg_op: TgOp::Insert,
            schema: "public".into(),
            table: table.into(),
            old: Default::default(),
            new: Default::default(),
            xmin: Some(1),
        }
    }

    #[tokio::test]
    async fn push_then_pop_is_fifo() {
        let queue = MemoryQueue::new();
        queue
            .push(vec![payload("a"), payload("b"), payload("c")])
            .await
            .unwrap();
        assert_eq!(queue.size().await.unwrap(), 3);

        let popped = queue.pop(2).await.unwrap();
        assert_eq!(popped.len(), 2);
        assert_eq!(popped[0].table, "a");
        assert_eq!(popped[1].table, "b");
        assert_eq!(queue.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pop_returns_at_most_available() {
        let queue = MemoryQueue::new();
        queue.push(vec![payload("a")]).await.unwrap();
        let popped = queue.pop(10).await.unwrap();
        assert_eq!(popped.len(), 1);
    }
}
