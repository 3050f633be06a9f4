use std::time::Duration;

use sqlx::postgres::PgListener;

use super::NotifyEnvelope;
use crate::error::{Error, Result};
use crate::payload::Payload;

/// Wraps `LISTEN`/`NOTIFY` on a channel named after the source database
/// (`spec.md` §4.4.1). Accepted messages are parsed into [`Payload`]s;
/// messages whose `indices` doesn't name this sync's index, or whose
/// `schema` isn't one this sync's tree declares, are discarded.
pub struct NotifyListener {
    listener: PgListener,
    index: String,
    known_schemas: Vec<String>,
}

impl NotifyListener {
    pub async fn connect(database_url: &str, channel: &str, index: String, known_schemas: Vec<String>) -> Result<Self> {
        let mut listener = PgListener::connect(database_url).await?;
        listener.listen(channel).await?;
        Ok(NotifyListener {
            listener,
            index,
            known_schemas,
        })
    }

    /// Waits up to `timeout` for the next notification. `Ok(None)` means the
    /// wait timed out with nothing delivered, distinct from an accepted
    /// message being filtered out (which also yields `Ok(None)` but after
    /// returning promptly) — the tailer's batching loop treats both the
    /// same way (`spec.md` §4.4.1: "flushing on ... poll timeout elapsed").
    pub async fn next_payload(&mut self, timeout: Duration) -> Result<Option<Payload>> {
        let notification = match tokio::time::timeout(timeout, self.listener.recv()).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "fatal error on the notify connection");
                std::process::exit(1);
            }
            Err(_elapsed) => return Ok(None),
        };

        let envelope: NotifyEnvelope = match serde_json::from_str(notification.payload()) {
            Ok(e) => e,
            Err(e) => {
                return Err(Error::parse("notify payload", e));
            }
        };

        if !envelope.indices.iter().any(|i| i == &self.index) {
            return Ok(None);
        }
        if !self.known_schemas.iter().any(|s| s == &envelope.payload.schema) {
            return Ok(None);
        }
        Ok(Some(envelope.payload))
    }
}
