//! Source tailer (C4): owns the connections to the source database that
//! produce change events — the NOTIFY channel and the logical replication
//! slot.

mod notify;
mod slot;

pub use notify::NotifyListener;
pub use slot::{
    current_wal_lsn, decode_logical_change, txid_current, LogicalChange, ReplicationSlot,
    SlotBounds,
};

use serde::Deserialize;

/// The envelope a trigger-driven `NOTIFY` delivers
/// (`spec.md` §4.4.1: `{indices:[...], schema, ..., xmin}`). `schema` and
/// `xmin` live on the embedded [`crate::payload::Payload`] rather than being
/// duplicated at the envelope level.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyEnvelope {
    pub indices: Vec<String>,
    #[serde(flatten)]
    pub payload: crate::payload::Payload,
}
