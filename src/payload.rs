//! The change-event type that flows from the tailer through the queue to
//! the resolver (`spec.md` §3 "Change event (Payload)").

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PRIMARY_KEY_DELIMITER: &str = "|";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TgOp {
    Insert,
    Update,
    Delete,
    Truncate,
}

impl std::fmt::Display for TgOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TgOp::Insert => "INSERT",
            TgOp::Update => "UPDATE",
            TgOp::Delete => "DELETE",
            TgOp::Truncate => "TRUNCATE",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TgOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(TgOp::Insert),
            "UPDATE" => Ok(TgOp::Update),
            "DELETE" => Ok(TgOp::Delete),
            "TRUNCATE" => Ok(TgOp::Truncate),
            other => Err(format!("unknown tg_op '{other}'")),
        }
    }
}

/// A single committed row change, as decoded from either the notify
/// channel or the logical replication slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub tg_op: TgOp,
    pub schema: String,
    pub table: String,
    #[serde(default)]
    pub old: Map<String, Value>,
    #[serde(default)]
    pub new: Map<String, Value>,
    /// Source txid. Absent for TRUNCATE.
    pub xmin: Option<i64>,
}

impl Payload {
    /// `new` if non-empty, else `old` (`spec.md` §3: "Derived `data` = `new`
    /// if non-empty else `old`").
    pub fn data(&self) -> &Map<String, Value> {
        if !self.new.is_empty() {
            &self.new
        } else {
            &self.old
        }
    }

    /// True when every `primary_keys` column of the owning node is present
    /// in `data()`. TRUNCATE payloads carry no row data and are exempt
    /// (`spec.md` §3: "Invariant for non-TRUNCATE events").
    pub fn has_primary_keys(&self, primary_keys: &[String]) -> bool {
        if self.tg_op == TgOp::Truncate {
            return true;
        }
        let data = self.data();
        primary_keys.iter().all(|k| data.contains_key(k))
    }

    /// Extracts the primary-key tuple from `data()`, joined in declaration
    /// order, as strings (doc-identity construction uses `str()` on each
    /// value, `spec.md` §6).
    pub fn primary_key_values(&self, primary_keys: &[String]) -> Vec<String> {
        let data = self.data();
        primary_keys
            .iter()
            .map(|k| value_to_key_string(data.get(k)))
            .collect()
    }

    pub fn old_primary_key_values(&self, primary_keys: &[String]) -> Option<Vec<String>> {
        if primary_keys.iter().all(|k| self.old.contains_key(k)) {
            Some(
                primary_keys
                    .iter()
                    .map(|k| value_to_key_string(self.old.get(k)))
                    .collect(),
            )
        } else {
            None
        }
    }
}

fn value_to_key_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Joins a primary-key tuple into a document `_id` (`spec.md` §6).
pub fn doc_id(primary_keys: &[String]) -> String {
    primary_keys.join(PRIMARY_KEY_DELIMITER)
}

/// Splits a document `_id` back into its primary-key tuple. Used by the
/// root primary-key resolver and the TRUNCATE resolver to translate a
/// stored id back into per-table keys (`spec.md` §4.5).
pub fn split_doc_id(id: &str) -> Vec<String> {
    id.split(PRIMARY_KEY_DELIMITER).map(str::to_string).collect()
}
