use sqlx::{PgPool, Row};

use crate::error::{Error, Result};
use crate::payload::{Payload, TgOp};

/// The bounds a peek/advance pair must agree on exactly
/// (`spec.md` §4.4.2 invariant).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotBounds {
    pub upto_nchanges: Option<i64>,
    pub upto_lsn: Option<String>,
}

/// One row returned by `pg_logical_slot_peek_changes` /
/// `pg_logical_slot_get_changes`.
#[derive(Debug, Clone)]
pub struct LogicalChange {
    pub xid: i64,
    pub data: String,
}

/// Named identically to the sync (`spec.md` §4.4.2). Exposes *peek*
/// (non-destructive) and *advance* (destructive), which MUST be called with
/// identical bounds in sequence — enforced here with a debug assertion plus
/// a runtime check, since violating it silently desynchronizes the slot
/// from the processor.
pub struct ReplicationSlot {
    pool: PgPool,
    slot_name: String,
    last_peek_bounds: Option<SlotBounds>,
}

impl ReplicationSlot {
    pub fn new(pool: PgPool, slot_name: String) -> Self {
        ReplicationSlot {
            pool,
            slot_name,
            last_peek_bounds: None,
        }
    }

    pub async fn exists(&self) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM pg_replication_slots WHERE slot_name = $1")
            .bind(&self.slot_name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Non-destructive read of up to `upto_nchanges` changes bounded by
    /// `upto_lsn`. Records the bounds used so the following `advance` can be
    /// checked against them.
    pub async fn peek(&mut self, bounds: SlotBounds) -> Result<Vec<LogicalChange>> {
        let rows = self.fetch("pg_logical_slot_peek_changes", &bounds).await?;
        self.last_peek_bounds = Some(bounds);
        Ok(rows)
    }

    /// Destructive re-read with the same bounds as the immediately
    /// preceding `peek`. Returns `Error::Operational`-shaped misuse as a
    /// configuration error since this indicates a caller bug, not an
    /// environment fault.
    pub async fn advance(&mut self, bounds: SlotBounds) -> Result<Vec<LogicalChange>> {
        debug_assert_eq!(
            self.last_peek_bounds,
            Some(bounds.clone()),
            "advance() bounds must equal the preceding peek() bounds"
        );
        if self.last_peek_bounds != Some(bounds.clone()) {
            return Err(Error::configuration(
                "logical slot advance() bounds do not match the preceding peek()",
            ));
        }
        let rows = self.fetch("pg_logical_slot_get_changes", &bounds).await?;
        self.last_peek_bounds = None;
        Ok(rows)
    }

    /// Advances with no upper bound, draining the slot entirely. Used by
    /// the slot-truncation worker (`spec.md` §4.7).
    pub async fn advance_unbounded(&mut self) -> Result<Vec<LogicalChange>> {
        let rows = sqlx::query("SELECT xid, data FROM pg_logical_slot_get_changes($1, NULL, NULL)")
            .bind(&self.slot_name)
            .fetch_all(&self.pool)
            .await?;
        self.last_peek_bounds = None;
        Ok(rows
            .into_iter()
            .map(|r| LogicalChange {
                xid: r.get("xid"),
                data: r.get("data"),
            })
            .collect())
    }

    async fn fetch(&self, function: &str, bounds: &SlotBounds) -> Result<Vec<LogicalChange>> {
        let query = format!("SELECT xid, data FROM {function}($1, $2, $3)");
        let rows = sqlx::query(&query)
            .bind(&self.slot_name)
            .bind(bounds.upto_lsn.as_deref())
            .bind(bounds.upto_nchanges)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| LogicalChange {
                xid: r.get("xid"),
                data: r.get("data"),
            })
            .filter(|change| !is_transaction_boundary(&change.data))
            .collect())
    }
}

/// Lines whose data begins with `BEGIN` or `COMMIT` carry no row change and
/// are skipped (`spec.md` §4.4.2).
fn is_transaction_boundary(data: &str) -> bool {
    data.starts_with("BEGIN") || data.starts_with("COMMIT")
}

/// Decodes one `test_decoding` output-plugin line into a [`Payload`]
/// (`spec.md` §4.4.2: "decoded by the query builder into a Payload"). Lines
/// look like `table public.book: INSERT: id[integer]:7 title[text]:'Dune'`,
/// or, under `REPLICA IDENTITY FULL`, `table public.book: UPDATE: old-key:
/// id[integer]:7 new-tuple: id[integer]:8 title[text]:'Dune'`.
pub fn decode_logical_change(change: &LogicalChange) -> Result<Payload> {
    let rest = change
        .data
        .strip_prefix("table ")
        .ok_or_else(|| Error::parse("logical_change", "missing 'table ' prefix"))?;

    let (qualified, rest) = rest
        .split_once(": ")
        .ok_or_else(|| Error::parse("logical_change", "missing table/op separator"))?;
    let (schema, table) = qualified
        .split_once('.')
        .ok_or_else(|| Error::parse(qualified, "table name is not schema-qualified"))?;

    let (op_str, columns) = rest
        .split_once(": ")
        .unwrap_or_else(|| (rest.trim_end_matches(':'), ""));
    let tg_op: TgOp = op_str
        .parse()
        .map_err(|_| Error::parse(table, format!("unknown tg_op '{op_str}'")))?;

    let (old, new) = if let Some(old_start) = columns.strip_prefix("old-key: ") {
        let (old_part, new_part) = old_start
            .split_once(" new-tuple: ")
            .ok_or_else(|| Error::parse(table, "malformed old-key/new-tuple line"))?;
        (parse_columns(old_part), parse_columns(new_part))
    } else {
        let cols = parse_columns(columns);
        match tg_op {
            TgOp::Delete => (cols, serde_json::Map::new()),
            _ => (serde_json::Map::new(), cols),
        }
    };

    Ok(Payload {
        tg_op,
        schema: schema.to_string(),
        table: table.to_string(),
        old,
        new,
        xmin: Some(change.xid),
    })
}

/// Tokenizes a `name[type]:value name2[type2]:value2 ...` column list,
/// respecting single-quoted values (with `''`-escaped embedded quotes).
fn parse_columns(s: &str) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::new();
    let bytes = s.as_bytes();
    let mut pos = 0usize;

    while pos < s.len() {
        while bytes.get(pos) == Some(&b' ') {
            pos += 1;
        }
        if pos >= s.len() {
            break;
        }

        let Some(bracket_rel) = s[pos..].find('[') else { break };
        let name = s[pos..pos + bracket_rel].trim().to_string();
        let after_name = pos + bracket_rel;

        let Some(close_rel) = s[after_name..].find(']') else { break };
        let after_type = after_name + close_rel + 1;

        let Some(colon_rel) = s[after_type..].find(':') else { break };
        let value_start = after_type + colon_rel + 1;

        let (value, next) = if bytes.get(value_start) == Some(&b'\'') {
            let mut i = value_start + 1;
            let mut out = String::new();
            loop {
                match bytes.get(i) {
                    Some(b'\'') if bytes.get(i + 1) == Some(&b'\'') => {
                        out.push('\'');
                        i += 2;
                    }
                    Some(b'\'') | None => {
                        i += 1;
                        break;
                    }
                    Some(_) => {
                        let ch = s[i..].chars().next().unwrap();
                        out.push(ch);
                        i += ch.len_utf8();
                    }
                }
            }
            (serde_json::Value::String(out), i)
        } else {
            let end = s[value_start..]
                .find(' ')
                .map(|i| value_start + i)
                .unwrap_or(s.len());
            let raw = s[value_start..end].trim();
            let value = if raw == "null" {
                serde_json::Value::Null
            } else if let Ok(n) = raw.parse::<i64>() {
                serde_json::Value::from(n)
            } else if let Ok(f) = raw.parse::<f64>() {
                serde_json::Value::from(f)
            } else {
                serde_json::Value::String(raw.to_string())
            };
            (value, end)
        };

        map.insert(name, value);
        pos = next;
    }

    map
}

/// Fetches the current WAL LSN, falling back to the last-replayed LSN on a
/// read replica where `pg_current_wal_lsn()` is unavailable
/// (`original_source/pgsync/sync.py::get_current_wal_lsn`).
pub async fn current_wal_lsn(pool: &PgPool) -> Result<String> {
    match sqlx::query("SELECT PG_CURRENT_WAL_LSN()::text AS lsn")
        .fetch_one(pool)
        .await
    {
        Ok(row) => Ok(row.get("lsn")),
        Err(_) => {
            let row = sqlx::query("SELECT PG_LAST_WAL_REPLAY_LSN()::text AS lsn")
                .fetch_one(pool)
                .await?;
            Ok(row.get("lsn"))
        }
    }
}

/// Fetches the current transaction id.
pub async fn txid_current(pool: &PgPool) -> Result<i64> {
    let row = sqlx::query("SELECT txid_current()::bigint AS txid")
        .fetch_one(pool)
        .await?;
    Ok(row.get("txid"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_transaction_boundary_lines() {
        assert!(is_transaction_boundary("BEGIN 123"));
        assert!(is_transaction_boundary("COMMIT 123"));
        assert!(!is_transaction_boundary("table public.book: INSERT"));
    }

    #[test]
    fn decodes_insert_line() {
        let change = LogicalChange {
            xid: 101,
            data: "table public.book: INSERT: id[integer]:7 title[text]:'Dune'".to_string(),
        };
        let payload = decode_logical_change(&change).unwrap();
        assert_eq!(payload.tg_op, TgOp::Insert);
        assert_eq!(payload.schema, "public");
        assert_eq!(payload.table, "book");
        assert_eq!(payload.new.get("id"), Some(&serde_json::json!(7)));
        assert_eq!(payload.new.get("title"), Some(&serde_json::json!("Dune")));
        assert_eq!(payload.xmin, Some(101));
    }

    #[test]
    fn decodes_delete_line_into_old() {
        let change = LogicalChange {
            xid: 102,
            data: "table public.book: DELETE: id[integer]:7".to_string(),
        };
        let payload = decode_logical_change(&change).unwrap();
        assert_eq!(payload.tg_op, TgOp::Delete);
        assert_eq!(payload.old.get("id"), Some(&serde_json::json!(7)));
        assert!(payload.new.is_empty());
    }

    #[test]
    fn decodes_replica_identity_full_update_into_old_and_new() {
        let change = LogicalChange {
            xid: 103,
            data: "table public.book: UPDATE: old-key: id[integer]:7 new-tuple: id[integer]:8 title[text]:'Dune 2nd ed.'".to_string(),
        };
        let payload = decode_logical_change(&change).unwrap();
        assert_eq!(payload.tg_op, TgOp::Update);
        assert_eq!(payload.old.get("id"), Some(&serde_json::json!(7)));
        assert_eq!(payload.new.get("id"), Some(&serde_json::json!(8)));
        assert_eq!(payload.new.get("title"), Some(&serde_json::json!("Dune 2nd ed.")));
    }
}
