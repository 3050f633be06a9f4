//! Sync-instance naming (`spec.md` §3 "Sync instance").

use regex::Regex;
use std::sync::OnceLock;

fn disallowed() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("[^0-9A-Za-z_]+").unwrap())
}

/// Derives the stable name for a `(database, index)` pair: non-alphanumeric
/// characters (besides `_`) are stripped and the result is truncated to 63
/// bytes. This name doubles as the replication-slot name and the queue/key
/// namespace.
pub fn derive_sync_name(database: &str, index: &str) -> String {
    let combined = format!("{database}_{index}");
    let stripped = disallowed().replace_all(&combined, "").to_string();
    crate::util::truncate_utf8_safe(&stripped, 63).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_disallowed_characters() {
        assert_eq!(derive_sync_name("my-db", "my.index"), "mydb_myindex");
    }

    #[test]
    fn is_pure_function_of_inputs() {
        assert_eq!(
            derive_sync_name("db", "idx"),
            derive_sync_name("db", "idx")
        );
    }

    #[test]
    fn truncates_to_63_bytes() {
        let long = "a".repeat(100);
        let name = derive_sync_name(&long, "idx");
        assert!(name.len() <= 63);
    }

    #[test]
    fn matches_allowed_charset() {
        let name = derive_sync_name("my-db!!", "idx??");
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        assert!(!name.is_empty());
    }
}
