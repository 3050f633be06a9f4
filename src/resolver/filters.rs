use std::collections::HashMap;

use serde_json::Value;

/// One equality predicate set: column → value (`spec.md` §3 "Filter set").
pub type FilterRecord = Vec<(String, Value)>;

/// Mapping from table → list of equality predicates. The consumer always
/// materializes at least the root-table slot; the event's own table and (if
/// not root) its parent's table may also be populated.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    slots: HashMap<String, Vec<FilterRecord>>,
}

impl FilterSet {
    pub fn push(&mut self, table: &str, primary_keys: &[String], primary_key_values: Vec<String>) {
        let record: FilterRecord = primary_keys
            .iter()
            .cloned()
            .zip(primary_key_values.into_iter().map(Value::String))
            .collect();
        self.push_record(table, record);
    }

    pub fn push_value(&mut self, table: &str, column: &str, value: Value) {
        self.push_record(table, vec![(column.to_string(), value)]);
    }

    pub fn push_record(&mut self, table: &str, record: FilterRecord) {
        self.slots.entry(table.to_string()).or_default().push(record);
    }

    pub fn get(&self, table: &str) -> Option<&Vec<FilterRecord>> {
        self.slots.get(table)
    }

    /// A batch is only executed when at least one slot is non-empty
    /// (`spec.md` §3: "empty filter ≡ full-table scan, which is forbidden").
    pub fn is_empty(&self) -> bool {
        self.slots.values().all(|v| v.is_empty())
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }
}

/// Splits each populated slot into chunks of at most `chunk_size` and
/// returns the cross-product of the non-empty slots' chunks, each as its own
/// [`FilterSet`] ready to hand to the sync executor (`spec.md` §4.5 "Filter
/// execution": `(root_chunk × node_chunk × parent_chunk?)`). Chunking
/// prevents pathological SQL with thousands of OR clauses. If only one slot
/// is populated, the cross-product degenerates to that slot's own chunks.
pub fn chunk_filter_set(filters: &FilterSet, chunk_size: usize) -> Vec<FilterSet> {
    let chunk_size = chunk_size.max(1);
    let mut per_table_chunks: Vec<(String, Vec<Vec<FilterRecord>>)> = Vec::new();

    for (table, records) in &filters.slots {
        if records.is_empty() {
            continue;
        }
        let chunks: Vec<Vec<FilterRecord>> = records.chunks(chunk_size).map(|c| c.to_vec()).collect();
        per_table_chunks.push((table.clone(), chunks));
    }

    if per_table_chunks.is_empty() {
        return Vec::new();
    }

    let mut combinations: Vec<HashMap<String, Vec<FilterRecord>>> = vec![HashMap::new()];
    for (table, chunks) in per_table_chunks {
        let mut next = Vec::with_capacity(combinations.len() * chunks.len());
        for combo in &combinations {
            for chunk in &chunks {
                let mut extended = combo.clone();
                extended.insert(table.clone(), chunk.clone());
                next.push(extended);
            }
        }
        combinations = next;
    }
    combinations.into_iter().map(|slots| FilterSet { slots }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_set_is_empty() {
        assert!(FilterSet::default().is_empty());
    }

    #[test]
    fn push_makes_it_non_empty() {
        let mut filters = FilterSet::default();
        filters.push("book", &["id".to_string()], vec!["7".to_string()]);
        assert!(!filters.is_empty());
    }

    #[test]
    fn push_records_the_real_primary_key_column_name() {
        let mut filters = FilterSet::default();
        filters.push("book", &["id".to_string()], vec!["7".to_string()]);
        let records = filters.get("book").unwrap();
        assert_eq!(records[0], vec![("id".to_string(), Value::String("7".to_string()))]);
    }

    #[test]
    fn chunking_caps_chunk_size() {
        let mut filters = FilterSet::default();
        for i in 0..5 {
            filters.push("book", &["id".to_string()], vec![i.to_string()]);
        }
        let chunks = chunk_filter_set(&filters, 2);
        // 5 records at chunk size 2 -> 3 chunks (2,2,1), single slot -> 3 combinations
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn cross_product_of_two_slots() {
        let mut filters = FilterSet::default();
        filters.push("book", &["id".to_string()], vec!["1".to_string()]);
        filters.push("book", &["id".to_string()], vec!["2".to_string()]);
        filters.push("author", &["id".to_string()], vec!["a".to_string()]);
        let chunks = chunk_filter_set(&filters, 1);
        // book: 2 chunks, author: 1 chunk -> 2 combinations
        assert_eq!(chunks.len(), 2);
    }
}
