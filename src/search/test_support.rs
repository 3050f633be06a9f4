//! In-memory [`SearchIndex`] fake used by resolver and executor unit tests so
//! they exercise real logic without a live search engine.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{BulkOp, BulkOpKind, SearchCapabilities, SearchIndex};
use crate::error::Result;

#[derive(Debug, Default)]
pub struct FakeSearchIndex {
    docs: Mutex<HashMap<String, Value>>,
}

impl FakeSearchIndex {
    pub fn with_docs(ids: Vec<String>) -> Self {
        let docs = ids.into_iter().map(|id| (id, Value::Null)).collect();
        FakeSearchIndex { docs: Mutex::new(docs) }
    }

    pub fn with_doc(id: impl Into<String>, source: Value) -> Self {
        let mut docs = HashMap::new();
        docs.insert(id.into(), source);
        FakeSearchIndex { docs: Mutex::new(docs) }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.docs.lock().unwrap().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.docs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SearchIndex for FakeSearchIndex {
    async fn bulk(&self, _index: &str, ops: Vec<BulkOp>) -> Result<()> {
        let mut docs = self.docs.lock().unwrap();
        for op in ops {
            match op.kind() {
                BulkOpKind::Index => {
                    docs.insert(op.id().to_string(), op.source().cloned().unwrap_or(Value::Null));
                }
                BulkOpKind::Delete => {
                    docs.remove(op.id());
                }
            }
        }
        Ok(())
    }

    async fn doc_ids_by_meta(
        &self,
        table: &str,
        columns: &[String],
        values: &[String],
    ) -> Result<Vec<String>> {
        let docs = self.docs.lock().unwrap();
        Ok(docs
            .iter()
            .filter(|(_, source)| {
                let meta = &source[table];
                columns
                    .iter()
                    .zip(values)
                    .all(|(col, val)| meta[col].as_str() == Some(val.as_str()))
            })
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn doc_ids_referencing_table(&self, table: &str) -> Result<Vec<String>> {
        let docs = self.docs.lock().unwrap();
        Ok(docs
            .iter()
            .filter(|(_, source)| !source[table].is_null())
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn all_doc_ids(&self) -> Result<Vec<String>> {
        Ok(self.docs.lock().unwrap().keys().cloned().collect())
    }

    async fn doc_count(&self) -> Result<u64> {
        Ok(self.docs.lock().unwrap().len() as u64)
    }

    fn capabilities(&self) -> SearchCapabilities {
        SearchCapabilities { major_version: 8, is_opensearch: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn bulk_index_then_delete_round_trips() {
        let search = FakeSearchIndex::default();
        search.bulk("books", vec![BulkOp::index("7", json!({"title": "Dune"}))]).await.unwrap();
        assert!(search.contains("7"));
        search.bulk("books", vec![BulkOp::delete("7")]).await.unwrap();
        assert!(!search.contains("7"));
    }

    #[tokio::test]
    async fn doc_ids_by_meta_matches_on_positional_columns() {
        let search = FakeSearchIndex::with_doc("7|3", json!({"book": {"id": "7", "author_id": "3"}}));
        let ids = search
            .doc_ids_by_meta("book", &["id".to_string()], &["7".to_string()])
            .await
            .unwrap();
        assert_eq!(ids, vec!["7|3".to_string()]);
    }
}
