//! Sync executor (C6): turns a resolved filter set into a lazy sequence of
//! bulk ops against the search index (`spec.md` §4.6).
//!
//! The full optimizing SQL query builder (subquery caching, column pruning)
//! is an external collaborator out of scope; what lives here is the
//! `QueryBuilder` seam plus a pull-based `Stream` that drives it, built on
//! `tokio::sync::mpsc` + `tokio_stream::wrappers::ReceiverStream` rather than
//! `async-stream`, matching the crate's existing dependency set.

pub mod query;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde_json::{Map, Value};
use tokio_stream::wrappers::ReceiverStream;

use crate::error::Result;
use crate::payload::doc_id;
use crate::resolver::FilterSet;
use crate::search::{BulkOp, SearchCapabilities};
use crate::tree::Tree;

/// One root row fetched from the source database: the row's own JSON
/// representation plus the primary-key tuples contributed by every table
/// that fed into it, keyed by table name (`spec.md` §4.6 "META section").
#[derive(Debug, Clone)]
pub struct RootRow {
    pub primary_keys: Vec<String>,
    pub source: Value,
    pub meta: Map<String, Value>,
}

/// The external collaborator that materializes root documents by following
/// the tree's foreign keys (`spec.md` §1 "the SQL query builder ... external
/// collaborator"; `spec.md` §4.6).
#[async_trait]
pub trait QueryBuilder: Send + Sync {
    async fn fetch_root_rows(
        &self,
        tree: &Tree,
        filters: Option<&FilterSet>,
        txmin: Option<i64>,
        txmax: Option<i64>,
    ) -> Result<Vec<RootRow>>;
}

/// The plugin transform hook interface (`spec.md` §4.6: "the plugin
/// transform hook may drop it"). Concrete transforms are out of scope;
/// only the interface is carried.
pub trait Transform: Send + Sync {
    /// Returns `false` to drop the row entirely.
    fn transform(&self, table: &str, row: &mut Map<String, Value>) -> bool;
}

pub struct Executor {
    query_builder: Arc<dyn QueryBuilder>,
    transform: Option<Arc<dyn Transform>>,
    index: String,
    pipeline: Option<String>,
    routing_column: Option<String>,
    capabilities: SearchCapabilities,
    emitted: Arc<AtomicU64>,
}

impl Executor {
    pub fn new(query_builder: Arc<dyn QueryBuilder>, index: impl Into<String>, capabilities: SearchCapabilities) -> Self {
        Executor {
            query_builder,
            transform: None,
            index: index.into(),
            pipeline: None,
            routing_column: None,
            capabilities,
            emitted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_transform(mut self, transform: Arc<dyn Transform>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = Some(pipeline.into());
        self
    }

    pub fn with_routing_column(mut self, column: impl Into<String>) -> Self {
        self.routing_column = Some(column.into());
        self
    }

    /// Emitted-doc count since this executor was created, exposed for the
    /// status worker (`spec.md` §4.7 "Status worker").
    pub fn counts(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Traverses the tree (via `QueryBuilder::fetch_root_rows`, which is
    /// responsible for the post-order join construction described in
    /// `spec.md` §4.6) and streams one [`BulkOp`] per surviving root row.
    pub fn sync(
        &self,
        tree: Arc<Tree>,
        filters: Option<FilterSet>,
        txmin: Option<i64>,
        txmax: Option<i64>,
    ) -> impl Stream<Item = Result<BulkOp>> {
        let (tx, rx) = tokio::sync::mpsc::channel(256);
        let query_builder = self.query_builder.clone();
        let transform = self.transform.clone();
        let index = self.index.clone();
        let pipeline = self.pipeline.clone();
        let routing_column = self.routing_column.clone();
        let capabilities = self.capabilities;
        let emitted = self.emitted.clone();

        tokio::spawn(async move {
            let root_table = tree.root().table.clone();
            let rows = match query_builder.fetch_root_rows(&tree, filters.as_ref(), txmin, txmax).await {
                Ok(rows) => rows,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            for row in rows {
                let mut source = match row.source {
                    Value::Object(map) => map,
                    other => {
                        let mut map = Map::new();
                        map.insert("value".to_string(), other);
                        map
                    }
                };

                if let Some(transform) = &transform {
                    if !transform.transform(&root_table, &mut source) {
                        continue;
                    }
                }

                let id = doc_id(&row.primary_keys);
                source.insert("meta".to_string(), Value::Object(row.meta.clone()));

                let mut op = BulkOp::index(id, Value::Object(source.clone()))
                    .with_index(index.clone());

                if let Some(doc_type) = capabilities.doc_type() {
                    op = op.with_doc_type(doc_type);
                }
                if let Some(pipeline) = &pipeline {
                    op = op.with_pipeline(pipeline.clone());
                }
                if let Some(routing_column) = &routing_column {
                    if let Some(Value::String(routing)) = source.get(routing_column) {
                        op = op.with_routing(routing.clone());
                    }
                }

                emitted.fetch_add(1, Ordering::Relaxed);
                if tx.send(Ok(op)).await.is_err() {
                    return;
                }
            }
        });

        ReceiverStream::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Node;
    use futures::StreamExt;

    struct FakeQueryBuilder;

    #[async_trait]
    impl QueryBuilder for FakeQueryBuilder {
        async fn fetch_root_rows(
            &self,
            _tree: &Tree,
            _filters: Option<&FilterSet>,
            _txmin: Option<i64>,
            _txmax: Option<i64>,
        ) -> Result<Vec<RootRow>> {
            let mut meta = Map::new();
            meta.insert("book".to_string(), serde_json::json!({"id": ["7"]}));
            Ok(vec![RootRow {
                primary_keys: vec!["7".to_string()],
                source: serde_json::json!({"id": 7, "title": "Dune"}),
                meta,
            }])
        }
    }

    fn book_tree() -> Tree {
        let root = Node {
            table: "book".into(),
            schema: "public".into(),
            primary_keys: vec!["id".into()],
            children: vec![],
            relationship: None,
            base_tables: vec![],
        };
        Tree::new(root, &["public".to_string()]).unwrap()
    }

    #[tokio::test]
    async fn sync_emits_one_bulk_op_per_root_row() {
        let executor = Executor::new(
            Arc::new(FakeQueryBuilder),
            "books",
            SearchCapabilities { major_version: 8, is_opensearch: false },
        );
        let ops: Vec<_> = executor
            .sync(Arc::new(book_tree()), None, None, None)
            .collect()
            .await;
        assert_eq!(ops.len(), 1);
        let op = ops[0].as_ref().unwrap();
        assert_eq!(op.id(), "7");
        assert_eq!(executor.counts(), 1);
    }

    #[tokio::test]
    async fn transform_returning_false_drops_the_row() {
        struct DropAll;
        impl Transform for DropAll {
            fn transform(&self, _table: &str, _row: &mut Map<String, Value>) -> bool {
                false
            }
        }
        let executor = Executor::new(
            Arc::new(FakeQueryBuilder),
            "books",
            SearchCapabilities { major_version: 8, is_opensearch: false },
        )
        .with_transform(Arc::new(DropAll));
        let ops: Vec<_> = executor
            .sync(Arc::new(book_tree()), None, None, None)
            .collect()
            .await;
        assert!(ops.is_empty());
    }
}
