//! Search sink adapter (C8): the bulk-write boundary to the document index.
//!
//! `spec.md` treats the search client's wire protocol as an external
//! collaborator; what lives in-core is the small shim described in §2 (the
//! `SearchIndex` trait) plus one concrete adapter (`http::HttpSearchClient`)
//! so the binary runs without the caller wiring in their own client.

pub mod http;

#[cfg(test)]
pub mod test_support;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Encapsulates `_type`/error-suppression flags behind a capability struct so
/// the resolver and executor never branch on engine identity directly
/// (`spec.md` §9 "Search-engine version skew").
#[derive(Debug, Clone, Copy)]
pub struct SearchCapabilities {
    pub major_version: u8,
    pub is_opensearch: bool,
}

impl SearchCapabilities {
    /// `_type = "_doc"` is attached for engines with `major_version < 7` that
    /// aren't the alternative (OpenSearch) engine (`spec.md` §6).
    pub fn doc_type(&self) -> Option<&'static str> {
        if self.major_version < 7 && !self.is_opensearch {
            Some("_doc")
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkOpKind {
    Index,
    Delete,
}

/// One element of the batched write protocol to the search index
/// (`spec.md` GLOSSARY "Bulk op").
#[derive(Debug, Clone)]
pub struct BulkOp {
    id: String,
    index: Option<String>,
    source: Option<Value>,
    kind: BulkOpKind,
    routing: Option<String>,
    doc_type: Option<String>,
    pipeline: Option<String>,
    /// DELETE ops in cooperative mode tolerate an already-missing doc
    /// (`spec.md` §4.5 DELETE: "raise_on_error=false").
    best_effort: bool,
}

impl BulkOp {
    pub fn index(id: impl Into<String>, source: Value) -> Self {
        BulkOp {
            id: id.into(),
            index: None,
            source: Some(source),
            kind: BulkOpKind::Index,
            routing: None,
            doc_type: None,
            pipeline: None,
            best_effort: false,
        }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        BulkOp {
            id: id.into(),
            index: None,
            source: None,
            kind: BulkOpKind::Delete,
            routing: None,
            doc_type: None,
            pipeline: None,
            best_effort: false,
        }
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }

    pub fn with_doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = Some(pipeline.into());
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn index_name(&self) -> Option<&str> {
        self.index.as_deref()
    }

    pub fn source(&self) -> Option<&Value> {
        self.source.as_ref()
    }

    pub fn kind(&self) -> BulkOpKind {
        self.kind
    }

    pub fn routing(&self) -> Option<&str> {
        self.routing.as_deref()
    }

    pub fn doc_type(&self) -> Option<&str> {
        self.doc_type.as_deref()
    }

    pub fn pipeline(&self) -> Option<&str> {
        self.pipeline.as_deref()
    }

    pub fn is_best_effort(&self) -> bool {
        self.best_effort
    }
}

/// The external collaborator the resolver and orchestrator consult for
/// back-references and bulk writes (`spec.md` §1, §4.5, §4.7).
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn bulk(&self, index: &str, ops: Vec<BulkOp>) -> Result<()>;

    /// Root primary-key resolver lookup: doc ids whose `meta[table]` entry
    /// matches `columns` → `values` by position (`spec.md` §4.5 "Root
    /// primary-key resolver").
    async fn doc_ids_by_meta(
        &self,
        table: &str,
        columns: &[String],
        values: &[String],
    ) -> Result<Vec<String>>;

    /// All doc ids whose `meta` section references `table` at all
    /// (`spec.md` §4.5 TRUNCATE, non-root branch).
    async fn doc_ids_referencing_table(&self, table: &str) -> Result<Vec<String>>;

    /// Every doc id currently in the index (`spec.md` §4.5 TRUNCATE, root
    /// branch).
    async fn all_doc_ids(&self) -> Result<Vec<String>>;

    async fn doc_count(&self) -> Result<u64>;

    fn capabilities(&self) -> SearchCapabilities;
}
