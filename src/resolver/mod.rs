//! Resolver (C5) — the algorithmic heart.
//!
//! Given a contiguous run of [`Payload`]s sharing one `(tg_op, table)`,
//! computes the [`FilterSet`] to hand to the sync executor and any direct
//! bulk-delete ops that can be issued immediately (`spec.md` §4.5).

mod filters;

pub use filters::{chunk_filter_set, FilterRecord, FilterSet};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::payload::{doc_id, split_doc_id, Payload, TgOp};
use crate::search::{BulkOp, SearchIndex};
use crate::tree::{Node, Tree};

/// The external query-builder collaborator the resolver consults for
/// foreign-key column pairs (`spec.md` §1 "external collaborators";
/// `spec.md` §4.5 "fetch `foreign_keys = qb.get_foreign_keys(parent, N)`").
#[async_trait]
pub trait ForeignKeyLookup: Send + Sync {
    async fn get_foreign_keys(&self, parent: &Node, child: &Node) -> Result<Vec<(String, String)>>;
    /// Fallback path consulted when the preferred lookup fails
    /// (`spec.md` §7 "Foreign-key lookup failure").
    async fn get_foreign_keys_from_constraints(
        &self,
        parent: &Node,
        child: &Node,
    ) -> Result<Vec<(String, String)>>;
}

pub struct ResolvedBatch {
    pub filters: FilterSet,
    pub deletes: Vec<BulkOp>,
}

/// Resolves one contiguous `(tg_op, table)` run.
pub async fn resolve(
    run: &[Payload],
    tree: &Tree,
    search: &dyn SearchIndex,
    fk: &dyn ForeignKeyLookup,
) -> Result<ResolvedBatch> {
    let Some(first) = run.first() else {
        return Ok(ResolvedBatch {
            filters: FilterSet::default(),
            deletes: Vec::new(),
        });
    };
    let tg_op = first.tg_op;
    let schema = first.schema.clone();
    let table = first.table.clone();

    let Some(node) = tree.find(&schema, &table) else {
        // Unknown table/schema: the run is dropped (`spec.md` §4.5).
        return Ok(ResolvedBatch {
            filters: FilterSet::default(),
            deletes: Vec::new(),
        });
    };

    for payload in run {
        if payload.tg_op != TgOp::Truncate && !payload.has_primary_keys(&node.primary_keys) {
            return Err(Error::configuration(format!(
                "payload on '{}' is missing a primary key required by the tree",
                node.table
            )));
        }
    }

    match tg_op {
        TgOp::Insert => resolve_insert(run, tree, node, fk).await,
        TgOp::Update => resolve_update(run, tree, node, fk, search).await,
        TgOp::Delete => resolve_delete(run, tree, node, fk, search).await,
        TgOp::Truncate => resolve_truncate(run, tree, node, search).await,
    }
}

async fn resolve_insert(
    run: &[Payload],
    tree: &Tree,
    node: &Node,
    fk: &dyn ForeignKeyLookup,
) -> Result<ResolvedBatch> {
    let mut filters = FilterSet::default();
    let root = tree.root();

    if node.table == root.table && node.schema == root.schema {
        for payload in run {
            filters.push(&root.table, &root.primary_keys, payload.primary_key_values(&root.primary_keys));
        }
        return Ok(ResolvedBatch { filters, deletes: Vec::new() });
    }

    if let Some(parent) = tree.parent_of(&node.schema, &node.table) {
        let foreign_keys = lookup_foreign_keys(fk, parent, node).await?;
        for payload in run {
            let data = payload.data();
            for (node_key, parent_key) in &foreign_keys {
                if node_key == parent_key {
                    if let Some(v) = data.get(node_key) {
                        filters.push_value(&parent.table, parent_key, v.clone());
                    }
                }
            }
        }
        root_foreign_key_resolver(run, node, &foreign_keys, &mut filters, root);
        through_node_resolver(run, node, &mut filters, root);
        Ok(ResolvedBatch { filters, deletes: Vec::new() })
    } else {
        // Pure through-table: reparent onto the logical parent via indexed
        // foreign-key pairs (`spec.md` §4.5 INSERT, third bullet).
        if let Some(rel) = &node.relationship {
            if let Some(parent) = tree.parent_of(&node.schema, &node.table) {
                for payload in run {
                    let data = payload.data();
                    for (parent_key, child_key) in rel.parent_keys.iter().zip(&rel.child_keys) {
                        if let Some(v) = data.get(child_key) {
                            filters.push_value(&parent.table, parent_key, v.clone());
                        }
                    }
                }
            }
        }
        Ok(ResolvedBatch { filters, deletes: Vec::new() })
    }
}

async fn resolve_update(
    run: &[Payload],
    tree: &Tree,
    node: &Node,
    fk: &dyn ForeignKeyLookup,
    search: &dyn SearchIndex,
) -> Result<ResolvedBatch> {
    let mut filters = FilterSet::default();
    let mut deletes = Vec::new();
    let root = tree.root();

    if node.table == root.table && node.schema == root.schema {
        for payload in run {
            let new_keys = payload.primary_key_values(&root.primary_keys);
            filters.push(&root.table, &root.primary_keys, new_keys.clone());
            if let Some(old_keys) = payload.old_primary_key_values(&root.primary_keys) {
                if old_keys != new_keys {
                    deletes.push(BulkOp::delete(doc_id(&old_keys)));
                }
            }
        }
        return Ok(ResolvedBatch { filters, deletes });
    }

    // Non-root: `spec.md` §9 open question (b) resolved in favor of using
    // `data()` consistently rather than `new` alone (see DESIGN.md).
    for payload in run {
        debug_assert!(
            node.primary_keys.iter().all(|k| payload.data().contains_key(k)),
            "UPDATE payload on '{}' is missing a primary key in data()",
            node.table
        );
    }

    root_primary_key_resolver(run, node, search, &mut filters, root).await?;
    if let Some(parent) = tree.parent_of(&node.schema, &node.table) {
        let foreign_keys = lookup_foreign_keys(fk, parent, node).await?;
        root_foreign_key_resolver(run, node, &foreign_keys, &mut filters, root);
    }

    Ok(ResolvedBatch { filters, deletes })
}

async fn resolve_delete(
    run: &[Payload],
    tree: &Tree,
    node: &Node,
    fk: &dyn ForeignKeyLookup,
    search: &dyn SearchIndex,
) -> Result<ResolvedBatch> {
    let root = tree.root();

    if node.table == root.table && node.schema == root.schema {
        let deletes = run
            .iter()
            .map(|p| BulkOp::delete(doc_id(&p.primary_key_values(&root.primary_keys))).best_effort())
            .collect();
        return Ok(ResolvedBatch { filters: FilterSet::default(), deletes });
    }

    let mut filters = FilterSet::default();
    root_primary_key_resolver(run, node, search, &mut filters, root).await?;
    if let Some(parent) = tree.parent_of(&node.schema, &node.table) {
        let foreign_keys = lookup_foreign_keys(fk, parent, node).await?;
        root_foreign_key_resolver(run, node, &foreign_keys, &mut filters, root);
    }
    Ok(ResolvedBatch { filters, deletes: Vec::new() })
}

async fn resolve_truncate(
    run: &[Payload],
    tree: &Tree,
    node: &Node,
    search: &dyn SearchIndex,
) -> Result<ResolvedBatch> {
    let root = tree.root();

    if node.table == root.table && node.schema == root.schema {
        let ids = search.all_doc_ids().await?;
        let deletes = ids.into_iter().map(BulkOp::delete).collect();
        return Ok(ResolvedBatch { filters: FilterSet::default(), deletes });
    }

    let mut filters = FilterSet::default();
    let metas = search.doc_ids_referencing_table(&node.table).await?;
    for id in metas {
        let keys = split_doc_id(&id);
        if keys.len() == root.primary_keys.len() {
            let record: FilterRecord = root
                .primary_keys
                .iter()
                .cloned()
                .zip(keys.into_iter().map(serde_json::Value::String))
                .collect();
            filters.push_record(&root.table, record);
        }
    }
    let _ = run; // TRUNCATE payloads carry no per-row data to branch on.
    Ok(ResolvedBatch { filters, deletes: Vec::new() })
}

/// For the child's primary-key tuple, looks up matching doc ids in the
/// search index's meta section and zips the split id against the root's
/// primary keys (`spec.md` §4.5 "Root primary-key resolver").
async fn root_primary_key_resolver(
    run: &[Payload],
    node: &Node,
    search: &dyn SearchIndex,
    filters: &mut FilterSet,
    root: &Node,
) -> Result<()> {
    for payload in run {
        let child_keys = payload.primary_key_values(&node.primary_keys);
        let ids = search
            .doc_ids_by_meta(&node.table, &node.primary_keys, &child_keys)
            .await?;
        for id in ids {
            let parts = split_doc_id(&id);
            if parts.len() == root.primary_keys.len() {
                let record: FilterRecord = root
                    .primary_keys
                    .iter()
                    .cloned()
                    .zip(parts.into_iter().map(serde_json::Value::String))
                    .collect();
                filters.push_record(&root.table, record);
            }
        }
    }
    Ok(())
}

/// Symmetric to the primary-key resolver but keyed by the child's
/// foreign-key values, looked up under the parent table's meta entries —
/// used for n-tier leaf changes where the direct parent isn't the root
/// (`spec.md` §4.5 "Root foreign-key resolver").
fn root_foreign_key_resolver(
    run: &[Payload],
    node: &Node,
    foreign_keys: &[(String, String)],
    filters: &mut FilterSet,
    root: &Node,
) {
    if node.table == root.table {
        return;
    }
    for payload in run {
        let data = payload.data();
        for (node_key, _parent_key) in foreign_keys {
            if let Some(value) = data.get(node_key) {
                filters.push_value(&root.table, node_key, value.clone());
            }
        }
    }
}

/// When the node's relationship names the root directly as a through
/// target, appends `{root_remote_column: value}` (`spec.md` §4.5
/// "Through-node resolver").
fn through_node_resolver(run: &[Payload], node: &Node, filters: &mut FilterSet, root: &Node) {
    let Some(rel) = &node.relationship else { return };
    if !rel.throughs.iter().any(|t| t == &root.table) {
        return;
    }
    for payload in run {
        let data = payload.data();
        for key in &rel.child_keys {
            if let Some(value) = data.get(key) {
                filters.push_value(&root.table, key, value.clone());
            }
        }
    }
}

async fn lookup_foreign_keys(
    fk: &dyn ForeignKeyLookup,
    parent: &Node,
    child: &Node,
) -> Result<Vec<(String, String)>> {
    match fk.get_foreign_keys(parent, child).await {
        Ok(pairs) if !pairs.is_empty() => Ok(pairs),
        _ => fk.get_foreign_keys_from_constraints(parent, child).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::test_support::FakeSearchIndex;
    use crate::tree::Relationship;
    use serde_json::json;

    struct FakeForeignKeys;

    #[async_trait]
    impl ForeignKeyLookup for FakeForeignKeys {
        async fn get_foreign_keys(&self, _parent: &Node, _child: &Node) -> Result<Vec<(String, String)>> {
            Ok(vec![("author_id".to_string(), "id".to_string())])
        }
        async fn get_foreign_keys_from_constraints(
            &self,
            _parent: &Node,
            _child: &Node,
        ) -> Result<Vec<(String, String)>> {
            Ok(vec![])
        }
    }

    fn book_author_tree() -> Tree {
        let author = Node {
            table: "author".into(),
            schema: "public".into(),
            primary_keys: vec!["id".into()],
            children: vec![],
            relationship: Some(Relationship {
                parent_keys: vec!["id".into()],
                child_keys: vec!["author_id".into()],
                throughs: vec![],
            }),
            base_tables: vec![],
        };
        let root = Node {
            table: "book".into(),
            schema: "public".into(),
            primary_keys: vec!["id".into()],
            children: vec![author],
            relationship: None,
            base_tables: vec![],
        };
        Tree::new(root, &["public".to_string()]).unwrap()
    }

    fn insert_book(id: i64, author_id: i64, xmin: i64) -> Payload {
        let mut new = serde_json::Map::new();
        new.insert("id".into(), json!(id));
        new.insert("author_id".into(), json!(author_id));
        Payload {
            tg_op: TgOp::Insert,
            schema: "public".into(),
            table: "book".into(),
            old: Default::default(),
            new,
            xmin: Some(xmin),
        }
    }

    #[tokio::test]
    async fn s1_insert_on_root_populates_root_filter_only() {
        let tree = book_author_tree();
        let search = FakeSearchIndex::default();
        let fk = FakeForeignKeys;
        let run = vec![insert_book(7, 3, 101)];

        let resolved = resolve(&run, &tree, &search, &fk).await.unwrap();
        assert!(resolved.deletes.is_empty());
        assert_eq!(resolved.filters.get("book").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn s2_update_changing_root_primary_key_emits_delete_and_filter() {
        let tree = book_author_tree();
        let search = FakeSearchIndex::default();
        let fk = FakeForeignKeys;

        let mut old = serde_json::Map::new();
        old.insert("id".into(), json!(7));
        let mut new = serde_json::Map::new();
        new.insert("id".into(), json!(8));
        let payload = Payload {
            tg_op: TgOp::Update,
            schema: "public".into(),
            table: "book".into(),
            old,
            new,
            xmin: Some(102),
        };

        let resolved = resolve(&[payload], &tree, &search, &fk).await.unwrap();
        assert_eq!(resolved.deletes.len(), 1);
        assert_eq!(resolved.deletes[0].id(), "7");
        assert_eq!(resolved.filters.get("book").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn s4_update_on_non_root_populates_root_filter_via_meta_lookup() {
        let tree = book_author_tree();
        // book id 7 is already indexed with author id 3 in its meta section.
        let search = FakeSearchIndex::with_doc("7", json!({"author": {"id": "3"}}));
        let fk = FakeForeignKeys;

        // UPDATE author id:3 — the row only carries its own columns, so the
        // foreign-key resolver (keyed on `author_id`, a column of `book`, not
        // `author`) finds nothing; the primary-key resolver must carry this.
        let mut old = serde_json::Map::new();
        old.insert("id".into(), json!(3));
        old.insert("name".into(), json!("Old Name"));
        let mut new = serde_json::Map::new();
        new.insert("id".into(), json!(3));
        new.insert("name".into(), json!("New Name"));
        let payload = Payload {
            tg_op: TgOp::Update,
            schema: "public".into(),
            table: "author".into(),
            old,
            new,
            xmin: Some(104),
        };

        let resolved = resolve(&[payload], &tree, &search, &fk).await.unwrap();
        assert!(resolved.deletes.is_empty());
        let records = resolved.filters.get("book").expect("root filter populated via meta lookup");
        assert_eq!(records[0], vec![("id".to_string(), json!("7"))]);
    }

    #[tokio::test]
    async fn s3_delete_on_root_emits_direct_delete_with_no_filters() {
        let tree = book_author_tree();
        let search = FakeSearchIndex::default();
        let fk = FakeForeignKeys;

        let mut old = serde_json::Map::new();
        old.insert("id".into(), json!(8));
        let payload = Payload {
            tg_op: TgOp::Delete,
            schema: "public".into(),
            table: "book".into(),
            old,
            new: Default::default(),
            xmin: Some(103),
        };

        let resolved = resolve(&[payload], &tree, &search, &fk).await.unwrap();
        assert_eq!(resolved.deletes.len(), 1);
        assert_eq!(resolved.deletes[0].id(), "8");
        assert!(resolved.filters.is_empty());
    }

    #[tokio::test]
    async fn s5_truncate_on_root_deletes_all_docs() {
        let tree = book_author_tree();
        let search = FakeSearchIndex::with_docs(vec!["7".into(), "8".into()]);
        let fk = FakeForeignKeys;

        let payload = Payload {
            tg_op: TgOp::Truncate,
            schema: "public".into(),
            table: "book".into(),
            old: Default::default(),
            new: Default::default(),
            xmin: None,
        };

        let resolved = resolve(&[payload], &tree, &search, &fk).await.unwrap();
        assert_eq!(resolved.deletes.len(), 2);
    }

    #[tokio::test]
    async fn unknown_table_drops_the_run() {
        let tree = book_author_tree();
        let search = FakeSearchIndex::default();
        let fk = FakeForeignKeys;

        let payload = Payload {
            tg_op: TgOp::Insert,
            schema: "public".into(),
            table: "unrelated".into(),
            old: Default::default(),
            new: Default::default(),
            xmin: Some(1),
        };

        let resolved = resolve(&[payload], &tree, &search, &fk).await.unwrap();
        assert!(resolved.filters.is_empty());
        assert!(resolved.deletes.is_empty());
    }
}
