//! Converts a `SyncDoc`'s untyped `nodes` JSON into a validated
//! [`crate::tree::Tree`] (`spec.md` §3 "Tree").
//!
//! The wire shape mirrors `original_source/pgsync/schema.py`'s node
//! document: `table`, `schema` (defaults to `"public"`), `primary_key`
//! (defaults to `["id"]` when omitted — an implementer default the upstream
//! project leaves unstated, recorded in DESIGN.md), nested `children`, and
//! an optional `relationship` block naming `foreign_key.parent` /
//! `foreign_key.child` column lists and `through_tables`.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::tree::{Node, Relationship, Tree};

#[derive(Debug, Default, Deserialize)]
struct RawForeignKey {
    #[serde(default)]
    parent: Vec<String>,
    #[serde(default)]
    child: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawRelationship {
    #[serde(default)]
    foreign_key: RawForeignKey,
    #[serde(default)]
    through_tables: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    table: String,
    #[serde(default = "default_schema")]
    schema: String,
    #[serde(default = "default_primary_key")]
    primary_key: Vec<String>,
    #[serde(default)]
    children: Vec<RawNode>,
    #[serde(default)]
    relationship: Option<RawRelationship>,
    #[serde(default)]
    base_tables: Vec<String>,
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_primary_key() -> Vec<String> {
    vec!["id".to_string()]
}

impl From<RawNode> for Node {
    fn from(raw: RawNode) -> Self {
        Node {
            table: raw.table,
            schema: raw.schema,
            primary_keys: raw.primary_key,
            children: raw.children.into_iter().map(Node::from).collect(),
            relationship: raw.relationship.map(|rel| Relationship {
                parent_keys: rel.foreign_key.parent,
                child_keys: rel.foreign_key.child,
                throughs: rel.through_tables,
            }),
            base_tables: raw.base_tables,
        }
    }
}

/// Builds and validates a [`Tree`] from a `SyncDoc.nodes` value. The node's
/// own `schema` (and every descendant's) must be declared in
/// `declared_schemas`, or [`Tree::new`] rejects the document
/// (`spec.md` §3 invariant).
pub fn build_tree(nodes: &serde_json::Value, declared_schemas: &[String]) -> Result<Tree> {
    let raw: RawNode = serde_json::from_value(nodes.clone())
        .map_err(|e| Error::configuration(format!("invalid node document: {e}")))?;
    let root: Node = raw.into();
    Tree::new(root, declared_schemas)
}

/// Collects every schema named by a node or its descendants, so a caller
/// that doesn't separately declare schemas can derive the set directly from
/// the document (`original_source/pgsync/sync.py` infers `tree.schemas`
/// the same way, from the nodes it walks).
pub fn schemas_of(nodes: &serde_json::Value) -> Result<Vec<String>> {
    fn collect(raw: &RawNode, out: &mut Vec<String>) {
        if !out.contains(&raw.schema) {
            out.push(raw.schema.clone());
        }
        for child in &raw.children {
            collect(child, out);
        }
    }
    let raw: RawNode = serde_json::from_value(nodes.clone())
        .map_err(|e| Error::configuration(format!("invalid node document: {e}")))?;
    let mut out = Vec::new();
    collect(&raw, &mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_tree_with_default_schema_and_primary_key() {
        let nodes = json!({
            "table": "book",
            "children": [
                {
                    "table": "author",
                    "relationship": {
                        "foreign_key": {"parent": ["id"], "child": ["author_id"]}
                    }
                }
            ]
        });
        let tree = build_tree(&nodes, &["public".to_string()]).unwrap();
        assert_eq!(tree.root().table, "book");
        assert_eq!(tree.root().primary_keys, vec!["id".to_string()]);
        assert!(tree.get_node("public", "author").is_some());
    }

    #[test]
    fn schemas_of_collects_every_declared_schema() {
        let nodes = json!({
            "table": "book",
            "schema": "public",
            "children": [
                {"table": "review", "schema": "analytics"}
            ]
        });
        let schemas = schemas_of(&nodes).unwrap();
        assert_eq!(schemas, vec!["public".to_string(), "analytics".to_string()]);
    }

    #[test]
    fn rejects_undeclared_schema() {
        let nodes = json!({"table": "book", "schema": "ghost"});
        assert!(build_tree(&nodes, &["public".to_string()]).is_err());
    }
}
