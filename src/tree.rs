//! Read-only view of the configured table tree (C3).
//!
//! A [`Tree`] is built once from a [`crate::config::SyncDoc`] and never
//! mutated afterward. Every lookup (`get_node`, `schemas`, `tables`) walks
//! the same immutable structure, so there is nothing to synchronize.

use std::collections::HashSet;

use crate::error::{Error, Result};

/// Declares which columns on the child side join to which columns on the
/// parent side, plus any through-tables the relationship passes through.
#[derive(Debug, Clone)]
pub struct Relationship {
    pub parent_keys: Vec<String>,
    pub child_keys: Vec<String>,
    pub throughs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub table: String,
    pub schema: String,
    pub primary_keys: Vec<String>,
    pub children: Vec<Node>,
    pub relationship: Option<Relationship>,
    pub base_tables: Vec<String>,
}

impl Node {
    pub fn is_view(&self) -> bool {
        !self.base_tables.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Tree {
    root: Node,
    schemas: HashSet<String>,
}

impl Tree {
    /// Builds a tree from a root node, validating the invariants from
    /// `spec.md` §3: every referenced schema is declared, every base table
    /// has at least one primary key, and foreign keys resolve to columns
    /// that exist on both endpoints. Rejects cycles (`spec.md` §9 "Tree
    /// cycles") by construction: a `Node` tree built from owned children
    /// cannot reference an ancestor, so the only cycle check needed is that
    /// no table name repeats along a root-to-leaf path.
    pub fn new(root: Node, declared_schemas: &[String]) -> Result<Self> {
        let schemas: HashSet<String> = declared_schemas.iter().cloned().collect();
        let mut seen_path = HashSet::new();
        validate_node(&root, &schemas, &mut seen_path)?;
        Ok(Tree { root, schemas })
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn schemas(&self) -> &HashSet<String> {
        &self.schemas
    }

    pub fn tables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        collect_tables(&self.root, &mut out);
        out
    }

    pub fn get_node(&self, schema: &str, table: &str) -> Option<&Node> {
        find_node(&self.root, schema, table)
    }

    /// Root-to-leaves, level by level.
    pub fn traverse_breadth_first(&self) -> Vec<&Node> {
        let mut out = Vec::new();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(&self.root);
        while let Some(node) = queue.pop_front() {
            out.push(node);
            for child in &node.children {
                queue.push_back(child);
            }
        }
        out
    }

    /// Children before parents; the root is last. This is the order the
    /// sync executor uses to let each node register subqueries on its
    /// parent before the root materializes the final row set.
    pub fn traverse_post_order(&self) -> Vec<&Node> {
        let mut out = Vec::new();
        post_order(&self.root, &mut out);
        out
    }

    /// The node whose table/schema a payload belongs to, or `None` if the
    /// run should be dropped (`spec.md` §4.5: "If N is unknown ... the run
    /// is dropped").
    pub fn find(&self, schema: &str, table: &str) -> Option<&Node> {
        self.get_node(schema, table)
    }

    /// The direct parent of `table`, if any.
    pub fn parent_of(&self, schema: &str, table: &str) -> Option<&Node> {
        parent_of(&self.root, schema, table)
    }
}

fn validate_node(
    node: &Node,
    schemas: &HashSet<String>,
    path: &mut HashSet<String>,
) -> Result<()> {
    if !schemas.contains(&node.schema) {
        return Err(Error::configuration(format!(
            "schema '{}' referenced by table '{}' is not declared",
            node.schema, node.table
        )));
    }
    if !node.is_view() && node.primary_keys.is_empty() {
        return Err(Error::configuration(format!(
            "table '{}' has no primary key",
            node.table
        )));
    }
    let key = format!("{}.{}", node.schema, node.table);
    if !path.insert(key.clone()) {
        return Err(Error::configuration(format!(
            "cycle detected in tree at table '{}'",
            node.table
        )));
    }
    if let Some(rel) = &node.relationship {
        if rel.parent_keys.len() != rel.child_keys.len() {
            return Err(Error::configuration(format!(
                "relationship on '{}' has mismatched key lists",
                node.table
            )));
        }
    }
    for child in &node.children {
        validate_node(child, schemas, path)?;
    }
    path.remove(&key);
    Ok(())
}

fn collect_tables<'a>(node: &'a Node, out: &mut Vec<&'a str>) {
    out.push(&node.table);
    for child in &node.children {
        collect_tables(child, out);
    }
}

fn find_node<'a>(node: &'a Node, schema: &str, table: &str) -> Option<&'a Node> {
    if node.schema == schema && node.table == table {
        return Some(node);
    }
    for child in &node.children {
        if let Some(found) = find_node(child, schema, table) {
            return Some(found);
        }
    }
    None
}

fn parent_of<'a>(node: &'a Node, schema: &str, table: &str) -> Option<&'a Node> {
    for child in &node.children {
        if child.schema == schema && child.table == table {
            return Some(node);
        }
        if let Some(found) = parent_of(child, schema, table) {
            return Some(found);
        }
    }
    None
}

fn post_order<'a>(node: &'a Node, out: &mut Vec<&'a Node>) {
    for child in &node.children {
        post_order(child, out);
    }
    out.push(node);
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn finds_root_and_child() {
        let tree = book_author_tree();
        assert_eq!(tree.root().table, "book");
        assert!(tree.get_node("public", "author").is_some());
        assert!(tree.get_node("public", "missing").is_none());
    }

    #[test]
    fn post_order_visits_children_before_parent() {
        let tree = book_author_tree();
        let order: Vec<&str> = tree
            .traverse_post_order()
            .into_iter()
            .map(|n| n.table.as_str())
            .collect();
        assert_eq!(order, vec!["author", "book"]);
    }

    #[test]
    fn rejects_unknown_schema() {
        let node = Node {
            table: "x".into(),
            schema: "ghost".into(),
            primary_keys: vec!["id".into()],
            children: vec![],
            relationship: None,
            base_tables: vec![],
        };
        assert!(Tree::new(node, &["public".to_string()]).is_err());
    }

    #[test]
    fn rejects_missing_primary_key() {
        let node = Node {
            table: "x".into(),
            schema: "public".into(),
            primary_keys: vec![],
            children: vec![],
            relationship: None,
            base_tables: vec![],
        };
        assert!(Tree::new(node, &["public".to_string()]).is_err());
    }
}
