//! `DefaultQueryBuilder`: a minimal, non-optimizing SQL query builder
//! sufficient to materialize root documents and look up foreign-key column
//! pairs (`spec.md` §6 "External interfaces", concrete adapters). No
//! subquery caching or column pruning — callers needing those supply their
//! own [`super::QueryBuilder`]/[`crate::resolver::ForeignKeyLookup`] impl.

use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, QueryBuilder as SqlxQueryBuilder, Row};

use super::{QueryBuilder, RootRow};
use crate::error::{Error, Result};
use crate::resolver::{FilterSet, ForeignKeyLookup};
use crate::tree::{Node, Tree};

pub struct DefaultQueryBuilder {
    pool: PgPool,
}

impl DefaultQueryBuilder {
    pub fn new(pool: PgPool) -> Self {
        DefaultQueryBuilder { pool }
    }

    async fn foreign_keys_via_information_schema(
        &self,
        parent: &Node,
        child: &Node,
    ) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT kcu.column_name AS child_column, ccu.column_name AS parent_column
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
              ON tc.constraint_name = ccu.constraint_name AND tc.table_schema = ccu.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
              AND tc.table_name = $1 AND tc.table_schema = $2
              AND ccu.table_name = $3 AND ccu.table_schema = $4
            "#,
        )
        .bind(&child.table)
        .bind(&child.schema)
        .bind(&parent.table)
        .bind(&parent.schema)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("child_column"), r.get("parent_column")))
            .collect())
    }

    /// Alternate lookup path over `pg_constraint`/`pg_attribute` directly,
    /// used when the `information_schema` view is unavailable or returns
    /// nothing (`spec.md` §7 "Foreign-key lookup failure").
    async fn foreign_keys_via_pg_catalog(
        &self,
        parent: &Node,
        child: &Node,
    ) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT
                ca.attname AS child_column,
                pa.attname AS parent_column
            FROM pg_constraint con
            JOIN pg_class ccl ON ccl.oid = con.conrelid
            JOIN pg_namespace cns ON cns.oid = ccl.relnamespace
            JOIN pg_class pcl ON pcl.oid = con.confrelid
            JOIN pg_namespace pns ON pns.oid = pcl.relnamespace
            JOIN unnest(con.conkey) WITH ORDINALITY AS ck(attnum, ord) ON true
            JOIN unnest(con.confkey) WITH ORDINALITY AS pk(attnum, ord) ON pk.ord = ck.ord
            JOIN pg_attribute ca ON ca.attrelid = ccl.oid AND ca.attnum = ck.attnum
            JOIN pg_attribute pa ON pa.attrelid = pcl.oid AND pa.attnum = pk.attnum
            WHERE con.contype = 'f'
              AND ccl.relname = $1 AND cns.nspname = $2
              AND pcl.relname = $3 AND pns.nspname = $4
            "#,
        )
        .bind(&child.table)
        .bind(&child.schema)
        .bind(&parent.table)
        .bind(&parent.schema)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("child_column"), r.get("parent_column")))
            .collect())
    }

    fn qualified(table_schema: &str, table: &str) -> String {
        format!("\"{table_schema}\".\"{table}\"")
    }
}

#[async_trait::async_trait]
impl ForeignKeyLookup for DefaultQueryBuilder {
    async fn get_foreign_keys(&self, parent: &Node, child: &Node) -> Result<Vec<(String, String)>> {
        self.foreign_keys_via_information_schema(parent, child).await
    }

    async fn get_foreign_keys_from_constraints(
        &self,
        parent: &Node,
        child: &Node,
    ) -> Result<Vec<(String, String)>> {
        let pairs = self.foreign_keys_via_pg_catalog(parent, child).await?;
        if pairs.is_empty() {
            return Err(Error::foreign_key(&parent.table, &child.table));
        }
        Ok(pairs)
    }
}

#[async_trait::async_trait]
impl QueryBuilder for DefaultQueryBuilder {
    /// Materializes root rows by selecting `to_jsonb(t)` from the root
    /// table, filtered by the root slot of `filters` (if any) and bounded
    /// by `txmin`/`txmax` via the `xmin` system column. This sidesteps
    /// per-column static typing at the cost of optimizer visibility into
    /// individual columns — acceptable for the minimal adapter this is
    /// (`spec.md` §6).
    async fn fetch_root_rows(
        &self,
        tree: &Tree,
        filters: Option<&FilterSet>,
        txmin: Option<i64>,
        txmax: Option<i64>,
    ) -> Result<Vec<RootRow>> {
        let root = tree.root();
        let table = Self::qualified(&root.schema, &root.table);

        let mut query = SqlxQueryBuilder::<Postgres>::new(format!(
            "SELECT to_jsonb(t) AS doc FROM {table} t WHERE 1 = 1"
        ));

        if let Some(txmin) = txmin {
            query.push(" AND t.xmin::text::bigint >= ").push_bind(txmin);
        }
        if let Some(txmax) = txmax {
            query.push(" AND t.xmin::text::bigint <= ").push_bind(txmax);
        }

        if let Some(filters) = filters {
            if let Some(records) = filters.get(&root.table) {
                if !records.is_empty() {
                    query.push(" AND (");
                    for (i, record) in records.iter().enumerate() {
                        if i > 0 {
                            query.push(" OR ");
                        }
                        query.push("(");
                        for (j, (column, value)) in record.iter().enumerate() {
                            if j > 0 {
                                query.push(" AND ");
                            }
                            query
                                .push(format!("t.\"{column}\"::text = "))
                                .push_bind(value_to_text(value));
                        }
                        query.push(")");
                    }
                    query.push(")");
                }
            }
        }

        let rows = query.build().fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let doc: Value = row.try_get("doc")?;
            let Value::Object(map) = doc else {
                continue;
            };
            let primary_keys: Vec<String> = root
                .primary_keys
                .iter()
                .map(|k| value_to_text(map.get(k).unwrap_or(&Value::Null)))
                .collect();

            let mut meta = Map::new();
            let mut entry = Map::new();
            for (key, value) in root.primary_keys.iter().zip(&primary_keys) {
                entry.insert(key.clone(), Value::Array(vec![Value::String(value.clone())]));
            }
            meta.insert(root.table.clone(), Value::Object(entry));

            out.push(RootRow {
                primary_keys,
                source: Value::Object(map),
                meta,
            });
        }
        Ok(out)
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_to_text_unwraps_strings() {
        assert_eq!(value_to_text(&Value::String("7".to_string())), "7");
        assert_eq!(value_to_text(&Value::from(7)), "7");
    }

    #[test]
    fn qualified_quotes_schema_and_table() {
        assert_eq!(DefaultQueryBuilder::qualified("public", "book"), "\"public\".\"book\"");
    }
}
