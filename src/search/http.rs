//! A `reqwest`-based bulk client against the Elasticsearch/OpenSearch `_bulk`
//! NDJSON endpoint. Intentionally minimal — no retries, no scroll API, no
//! connection pooling beyond what `reqwest::Client` gives for free — this is
//! the "small shim" `spec.md` §2 says lives in-core for C8, the caller is
//! free to supply a richer [`super::SearchIndex`] implementation.

use serde_json::{json, Value};

use super::{BulkOp, BulkOpKind, SearchCapabilities, SearchIndex};
use crate::error::{Error, Result};
use async_trait::async_trait;

pub struct HttpSearchClient {
    client: reqwest::Client,
    base_url: String,
    meta_field: String,
    capabilities: SearchCapabilities,
}

impl HttpSearchClient {
    pub fn new(base_url: impl Into<String>, capabilities: SearchCapabilities) -> Self {
        HttpSearchClient {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            meta_field: "meta".to_string(),
            capabilities,
        }
    }

    pub fn with_meta_field(mut self, field: impl Into<String>) -> Self {
        self.meta_field = field.into();
        self
    }

    fn bulk_ndjson(&self, index: &str, ops: &[BulkOp]) -> String {
        let mut body = String::new();
        for op in ops {
            let action_index = op.index_name().unwrap_or(index);
            let mut action = json!({});
            let key = match op.kind() {
                BulkOpKind::Index => "index",
                BulkOpKind::Delete => "delete",
            };
            let mut meta = json!({ "_index": action_index, "_id": op.id() });
            if let Some(routing) = op.routing() {
                meta["_routing"] = Value::String(routing.to_string());
            }
            if let Some(doc_type) = op.doc_type() {
                meta["_type"] = Value::String(doc_type.to_string());
            }
            action[key] = meta;
            body.push_str(&action.to_string());
            body.push('\n');
            if let Some(source) = op.source() {
                let mut source = source.clone();
                if let Some(pipeline) = op.pipeline() {
                    if let Value::Object(ref mut map) = source {
                        map.insert("pipeline".to_string(), Value::String(pipeline.to_string()));
                    }
                }
                body.push_str(&source.to_string());
                body.push('\n');
            }
        }
        body
    }

    async fn search(&self, index: &str, query: Value) -> Result<Vec<String>> {
        let url = format!("{}/{}/_search", self.base_url, index);
        let response = self
            .client
            .post(&url)
            .json(&query)
            .send()
            .await
            .map_err(|e| Error::BulkWrite(format!("search request failed: {e}")))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::BulkWrite(format!("invalid search response: {e}")))?;
        let hits = body["hits"]["hits"].as_array().cloned().unwrap_or_default();
        Ok(hits
            .into_iter()
            .filter_map(|hit| hit["_id"].as_str().map(str::to_string))
            .collect())
    }
}

#[async_trait]
impl SearchIndex for HttpSearchClient {
    async fn bulk(&self, index: &str, ops: Vec<BulkOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let best_effort: Vec<bool> = ops.iter().map(|op| op.is_best_effort()).collect();
        let body = self.bulk_ndjson(index, &ops);
        let url = format!("{}/_bulk", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::BulkWrite(format!("bulk request failed: {e}")))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::BulkWrite(format!("invalid bulk response: {e}")))?;

        let Some(items) = body["items"].as_array() else {
            return Ok(());
        };
        for (item, tolerate) in items.iter().zip(best_effort) {
            let Some((_, result)) = item.as_object().and_then(|o| o.iter().next()) else {
                continue;
            };
            if let Some(error) = result.get("error") {
                let status = result.get("status").and_then(Value::as_u64).unwrap_or(0);
                if tolerate && status == 404 {
                    continue;
                }
                return Err(Error::BulkWrite(error.to_string()));
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
        let must: Vec<Value> = columns
            .iter()
            .zip(values)
            .map(|(col, val)| json!({ "term": { format!("{}.{}.{}", self.meta_field, table, col): val } }))
            .collect();
        let query = json!({
            "query": { "bool": { "must": must } },
            "_source": false,
            "size": 10_000,
        });
        self.search("_all", query).await
    }

    async fn doc_ids_referencing_table(&self, table: &str) -> Result<Vec<String>> {
        let query = json!({
            "query": { "exists": { "field": format!("{}.{}", self.meta_field, table) } },
            "_source": false,
            "size": 10_000,
        });
        self.search("_all", query).await
    }

    async fn all_doc_ids(&self) -> Result<Vec<String>> {
        let query = json!({ "query": { "match_all": {} }, "_source": false, "size": 10_000 });
        self.search("_all", query).await
    }

    async fn doc_count(&self) -> Result<u64> {
        let url = format!("{}/_count", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::BulkWrite(format!("count request failed: {e}")))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::BulkWrite(format!("invalid count response: {e}")))?;
        Ok(body["count"].as_u64().unwrap_or(0))
    }

    fn capabilities(&self) -> SearchCapabilities {
        self.capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_ndjson_emits_action_and_source_lines() {
        let client = HttpSearchClient::new(
            "http://localhost:9200",
            SearchCapabilities { major_version: 8, is_opensearch: false },
        );
        let ops = vec![BulkOp::index("7", json!({"title": "Dune"}))];
        let body = client.bulk_ndjson("books", &ops);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"index\""));
        assert!(lines[1].contains("Dune"));
    }

    #[test]
    fn bulk_ndjson_emits_delete_with_no_source_line() {
        let client = HttpSearchClient::new(
            "http://localhost:9200",
            SearchCapabilities { major_version: 8, is_opensearch: false },
        );
        let ops = vec![BulkOp::delete("7")];
        let body = client.bulk_ndjson("books", &ops);
        assert_eq!(body.lines().count(), 1);
        assert!(body.contains("\"delete\""));
    }

    #[test]
    fn doc_type_attached_below_v7_on_elasticsearch() {
        let caps = SearchCapabilities { major_version: 6, is_opensearch: false };
        assert_eq!(caps.doc_type(), Some("_doc"));
        let caps = SearchCapabilities { major_version: 6, is_opensearch: true };
        assert_eq!(caps.doc_type(), None);
        let caps = SearchCapabilities { major_version: 8, is_opensearch: false };
        assert_eq!(caps.doc_type(), None);
    }
}
