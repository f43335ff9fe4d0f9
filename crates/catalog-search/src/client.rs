//! Search backend abstraction.
//!
//! Everything the indexing engine needs from the backend goes through
//! [`SearchClient`]. Two implementations ship with the crate:
//! [`HttpSearchClient`](crate::http::HttpSearchClient) for Elasticsearch /
//! OpenSearch 7.x (typeless `_doc` API) and
//! [`InMemoryBackend`](crate::memory::InMemoryBackend) for tests and dry runs.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::SearchError;

/// One operation of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOp {
    /// Full upsert
    Index { index: String, id: String, doc: Value },
    /// Insert only; conflicts with an existing document
    Create { index: String, id: String, doc: Value },
    /// Partial merge of `doc` into the stored document
    Update {
        index: String,
        id: String,
        doc: Value,
        doc_as_upsert: bool,
        retry_on_conflict: u32,
    },
    Delete { index: String, id: String },
}

impl BulkOp {
    pub fn index(&self) -> &str {
        match self {
            BulkOp::Index { index, .. }
            | BulkOp::Create { index, .. }
            | BulkOp::Update { index, .. }
            | BulkOp::Delete { index, .. } => index,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            BulkOp::Index { id, .. }
            | BulkOp::Create { id, .. }
            | BulkOp::Update { id, .. }
            | BulkOp::Delete { id, .. } => id,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            BulkOp::Index { .. } => "index",
            BulkOp::Create { .. } => "create",
            BulkOp::Update { .. } => "update",
            BulkOp::Delete { .. } => "delete",
        }
    }

    /// Bulk NDJSON lines for this operation: the action line and, except
    /// for deletes, the source line.
    pub fn to_ndjson_lines(&self) -> Vec<Value> {
        let meta = |extra: Option<(&str, Value)>| {
            let mut m = Map::new();
            m.insert("_index".to_string(), json!(self.index()));
            m.insert("_id".to_string(), json!(self.id()));
            if let Some((k, v)) = extra {
                m.insert(k.to_string(), v);
            }
            let mut line = Map::new();
            line.insert(self.action().to_string(), Value::Object(m));
            Value::Object(line)
        };
        match self {
            BulkOp::Index { doc, .. } | BulkOp::Create { doc, .. } => vec![meta(None), doc.clone()],
            BulkOp::Update {
                doc,
                doc_as_upsert,
                retry_on_conflict,
                ..
            } => vec![
                meta(Some(("retry_on_conflict", json!(retry_on_conflict)))),
                json!({ "doc": doc, "doc_as_upsert": doc_as_upsert }),
            ],
            BulkOp::Delete { .. } => vec![meta(None)],
        }
    }
}

/// Outcome of one bulk item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub action: String,
    pub index: String,
    pub id: String,
    pub status: u16,
    /// Error type and reason, when the item failed
    pub error: Option<String>,
}

impl BulkItemResult {
    pub fn ok(action: &str, index: &str, id: &str, status: u16) -> Self {
        Self {
            action: action.to_string(),
            index: index.to_string(),
            id: id.to_string(),
            status,
            error: None,
        }
    }

    pub fn failed(action: &str, index: &str, id: &str, status: u16, error: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            index: index.to_string(),
            id: id.to_string(),
            status,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// The backend can be expected to accept this item on a later attempt.
    pub fn is_retryable(&self) -> bool {
        self.status == 429 || self.status >= 500
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkResponse {
    pub items: Vec<BulkItemResult>,
}

impl BulkResponse {
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|i| !i.is_ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &BulkItemResult> {
        self.items.iter().filter(|i| !i.is_ok())
    }
}

/// Body of a search request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRequest {
    pub query: Option<Value>,
    pub size: Option<usize>,
    pub from: Option<usize>,
    pub sort: Option<Value>,
    /// `false` to skip `_source`, or a list of field names
    pub source: Option<Value>,
}

impl SearchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn match_all() -> Self {
        Self::new().with_query(json!({ "match_all": {} }))
    }

    pub fn with_query(mut self, query: Value) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_from(mut self, from: usize) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_sort(mut self, sort: Value) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn without_source(mut self) -> Self {
        self.source = Some(Value::Bool(false));
        self
    }

    pub fn with_source_fields(mut self, fields: &[&str]) -> Self {
        self.source = Some(json!(fields));
        self
    }

    /// Parse a request body as produced by a [`QueryParser`](crate::query::QueryParser).
    pub fn from_body(body: &Value) -> Self {
        Self {
            query: body.get("query").cloned(),
            size: body.get("size").and_then(Value::as_u64).map(|v| v as usize),
            from: body.get("from").and_then(Value::as_u64).map(|v| v as usize),
            sort: body.get("sort").cloned(),
            source: body.get("_source").cloned(),
        }
    }

    pub fn to_body(&self) -> Value {
        let mut body = Map::new();
        if let Some(query) = &self.query {
            body.insert("query".to_string(), query.clone());
        }
        if let Some(size) = self.size {
            body.insert("size".to_string(), json!(size));
        }
        if let Some(from) = self.from {
            body.insert("from".to_string(), json!(from));
        }
        if let Some(sort) = &self.sort {
            body.insert("sort".to_string(), sort.clone());
        }
        if let Some(source) = &self.source {
            body.insert("_source".to_string(), source.clone());
        }
        Value::Object(body)
    }
}

/// A search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub index: String,
    pub id: String,
    pub source: Option<Value>,
}

/// One page of search or scroll results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    /// Total matching documents, not just this page
    pub total: u64,
    pub hits: Vec<Hit>,
    pub scroll_id: Option<String>,
}

impl SearchPage {
    pub fn ids(&self) -> Vec<String> {
        self.hits.iter().map(|h| h.id.clone()).collect()
    }
}

/// Summary of a by-query operation or a backend-side copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByQueryResponse {
    pub total: u64,
    pub deleted: u64,
    pub updated: u64,
    pub created: u64,
    pub version_conflicts: u64,
}

/// Scroll ttl as the backend expects it, e.g. `120s`.
pub fn scroll_ttl(ttl: Duration) -> String {
    format!("{}s", ttl.as_secs().max(1))
}

/// Thin abstraction over the search backend.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Create a physical index with optional mapping and settings.
    async fn create_index(
        &self,
        name: &str,
        mapping: Option<&Value>,
        settings: Option<&Value>,
    ) -> Result<(), SearchError>;

    async fn delete_index(&self, name: &str) -> Result<(), SearchError>;

    async fn index_exists(&self, name: &str) -> Result<bool, SearchError>;

    async fn close_index(&self, name: &str) -> Result<(), SearchError>;

    async fn open_index(&self, name: &str) -> Result<(), SearchError>;

    async fn put_mapping(&self, name: &str, mapping: &Value) -> Result<(), SearchError>;

    /// Installed mapping, shaped `{properties, dynamic}`. Aliases resolve.
    async fn get_mapping(&self, name: &str) -> Result<Value, SearchError>;

    async fn put_settings(&self, name: &str, settings: &Value) -> Result<(), SearchError>;

    /// Index-level settings (the `index` object). Aliases resolve.
    async fn get_settings(&self, name: &str) -> Result<Value, SearchError>;

    /// Atomically move `alias` from `from` to `to`. `from = None` only adds.
    async fn alias_swap(&self, alias: &str, from: Option<&str>, to: &str) -> Result<(), SearchError>;

    /// Physical indices `alias` currently points at; empty when unknown.
    async fn get_alias(&self, alias: &str) -> Result<Vec<String>, SearchError>;

    /// Physical indices whose name starts with `prefix`, sorted.
    async fn list_indexes(&self, prefix: &str) -> Result<Vec<String>, SearchError>;

    /// At-least-once bulk write. Per-item failures are reported, not raised.
    async fn bulk(&self, ops: &[BulkOp], refresh: bool) -> Result<BulkResponse, SearchError>;

    /// Run a search; with `scroll` set, a scroll cursor is opened.
    async fn search(
        &self,
        index: &str,
        request: &SearchRequest,
        scroll: Option<Duration>,
    ) -> Result<SearchPage, SearchError>;

    async fn scroll(&self, scroll_id: &str, ttl: Duration) -> Result<SearchPage, SearchError>;

    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), SearchError>;

    async fn delete_by_query(&self, index: &str, query: &Value) -> Result<ByQueryResponse, SearchError>;

    /// Runs with conflicts=proceed; the conflict count is reported.
    async fn update_by_query(
        &self,
        index: &str,
        query: &Value,
        script: Option<&Value>,
    ) -> Result<ByQueryResponse, SearchError>;

    /// Point lookup; [`SearchError::NotFound`] when absent.
    async fn get(&self, index: &str, id: &str) -> Result<Hit, SearchError>;

    async fn count(&self, index: &str, query: Option<&Value>) -> Result<u64, SearchError>;

    async fn refresh(&self, index: &str) -> Result<(), SearchError>;

    /// Backend-side copy of every document of `source` into `dest`,
    /// create-only (existing documents in `dest` win). Runs without timeout.
    async fn reindex(&self, source: &str, dest: &str) -> Result<ByQueryResponse, SearchError>;
}
