//! Elasticsearch / OpenSearch client over HTTP.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, warn};

use catalog_types::ConnectionSettings;

use crate::client::{
    scroll_ttl, BulkItemResult, BulkOp, BulkResponse, ByQueryResponse, Hit, SearchClient,
    SearchPage, SearchRequest,
};
use crate::error::SearchError;

/// Round-robins requests over the configured hosts.
pub struct HttpSearchClient {
    client: Client,
    /// Used for backend-side copies, which may run for a long time
    unbounded: Client,
    hosts: Vec<String>,
    next_host: AtomicUsize,
    username: Option<String>,
    password: Option<SecretString>,
}

impl HttpSearchClient {
    pub fn new(settings: &ConnectionSettings) -> Result<Self, SearchError> {
        if settings.hosts.is_empty() {
            return Err(SearchError::Config("no search hosts configured".to_string()));
        }
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| SearchError::Config(e.to_string()))?;
        let unbounded = Client::builder()
            .build()
            .map_err(|e| SearchError::Config(e.to_string()))?;

        Ok(Self {
            client,
            unbounded,
            hosts: settings
                .hosts
                .iter()
                .map(|h| h.trim_end_matches('/').to_string())
                .collect(),
            next_host: AtomicUsize::new(0),
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    fn host(&self) -> &str {
        let n = self.next_host.fetch_add(1, Ordering::Relaxed);
        &self.hosts[n % self.hosts.len()]
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.request_with(&self.client, method, path)
    }

    fn request_with(&self, client: &Client, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.host(), path.trim_start_matches('/'));
        let builder = client.request(method, url);
        match &self.username {
            Some(user) => builder.basic_auth(
                user,
                self.password.as_ref().map(|p| p.expose_secret().to_string()),
            ),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, SearchError> {
        builder
            .send()
            .await
            .map_err(|e| SearchError::Transport(e.to_string()))
    }

    /// Send and decode a JSON body, classifying non-success statuses.
    async fn call(&self, builder: RequestBuilder) -> Result<Value, SearchError> {
        let response = self.send(builder).await?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SearchError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(SearchError::from_status(status.as_u16(), error_reason(&text)));
        }
        if text.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// `type: reason` of a backend error body, or the raw body.
fn error_reason(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    match error {
        Some(Value::Object(e)) => format!(
            "{}: {}",
            e.get("type").and_then(Value::as_str).unwrap_or("error"),
            e.get("reason").and_then(Value::as_str).unwrap_or_default()
        ),
        Some(Value::String(s)) => s.clone(),
        _ => body.to_string(),
    }
}

/// The only value of a response keyed by index name.
fn first_index_entry(body: Value) -> Value {
    match body {
        Value::Object(map) => map.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn as_u64(body: &Value, key: &str) -> u64 {
    body.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn parse_by_query(body: &Value) -> ByQueryResponse {
    ByQueryResponse {
        total: as_u64(body, "total"),
        deleted: as_u64(body, "deleted"),
        updated: as_u64(body, "updated"),
        created: as_u64(body, "created"),
        version_conflicts: as_u64(body, "version_conflicts"),
    }
}

fn parse_search_page(body: &Value) -> Result<SearchPage, SearchError> {
    let failures = body
        .pointer("/_shards/failures")
        .and_then(Value::as_array)
        .filter(|f| !f.is_empty());
    if let Some(failures) = failures {
        let reason = failures[0]
            .pointer("/reason/reason")
            .and_then(Value::as_str)
            .unwrap_or("shard failure");
        return Err(SearchError::Query(reason.to_string()));
    }

    // 7.x reports {"value": n, "relation": ..}; 6.x a bare number
    let total = match body.pointer("/hits/total") {
        Some(Value::Object(t)) => t.get("value").and_then(Value::as_u64).unwrap_or(0),
        Some(other) => other.as_u64().unwrap_or(0),
        None => 0,
    };
    let hits = body
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .map(|h| Hit {
                    index: h.get("_index").and_then(Value::as_str).unwrap_or_default().to_string(),
                    id: h.get("_id").and_then(Value::as_str).unwrap_or_default().to_string(),
                    source: h.get("_source").cloned(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(SearchPage {
        total,
        hits,
        scroll_id: body.get("_scroll_id").and_then(Value::as_str).map(String::from),
    })
}

fn parse_bulk_item(item: &Value) -> Option<BulkItemResult> {
    let (action, detail) = item.as_object()?.iter().next()?;
    let index = detail.get("_index").and_then(Value::as_str).unwrap_or_default();
    let id = detail.get("_id").and_then(Value::as_str).unwrap_or_default();
    let status = detail.get("status").and_then(Value::as_u64).unwrap_or(0) as u16;
    Some(match detail.get("error") {
        Some(error) => {
            let reason = match error {
                Value::Object(e) => format!(
                    "{}: {}",
                    e.get("type").and_then(Value::as_str).unwrap_or("error"),
                    e.get("reason").and_then(Value::as_str).unwrap_or_default()
                ),
                other => other.to_string(),
            };
            BulkItemResult::failed(action, index, id, status, reason)
        }
        None => BulkItemResult::ok(action, index, id, status),
    })
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    async fn create_index(
        &self,
        name: &str,
        mapping: Option<&Value>,
        settings: Option<&Value>,
    ) -> Result<(), SearchError> {
        let mut body = json!({});
        if let Some(mapping) = mapping {
            body["mappings"] = mapping.clone();
        }
        if let Some(settings) = settings {
            body["settings"] = settings.clone();
        }
        self.call(self.request(Method::PUT, name).json(&body)).await?;
        debug!(index = name, "Created index");
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<(), SearchError> {
        self.call(self.request(Method::DELETE, name)).await?;
        debug!(index = name, "Deleted index");
        Ok(())
    }

    async fn index_exists(&self, name: &str) -> Result<bool, SearchError> {
        let response = self.send(self.request(Method::HEAD, name)).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(SearchError::from_status(status.as_u16(), "index exists check failed")),
        }
    }

    async fn close_index(&self, name: &str) -> Result<(), SearchError> {
        self.call(self.request(Method::POST, &format!("{}/_close", name))).await?;
        Ok(())
    }

    async fn open_index(&self, name: &str) -> Result<(), SearchError> {
        self.call(self.request(Method::POST, &format!("{}/_open", name))).await?;
        Ok(())
    }

    async fn put_mapping(&self, name: &str, mapping: &Value) -> Result<(), SearchError> {
        self.call(self.request(Method::PUT, &format!("{}/_mapping", name)).json(mapping))
            .await?;
        Ok(())
    }

    async fn get_mapping(&self, name: &str) -> Result<Value, SearchError> {
        let body = self.call(self.request(Method::GET, &format!("{}/_mapping", name))).await?;
        Ok(first_index_entry(body)
            .get("mappings")
            .cloned()
            .unwrap_or_else(|| json!({})))
    }

    async fn put_settings(&self, name: &str, settings: &Value) -> Result<(), SearchError> {
        self.call(self.request(Method::PUT, &format!("{}/_settings", name)).json(settings))
            .await?;
        Ok(())
    }

    async fn get_settings(&self, name: &str) -> Result<Value, SearchError> {
        let body = self.call(self.request(Method::GET, &format!("{}/_settings", name))).await?;
        Ok(first_index_entry(body)
            .pointer("/settings/index")
            .cloned()
            .unwrap_or_else(|| json!({})))
    }

    async fn alias_swap(&self, alias: &str, from: Option<&str>, to: &str) -> Result<(), SearchError> {
        let mut actions = Vec::new();
        if let Some(from) = from {
            actions.push(json!({ "remove": { "index": from, "alias": alias } }));
        }
        actions.push(json!({ "add": { "index": to, "alias": alias } }));
        self.call(
            self.request(Method::POST, "_aliases")
                .json(&json!({ "actions": actions })),
        )
        .await?;
        debug!(alias, from = ?from, to, "Swapped alias");
        Ok(())
    }

    async fn get_alias(&self, alias: &str) -> Result<Vec<String>, SearchError> {
        match self.call(self.request(Method::GET, &format!("_alias/{}", alias))).await {
            Ok(Value::Object(indices)) => Ok(indices.keys().cloned().collect()),
            Ok(_) => Ok(Vec::new()),
            Err(SearchError::Request { status: 404, .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn list_indexes(&self, prefix: &str) -> Result<Vec<String>, SearchError> {
        let request = self
            .request(Method::GET, &format!("_cat/indices/{}*", prefix))
            .query(&[("format", "json"), ("h", "index")]);
        let mut names: Vec<String> = match self.call(request).await {
            Ok(Value::Array(rows)) => rows
                .iter()
                .filter_map(|row| row["index"].as_str())
                .filter(|name| name.starts_with(prefix))
                .map(str::to_string)
                .collect(),
            Ok(_) => Vec::new(),
            Err(SearchError::Request { status: 404, .. }) => Vec::new(),
            Err(e) => return Err(e),
        };
        names.sort();
        Ok(names)
    }

    async fn bulk(&self, ops: &[BulkOp], refresh: bool) -> Result<BulkResponse, SearchError> {
        if ops.is_empty() {
            return Ok(BulkResponse::default());
        }
        let mut payload = String::new();
        for line in ops.iter().flat_map(BulkOp::to_ndjson_lines) {
            payload.push_str(&serde_json::to_string(&line)?);
            payload.push('\n');
        }
        let path = if refresh { "_bulk?refresh=true" } else { "_bulk" };
        let body = self
            .call(
                self.request(Method::POST, path)
                    .header("content-type", "application/x-ndjson")
                    .body(payload),
            )
            .await?;

        let items: Vec<BulkItemResult> = body
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_bulk_item).collect())
            .unwrap_or_default();
        if items.len() != ops.len() {
            warn!(sent = ops.len(), received = items.len(), "Bulk response item count mismatch");
        }
        Ok(BulkResponse { items })
    }

    async fn search(
        &self,
        index: &str,
        request: &SearchRequest,
        scroll: Option<Duration>,
    ) -> Result<SearchPage, SearchError> {
        let path = match scroll {
            Some(ttl) => format!("{}/_search?scroll={}", index, scroll_ttl(ttl)),
            None => format!("{}/_search", index),
        };
        let body = self
            .call(self.request(Method::POST, &path).json(&request.to_body()))
            .await?;
        parse_search_page(&body)
    }

    async fn scroll(&self, scroll_id: &str, ttl: Duration) -> Result<SearchPage, SearchError> {
        let body = self
            .call(self.request(Method::POST, "_search/scroll").json(&json!({
                "scroll": scroll_ttl(ttl),
                "scroll_id": scroll_id,
            })))
            .await?;
        parse_search_page(&body)
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), SearchError> {
        self.call(
            self.request(Method::DELETE, "_search/scroll")
                .json(&json!({ "scroll_id": scroll_id })),
        )
        .await?;
        Ok(())
    }

    async fn delete_by_query(&self, index: &str, query: &Value) -> Result<ByQueryResponse, SearchError> {
        let body = self
            .call(
                self.request(Method::POST, &format!("{}/_delete_by_query?conflicts=proceed", index))
                    .json(&json!({ "query": query })),
            )
            .await?;
        Ok(parse_by_query(&body))
    }

    async fn update_by_query(
        &self,
        index: &str,
        query: &Value,
        script: Option<&Value>,
    ) -> Result<ByQueryResponse, SearchError> {
        let mut request = json!({ "query": query });
        if let Some(script) = script {
            request["script"] = script.clone();
        }
        let body = self
            .call(
                self.request_with(
                    &self.unbounded,
                    Method::POST,
                    &format!("{}/_update_by_query?conflicts=proceed", index),
                )
                .json(&request),
            )
            .await?;
        Ok(parse_by_query(&body))
    }

    async fn get(&self, index: &str, id: &str) -> Result<Hit, SearchError> {
        let body = match self
            .call(self.request(Method::GET, &format!("{}/_doc/{}", index, id)))
            .await
        {
            Ok(body) => body,
            Err(SearchError::Request { status: 404, .. }) => {
                return Err(SearchError::NotFound(format!("{}/{}", index, id)))
            }
            Err(e) => return Err(e),
        };
        if body.get("found").and_then(Value::as_bool) == Some(false) {
            return Err(SearchError::NotFound(format!("{}/{}", index, id)));
        }
        Ok(Hit {
            index: body.get("_index").and_then(Value::as_str).unwrap_or(index).to_string(),
            id: id.to_string(),
            source: body.get("_source").cloned(),
        })
    }

    async fn count(&self, index: &str, query: Option<&Value>) -> Result<u64, SearchError> {
        let builder = self.request(Method::POST, &format!("{}/_count", index));
        let builder = match query {
            Some(query) => builder.json(&json!({ "query": query })),
            None => builder,
        };
        let body = self.call(builder).await?;
        Ok(as_u64(&body, "count"))
    }

    async fn refresh(&self, index: &str) -> Result<(), SearchError> {
        self.call(self.request(Method::POST, &format!("{}/_refresh", index))).await?;
        Ok(())
    }

    async fn reindex(&self, source: &str, dest: &str) -> Result<ByQueryResponse, SearchError> {
        let body = self
            .call(
                self.request_with(
                    &self.unbounded,
                    Method::POST,
                    "_reindex?refresh=true&wait_for_completion=true",
                )
                .json(&json!({
                    "conflicts": "proceed",
                    "source": { "index": source },
                    "dest": { "index": dest, "op_type": "create" },
                })),
            )
            .await?;
        let response = parse_by_query(&body);
        debug!(
            source,
            dest,
            created = response.created,
            conflicts = response.version_conflicts,
            "Backend reindex finished"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpSearchClient {
        let settings = ConnectionSettings {
            hosts: vec![server.uri()],
            ..Default::default()
        };
        HttpSearchClient::new(&settings).unwrap()
    }

    #[tokio::test]
    async fn test_bulk_reports_item_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("content-type", "application/x-ndjson"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": true,
                "items": [
                    {"index": {"_index": "c_1", "_id": "a", "status": 201}},
                    {"update": {"_index": "c_1", "_id": "b", "status": 404,
                        "error": {"type": "document_missing_exception", "reason": "missing"}}}
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let ops = vec![
            BulkOp::Index { index: "c".into(), id: "a".into(), doc: json!({"uuid": "a"}) },
            BulkOp::Update {
                index: "c".into(),
                id: "b".into(),
                doc: json!({"title": "b"}),
                doc_as_upsert: false,
                retry_on_conflict: 3,
            },
        ];
        let response = client.bulk(&ops, false).await.unwrap();
        assert_eq!(response.items.len(), 2);
        assert!(response.items[0].is_ok());
        let failed: Vec<_> = response.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status, 404);
        assert!(failed[0].error.as_deref().unwrap().starts_with("document_missing_exception"));
    }

    #[tokio::test]
    async fn test_search_parses_hits_and_total() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/c/_search"))
            .and(query_param("scroll", "120s"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_scroll_id": "abc",
                "_shards": {"total": 1, "failures": []},
                "hits": {"total": {"value": 2, "relation": "eq"}, "hits": [
                    {"_index": "c_1", "_id": "x"},
                    {"_index": "c_1", "_id": "y", "_source": {"uuid": "y"}}
                ]}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let page = client
            .search("c", &SearchRequest::match_all(), Some(Duration::from_secs(120)))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.ids(), vec!["x", "y"]);
        assert_eq!(page.scroll_id.as_deref(), Some("abc"));
        assert!(page.hits[0].source.is_none());
    }

    #[tokio::test]
    async fn test_shard_failure_is_query_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/c/_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_shards": {"total": 1, "failed": 1, "failures": [
                    {"shard": 0, "reason": {"type": "query_shard_exception", "reason": "failed to create query"}}
                ]},
                "hits": {"total": 0, "hits": []}
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .search("c", &SearchRequest::match_all(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Query(ref r) if r == "failed to create query"));
        assert_eq!(err.http_status(), 488);
    }

    #[tokio::test]
    async fn test_server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/c/_refresh"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/c_9"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"type": "index_not_found_exception", "reason": "no such index [c_9]"},
                "status": 404
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.refresh("c").await.unwrap_err().is_transient());
        match client.delete_index("c_9").await.unwrap_err() {
            SearchError::Request { status, reason } => {
                assert_eq!(status, 404);
                assert!(reason.starts_with("index_not_found_exception"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_alias_and_doc() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_alias/c"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "alias [c] missing", "status": 404})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/c/_doc/a"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"_index": "c_1", "_id": "a", "found": false})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.get_alias("c").await.unwrap().is_empty());
        assert!(matches!(client.get("c", "a").await, Err(SearchError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_indexes_reads_cat_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_cat/indices/c__*"))
            .and(query_param("format", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"index": "c__archive-0002_1"},
                {"index": "c__archive-0001_1"}
            ])))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(
            client.list_indexes("c__").await.unwrap(),
            vec!["c__archive-0001_1", "c__archive-0002_1"]
        );
    }

    #[tokio::test]
    async fn test_alias_swap_actions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_aliases"))
            .and(body_string_contains("\"remove\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"acknowledged": true})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .alias_swap("c", Some("c_1"), "c_2")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reindex_is_create_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_reindex"))
            .and(query_param("wait_for_completion", "true"))
            .and(body_string_contains("\"op_type\":\"create\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 3, "created": 2, "version_conflicts": 1
            })))
            .mount(&server)
            .await;

        let response = client_for(&server).reindex("c_1", "c_2").await.unwrap();
        assert_eq!(response.created, 2);
        assert_eq!(response.version_conflicts, 1);
    }

    #[tokio::test]
    async fn test_basic_auth_sent() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/c"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let settings = ConnectionSettings {
            hosts: vec![server.uri()],
            username: Some("admin".into()),
            password: Some(SecretString::from("secret".to_string())),
            ..Default::default()
        };
        let client = HttpSearchClient::new(&settings).unwrap();
        assert!(client.index_exists("c").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_mapping_unwraps_index_entry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/c/_mapping"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "c_1": {"mappings": {"dynamic": "false", "properties": {"uuid": {"type": "keyword"}}}}
            })))
            .mount(&server)
            .await;

        let mapping = client_for(&server).get_mapping("c").await.unwrap();
        assert_eq!(mapping["properties"]["uuid"]["type"], "keyword");
    }
}
