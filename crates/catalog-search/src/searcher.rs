//! Query execution against a container alias.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tracing::debug;

use catalog_types::{EventSink, SearchDone, UID_FIELD};

use crate::client::{Hit, SearchClient, SearchPage, SearchRequest};
use crate::error::SearchError;
use crate::query::QueryParser;
use crate::security::{Principal, SecurityQueryBuilder};

/// Runs parsed catalog queries with the principal's security filter applied.
pub struct CatalogSearcher {
    client: Arc<dyn SearchClient>,
    parser: Arc<dyn QueryParser>,
    security: Arc<dyn SecurityQueryBuilder>,
    sink: Option<Arc<dyn EventSink>>,
}

impl CatalogSearcher {
    pub fn new(
        client: Arc<dyn SearchClient>,
        parser: Arc<dyn QueryParser>,
        security: Arc<dyn SecurityQueryBuilder>,
    ) -> Self {
        Self {
            client,
            parser,
            security,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Search with flat catalog parameters (`field__op = value`).
    pub async fn search(
        &self,
        alias: &str,
        principal: &Principal,
        params: &Map<String, Value>,
    ) -> Result<SearchPage, SearchError> {
        let body = self.parser.parse(params)?;
        self.search_body(alias, principal, &body).await
    }

    /// Search with a raw request body.
    pub async fn search_body(
        &self,
        alias: &str,
        principal: &Principal,
        body: &Value,
    ) -> Result<SearchPage, SearchError> {
        let mut request = SearchRequest::from_body(body);
        let query = request
            .query
            .take()
            .unwrap_or_else(|| json!({ "match_all": {} }));
        request.query = Some(match self.security.build(principal) {
            Some(filter) => json!({ "bool": { "must": [query], "filter": [filter] } }),
            None => query,
        });

        let started = Instant::now();
        let page = self.client.search(alias, &request, None).await?;
        let done = SearchDone {
            query: request.to_body(),
            total: page.total,
            elapsed: started.elapsed(),
        };
        debug!(
            alias,
            total = done.total,
            elapsed_ms = done.elapsed.as_millis() as u64,
            "Search done"
        );
        if let Some(sink) = &self.sink {
            sink.on_search(&done);
        }
        Ok(page)
    }

    /// Point lookup by uid, unfiltered. `None` when absent.
    pub async fn get_by_uid(&self, alias: &str, uid: &str) -> Result<Option<Hit>, SearchError> {
        match self.client.get(alias, uid).await {
            Ok(hit) => Ok(Some(hit)),
            Err(SearchError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Number of documents the principal can see.
    pub async fn count(&self, alias: &str, principal: &Principal) -> Result<u64, SearchError> {
        let query = self.security.build(principal);
        self.client.count(alias, query.as_ref()).await
    }

    /// Hits for `{uuid: uid}` visible to the principal.
    pub async fn find_uid(
        &self,
        alias: &str,
        principal: &Principal,
        uid: &str,
    ) -> Result<SearchPage, SearchError> {
        let body = json!({ "query": { "term": { UID_FIELD: uid } } });
        self.search_body(alias, principal, &body).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::client::BulkOp;
    use crate::memory::InMemoryBackend;
    use crate::query::DefaultQueryParser;
    use crate::security::{AccessFieldsBuilder, UnrestrictedBuilder};

    #[derive(Default)]
    struct Recorder {
        searches: Mutex<Vec<SearchDone>>,
    }

    impl EventSink for Recorder {
        fn on_search(&self, done: &SearchDone) {
            self.searches.lock().unwrap().push(done.clone());
        }
    }

    async fn seeded_backend() -> Arc<InMemoryBackend> {
        let backend = Arc::new(InMemoryBackend::new());
        backend.create_index("c_1", None, None).await.unwrap();
        backend.alias_swap("c", None, "c_1").await.unwrap();
        let docs = [
            ("a", json!({"uuid": "a", "depth": 1, "type_name": "Folder", "access_users": ["root"]})),
            ("b", json!({"uuid": "b", "depth": 2, "type_name": "Item", "access_users": ["bob"]})),
            ("c", json!({"uuid": "c", "depth": 12, "type_name": "Item", "access_roles": ["guillotina.Reader"]})),
        ];
        let ops: Vec<BulkOp> = docs
            .into_iter()
            .map(|(id, doc)| BulkOp::Index { index: "c".into(), id: id.into(), doc })
            .collect();
        backend.bulk(&ops, true).await.unwrap();
        backend
    }

    #[tokio::test]
    async fn test_security_filter_applied() {
        let backend = seeded_backend().await;
        let recorder = Arc::new(Recorder::default());
        let searcher = CatalogSearcher::new(backend, Arc::new(DefaultQueryParser), Arc::new(AccessFieldsBuilder))
            .with_sink(recorder.clone());

        let bob = Principal::new("bob").with_roles(vec!["guillotina.Reader".into()]);
        let mut params = Map::new();
        params.insert("depth__lte".into(), json!(10));
        let page = searcher.search("c", &bob, &params).await.unwrap();
        assert_eq!(page.ids(), vec!["b"]);

        let searches = recorder.searches.lock().unwrap();
        assert_eq!(searches.len(), 1);
        assert_eq!(searches[0].total, 1);
    }

    #[tokio::test]
    async fn test_unrestricted_count_and_lookup() {
        let backend = seeded_backend().await;
        let searcher = CatalogSearcher::new(backend, Arc::new(DefaultQueryParser), Arc::new(UnrestrictedBuilder));
        let anyone = Principal::new("anonymous");

        assert_eq!(searcher.count("c", &anyone).await.unwrap(), 3);
        assert_eq!(searcher.find_uid("c", &anyone, "c").await.unwrap().total, 1);
        assert!(searcher.get_by_uid("c", "zzz").await.unwrap().is_none());
        assert!(searcher.get_by_uid("c", "a").await.unwrap().is_some());
    }
}
