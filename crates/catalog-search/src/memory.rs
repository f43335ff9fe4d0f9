//! Process-local search backend.
//!
//! Mirrors the backend semantics the engine relies on: aliases resolve to one
//! physical index, indices created with `dynamic: false` reject documents
//! carrying unmapped fields, bulk reports per-item failures and scrolls page
//! through a frozen result set. State is lost when the value is dropped.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::client::{
    BulkItemResult, BulkOp, BulkResponse, ByQueryResponse, Hit, SearchClient, SearchPage,
    SearchRequest,
};
use crate::error::SearchError;
use crate::query::{compare_values, field_values, matches, sort_keys};
use crate::settings::merge_settings;

const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Default)]
struct MemIndex {
    mapping: Value,
    settings: Value,
    docs: BTreeMap<String, Value>,
    closed: bool,
}

impl MemIndex {
    fn is_strict(&self) -> bool {
        match self.mapping.get("dynamic") {
            Some(Value::Bool(dynamic)) => !dynamic,
            Some(Value::String(s)) => s == "false" || s == "strict",
            _ => false,
        }
    }

    /// Top-level fields of `doc` the mapping does not declare.
    fn unmapped_fields(&self, doc: &Value) -> Vec<String> {
        if !self.is_strict() {
            return Vec::new();
        }
        let properties = self.mapping.get("properties").and_then(Value::as_object);
        match doc.as_object() {
            Some(fields) => fields
                .keys()
                .filter(|k| properties.map_or(true, |p| !p.contains_key(*k)))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    fn strip_unmapped(&self, doc: &Value) -> Value {
        let unmapped = self.unmapped_fields(doc);
        match doc {
            Value::Object(map) if !unmapped.is_empty() => Value::Object(
                map.iter()
                    .filter(|(k, _)| !unmapped.contains(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

#[derive(Debug)]
struct ScrollCursor {
    hits: VecDeque<Hit>,
    size: usize,
    total: u64,
}

#[derive(Debug, Default)]
struct State {
    indices: BTreeMap<String, MemIndex>,
    /// alias -> physical index
    aliases: BTreeMap<String, String>,
    scrolls: HashMap<String, ScrollCursor>,
    next_scroll: u64,
    /// Bulk calls still to fail with a transport error
    bulk_failures: u32,
}

fn not_found_index(name: &str) -> SearchError {
    SearchError::Request {
        status: 404,
        reason: format!("index_not_found_exception: no such index [{}]", name),
    }
}

impl State {
    fn resolve(&self, name: &str) -> Result<String, SearchError> {
        if self.indices.contains_key(name) {
            return Ok(name.to_string());
        }
        self.aliases
            .get(name)
            .cloned()
            .ok_or_else(|| not_found_index(name))
    }

    fn open_index(&self, name: &str) -> Result<(String, &MemIndex), SearchError> {
        let physical = self.resolve(name)?;
        let index = self
            .indices
            .get(&physical)
            .ok_or_else(|| not_found_index(name))?;
        if index.closed {
            return Err(SearchError::Request {
                status: 400,
                reason: format!("index_closed_exception: closed [{}]", physical),
            });
        }
        Ok((physical, index))
    }

    fn open_index_mut(&mut self, name: &str) -> Result<(String, &mut MemIndex), SearchError> {
        let physical = self.resolve(name)?;
        let index = self
            .indices
            .get_mut(&physical)
            .ok_or_else(|| not_found_index(name))?;
        if index.closed {
            return Err(SearchError::Request {
                status: 400,
                reason: format!("index_closed_exception: closed [{}]", physical),
            });
        }
        Ok((physical, index))
    }

    fn apply(&mut self, op: &BulkOp) -> BulkItemResult {
        let action = op.action();
        let physical = match self.resolve(op.index()) {
            Ok(p) => p,
            Err(_) => {
                return BulkItemResult::failed(
                    action,
                    op.index(),
                    op.id(),
                    404,
                    format!("index_not_found_exception: no such index [{}]", op.index()),
                )
            }
        };
        let Some(index) = self.indices.get_mut(&physical) else {
            return BulkItemResult::failed(action, &physical, op.id(), 404, "index_not_found_exception");
        };
        if index.closed {
            return BulkItemResult::failed(action, &physical, op.id(), 400, "index_closed_exception");
        }
        let id = op.id();

        let reject_unmapped = |index: &MemIndex, doc: &Value| {
            let unmapped = index.unmapped_fields(doc);
            if unmapped.is_empty() {
                None
            } else {
                Some(BulkItemResult::failed(
                    action,
                    &physical,
                    id,
                    400,
                    format!(
                        "strict_dynamic_mapping_exception: mapping set to strict, dynamic introduction of [{}] is not allowed",
                        unmapped.join(", ")
                    ),
                ))
            }
        };

        match op {
            BulkOp::Index { doc, .. } => {
                if let Some(rejected) = reject_unmapped(&*index, doc) {
                    return rejected;
                }
                let status = if index.docs.insert(id.to_string(), doc.clone()).is_some() { 200 } else { 201 };
                BulkItemResult::ok(action, &physical, id, status)
            }
            BulkOp::Create { doc, .. } => {
                if index.docs.contains_key(id) {
                    return BulkItemResult::failed(
                        action,
                        &physical,
                        id,
                        409,
                        format!("version_conflict_engine_exception: [{}] document already exists", id),
                    );
                }
                if let Some(rejected) = reject_unmapped(&*index, doc) {
                    return rejected;
                }
                index.docs.insert(id.to_string(), doc.clone());
                BulkItemResult::ok(action, &physical, id, 201)
            }
            BulkOp::Update { doc, doc_as_upsert, .. } => {
                if let Some(rejected) = reject_unmapped(&*index, doc) {
                    return rejected;
                }
                match index.docs.get_mut(id) {
                    Some(existing) => {
                        merge_settings(existing, doc);
                        BulkItemResult::ok(action, &physical, id, 200)
                    }
                    None if *doc_as_upsert => {
                        index.docs.insert(id.to_string(), doc.clone());
                        BulkItemResult::ok(action, &physical, id, 201)
                    }
                    None => BulkItemResult::failed(
                        action,
                        &physical,
                        id,
                        404,
                        format!("document_missing_exception: [_doc][{}]: document missing", id),
                    ),
                }
            }
            BulkOp::Delete { .. } => {
                let status = if index.docs.remove(id).is_some() { 200 } else { 404 };
                BulkItemResult::ok(action, &physical, id, status)
            }
        }
    }
}

/// Ordering of `(id, doc)` pairs by the request's sort keys, then by id.
fn sort_hits(hits: &mut [(String, Value)], sort: Option<&Value>) {
    let keys = sort.map(sort_keys).unwrap_or_default();
    hits.sort_by(|(a_id, a), (b_id, b)| {
        for (field, desc) in &keys {
            let av = field_values(a_id, a, field).into_iter().next();
            let bv = field_values(b_id, b, field).into_iter().next();
            let ord = match (av, bv) {
                (Some(x), Some(y)) => compare_values(&x, &y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            let ord = if *desc { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a_id.cmp(b_id)
    });
}

fn filter_source(doc: &Value, source: Option<&Value>) -> Option<Value> {
    match source {
        Some(Value::Bool(false)) => None,
        Some(Value::Array(fields)) => {
            let mut out = Map::new();
            for field in fields.iter().filter_map(Value::as_str) {
                if let Some(v) = doc.get(field) {
                    out.insert(field.to_string(), v.clone());
                }
            }
            Some(Value::Object(out))
        }
        _ => Some(doc.clone()),
    }
}

/// In-memory implementation of [`SearchClient`].
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, SearchError> {
        self.state
            .lock()
            .map_err(|e| SearchError::Transport(format!("backend state poisoned: {}", e)))
    }

    /// Names of all physical indices.
    pub fn index_names(&self) -> Vec<String> {
        self.state()
            .map(|s| s.indices.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Document ids stored in `name` (index or alias), sorted.
    pub fn doc_ids(&self, name: &str) -> Vec<String> {
        self.state()
            .ok()
            .and_then(|s| {
                let physical = s.resolve(name).ok()?;
                s.indices.get(&physical).map(|i| i.docs.keys().cloned().collect())
            })
            .unwrap_or_default()
    }

    /// Make the next `count` bulk calls fail with a transport error.
    pub fn fail_next_bulks(&self, count: u32) {
        if let Ok(mut state) = self.state() {
            state.bulk_failures = count;
        }
    }

    /// Number of open scroll cursors.
    pub fn open_scrolls(&self) -> usize {
        self.state().map(|s| s.scrolls.len()).unwrap_or_default()
    }

    fn matching(
        index: &MemIndex,
        query: Option<&Value>,
    ) -> Result<Vec<(String, Value)>, SearchError> {
        let match_all = json!({ "match_all": {} });
        let query = query.unwrap_or(&match_all);
        let mut hits = Vec::new();
        for (id, doc) in &index.docs {
            if matches(query, id, doc)? {
                hits.push((id.clone(), doc.clone()));
            }
        }
        Ok(hits)
    }
}

#[async_trait]
impl SearchClient for InMemoryBackend {
    async fn create_index(
        &self,
        name: &str,
        mapping: Option<&Value>,
        settings: Option<&Value>,
    ) -> Result<(), SearchError> {
        let mut state = self.state()?;
        if state.indices.contains_key(name) {
            return Err(SearchError::Request {
                status: 400,
                reason: format!("resource_already_exists_exception: index [{}] already exists", name),
            });
        }
        if state.aliases.contains_key(name) {
            return Err(SearchError::Request {
                status: 400,
                reason: format!("invalid_index_name_exception: [{}] is an alias", name),
            });
        }
        state.indices.insert(
            name.to_string(),
            MemIndex {
                mapping: mapping.cloned().unwrap_or_else(|| json!({})),
                settings: settings.cloned().unwrap_or_else(|| json!({})),
                ..Default::default()
            },
        );
        debug!(index = name, "Created index");
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<(), SearchError> {
        let mut state = self.state()?;
        if state.indices.remove(name).is_none() {
            return Err(not_found_index(name));
        }
        state.aliases.retain(|_, target| target != name);
        debug!(index = name, "Deleted index");
        Ok(())
    }

    async fn index_exists(&self, name: &str) -> Result<bool, SearchError> {
        let state = self.state()?;
        Ok(state.resolve(name).is_ok())
    }

    async fn close_index(&self, name: &str) -> Result<(), SearchError> {
        let mut state = self.state()?;
        let physical = state.resolve(name)?;
        if let Some(index) = state.indices.get_mut(&physical) {
            index.closed = true;
        }
        Ok(())
    }

    async fn open_index(&self, name: &str) -> Result<(), SearchError> {
        let mut state = self.state()?;
        let physical = state.resolve(name)?;
        if let Some(index) = state.indices.get_mut(&physical) {
            index.closed = false;
        }
        Ok(())
    }

    async fn put_mapping(&self, name: &str, mapping: &Value) -> Result<(), SearchError> {
        let mut state = self.state()?;
        let (_, index) = state.open_index_mut(name)?;

        let existing = index.mapping.get("properties").and_then(Value::as_object);
        if let (Some(existing), Some(new)) = (existing, mapping.get("properties").and_then(Value::as_object)) {
            for (field, descriptor) in new {
                if let Some(current) = existing.get(field) {
                    if current.get("type") != descriptor.get("type") {
                        return Err(SearchError::Request {
                            status: 400,
                            reason: format!(
                                "illegal_argument_exception: mapper [{}] cannot be changed from type [{}] to [{}]",
                                field,
                                current.get("type").and_then(Value::as_str).unwrap_or("object"),
                                descriptor.get("type").and_then(Value::as_str).unwrap_or("object"),
                            ),
                        });
                    }
                }
            }
        }
        merge_settings(&mut index.mapping, mapping);
        Ok(())
    }

    async fn get_mapping(&self, name: &str) -> Result<Value, SearchError> {
        let state = self.state()?;
        let physical = state.resolve(name)?;
        Ok(state
            .indices
            .get(&physical)
            .map(|i| i.mapping.clone())
            .unwrap_or_else(|| json!({})))
    }

    async fn put_settings(&self, name: &str, settings: &Value) -> Result<(), SearchError> {
        let mut state = self.state()?;
        let physical = state.resolve(name)?;
        if let Some(index) = state.indices.get_mut(&physical) {
            merge_settings(&mut index.settings, settings);
        }
        Ok(())
    }

    async fn get_settings(&self, name: &str) -> Result<Value, SearchError> {
        let state = self.state()?;
        let physical = state.resolve(name)?;
        let mut settings = state
            .indices
            .get(&physical)
            .map(|i| i.settings.clone())
            .unwrap_or_else(|| json!({}));
        if let Value::Object(map) = &mut settings {
            map.insert("provided_name".to_string(), json!(physical));
        }
        Ok(settings)
    }

    async fn alias_swap(&self, alias: &str, from: Option<&str>, to: &str) -> Result<(), SearchError> {
        let mut state = self.state()?;
        if !state.indices.contains_key(to) {
            return Err(not_found_index(to));
        }
        if state.indices.contains_key(alias) {
            return Err(SearchError::Request {
                status: 400,
                reason: format!("invalid_alias_name_exception: an index exists with the same name as the alias [{}]", alias),
            });
        }
        if let Some(from) = from {
            if state.aliases.get(alias).map(String::as_str) != Some(from) {
                return Err(SearchError::Request {
                    status: 404,
                    reason: format!("aliases_not_found_exception: [{}] missing on [{}]", alias, from),
                });
            }
        }
        state.aliases.insert(alias.to_string(), to.to_string());
        debug!(alias, from = ?from, to, "Swapped alias");
        Ok(())
    }

    async fn get_alias(&self, alias: &str) -> Result<Vec<String>, SearchError> {
        let state = self.state()?;
        Ok(state.aliases.get(alias).cloned().into_iter().collect())
    }

    async fn list_indexes(&self, prefix: &str) -> Result<Vec<String>, SearchError> {
        let state = self.state()?;
        Ok(state
            .indices
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn bulk(&self, ops: &[BulkOp], _refresh: bool) -> Result<BulkResponse, SearchError> {
        let mut state = self.state()?;
        if state.bulk_failures > 0 {
            state.bulk_failures -= 1;
            return Err(SearchError::Transport("connection reset by peer".to_string()));
        }
        let items = ops.iter().map(|op| state.apply(op)).collect();
        Ok(BulkResponse { items })
    }

    async fn search(
        &self,
        index: &str,
        request: &SearchRequest,
        scroll: Option<Duration>,
    ) -> Result<SearchPage, SearchError> {
        let mut state = self.state()?;
        let (physical, mem_index) = state.open_index(index)?;
        let mut matched = Self::matching(mem_index, request.query.as_ref())?;
        sort_hits(&mut matched, request.sort.as_ref());

        let total = matched.len() as u64;
        let size = request.size.unwrap_or(DEFAULT_PAGE_SIZE);
        let from = if scroll.is_some() { 0 } else { request.from.unwrap_or(0) };
        let mut hits: VecDeque<Hit> = matched
            .into_iter()
            .skip(from)
            .map(|(id, doc)| Hit {
                index: physical.clone(),
                id,
                source: filter_source(&doc, request.source.as_ref()),
            })
            .collect();

        let page: Vec<Hit> = hits.drain(..size.min(hits.len())).collect();
        let scroll_id = if scroll.is_some() {
            state.next_scroll += 1;
            let scroll_id = format!("scroll-{}", state.next_scroll);
            state
                .scrolls
                .insert(scroll_id.clone(), ScrollCursor { hits, size, total });
            Some(scroll_id)
        } else {
            None
        };

        Ok(SearchPage {
            total,
            hits: page,
            scroll_id,
        })
    }

    async fn scroll(&self, scroll_id: &str, _ttl: Duration) -> Result<SearchPage, SearchError> {
        let mut state = self.state()?;
        let cursor = state.scrolls.get_mut(scroll_id).ok_or_else(|| SearchError::Request {
            status: 404,
            reason: format!("search_context_missing_exception: No search context found for id [{}]", scroll_id),
        })?;
        let take = cursor.size.min(cursor.hits.len());
        let hits = cursor.hits.drain(..take).collect();
        Ok(SearchPage {
            total: cursor.total,
            hits,
            scroll_id: Some(scroll_id.to_string()),
        })
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), SearchError> {
        let mut state = self.state()?;
        state.scrolls.remove(scroll_id);
        Ok(())
    }

    async fn delete_by_query(&self, index: &str, query: &Value) -> Result<ByQueryResponse, SearchError> {
        let mut state = self.state()?;
        let (_, mem_index) = state.open_index_mut(index)?;
        let matched = Self::matching(mem_index, Some(query))?;
        for (id, _) in &matched {
            mem_index.docs.remove(id);
        }
        Ok(ByQueryResponse {
            total: matched.len() as u64,
            deleted: matched.len() as u64,
            ..Default::default()
        })
    }

    /// Scripts are not evaluated; matching documents are counted as updated.
    async fn update_by_query(
        &self,
        index: &str,
        query: &Value,
        _script: Option<&Value>,
    ) -> Result<ByQueryResponse, SearchError> {
        let state = self.state()?;
        let (_, mem_index) = state.open_index(index)?;
        let matched = Self::matching(mem_index, Some(query))?;
        Ok(ByQueryResponse {
            total: matched.len() as u64,
            updated: matched.len() as u64,
            ..Default::default()
        })
    }

    async fn get(&self, index: &str, id: &str) -> Result<Hit, SearchError> {
        let state = self.state()?;
        let (physical, mem_index) = state.open_index(index)?;
        mem_index
            .docs
            .get(id)
            .map(|doc| Hit {
                index: physical.clone(),
                id: id.to_string(),
                source: Some(doc.clone()),
            })
            .ok_or_else(|| SearchError::NotFound(format!("{}/{}", index, id)))
    }

    async fn count(&self, index: &str, query: Option<&Value>) -> Result<u64, SearchError> {
        let state = self.state()?;
        let (_, mem_index) = state.open_index(index)?;
        Ok(Self::matching(mem_index, query)?.len() as u64)
    }

    async fn refresh(&self, index: &str) -> Result<(), SearchError> {
        let state = self.state()?;
        state.open_index(index).map(|_| ())
    }

    async fn reindex(&self, source: &str, dest: &str) -> Result<ByQueryResponse, SearchError> {
        let mut state = self.state()?;
        let (_, src) = state.open_index(source)?;
        let docs: Vec<(String, Value)> = src.docs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let (_, dst) = state.open_index_mut(dest)?;

        let mut response = ByQueryResponse {
            total: docs.len() as u64,
            ..Default::default()
        };
        for (id, doc) in docs {
            if dst.docs.contains_key(&id) {
                response.version_conflicts += 1;
                continue;
            }
            // Fields the destination mapping dropped are not copied
            let doc = dst.strip_unmapped(&doc);
            dst.docs.insert(id, doc);
            response.created += 1;
        }
        Ok(response)
    }
}
