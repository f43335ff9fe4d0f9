//! Query helpers.
//!
//! - [`QueryParser`] turns flat catalog search parameters
//!   (`depth__lte=10`, `type_name=[..]`) into a backend request body.
//! - [`matches`] evaluates the subset of the backend query DSL the engine
//!   and the default parser emit; the in-memory backend runs on it.

use std::cmp::Ordering;

use serde_json::{json, Map, Value};

use crate::error::SearchError;

/// Parameter suffixes understood by [`DefaultQueryParser`].
const OPERATORS: &[&str] = &["eq", "not", "gt", "gte", "lt", "lte", "in", "starts", "wildcard"];

/// Translates flat search parameters into a request body.
pub trait QueryParser: Send + Sync {
    fn parse(&self, params: &Map<String, Value>) -> Result<Value, SearchError>;
}

/// `field__op` parameter syntax.
///
/// Lists become `terms`, range operators become one `range` clause each,
/// `__not` lands in `must_not`. `_size`, `_from`, `_sort_asc`, `_sort_des`
/// and `_metadata` control paging, ordering and returned fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultQueryParser;

fn as_usize(key: &str, value: &Value) -> Result<usize, SearchError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    };
    parsed.map(|v| v as usize).ok_or_else(|| SearchError::Request {
        status: 400,
        reason: format!("{} must be a non-negative integer", key),
    })
}

fn equality_clause(field: &str, value: &Value) -> Value {
    match value {
        Value::Array(values) => json!({ "terms": { field: values } }),
        other => json!({ "term": { field: other } }),
    }
}

impl QueryParser for DefaultQueryParser {
    fn parse(&self, params: &Map<String, Value>) -> Result<Value, SearchError> {
        let mut must = Vec::new();
        let mut must_not = Vec::new();
        let mut body = Map::new();

        for (key, value) in params {
            match key.as_str() {
                "_size" => {
                    body.insert("size".to_string(), json!(as_usize(key, value)?));
                    continue;
                }
                "_from" => {
                    body.insert("from".to_string(), json!(as_usize(key, value)?));
                    continue;
                }
                "_sort_asc" | "_sort_des" => {
                    let order = if key == "_sort_asc" { "asc" } else { "desc" };
                    let field = value.as_str().unwrap_or_default();
                    body.insert("sort".to_string(), json!([{ field: { "order": order } }]));
                    continue;
                }
                "_metadata" => {
                    let fields: Vec<&str> = value
                        .as_str()
                        .map(|s| s.split(',').map(str::trim).collect())
                        .unwrap_or_default();
                    body.insert("_source".to_string(), json!(fields));
                    continue;
                }
                k if k.starts_with('_') => continue,
                _ => {}
            }

            let (field, op) = match key.rsplit_once("__") {
                Some((field, op)) if OPERATORS.contains(&op) => (field, op),
                _ => (key.as_str(), "eq"),
            };

            match op {
                "not" => must_not.push(equality_clause(field, value)),
                "gt" | "gte" | "lt" | "lte" => {
                    must.push(json!({ "range": { field: { op: value } } }));
                }
                "in" => {
                    let values = match value {
                        Value::Array(values) => values.clone(),
                        Value::String(s) => s.split(',').map(|v| json!(v.trim())).collect(),
                        other => vec![other.clone()],
                    };
                    must.push(json!({ "terms": { field: values } }));
                }
                "starts" => must.push(json!({ "prefix": { field: value } })),
                "wildcard" => must.push(json!({ "wildcard": { field: value } })),
                _ => must.push(equality_clause(field, value)),
            }
        }

        let mut bool_query = Map::new();
        bool_query.insert("must".to_string(), Value::Array(must));
        if !must_not.is_empty() {
            bool_query.insert("must_not".to_string(), Value::Array(must_not));
        }
        body.insert("query".to_string(), json!({ "bool": bool_query }));
        Ok(Value::Object(body))
    }
}

fn unsupported(what: impl std::fmt::Display) -> SearchError {
    SearchError::Request {
        status: 400,
        reason: format!("parsing_exception: unsupported query {}", what),
    }
}

/// All values stored under a dotted `field`, arrays flattened.
pub fn field_values(id: &str, doc: &Value, field: &str) -> Vec<Value> {
    if field == "_id" {
        return vec![Value::String(id.to_string())];
    }
    let mut current = vec![doc];
    for part in field.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => {
                    if let Some(v) = map.get(part) {
                        next.push(v);
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        if let Some(v) = item.get(part) {
                            next.push(v);
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    let mut out = Vec::new();
    for value in current {
        match value {
            Value::Array(items) => out.extend(items.iter().cloned()),
            Value::Null => {}
            other => out.push(other.clone()),
        }
    }
    out
}

/// Compare two scalar values; numbers numerically, strings lexically.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::String(y)) => x.as_f64()?.partial_cmp(&y.parse::<f64>().ok()?),
        (Value::String(x), Value::Number(y)) => x.parse::<f64>().ok()?.partial_cmp(&y.as_f64()?),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b || compare_values(a, b) == Some(Ordering::Equal)
}

fn single_field<'a>(clause: &'a Value, kind: &str) -> Result<(&'a str, &'a Value), SearchError> {
    clause
        .as_object()
        .and_then(|m| m.iter().next())
        .map(|(k, v)| (k.as_str(), v))
        .ok_or_else(|| unsupported(format!("{} without field", kind)))
}

/// `{"field": v}` or `{"field": {"value": v}}`
fn clause_value(value: &Value) -> &Value {
    value.get("value").unwrap_or(value)
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn wildcard_match(pattern: &[char], text: &[char]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some('*'), _) => {
            wildcard_match(&pattern[1..], text) || (!text.is_empty() && wildcard_match(pattern, &text[1..]))
        }
        (Some('?'), Some(_)) => wildcard_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => wildcard_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}

fn clauses(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
        None => Vec::new(),
    }
}

/// Evaluate `query` against the document `doc` with id `id`.
pub fn matches(query: &Value, id: &str, doc: &Value) -> Result<bool, SearchError> {
    let (kind, body) = query
        .as_object()
        .and_then(|m| m.iter().next())
        .ok_or_else(|| unsupported(query))?;

    match kind.as_str() {
        "match_all" => Ok(true),
        "match_none" => Ok(false),
        "ids" => {
            let values = body.get("values").and_then(Value::as_array);
            Ok(values.is_some_and(|vals| vals.iter().any(|v| v.as_str() == Some(id))))
        }
        "term" => {
            let (field, value) = single_field(body, kind)?;
            let expected = clause_value(value);
            Ok(field_values(id, doc, field).iter().any(|v| values_equal(v, expected)))
        }
        "terms" => {
            let (field, value) = single_field(body, kind)?;
            let expected = value.as_array().ok_or_else(|| unsupported("terms without list"))?;
            let actual = field_values(id, doc, field);
            Ok(actual.iter().any(|v| expected.iter().any(|e| values_equal(v, e))))
        }
        "range" => {
            let (field, bounds) = single_field(body, kind)?;
            let bounds = bounds.as_object().ok_or_else(|| unsupported("range bounds"))?;
            Ok(field_values(id, doc, field).iter().any(|v| {
                bounds.iter().all(|(op, bound)| {
                    let ord = compare_values(v, bound);
                    match op.as_str() {
                        "gt" => ord == Some(Ordering::Greater),
                        "gte" => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
                        "lt" => ord == Some(Ordering::Less),
                        "lte" => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
                        // format, time_zone and friends do not filter
                        _ => true,
                    }
                })
            }))
        }
        "prefix" => {
            let (field, value) = single_field(body, kind)?;
            let prefix = clause_value(value).as_str().unwrap_or_default();
            Ok(field_values(id, doc, field)
                .iter()
                .any(|v| v.as_str().is_some_and(|s| s.starts_with(prefix))))
        }
        "wildcard" => {
            let (field, value) = single_field(body, kind)?;
            let pattern: Vec<char> = clause_value(value).as_str().unwrap_or_default().chars().collect();
            Ok(field_values(id, doc, field).iter().any(|v| {
                v.as_str()
                    .is_some_and(|s| wildcard_match(&pattern, &s.chars().collect::<Vec<_>>()))
            }))
        }
        "exists" => {
            let field = body
                .get("field")
                .and_then(Value::as_str)
                .ok_or_else(|| unsupported("exists without field"))?;
            Ok(!field_values(id, doc, field).is_empty())
        }
        "match" => {
            let (field, value) = single_field(body, kind)?;
            let text = clause_value(value);
            let text = value.get("query").unwrap_or(text);
            let wanted = tokens(&text.as_str().map(str::to_string).unwrap_or_else(|| text.to_string()));
            Ok(field_values(id, doc, field).iter().any(|v| {
                let have = tokens(&v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()));
                wanted.iter().any(|w| have.contains(w))
            }))
        }
        "bool" => {
            for clause in clauses(body.get("must")).into_iter().chain(clauses(body.get("filter"))) {
                if !matches(clause, id, doc)? {
                    return Ok(false);
                }
            }
            for clause in clauses(body.get("must_not")) {
                if matches(clause, id, doc)? {
                    return Ok(false);
                }
            }
            let should = clauses(body.get("should"));
            if should.is_empty() {
                return Ok(true);
            }
            let has_required = body.get("must").is_some() || body.get("filter").is_some();
            let minimum = body
                .get("minimum_should_match")
                .and_then(Value::as_u64)
                .unwrap_or(if has_required { 0 } else { 1 });
            let mut matched = 0;
            for clause in should {
                if matches(clause, id, doc)? {
                    matched += 1;
                }
            }
            Ok(matched >= minimum)
        }
        other => Err(unsupported(other)),
    }
}

/// Sort keys of a request: `(field, descending)`. `_doc` and `_score` are dropped.
pub fn sort_keys(sort: &Value) -> Vec<(String, bool)> {
    let items = match sort {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let mut keys = Vec::new();
    for item in items {
        let (field, desc) = match item {
            Value::String(field) => (field.clone(), false),
            Value::Object(map) => match map.iter().next() {
                Some((field, spec)) => {
                    let order = spec.get("order").unwrap_or(spec);
                    (field.clone(), order.as_str() == Some("desc"))
                }
                None => continue,
            },
            _ => continue,
        };
        if field != "_doc" && field != "_score" {
            keys.push((field, desc));
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_parser_builds_ranges_and_terms() {
        let body = DefaultQueryParser
            .parse(&params(json!({
                "modification_date__gte": "2019/10/10",
                "depth__lte": 10,
                "type_name": ["Item", "Folder"]
            })))
            .unwrap();

        let must = body["query"]["bool"]["must"].as_array().unwrap();
        assert_eq!(must.len(), 3);
        assert!(must
            .iter()
            .any(|c| c["range"]["modification_date"]["gte"] == "2019/10/10"));
        assert!(must.iter().any(|c| c["range"]["depth"]["lte"] == 10));
        assert!(must
            .iter()
            .any(|c| c["terms"]["type_name"] == json!(["Item", "Folder"])));
    }

    #[test]
    fn test_parser_paging_and_negation() {
        let body = DefaultQueryParser
            .parse(&params(json!({
                "_size": "5",
                "_from": 10,
                "_sort_des": "modification_date",
                "type_name__not": "Folder",
                "id__starts": "doc-"
            })))
            .unwrap();
        assert_eq!(body["size"], 5);
        assert_eq!(body["from"], 10);
        assert_eq!(body["sort"][0]["modification_date"]["order"], "desc");
        assert_eq!(body["query"]["bool"]["must_not"][0]["term"]["type_name"], "Folder");
        assert_eq!(body["query"]["bool"]["must"][0]["prefix"]["id"], "doc-");
    }

    #[test]
    fn test_parser_rejects_bad_size() {
        assert!(DefaultQueryParser.parse(&params(json!({"_size": "many"}))).is_err());
    }

    #[test]
    fn test_field_name_with_double_underscore_is_kept() {
        let body = DefaultQueryParser
            .parse(&params(json!({"content__index": "x"})))
            .unwrap();
        assert_eq!(body["query"]["bool"]["must"][0]["term"]["content__index"], "x");
    }

    #[test]
    fn test_matches_bool_and_range() {
        let doc = json!({"depth": 3, "type_name": "Item", "path": "/folder/item"});
        let query = json!({"bool": {
            "must": [
                {"range": {"depth": {"lte": 10}}},
                {"terms": {"type_name": ["Item", "Folder"]}},
                {"prefix": {"path": "/folder/"}}
            ],
            "must_not": [{"term": {"type_name": "Folder"}}]
        }});
        assert!(matches(&query, "a", &doc).unwrap());

        let miss = json!({"range": {"depth": {"gt": 3}}});
        assert!(!matches(&miss, "a", &doc).unwrap());
    }

    #[test]
    fn test_matches_ids_exists_and_arrays() {
        let doc = json!({"access_users": ["root", "bob"], "uuid": "a"});
        assert!(matches(&json!({"ids": {"values": ["a", "b"]}}), "a", &doc).unwrap());
        assert!(matches(&json!({"term": {"access_users": "bob"}}), "a", &doc).unwrap());
        assert!(matches(&json!({"exists": {"field": "uuid"}}), "a", &doc).unwrap());
        assert!(!matches(&json!({"exists": {"field": "title"}}), "a", &doc).unwrap());
    }

    #[test]
    fn test_matches_should_minimum() {
        let doc = json!({"access_roles": ["guillotina.Reader"]});
        let query = json!({"bool": {
            "should": [
                {"terms": {"access_users": ["bob"]}},
                {"terms": {"access_roles": ["guillotina.Reader"]}}
            ],
            "minimum_should_match": 1
        }});
        assert!(matches(&query, "x", &doc).unwrap());
    }

    #[test]
    fn test_wildcard_and_match() {
        let doc = json!({"title": "Hello Search World", "id": "doc-12"});
        assert!(matches(&json!({"wildcard": {"id": "doc-*"}}), "x", &doc).unwrap());
        assert!(!matches(&json!({"wildcard": {"id": "doc-?"}}), "x", &doc).unwrap());
        assert!(matches(&json!({"match": {"title": "search"}}), "x", &doc).unwrap());
    }

    #[test]
    fn test_unsupported_query_is_request_error() {
        let err = matches(&json!({"geo_shape": {}}), "x", &json!({})).unwrap_err();
        assert!(matches!(err, SearchError::Request { status: 400, .. }));
    }

    #[test]
    fn test_sort_keys() {
        let keys = sort_keys(&json!(["_doc", {"depth": {"order": "desc"}}, "id"]));
        assert_eq!(keys, vec![("depth".to_string(), true), ("id".to_string(), false)]);
    }
}
