//! Mapping registry.
//!
//! Folds the index fields of every registered content type into a single
//! backend mapping and diffs mappings at field granularity.

use std::collections::{BTreeMap, BTreeSet};

use catalog_types::{CatalogType, ContentSchema, FieldMapping, IndexField, BASE_SCHEMA_NAME};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::SearchError;

/// Analyzer installed by the default index settings for `path` fields.
pub const PATH_ANALYZER: &str = "path_analyzer";

/// Backend type for a catalog type.
pub fn backend_type(catalog_type: CatalogType) -> &'static str {
    match catalog_type {
        CatalogType::Text | CatalogType::Searchabletext | CatalogType::Path => "text",
        CatalogType::Keyword => "keyword",
        CatalogType::Int => "integer",
        CatalogType::Long => "long",
        CatalogType::Float => "float",
        CatalogType::Date => "date",
        CatalogType::Boolean => "boolean",
        CatalogType::Binary => "binary",
        CatalogType::Nested => "nested",
        CatalogType::Object => "object",
        CatalogType::Completion => "completion",
    }
}

/// Resolve the backend descriptor of one field.
///
/// An explicit `field_mapping` wins outright; otherwise the catalog type
/// decides and analyzer, normalizer, store and multifields are layered on.
pub fn field_descriptor(field: &IndexField) -> FieldMapping {
    if let Some(mapping) = &field.field_mapping {
        return mapping.clone();
    }

    let mut mapping = FieldMapping::of_type(backend_type(field.catalog_type));
    if field.catalog_type == CatalogType::Path {
        mapping = mapping.with_analyzer(PATH_ANALYZER);
    }
    if let Some(analyzer) = &field.analyzer {
        mapping.analyzer = Some(analyzer.clone());
    }
    if let Some(normalizer) = &field.normalizer {
        mapping.normalizer = Some(normalizer.clone());
    }
    if field.store.is_some() {
        mapping.store = field.store;
    }
    if !field.multifields.is_empty() {
        mapping.fields = Some(field.multifields.clone());
    }
    mapping
}

/// A computed document mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    pub properties: BTreeMap<String, FieldMapping>,
}

impl Mapping {
    /// Backend form: `{"properties": {...}, "dynamic": false}`
    pub fn to_value(&self) -> Value {
        json!({
            "properties": self.properties,
            "dynamic": false,
        })
    }

    pub fn field_names(&self) -> impl Iterator<Item = &String> {
        self.properties.keys()
    }

    /// Field count per backend type.
    pub fn type_histogram(&self) -> BTreeMap<String, usize> {
        let mut histogram = BTreeMap::new();
        for mapping in self.properties.values() {
            *histogram.entry(mapping.type_name().to_string()).or_insert(0) += 1;
        }
        histogram
    }

    /// Fields whose backend type is `type_name`.
    pub fn fields_of_type(&self, type_name: &str) -> BTreeMap<String, FieldMapping> {
        self.properties
            .iter()
            .filter(|(_, m)| m.type_name() == type_name)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

fn describe(mapping: &FieldMapping) -> String {
    serde_json::to_string(mapping).unwrap_or_else(|_| format!("{:?}", mapping))
}

/// Compute the mapping contributed by `schemas` plus the base schema.
///
/// The same field declared twice must resolve to equal descriptors, else
/// [`SearchError::MappingConflict`].
pub fn compute_mapping(schemas: &[ContentSchema]) -> Result<Mapping, SearchError> {
    let base = ContentSchema::base();
    let mut properties: BTreeMap<String, FieldMapping> = BTreeMap::new();

    let all = std::iter::once(&base).chain(schemas.iter().filter(|s| s.type_name != BASE_SCHEMA_NAME));
    for schema in all {
        for field in &schema.index_fields {
            let descriptor = field_descriptor(field);
            match properties.get(&field.name) {
                Some(existing) if *existing != descriptor => {
                    return Err(SearchError::MappingConflict {
                        field: field.name.clone(),
                        first: describe(existing),
                        second: describe(&descriptor),
                    });
                }
                Some(_) => {}
                None => {
                    properties.insert(field.name.clone(), descriptor);
                }
            }
        }
    }

    debug!(fields = properties.len(), schemas = schemas.len(), "Computed mapping");
    Ok(Mapping { properties })
}

/// Fields present only in `new` or whose descriptor changed.
///
/// Both arguments are backend mappings (`{"properties": ...}`); nested
/// properties descend and are reported with dotted names.
pub fn field_diff(old: &Value, new: &Value) -> BTreeSet<String> {
    let mut diff = BTreeSet::new();
    diff_properties(
        old.get("properties").and_then(Value::as_object),
        new.get("properties").and_then(Value::as_object),
        "",
        &mut diff,
    );
    diff
}

fn without_properties(descriptor: &Value) -> Value {
    match descriptor {
        Value::Object(map) => {
            let rest: Map<String, Value> = map
                .iter()
                .filter(|(k, _)| k.as_str() != "properties")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(rest)
        }
        other => other.clone(),
    }
}

fn diff_properties(
    old: Option<&Map<String, Value>>,
    new: Option<&Map<String, Value>>,
    prefix: &str,
    diff: &mut BTreeSet<String>,
) {
    let Some(new) = new else {
        return;
    };
    for (name, new_desc) in new {
        let dotted = format!("{}{}", prefix, name);
        let Some(old_desc) = old.and_then(|o| o.get(name)) else {
            diff.insert(dotted);
            continue;
        };
        let new_props = new_desc.get("properties").and_then(Value::as_object);
        let old_props = old_desc.get("properties").and_then(Value::as_object);
        if new_props.is_some() || old_props.is_some() {
            if without_properties(old_desc) != without_properties(new_desc) {
                diff.insert(dotted.clone());
            }
            diff_properties(old_props, new_props, &format!("{}.", dotted), diff);
        } else if old_desc != new_desc {
            diff.insert(dotted);
        }
    }
}

/// Top-level document fields touched by a diff (`a.b` -> `a`).
pub fn top_level_fields(diff: &BTreeSet<String>) -> BTreeSet<String> {
    diff.iter()
        .map(|f| f.split('.').next().unwrap_or(f).to_string())
        .collect()
}

/// Registered content types, resolved once at startup.
#[derive(Debug, Clone, Default)]
pub struct MappingRegistry {
    schemas: Vec<ContentSchema>,
}

impl MappingRegistry {
    pub fn new(schemas: Vec<ContentSchema>) -> Self {
        Self { schemas }
    }

    pub fn schemas(&self) -> &[ContentSchema] {
        &self.schemas
    }

    /// Schema registered for `type_name`.
    pub fn schema(&self, type_name: &str) -> Option<&ContentSchema> {
        self.schemas.iter().find(|s| s.type_name == type_name)
    }

    /// Content types that own a private sub-index.
    pub fn sub_index_types(&self) -> impl Iterator<Item = &ContentSchema> {
        self.schemas.iter().filter(|s| s.sub_index)
    }

    /// Mapping of every registered schema.
    pub fn compute_mapping(&self) -> Result<Mapping, SearchError> {
        compute_mapping(&self.schemas)
    }

    /// Mapping restricted to the named schemas (the base is always included).
    pub fn compute_mapping_for(&self, type_names: &[&str]) -> Result<Mapping, SearchError> {
        let selected: Vec<ContentSchema> = self
            .schemas
            .iter()
            .filter(|s| type_names.contains(&s.type_name.as_str()))
            .cloned()
            .collect();
        compute_mapping(&selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_types::CatalogType;

    fn schema_with(type_name: &str, field: &str, catalog_type: CatalogType) -> ContentSchema {
        ContentSchema::new(type_name).with_field(IndexField::new(field, catalog_type))
    }

    #[test]
    fn test_base_fields_always_present() {
        let mapping = compute_mapping(&[]).unwrap();
        assert!(mapping.properties.contains_key("uuid"));
        assert_eq!(
            mapping.properties["path"],
            FieldMapping::of_type("text").with_analyzer(PATH_ANALYZER)
        );
        assert_eq!(mapping.properties["depth"].type_name(), "integer");
        assert_eq!(mapping.to_value()["dynamic"], false);
    }

    #[test]
    fn test_conflicting_descriptors_fail() {
        let a = schema_with("A", "item", CatalogType::Int);
        let b = schema_with("B", "item", CatalogType::Float);
        let err = compute_mapping(&[a, b]).unwrap_err();
        match err {
            SearchError::MappingConflict { field, .. } => assert_eq!(field, "item"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_equal_descriptors_are_idempotent() {
        let a = schema_with("A", "item", CatalogType::Float);
        let b = schema_with("B", "item", CatalogType::Float);
        let mapping = compute_mapping(&[a, b]).unwrap();
        assert_eq!(mapping.properties["item"].type_name(), "float");
    }

    #[test]
    fn test_explicit_field_mapping_wins() {
        let field = IndexField::new("body", CatalogType::Text)
            .with_analyzer("standard")
            .with_field_mapping(FieldMapping::of_type("keyword"));
        assert_eq!(field_descriptor(&field), FieldMapping::of_type("keyword"));
    }

    #[test]
    fn test_multifields_and_store_layered() {
        let field = IndexField::new("title", CatalogType::Text)
            .with_store(true)
            .with_multifield("raw", FieldMapping::of_type("keyword"));
        let descriptor = field_descriptor(&field);
        assert_eq!(descriptor.store, Some(true));
        assert_eq!(descriptor.fields.unwrap()["raw"].type_name(), "keyword");
    }

    #[test]
    fn test_diff_empty_for_unchanged_schemas() {
        let registry = MappingRegistry::new(vec![schema_with("Item", "item", CatalogType::Float)]);
        let first = registry.compute_mapping().unwrap().to_value();
        let second = registry.compute_mapping().unwrap().to_value();
        assert!(field_diff(&first, &second).is_empty());
    }

    #[test]
    fn test_diff_reports_new_and_changed_fields() {
        let old = json!({"properties": {
            "title": {"type": "text"},
            "item": {"type": "integer"},
            "gone": {"type": "keyword"}
        }});
        let new = json!({"properties": {
            "title": {"type": "text"},
            "item": {"type": "float"},
            "added": {"type": "keyword"}
        }});
        let diff = field_diff(&old, &new);
        assert_eq!(
            diff.into_iter().collect::<Vec<_>>(),
            vec!["added".to_string(), "item".to_string()]
        );
    }

    #[test]
    fn test_diff_descends_into_properties() {
        let old = json!({"properties": {"meta": {"properties": {"a": {"type": "keyword"}}}}});
        let new = json!({"properties": {"meta": {"properties": {
            "a": {"type": "keyword"},
            "b": {"type": "long"}
        }}}});
        let diff = field_diff(&old, &new);
        assert_eq!(diff.iter().collect::<Vec<_>>(), vec!["meta.b"]);
        assert_eq!(
            top_level_fields(&diff).into_iter().collect::<Vec<_>>(),
            vec!["meta".to_string()]
        );
    }

    #[test]
    fn test_type_histogram() {
        let registry = MappingRegistry::new(vec![schema_with("Item", "item", CatalogType::Float)]);
        let mapping = registry.compute_mapping().unwrap();
        let histogram = mapping.type_histogram();
        assert_eq!(histogram["float"], 1);
        assert!(histogram["keyword"] >= 5);
        assert_eq!(mapping.fields_of_type("float").len(), 1);
    }
}
