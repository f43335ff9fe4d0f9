//! Catalog-data adapters project stored objects into search documents.
//!
//! Adapters are resolved once at startup into a table keyed by content type.
//! Types without a dedicated adapter use [`SchemaAdapter`], which emits the
//! base fields plus every declared index field found among the attributes.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::{json, Value};

use catalog_search::MappingRegistry;
use catalog_types::{
    ContentSchema, Document, StoredObject, PATH_FIELD, SECURITY_FIELDS, SUB_INDEX_FIELD, UID_FIELD,
};

use crate::error::IndexingError;
use crate::walker::Location;

/// Attributes copied into every document when present.
const BASE_ATTRIBUTES: &[&str] = &[
    "title",
    "creation_date",
    "modification_date",
    "access_users",
    "access_roles",
];

pub trait CatalogDataAdapter: Send + Sync {
    /// Full indexable document of `object`.
    fn document(&self, object: &StoredObject, location: &Location) -> Result<Document, IndexingError>;

    /// Access-control fields only, used by security reindexing.
    fn security_document(
        &self,
        object: &StoredObject,
        location: &Location,
    ) -> Result<Document, IndexingError> {
        let full = self.document(object, location)?;
        Ok(project(&full, SECURITY_FIELDS.iter().copied()))
    }
}

/// Fields every document carries.
pub fn base_document(object: &StoredObject, location: &Location) -> Document {
    let mut doc = Document::new();
    doc.insert(UID_FIELD.to_string(), json!(object.zoid));
    doc.insert("id".to_string(), json!(object.id));
    doc.insert("type_name".to_string(), json!(object.type_name));
    doc.insert(PATH_FIELD.to_string(), json!(location.path));
    doc.insert("depth".to_string(), json!(location.depth));
    doc.insert("tid".to_string(), json!(object.tid));
    if let Some(parent) = &location.parent_uuid {
        doc.insert("parent_uuid".to_string(), json!(parent));
    }
    for name in BASE_ATTRIBUTES {
        if let Some(value) = object.attribute(name) {
            doc.insert(name.to_string(), value.clone());
        }
    }
    doc
}

/// Subset of `doc` restricted to `fields`.
pub fn project<'a>(doc: &Document, fields: impl IntoIterator<Item = &'a str>) -> Document {
    fields
        .into_iter()
        .filter_map(|f| doc.get(f).map(|v| (f.to_string(), v.clone())))
        .collect()
}

/// Default adapter driven by a content type's declared index fields.
#[derive(Debug, Clone, Default)]
pub struct SchemaAdapter {
    fields: BTreeSet<String>,
}

impl SchemaAdapter {
    pub fn for_schema(schema: Option<&ContentSchema>) -> Self {
        Self {
            fields: schema
                .map(|s| s.index_fields.iter().map(|f| f.name.clone()).collect())
                .unwrap_or_default(),
        }
    }
}

impl CatalogDataAdapter for SchemaAdapter {
    fn document(&self, object: &StoredObject, location: &Location) -> Result<Document, IndexingError> {
        let mut doc = base_document(object, location);
        for field in &self.fields {
            match object.attribute(field) {
                Some(Value::Null) | None => {}
                Some(value) => {
                    doc.insert(field.clone(), value.clone());
                }
            }
        }
        Ok(doc)
    }
}

/// Strategy table: content type -> adapter.
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn CatalogDataAdapter>>,
    fallback: Arc<dyn CatalogDataAdapter>,
}

impl AdapterRegistry {
    /// One [`SchemaAdapter`] per registered schema.
    pub fn from_registry(registry: &MappingRegistry) -> Self {
        let adapters = registry
            .schemas()
            .iter()
            .map(|schema| {
                let adapter: Arc<dyn CatalogDataAdapter> = Arc::new(SchemaAdapter::for_schema(Some(schema)));
                (schema.type_name.clone(), adapter)
            })
            .collect();
        Self {
            adapters,
            fallback: Arc::new(SchemaAdapter::default()),
        }
    }

    pub fn with_adapter(mut self, type_name: impl Into<String>, adapter: Arc<dyn CatalogDataAdapter>) -> Self {
        self.adapters.insert(type_name.into(), adapter);
        self
    }

    pub fn resolve(&self, type_name: &str) -> Arc<dyn CatalogDataAdapter> {
        self.adapters
            .get(type_name)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Full document; `content_index` names the object's own sub-index.
    pub fn document(
        &self,
        object: &StoredObject,
        location: &Location,
        content_index: Option<&str>,
    ) -> Result<Document, IndexingError> {
        let mut doc = self.resolve(&object.type_name).document(object, location)?;
        if let Some(index) = content_index {
            doc.insert(SUB_INDEX_FIELD.to_string(), json!(index));
        }
        Ok(doc)
    }

    pub fn security_document(
        &self,
        object: &StoredObject,
        location: &Location,
    ) -> Result<Document, IndexingError> {
        self.resolve(&object.type_name).security_document(object, location)
    }
}
