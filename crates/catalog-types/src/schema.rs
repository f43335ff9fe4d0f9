//! Content-type schemas and backend field descriptors.
//!
//! A content type declares the fields it contributes to the search document.
//! The mapping registry in `catalog-search` folds every declared field into a
//! single backend mapping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Field holding the object's stable uid.
pub const UID_FIELD: &str = "uuid";

/// Field holding the object's slash-separated path inside its container.
pub const PATH_FIELD: &str = "path";

/// Reserved field naming the private index of the owning content node.
pub const SUB_INDEX_FIELD: &str = "content_index";

/// Access-control fields rewritten by a security-only reindex.
pub const SECURITY_FIELDS: &[&str] = &["access_users", "access_roles"];

/// Name of the schema every content type implicitly extends.
pub const BASE_SCHEMA_NAME: &str = "Resource";

/// Catalog-level field type, translated to a backend type by the mapping registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogType {
    Text,
    Searchabletext,
    Keyword,
    Int,
    Long,
    Float,
    Date,
    Boolean,
    Binary,
    Nested,
    Object,
    Completion,
    Path,
}

impl CatalogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogType::Text => "text",
            CatalogType::Searchabletext => "searchabletext",
            CatalogType::Keyword => "keyword",
            CatalogType::Int => "int",
            CatalogType::Long => "long",
            CatalogType::Float => "float",
            CatalogType::Date => "date",
            CatalogType::Boolean => "boolean",
            CatalogType::Binary => "binary",
            CatalogType::Nested => "nested",
            CatalogType::Object => "object",
            CatalogType::Completion => "completion",
            CatalogType::Path => "path",
        }
    }
}

impl std::fmt::Display for CatalogType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend descriptor for a single field.
///
/// Serializes to the backend's mapping syntax, e.g.
/// `{"type": "text", "analyzer": "path_analyzer"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalizer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,

    /// Multi-fields indexed with independent analyzers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, FieldMapping>>,

    /// Sub-properties for `object` and `nested` fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, FieldMapping>>,
}

impl FieldMapping {
    /// Descriptor with only a backend type set.
    pub fn of_type(field_type: impl Into<String>) -> Self {
        Self {
            field_type: Some(field_type.into()),
            ..Default::default()
        }
    }

    pub fn with_analyzer(mut self, analyzer: impl Into<String>) -> Self {
        self.analyzer = Some(analyzer.into());
        self
    }

    /// Backend type name, `object` when omitted (backend default).
    pub fn type_name(&self) -> &str {
        self.field_type.as_deref().unwrap_or("object")
    }
}

/// A field a content type contributes to the search document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexField {
    pub name: String,

    #[serde(rename = "type")]
    pub catalog_type: CatalogType,

    #[serde(default)]
    pub analyzer: Option<String>,

    #[serde(default)]
    pub normalizer: Option<String>,

    #[serde(default)]
    pub store: Option<bool>,

    #[serde(default)]
    pub multifields: BTreeMap<String, FieldMapping>,

    /// Explicit backend descriptor; wins over everything derived from `catalog_type`.
    #[serde(default)]
    pub field_mapping: Option<FieldMapping>,
}

impl IndexField {
    pub fn new(name: impl Into<String>, catalog_type: CatalogType) -> Self {
        Self {
            name: name.into(),
            catalog_type,
            analyzer: None,
            normalizer: None,
            store: None,
            multifields: BTreeMap::new(),
            field_mapping: None,
        }
    }

    pub fn with_field_mapping(mut self, mapping: FieldMapping) -> Self {
        self.field_mapping = Some(mapping);
        self
    }

    pub fn with_analyzer(mut self, analyzer: impl Into<String>) -> Self {
        self.analyzer = Some(analyzer.into());
        self
    }

    pub fn with_store(mut self, store: bool) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_multifield(mut self, name: impl Into<String>, mapping: FieldMapping) -> Self {
        self.multifields.insert(name.into(), mapping);
        self
    }
}

/// Index declaration of one registered content type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSchema {
    pub type_name: String,

    #[serde(default)]
    pub index_fields: Vec<IndexField>,

    /// Objects of this type own a private sub-index.
    #[serde(default)]
    pub sub_index: bool,
}

impl ContentSchema {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            index_fields: Vec::new(),
            sub_index: false,
        }
    }

    pub fn with_field(mut self, field: IndexField) -> Self {
        self.index_fields.push(field);
        self
    }

    pub fn with_sub_index(mut self, sub_index: bool) -> Self {
        self.sub_index = sub_index;
        self
    }

    /// Fields every document carries regardless of its content type.
    pub fn base() -> Self {
        Self::new(BASE_SCHEMA_NAME)
            .with_field(IndexField::new(UID_FIELD, CatalogType::Keyword))
            .with_field(IndexField::new("id", CatalogType::Keyword))
            .with_field(IndexField::new("type_name", CatalogType::Keyword))
            .with_field(IndexField::new("title", CatalogType::Text))
            .with_field(IndexField::new(PATH_FIELD, CatalogType::Path))
            .with_field(IndexField::new("depth", CatalogType::Int))
            .with_field(IndexField::new("parent_uuid", CatalogType::Keyword))
            .with_field(IndexField::new("tid", CatalogType::Long))
            .with_field(IndexField::new("creation_date", CatalogType::Date))
            .with_field(IndexField::new("modification_date", CatalogType::Date))
            .with_field(IndexField::new("access_users", CatalogType::Keyword))
            .with_field(IndexField::new("access_roles", CatalogType::Keyword))
            .with_field(IndexField::new(SUB_INDEX_FIELD, CatalogType::Keyword))
    }

    pub fn field(&self, name: &str) -> Option<&IndexField> {
        self.index_fields.iter().find(|f| f.name == name)
    }
}
