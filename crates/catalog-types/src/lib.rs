//! # catalog-types
//!
//! Shared domain types for the catalog indexing engine.
//!
//! - Objects: records held by the authoritative object store
//! - Schemas: content types and the fields they contribute to documents
//! - Registry: per-container alias and physical index versions
//! - Batch entries: the unit of the bulk write pipeline
//! - Settings: layered configuration

pub mod config;
pub mod document;
pub mod error;
pub mod object;
pub mod progress;
pub mod registry;
pub mod schema;

pub use config::{BackendKind, ConnectionSettings, Settings};
pub use document::{BatchAction, BatchEntry, Document};
pub use error::CatalogError;
pub use object::{is_system_zoid, StoredObject, ROOT_ZOID, TRASHED_ZOID};
pub use progress::{EventSink, IndexProgress, SearchDone};
pub use registry::{alias_name, physical_index_name, sub_index_alias, RegistryRecord};
pub use schema::{
    CatalogType, ContentSchema, FieldMapping, IndexField, BASE_SCHEMA_NAME, PATH_FIELD,
    SECURITY_FIELDS, SUB_INDEX_FIELD, UID_FIELD,
};
