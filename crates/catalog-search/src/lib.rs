//! # catalog-search
//!
//! Everything that talks to, or speaks the language of, the search backend.
//!
//! - [`client`]: the [`SearchClient`] abstraction and its request/response types
//! - [`http`]: Elasticsearch / OpenSearch 7.x over HTTP
//! - [`memory`]: process-local backend for tests and dry runs
//! - [`mapping`]: mapping registry, conflict detection and diffs
//! - [`settings`]: index settings defaults and merging
//! - [`query`], [`security`], [`searcher`]: query execution

pub mod client;
pub mod error;
pub mod http;
pub mod mapping;
pub mod memory;
pub mod query;
pub mod searcher;
pub mod security;
pub mod settings;

use std::sync::Arc;

use catalog_types::{BackendKind, Settings};

pub use client::{
    BulkItemResult, BulkOp, BulkResponse, ByQueryResponse, Hit, SearchClient, SearchPage,
    SearchRequest,
};
pub use error::{safe_call, SearchError};
pub use http::HttpSearchClient;
pub use mapping::{compute_mapping, field_diff, top_level_fields, Mapping, MappingRegistry};
pub use memory::InMemoryBackend;
pub use query::{DefaultQueryParser, QueryParser};
pub use searcher::CatalogSearcher;
pub use security::{security_builder, Principal, SecurityQueryBuilder};

/// Build the backend client selected by `settings.backend`.
pub fn connect(settings: &Settings) -> Result<Arc<dyn SearchClient>, SearchError> {
    match settings.backend {
        BackendKind::Http => Ok(Arc::new(HttpSearchClient::new(&settings.connection_settings)?)),
        BackendKind::Memory => Ok(Arc::new(InMemoryBackend::new())),
    }
}
