//! Index lifecycle and pipelines for the catalog indexing engine.
//!
//! This crate keeps a search backend in sync with the object store.
//!
//! ## Key Components
//!
//! - [`IndexManager`]: alias and version bookkeeping per container, the
//!   per-alias mutex, sub-indices
//! - [`Indexer`]: buffered bulk writes with retries, sent to every
//!   destination index of a flush
//! - [`CatalogWriter`]: application writes committed to the store and
//!   mirrored into the backend
//! - [`Migrator`]: zero-downtime move to a freshly mapped index
//! - [`Reindexer`]: in-place rewrite of the active index
//! - [`Vacuum`]: orphan and missing-document reconciliation
//! - [`CatalogDataAdapter`]: projection of stored objects into documents
//!
//! ## Example
//!
//! ```ignore
//! use catalog_indexing::{AdapterRegistry, IndexManagerFactory, MigrationOptions, Migrator};
//!
//! let factory = IndexManagerFactory::from_settings(&settings, store, client);
//! let adapters = Arc::new(AdapterRegistry::from_registry(factory.registry()));
//! let manager = Arc::new(factory.for_container(container));
//!
//! let report = Migrator::new(manager, adapters, MigrationOptions::default())
//!     .with_cancel(token)
//!     .run()
//!     .await?;
//! ```

pub mod adapter;
pub mod checkpoint;
pub mod error;
pub mod index_manager;
pub mod indexer;
pub mod migrate;
pub mod progress;
pub mod reindex;
pub mod scroll;
pub mod vacuum;
pub mod walker;
pub mod writer;

pub use adapter::{AdapterRegistry, CatalogDataAdapter, SchemaAdapter};
pub use checkpoint::{VacuumCursor, RESET_TID};
pub use error::IndexingError;
pub use index_manager::{AliasLocks, IndexManager, IndexManagerFactory, IndexNaming};
pub use indexer::{Destinations, Indexer, IndexerStats};
pub use migrate::{force_mapping, update_mapping, MigrationOptions, MigrationReport, Migrator};
pub use progress::{BroadcastEventSink, CatalogEvent, LoggingEventSink, NoOpEventSink};
pub use reindex::{ReindexOptions, ReindexReport, Reindexer};
pub use scroll::IdScroll;
pub use vacuum::{MissingStrategy, Vacuum, VacuumReport};
pub use walker::{locate, ContentWalker, Location, WalkOrder};
pub use writer::CatalogWriter;
