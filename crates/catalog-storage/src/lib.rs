//! Object store for the catalog indexing engine.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation for objects, child listings, the TID index,
//!   registry records and checkpoints
//! - Atomic commits via WriteBatch with a monotonically increasing tid
//! - The [`ObjectStore`] trait the indexing engine is written against

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod store;
pub mod transaction;

pub use db::Storage;
pub use error::StorageError;
pub use keys::{CheckpointKey, ChildKey, TidKey};
pub use store::{ObjectStore, TidRow};
pub use transaction::{Transaction, TxnOp};
