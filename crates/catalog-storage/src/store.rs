//! Narrow read/commit interface the indexing engine uses to reach the
//! object store.

use std::collections::HashSet;

use catalog_types::{RegistryRecord, StoredObject};

use crate::error::StorageError;
use crate::keys::TidKey;
use crate::transaction::Transaction;

/// One row of the commit-order index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TidRow {
    pub tid: i64,
    pub zoid: String,
}

impl From<TidKey> for TidRow {
    fn from(key: TidKey) -> Self {
        Self {
            tid: key.tid,
            zoid: key.zoid,
        }
    }
}

/// Operations are short and bounded by one page; callers in async code
/// invoke them inline.
pub trait ObjectStore: Send + Sync {
    /// Point lookup by zoid
    fn get_object(&self, zoid: &str) -> Result<Option<StoredObject>, StorageError>;

    /// Subset of `zoids` that exist in the store
    fn existing_zoids(&self, zoids: &[String]) -> Result<HashSet<String>, StorageError>;

    /// Up to `limit` children of `parent` ordered by name, strictly after `after`
    fn children_page(
        &self,
        parent: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredObject>, StorageError>;

    /// Up to `limit` rows with `tid >= min_tid`, ordered by `(tid, zoid)`
    fn scan_tids(&self, min_tid: i64, limit: usize) -> Result<Vec<TidRow>, StorageError>;

    /// Up to `limit` rows at exactly `tid` with `zoid > after_zoid`
    fn scan_tid_after(
        &self,
        tid: i64,
        after_zoid: &str,
        limit: usize,
    ) -> Result<Vec<TidRow>, StorageError>;

    /// Direct children of the root, excluding the trash bin
    fn containers(&self) -> Result<Vec<StoredObject>, StorageError>;

    /// Objects below `zoid`, excluding `zoid` itself
    fn count_descendants(&self, zoid: &str) -> Result<u64, StorageError>;

    fn load_registry(&self, owner: &str) -> Result<Option<RegistryRecord>, StorageError>;

    /// Every registry record with its owner zoid, ordered by owner
    fn registry_records(&self) -> Result<Vec<(String, RegistryRecord)>, StorageError>;

    fn get_checkpoint(&self, job_name: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn put_checkpoint(&self, job_name: &str, checkpoint_bytes: &[u8]) -> Result<(), StorageError>;

    /// Apply `txn` atomically; returns the tid assigned to it
    fn commit(&self, txn: Transaction) -> Result<i64, StorageError>;
}
