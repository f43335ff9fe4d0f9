//! Object store errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// The database was opened without one of the catalog column families
    #[error("Missing column family: {0}")]
    ColumnFamilyNotFound(String),

    /// A children or TID key that does not decode
    #[error("Malformed key: {0}")]
    Key(String),

    /// Object, registry record or checkpoint bytes that do not decode
    #[error("Corrupt record: {0}")]
    Serialization(String),

    /// No object with this zoid
    #[error("No such object: {0}")]
    NotFound(String),

    /// Transaction rejected at commit
    #[error("Commit failed: {0}")]
    Commit(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
