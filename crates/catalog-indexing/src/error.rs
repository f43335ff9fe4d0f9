//! Error types for the indexing engine.

use catalog_search::SearchError;
use catalog_storage::StorageError;
use thiserror::Error;

/// Errors that can occur while provisioning, writing, migrating or vacuuming
#[derive(Error, Debug)]
pub enum IndexingError {
    /// A next index is already pending and `force` was not given
    #[error("Migration already in progress for {0}")]
    MigrationInProgress(String),

    /// `finish_migration` without a pending next index
    #[error("No migration in progress for {0}")]
    NotMigrating(String),

    /// Items failed permanently after retries; their ids were logged
    #[error("Bulk write failed for {} document(s)", .0.len())]
    BulkPartialFailure(Vec<String>),

    /// The alias swap or its registry commit failed. Registry and alias may disagree.
    #[error("Alias swap failed: {0}")]
    SwapFailed(String),

    /// Stopped by the operator
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// The catalog-data adapter could not project an object
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// Checkpoint load/save issues
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for IndexingError {
    fn from(err: serde_json::Error) -> Self {
        IndexingError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexingError::MigrationInProgress("catalog-db-c".to_string());
        assert_eq!(err.to_string(), "Migration already in progress for catalog-db-c");

        let err = IndexingError::BulkPartialFailure(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Bulk write failed for 2 document(s)");
    }

    #[test]
    fn test_from_search_error() {
        let err: IndexingError = SearchError::Transport("reset".into()).into();
        assert!(matches!(err, IndexingError::Search(SearchError::Transport(_))));
    }

    #[test]
    fn test_from_serde_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: IndexingError = json_err.into();
        assert!(matches!(err, IndexingError::Serialization(_)));
    }
}
