//! Vacuum cursor checkpoints.
//!
//! The TID-scan keeps a `(last_tid, last_zoid)` cursor per container so a
//! pass resumes where the previous one stopped. Cursors live in memory for
//! the lifetime of the vacuum and are mirrored to the store's checkpoint
//! column family after every pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use catalog_storage::ObjectStore;

use crate::error::IndexingError;

/// Cursor value meaning "scan from the beginning".
pub const RESET_TID: i64 = -2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VacuumCursor {
    /// Container zoid the cursor belongs to
    pub container: String,

    /// Next scan starts at this tid
    pub last_tid: i64,

    /// Rows at `last_tid` up to and including this zoid are done
    #[serde(default)]
    pub last_zoid: Option<String>,

    /// Completed passes since the cursor was created
    #[serde(default)]
    pub passes: u64,

    /// Milliseconds since epoch for JSON compatibility
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl VacuumCursor {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            last_tid: RESET_TID,
            last_zoid: None,
            passes: 0,
            updated_at: Utc::now(),
        }
    }

    /// Storage key for a container's cursor
    pub fn checkpoint_key(container: &str) -> String {
        format!("vacuum_cursor:{}", container)
    }

    /// Move to `tid`, optionally mid-way through its rows
    pub fn advance(&mut self, tid: i64, zoid: Option<String>) {
        self.last_tid = tid;
        self.last_zoid = zoid;
        self.updated_at = Utc::now();
    }

    pub fn reset(&mut self) {
        self.advance(RESET_TID, None);
    }

    /// True when row `(tid, zoid)` was already covered by this cursor
    pub fn covers(&self, tid: i64, zoid: &str) -> bool {
        tid < self.last_tid
            || (tid == self.last_tid
                && self.last_zoid.as_deref().is_some_and(|last| zoid <= last))
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexingError> {
        serde_json::to_vec(self).map_err(IndexingError::from)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexingError> {
        serde_json::from_slice(bytes).map_err(IndexingError::from)
    }

    /// Load the persisted cursor, or a fresh one.
    pub fn load(store: &dyn ObjectStore, container: &str) -> Result<Self, IndexingError> {
        match store.get_checkpoint(&Self::checkpoint_key(container))? {
            Some(bytes) => Self::from_bytes(&bytes),
            None => Ok(Self::new(container)),
        }
    }

    pub fn save(&self, store: &dyn ObjectStore) -> Result<(), IndexingError> {
        store
            .put_checkpoint(&Self::checkpoint_key(&self.container), &self.to_bytes()?)
            .map_err(|e| IndexingError::Checkpoint(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use catalog_storage::Storage;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_new_cursor_starts_before_everything() {
        let cursor = VacuumCursor::new("c");
        assert_eq!(cursor.last_tid, RESET_TID);
        assert!(!cursor.covers(-1, "a"));
        assert!(!cursor.covers(1, "a"));
    }

    #[test]
    fn test_covers_respects_zoid_within_tid() {
        let mut cursor = VacuumCursor::new("c");
        cursor.advance(5, Some("m".into()));
        assert!(cursor.covers(4, "z"));
        assert!(cursor.covers(5, "a"));
        assert!(cursor.covers(5, "m"));
        assert!(!cursor.covers(5, "n"));
        assert!(!cursor.covers(6, "a"));

        cursor.advance(6, None);
        assert!(cursor.covers(5, "z"));
        assert!(!cursor.covers(6, "a"));
    }

    #[test]
    fn test_checkpoint_key() {
        assert_eq!(VacuumCursor::checkpoint_key("abc"), "vacuum_cursor:abc");
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(Storage::open(dir.path()).unwrap());

        let fresh = VacuumCursor::load(store.as_ref(), "c").unwrap();
        assert_eq!(fresh.last_tid, RESET_TID);

        let mut cursor = fresh;
        cursor.advance(42, Some("zoid-9".into()));
        cursor.passes = 3;
        cursor.save(store.as_ref()).unwrap();

        let loaded = VacuumCursor::load(store.as_ref(), "c").unwrap();
        assert_eq!(loaded.last_tid, 42);
        assert_eq!(loaded.last_zoid.as_deref(), Some("zoid-9"));
        assert_eq!(loaded.passes, 3);

        let mut reset = loaded;
        reset.reset();
        assert_eq!(reset.last_tid, RESET_TID);
        assert!(reset.last_zoid.is_none());
    }
}
