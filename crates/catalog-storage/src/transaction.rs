//! Explicit write set committed atomically by the object store.
//!
//! Indexing APIs stage registry changes into a caller-owned [`Transaction`];
//! nothing is visible to readers until [`ObjectStore::commit`] succeeds.
//!
//! [`ObjectStore::commit`]: crate::store::ObjectStore::commit

use catalog_types::{RegistryRecord, StoredObject};

/// One staged write
#[derive(Debug, Clone, PartialEq)]
pub enum TxnOp {
    /// Insert or replace an object; its tid is assigned at commit
    PutObject(StoredObject),
    /// Remove an object and everything below it
    DeleteObject(String),
    /// Insert or replace the registry record owned by `owner`
    PutRegistry {
        owner: String,
        record: RegistryRecord,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Transaction {
    ops: Vec<TxnOp>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_object(&mut self, object: StoredObject) {
        self.ops.push(TxnOp::PutObject(object));
    }

    pub fn delete_object(&mut self, zoid: impl Into<String>) {
        self.ops.push(TxnOp::DeleteObject(zoid.into()));
    }

    pub fn put_registry(&mut self, owner: impl Into<String>, record: RegistryRecord) {
        self.ops.push(TxnOp::PutRegistry {
            owner: owner.into(),
            record,
        });
    }

    /// Most recent registry record staged for `owner`, if any.
    pub fn staged_registry(&self, owner: &str) -> Option<&RegistryRecord> {
        self.ops.iter().rev().find_map(|op| match op {
            TxnOp::PutRegistry { owner: o, record } if o == owner => Some(record),
            _ => None,
        })
    }

    /// Most recent object staged for `zoid`. `Some(None)` means staged for deletion.
    pub fn staged_object(&self, zoid: &str) -> Option<Option<&StoredObject>> {
        self.ops.iter().rev().find_map(|op| match op {
            TxnOp::PutObject(obj) if obj.zoid == zoid => Some(Some(obj)),
            TxnOp::DeleteObject(z) if z == zoid => Some(None),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[TxnOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<TxnOp> {
        self.ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_registry_returns_latest() {
        let mut txn = Transaction::new();
        txn.put_registry("c", RegistryRecord::new("catalog-db-c"));
        let mut next = RegistryRecord::new("catalog-db-c");
        next.next_index_version = Some(2);
        txn.put_registry("c", next.clone());
        txn.put_registry("other", RegistryRecord::new("catalog-db-other"));

        assert_eq!(txn.staged_registry("c"), Some(&next));
        assert!(txn.staged_registry("missing").is_none());
        assert_eq!(txn.len(), 3);
    }

    #[test]
    fn test_staged_object_tracks_deletes() {
        let mut txn = Transaction::new();
        txn.put_object(StoredObject::new("a", None, "a", "Item"));
        assert!(matches!(txn.staged_object("a"), Some(Some(_))));
        txn.delete_object("a");
        assert_eq!(txn.staged_object("a"), Some(None));
        assert_eq!(txn.staged_object("b"), None);
    }
}
