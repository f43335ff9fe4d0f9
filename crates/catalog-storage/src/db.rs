//! RocksDB wrapper implementing the object store.
//!
//! Provides:
//! - Database open/close with column family setup
//! - Atomic commits via WriteBatch, one tid per commit
//! - Paged child listing and commit-order (TID) scans
//! - Registry records and checkpoints

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use catalog_types::{RegistryRecord, StoredObject, ROOT_ZOID, TRASHED_ZOID};
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, info};

use crate::column_families::{
    build_cf_descriptors, CF_CHECKPOINTS, CF_CHILDREN, CF_OBJECTS, CF_REGISTRY, CF_TIDS,
};
use crate::error::StorageError;
use crate::keys::{CheckpointKey, ChildKey, TidKey};
use crate::store::{ObjectStore, TidRow};
use crate::transaction::{Transaction, TxnOp};

const CONTAINER_PAGE: usize = 500;

/// RocksDB-backed object store
pub struct Storage {
    db: DB,
    /// Next tid to hand out; loaded from the highest committed tid on open
    next_tid: AtomicU64,
    /// Serializes commits so read-modify-write of the secondary indexes is consistent
    commit_lock: Mutex<()>,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let next_tid = Self::load_next_tid(&db)?;
        debug!(next_tid, "Loaded tid counter");

        Ok(Self {
            db,
            next_tid: AtomicU64::new(next_tid),
            commit_lock: Mutex::new(()),
        })
    }

    /// Highest committed tid + 1, or 1 on an empty store
    fn load_next_tid(db: &DB) -> Result<u64, StorageError> {
        let cf = db
            .cf_handle(CF_TIDS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_TIDS.to_string()))?;

        let mut iter = db.iterator_cf(cf, IteratorMode::End);
        if let Some(result) = iter.next() {
            let (key, _) = result?;
            let tid_key = TidKey::from_bytes(&key)?;
            return Ok(tid_key.tid.max(0) as u64 + 1);
        }
        Ok(1)
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    /// Tid the next commit will receive
    pub fn peek_next_tid(&self) -> i64 {
        self.next_tid.load(Ordering::SeqCst) as i64
    }

    fn read_object(&self, zoid: &str) -> Result<Option<StoredObject>, StorageError> {
        let cf = self.cf(CF_OBJECTS)?;
        match self.db.get_cf(cf, zoid.as_bytes())? {
            Some(bytes) => Ok(Some(StoredObject::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All child zoids of `parent`, unpaged. Used by cascading deletes only.
    fn child_zoids(&self, parent: &str) -> Result<Vec<String>, StorageError> {
        let cf = self.cf(CF_CHILDREN)?;
        let prefix = ChildKey::prefix(parent);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut zoids = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            zoids.push(String::from_utf8_lossy(&value).to_string());
        }
        Ok(zoids)
    }
}

impl ObjectStore for Storage {
    fn get_object(&self, zoid: &str) -> Result<Option<StoredObject>, StorageError> {
        self.read_object(zoid)
    }

    fn existing_zoids(&self, zoids: &[String]) -> Result<HashSet<String>, StorageError> {
        let cf = self.cf(CF_OBJECTS)?;
        let keys = zoids.iter().map(|z| (cf, z.as_bytes()));
        let mut found = HashSet::new();
        for (zoid, result) in zoids.iter().zip(self.db.multi_get_cf(keys)) {
            if result?.is_some() {
                found.insert(zoid.clone());
            }
        }
        Ok(found)
    }

    fn children_page(
        &self,
        parent: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredObject>, StorageError> {
        let cf = self.cf(CF_CHILDREN)?;
        let prefix = ChildKey::prefix(parent);
        let start = match after {
            Some(id) => ChildKey::new(parent, id).to_bytes(),
            None => prefix.clone(),
        };

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));

        let mut results = Vec::new();
        for item in iter {
            if results.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if after.is_some() && key.as_ref() == start.as_slice() {
                continue;
            }
            let zoid = String::from_utf8_lossy(&value);
            match self.read_object(&zoid)? {
                Some(obj) => results.push(obj),
                None => debug!(parent, zoid = %zoid, "Dangling child entry"),
            }
        }
        Ok(results)
    }

    fn scan_tids(&self, min_tid: i64, limit: usize) -> Result<Vec<TidRow>, StorageError> {
        let cf = self.cf(CF_TIDS)?;
        let start = TidKey::seek_tid(min_tid);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));

        let mut rows = Vec::new();
        for item in iter.take(limit) {
            let (key, _) = item?;
            rows.push(TidKey::from_bytes(&key)?.into());
        }
        Ok(rows)
    }

    fn scan_tid_after(
        &self,
        tid: i64,
        after_zoid: &str,
        limit: usize,
    ) -> Result<Vec<TidRow>, StorageError> {
        let cf = self.cf(CF_TIDS)?;
        let start = TidKey::new(tid, after_zoid).to_bytes();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));

        let mut rows = Vec::new();
        for item in iter {
            if rows.len() >= limit {
                break;
            }
            let (key, _) = item?;
            let tid_key = TidKey::from_bytes(&key)?;
            if tid_key.tid != tid {
                break;
            }
            if tid_key.zoid.as_str() <= after_zoid {
                continue;
            }
            rows.push(tid_key.into());
        }
        Ok(rows)
    }

    fn containers(&self) -> Result<Vec<StoredObject>, StorageError> {
        let mut containers = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let page = self.children_page(ROOT_ZOID, after.as_deref(), CONTAINER_PAGE)?;
            let full = page.len() == CONTAINER_PAGE;
            after = page.last().map(|obj| obj.id.clone());
            containers.extend(page.into_iter().filter(|obj| obj.zoid != TRASHED_ZOID));
            if !full {
                break;
            }
        }
        Ok(containers)
    }

    fn count_descendants(&self, zoid: &str) -> Result<u64, StorageError> {
        let mut count = 0;
        let mut stack = vec![zoid.to_string()];
        while let Some(parent) = stack.pop() {
            for child in self.child_zoids(&parent)? {
                count += 1;
                stack.push(child);
            }
        }
        Ok(count)
    }

    fn load_registry(&self, owner: &str) -> Result<Option<RegistryRecord>, StorageError> {
        let cf = self.cf(CF_REGISTRY)?;
        match self.db.get_cf(cf, owner.as_bytes())? {
            Some(bytes) => Ok(Some(RegistryRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn registry_records(&self) -> Result<Vec<(String, RegistryRecord)>, StorageError> {
        let cf = self.cf(CF_REGISTRY)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let owner = String::from_utf8_lossy(&key).to_string();
            records.push((owner, RegistryRecord::from_bytes(&value)?));
        }
        Ok(records)
    }

    fn get_checkpoint(&self, job_name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.cf(CF_CHECKPOINTS)?;
        let key = CheckpointKey::new(job_name);
        Ok(self.db.get_cf(cf, key.to_bytes())?)
    }

    fn put_checkpoint(&self, job_name: &str, checkpoint_bytes: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf(CF_CHECKPOINTS)?;
        let key = CheckpointKey::new(job_name);
        self.db.put_cf(cf, key.to_bytes(), checkpoint_bytes)?;
        Ok(())
    }

    fn commit(&self, txn: Transaction) -> Result<i64, StorageError> {
        let _guard = self
            .commit_lock
            .lock()
            .map_err(|e| StorageError::Commit(e.to_string()))?;

        let objects_cf = self.cf(CF_OBJECTS)?;
        let children_cf = self.cf(CF_CHILDREN)?;
        let tids_cf = self.cf(CF_TIDS)?;
        let registry_cf = self.cf(CF_REGISTRY)?;

        let tid = self.next_tid.fetch_add(1, Ordering::SeqCst) as i64;
        let mut batch = WriteBatch::default();
        // Objects already touched by this transaction; None = deleted
        let mut overlay: HashMap<String, Option<StoredObject>> = HashMap::new();

        let current = |overlay: &HashMap<String, Option<StoredObject>>,
                       zoid: &str|
         -> Result<Option<StoredObject>, StorageError> {
            match overlay.get(zoid) {
                Some(staged) => Ok(staged.clone()),
                None => self.read_object(zoid),
            }
        };

        for op in txn.into_ops() {
            match op {
                TxnOp::PutObject(mut obj) => {
                    obj.tid = tid;
                    if let Some(old) = current(&overlay, &obj.zoid)? {
                        batch.delete_cf(tids_cf, TidKey::new(old.tid, &old.zoid).to_bytes());
                        if old.parent_id != obj.parent_id || old.id != obj.id {
                            if let Some(parent) = &old.parent_id {
                                batch.delete_cf(children_cf, ChildKey::new(parent, &old.id).to_bytes());
                            }
                        }
                    }
                    batch.put_cf(objects_cf, obj.zoid.as_bytes(), obj.to_bytes()?);
                    if let Some(parent) = &obj.parent_id {
                        batch.put_cf(
                            children_cf,
                            ChildKey::new(parent, &obj.id).to_bytes(),
                            obj.zoid.as_bytes(),
                        );
                    }
                    batch.put_cf(tids_cf, TidKey::new(tid, &obj.zoid).to_bytes(), b"");
                    overlay.insert(obj.zoid.clone(), Some(obj));
                }
                TxnOp::DeleteObject(zoid) => {
                    let mut stack = vec![zoid];
                    while let Some(zoid) = stack.pop() {
                        let Some(old) = current(&overlay, &zoid)? else {
                            continue;
                        };
                        stack.extend(self.child_zoids(&zoid)?);
                        batch.delete_cf(objects_cf, zoid.as_bytes());
                        batch.delete_cf(tids_cf, TidKey::new(old.tid, &zoid).to_bytes());
                        batch.delete_cf(registry_cf, zoid.as_bytes());
                        if let Some(parent) = &old.parent_id {
                            batch.delete_cf(children_cf, ChildKey::new(parent, &old.id).to_bytes());
                        }
                        overlay.insert(zoid, None);
                    }
                }
                TxnOp::PutRegistry { owner, record } => {
                    batch.put_cf(registry_cf, owner.as_bytes(), record.to_bytes()?);
                }
            }
        }

        self.db.write(batch)?;
        debug!(tid, objects = overlay.len(), "Committed transaction");
        Ok(tid)
    }
}
