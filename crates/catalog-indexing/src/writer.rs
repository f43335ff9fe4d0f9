//! Application-side writes.
//!
//! Commits object changes to the store and mirrors them into the search
//! backend through a managed [`Indexer`], so documents written while a
//! migration is pending land in both the active and the next index.

use std::sync::Arc;

use tracing::{debug, warn};

use catalog_storage::{StorageError, Transaction};
use catalog_types::{BatchEntry, StoredObject};

use crate::adapter::AdapterRegistry;
use crate::error::IndexingError;
use crate::index_manager::{IndexManager, IndexManagerFactory};
use crate::indexer::{Destinations, Indexer, IndexerStats};
use crate::walker::{locate, Location, WALK_PAGE_SIZE};

pub struct CatalogWriter {
    factory: IndexManagerFactory,
    adapters: Arc<AdapterRegistry>,
    bulk_size: usize,
    refresh: bool,
}

impl CatalogWriter {
    pub fn new(factory: IndexManagerFactory, adapters: Arc<AdapterRegistry>) -> Self {
        Self {
            factory,
            adapters,
            bulk_size: 50,
            refresh: false,
        }
    }

    pub fn with_bulk_size(mut self, bulk_size: usize) -> Self {
        self.bulk_size = bulk_size;
        self
    }

    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    fn owns_sub_index(&self, object: &StoredObject) -> bool {
        self.factory
            .registry()
            .schema(&object.type_name)
            .is_some_and(|s| s.sub_index)
    }

    /// `root` and every object below it that owns a sub-index, nested
    /// owners included.
    fn sub_index_owners(&self, root: &StoredObject) -> Result<Vec<StoredObject>, IndexingError> {
        let store = self.factory.store();
        let mut owners = Vec::new();
        let mut stack = vec![root.clone()];
        while let Some(object) = stack.pop() {
            let mut after: Option<String> = None;
            loop {
                let children = store.children_page(&object.zoid, after.as_deref(), WALK_PAGE_SIZE)?;
                let full = children.len() == WALK_PAGE_SIZE;
                after = children.last().map(|c| c.id.clone());
                stack.extend(children);
                if !full {
                    break;
                }
            }
            if self.owns_sub_index(&object) {
                owners.push(object);
            }
        }
        Ok(owners)
    }

    /// Manager of the index `location` is written to.
    fn manager_for(&self, location: &Location) -> Result<IndexManager, IndexingError> {
        let store = self.factory.store();
        let container = store
            .get_object(&location.container)?
            .ok_or_else(|| StorageError::NotFound(location.container.clone()))?;
        let container_manager = self.factory.for_container(container);
        match &location.sub_index_owner {
            Some(owner) => {
                let owner = store
                    .get_object(owner)?
                    .ok_or_else(|| StorageError::NotFound(owner.clone()))?;
                self.factory.for_sub_index(&container_manager, owner)
            }
            None => Ok(container_manager),
        }
    }

    async fn write(&self, manager: IndexManager, entry: BatchEntry) -> Result<IndexerStats, IndexingError> {
        let mut indexer = Indexer::new(
            self.factory.client().clone(),
            Destinations::Managed(Arc::new(manager)),
            self.bulk_size,
        )
        .with_refresh(self.refresh);
        indexer.add(entry).await?;
        indexer.flush().await?;
        Ok(indexer.stats().clone())
    }

    /// Commit `object` and index it. A new container gets its index
    /// provisioned instead; an object of a sub-index type gets its private
    /// index created in the same transaction.
    pub async fn object_added(&self, object: StoredObject) -> Result<i64, IndexingError> {
        let store = self.factory.store().clone();
        let Some(location) = locate(store.as_ref(), self.factory.registry(), &object)? else {
            let mut txn = Transaction::new();
            txn.put_object(object);
            return Ok(store.commit(txn)?);
        };

        if location.is_container() {
            let mut txn = Transaction::new();
            txn.put_object(object.clone());
            let tid = store.commit(txn)?;
            self.factory.for_container(object).initialize().await?;
            return Ok(tid);
        }

        let manager = self.manager_for(&location)?;
        let mut txn = Transaction::new();
        txn.put_object(object.clone());
        let content_index = if self.owns_sub_index(&object) {
            let child = manager.create_sub_index(&object, &mut txn).await?;
            Some(child.get_index_name(Some(&mut txn))?)
        } else {
            None
        };
        let tid = store.commit(txn)?;

        let mut committed = object;
        committed.tid = tid;
        let doc = self
            .adapters
            .document(&committed, &location, content_index.as_deref())?;
        let stats = self
            .write(manager, BatchEntry::index(committed.zoid.clone(), committed.type_name.clone(), doc))
            .await?;
        if !stats.failed.is_empty() {
            warn!(zoid = %committed.zoid, "Object committed but not indexed");
        }
        debug!(zoid = %committed.zoid, tid, path = %location.path, "Indexed object");
        Ok(tid)
    }

    /// Delete `zoid` and its descendants from the store and the index,
    /// dropping the sub-index of every owner in the removed subtree.
    pub async fn object_removed(&self, zoid: &str) -> Result<(), IndexingError> {
        let store = self.factory.store().clone();
        let Some(object) = store.get_object(zoid)? else {
            return Ok(());
        };
        let location = locate(store.as_ref(), self.factory.registry(), &object)?;

        let mut txn = Transaction::new();
        txn.delete_object(object.zoid.clone());
        let Some(location) = location.filter(|l| !l.is_container()) else {
            store.commit(txn)?;
            return Ok(());
        };

        let manager = self.manager_for(&location)?;
        for owner in self.sub_index_owners(&object)? {
            manager.delete_sub_index(&owner, &mut txn).await?;
        }
        store.commit(txn)?;

        self.write(
            manager,
            BatchEntry::delete(object.zoid.clone(), object.type_name.clone(), Some(location.path.clone())),
        )
        .await?;
        debug!(zoid = %object.zoid, path = %location.path, "Unindexed object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use catalog_search::{InMemoryBackend, MappingRegistry, SearchClient};
    use catalog_storage::{ObjectStore, Storage};
    use catalog_types::{ContentSchema, ROOT_ZOID};
    use tempfile::TempDir;

    use super::*;
    use crate::index_manager::IndexNaming;

    struct Fixture {
        writer: CatalogWriter,
        backend: Arc<InMemoryBackend>,
        store: Arc<Storage>,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Storage::open(dir.path()).unwrap());
        let backend = Arc::new(InMemoryBackend::new());
        let registry = Arc::new(MappingRegistry::new(vec![
            ContentSchema::new("Item"),
            ContentSchema::new("Archive").with_sub_index(true),
        ]));
        let adapters = Arc::new(AdapterRegistry::from_registry(&registry));
        let factory = IndexManagerFactory::new(
            store.clone(),
            backend.clone(),
            registry,
            IndexNaming::new("guillotina-", "db"),
        );
        let writer = CatalogWriter::new(factory, adapters);
        writer
            .object_added(StoredObject::new("c0", Some(ROOT_ZOID.into()), "c", "Container"))
            .await
            .unwrap();
        Fixture {
            writer,
            backend,
            store,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_added_container_gets_index() {
        let fx = fixture().await;
        assert_eq!(
            fx.backend.get_alias("guillotina-db-c").await.unwrap(),
            vec!["guillotina-db-c_1"]
        );
        assert!(fx.backend.doc_ids("guillotina-db-c").is_empty());
    }

    #[tokio::test]
    async fn test_added_object_is_indexed_with_tid() {
        let fx = fixture().await;
        let tid = fx
            .writer
            .object_added(StoredObject::new("i1", Some("c0".into()), "item", "Item"))
            .await
            .unwrap();
        let hit = fx.backend.get("guillotina-db-c", "i1").await.unwrap();
        let source = hit.source.unwrap();
        assert_eq!(source["path"], "/item");
        assert_eq!(source["tid"], tid);
    }

    #[tokio::test]
    async fn test_removed_object_takes_descendants() {
        let fx = fixture().await;
        fx.writer
            .object_added(StoredObject::new("f1", Some("c0".into()), "folder", "Folder"))
            .await
            .unwrap();
        fx.writer
            .object_added(StoredObject::new("i1", Some("f1".into()), "item", "Item"))
            .await
            .unwrap();
        assert_eq!(fx.backend.doc_ids("guillotina-db-c"), vec!["f1", "i1"]);

        fx.writer.object_removed("f1").await.unwrap();
        assert!(fx.backend.doc_ids("guillotina-db-c").is_empty());
        assert!(fx.store.get_object("i1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sub_index_lifecycle() {
        let fx = fixture().await;
        fx.writer
            .object_added(StoredObject::new("a1", Some("c0".into()), "archive", "Archive"))
            .await
            .unwrap();
        fx.writer
            .object_added(StoredObject::new("a2", Some("a1".into()), "inner", "Item"))
            .await
            .unwrap();

        let owner = fx.backend.get("guillotina-db-c", "a1").await.unwrap();
        assert_eq!(owner.source.unwrap()["content_index"], "guillotina-db-c__archive-a1");
        assert_eq!(fx.backend.doc_ids("guillotina-db-c__archive-a1"), vec!["a2"]);
        assert!(fx.backend.get("guillotina-db-c", "a2").await.is_err());

        fx.writer.object_removed("a1").await.unwrap();
        assert!(!fx
            .backend
            .index_exists("guillotina-db-c__archive-a1_1")
            .await
            .unwrap());
        assert!(fx.backend.doc_ids("guillotina-db-c").is_empty());
    }

    #[tokio::test]
    async fn test_removing_ancestor_drops_nested_sub_indices() {
        let fx = fixture().await;
        for (zoid, parent, id, type_name) in [
            ("f1", "c0", "folder", "Folder"),
            ("a1", "f1", "archive", "Archive"),
            ("i1", "a1", "item", "Item"),
            ("a2", "a1", "inner", "Archive"),
        ] {
            fx.writer
                .object_added(StoredObject::new(zoid, Some(parent.into()), id, type_name))
                .await
                .unwrap();
        }
        let outer = "guillotina-db-c__archive-a1";
        let inner = "guillotina-db-c__archive-a1__archive-a2";
        assert_eq!(fx.backend.get_alias(outer).await.unwrap(), vec![format!("{}_1", outer)]);
        assert_eq!(fx.backend.get_alias(inner).await.unwrap(), vec![format!("{}_1", inner)]);

        fx.writer.object_removed("f1").await.unwrap();
        for alias in [outer, inner] {
            assert!(!fx.backend.index_exists(&format!("{}_1", alias)).await.unwrap());
        }
        assert!(fx.store.load_registry("a1").unwrap().is_none());
        assert!(fx.store.load_registry("a2").unwrap().is_none());
        assert!(fx.backend.doc_ids("guillotina-db-c").is_empty());
    }
}
