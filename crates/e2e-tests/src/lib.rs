//! End-to-end test infrastructure for the catalog indexing engine.
//!
//! Provides a shared TestHarness wiring a RocksDB object store in a temp
//! directory to the in-process search backend, with one container `c` in
//! database `db` under the `guillotina-` prefix.

use std::sync::Arc;

use serde_json::json;
use ulid::Ulid;

use catalog_indexing::{
    AdapterRegistry, CatalogWriter, IndexManager, IndexManagerFactory, IndexNaming, MigrationOptions,
    Migrator, Reindexer, ReindexOptions, Vacuum,
};
use catalog_search::{InMemoryBackend, MappingRegistry, SearchClient};
use catalog_storage::{ObjectStore, Storage, Transaction};
use catalog_types::{CatalogType, ContentSchema, IndexField, RegistryRecord, StoredObject, ROOT_ZOID};

pub const CONTAINER_ID: &str = "c";
pub const ALIAS: &str = "guillotina-db-c";

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub storage: Arc<Storage>,
    pub backend: Arc<InMemoryBackend>,
    pub factory: IndexManagerFactory,
    pub adapters: Arc<AdapterRegistry>,
    pub writer: CatalogWriter,
    pub container: StoredObject,
}

impl TestHarness {
    /// Harness with the default content types and an indexed, empty container.
    pub async fn start() -> Self {
        Self::with_schemas(default_schemas()).await
    }

    pub async fn with_schemas(schemas: Vec<ContentSchema>) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage = Arc::new(Storage::open(temp_dir.path()).expect("Failed to open test storage"));
        let backend = Arc::new(InMemoryBackend::new());
        let registry = Arc::new(MappingRegistry::new(schemas));
        let adapters = Arc::new(AdapterRegistry::from_registry(&registry));
        let factory = IndexManagerFactory::new(
            storage.clone(),
            backend.clone(),
            registry,
            IndexNaming::new("guillotina-", "db"),
        );
        let writer = CatalogWriter::new(factory.clone(), adapters.clone()).with_bulk_size(1);

        let container = StoredObject::new(new_zoid(), Some(ROOT_ZOID.into()), CONTAINER_ID, "Container");
        writer
            .object_added(container.clone())
            .await
            .expect("Failed to create container");

        Self {
            _temp_dir: temp_dir,
            storage,
            backend,
            factory,
            adapters,
            writer,
            container,
        }
    }

    pub fn manager(&self) -> Arc<IndexManager> {
        Arc::new(self.factory.for_container(self.container.clone()))
    }

    pub fn record(&self) -> RegistryRecord {
        self.storage
            .load_registry(&self.container.zoid)
            .expect("Failed to load registry")
            .expect("Container has no registry record")
    }

    pub fn migrator(&self, options: MigrationOptions) -> Migrator {
        Migrator::new(self.manager(), self.adapters.clone(), options).with_bulk_size(25)
    }

    pub fn reindexer(&self, options: ReindexOptions) -> Reindexer {
        Reindexer::new(self.manager(), self.adapters.clone(), options).with_bulk_size(25)
    }

    pub fn vacuum(&self) -> Vacuum {
        Vacuum::new(self.factory.clone(), self.adapters.clone()).with_bulk_size(25)
    }

    /// Add `count` items directly under the container through the writer.
    pub async fn add_items(&self, count: usize) -> Vec<String> {
        let mut zoids = Vec::with_capacity(count);
        for i in 0..count {
            let item = item(&self.container.zoid, &format!("item-{}", i));
            zoids.push(item.zoid.clone());
            self.writer.object_added(item).await.expect("Failed to add item");
        }
        zoids.sort();
        zoids
    }

    /// Commit objects without indexing them.
    pub fn commit_unindexed(&self, objects: Vec<StoredObject>) {
        let mut txn = Transaction::new();
        for object in objects {
            txn.put_object(object);
        }
        self.storage.commit(txn).expect("Failed to commit objects");
    }

    pub async fn alias_target(&self) -> Vec<String> {
        self.backend.get_alias(ALIAS).await.expect("Failed to resolve alias")
    }

    pub async fn doc_count(&self, index: &str) -> u64 {
        self.backend.count(index, None).await.expect("Failed to count")
    }
}

/// `Item` with a float `price`, `Folder` with a text `description`.
pub fn default_schemas() -> Vec<ContentSchema> {
    vec![
        ContentSchema::new("Item").with_field(IndexField::new("price", CatalogType::Float)),
        ContentSchema::new("Folder").with_field(IndexField::new("description", CatalogType::Text)),
    ]
}

pub fn new_zoid() -> String {
    Ulid::new().to_string().to_lowercase()
}

pub fn item(parent: &str, id: &str) -> StoredObject {
    StoredObject::new(new_zoid(), Some(parent.to_string()), id, "Item")
        .with_attribute("title", json!(id))
        .with_attribute("price", json!(9.5))
        .with_attribute("access_users", json!(["root"]))
}

pub fn folder(parent: &str, id: &str) -> StoredObject {
    StoredObject::new(new_zoid(), Some(parent.to_string()), id, "Folder")
        .with_attribute("title", json!(id))
        .with_attribute("access_users", json!(["root"]))
}
