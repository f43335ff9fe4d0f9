//! Index naming, versioning and the lifecycle of live and next indices.
//!
//! Every container (and every object owning a sub-index) has a registry
//! record holding its alias and the active/pending physical versions. The
//! manager stages record changes into the caller's [`Transaction`]; the
//! caller decides when they commit.
//!
//! Writers capture their destination list under a per-alias async mutex so a
//! write started before the alias swap never observes a half-finished switch.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use catalog_search::settings::index_settings;
use catalog_search::{safe_call, MappingRegistry, SearchClient};
use catalog_storage::{ObjectStore, Transaction};
use catalog_types::{
    alias_name, physical_index_name, sub_index_alias, RegistryRecord, Settings, StoredObject,
};
use serde_json::Value;

use crate::error::IndexingError;

/// Process-wide table of per-alias mutexes.
#[derive(Debug, Default)]
pub struct AliasLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AliasLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, alias: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(alias.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

/// Naming inputs shared by every manager.
#[derive(Debug, Clone)]
pub struct IndexNaming {
    pub prefix: String,
    pub db_id: String,
    /// Configured backend settings merged over the defaults at creation
    pub index_settings: Value,
}

impl IndexNaming {
    pub fn new(prefix: impl Into<String>, db_id: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            db_id: db_id.into(),
            index_settings: Value::Null,
        }
    }

    pub fn with_index_settings(mut self, settings: Value) -> Self {
        self.index_settings = settings;
        self
    }
}

/// Builds [`IndexManager`]s sharing one store, client, registry and lock table.
#[derive(Clone)]
pub struct IndexManagerFactory {
    store: Arc<dyn ObjectStore>,
    client: Arc<dyn SearchClient>,
    registry: Arc<MappingRegistry>,
    locks: Arc<AliasLocks>,
    naming: Arc<IndexNaming>,
}

impl IndexManagerFactory {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        client: Arc<dyn SearchClient>,
        registry: Arc<MappingRegistry>,
        naming: IndexNaming,
    ) -> Self {
        Self {
            store,
            client,
            registry,
            locks: Arc::new(AliasLocks::new()),
            naming: Arc::new(naming),
        }
    }

    pub fn from_settings(
        settings: &Settings,
        store: Arc<dyn ObjectStore>,
        client: Arc<dyn SearchClient>,
    ) -> Self {
        let naming = IndexNaming::new(&settings.index_name_prefix, &settings.db_id)
            .with_index_settings(settings.index.clone());
        let registry = Arc::new(MappingRegistry::new(settings.content_types.clone()));
        Self::new(store, client, registry, naming)
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn client(&self) -> &Arc<dyn SearchClient> {
        &self.client
    }

    pub fn registry(&self) -> &Arc<MappingRegistry> {
        &self.registry
    }

    pub fn naming(&self) -> &IndexNaming {
        &self.naming
    }

    pub fn for_container(&self, container: StoredObject) -> IndexManager {
        IndexManager {
            owner: container,
            parent_alias: None,
            factory: self.clone(),
        }
    }

    /// Manager for the private index of `owner`, nested under `parent`.
    pub fn for_sub_index(
        &self,
        parent: &IndexManager,
        owner: StoredObject,
    ) -> Result<IndexManager, IndexingError> {
        let parent_alias = parent.get_index_name(None)?;
        Ok(IndexManager {
            owner,
            parent_alias: Some(parent_alias),
            factory: self.clone(),
        })
    }
}

/// Index lifecycle for one container or sub-index owner.
#[derive(Clone)]
pub struct IndexManager {
    owner: StoredObject,
    parent_alias: Option<String>,
    factory: IndexManagerFactory,
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("owner", &self.owner.zoid)
            .field("parent_alias", &self.parent_alias)
            .finish()
    }
}

impl IndexManager {
    pub fn owner(&self) -> &StoredObject {
        &self.owner
    }

    pub fn is_sub_index(&self) -> bool {
        self.parent_alias.is_some()
    }

    pub fn factory(&self) -> &IndexManagerFactory {
        &self.factory
    }

    pub fn client(&self) -> &Arc<dyn SearchClient> {
        &self.factory.client
    }

    fn generated_alias(&self) -> String {
        match &self.parent_alias {
            Some(parent) => sub_index_alias(parent, &self.owner.type_name, &self.owner.zoid),
            None => alias_name(&self.factory.naming.prefix, &self.factory.naming.db_id, &self.owner.id),
        }
    }

    /// Registry record, preferring what `txn` has staged.
    pub fn current_record(&self, txn: Option<&Transaction>) -> Result<Option<RegistryRecord>, IndexingError> {
        if let Some(record) = txn.and_then(|t| t.staged_registry(&self.owner.zoid)) {
            return Ok(Some(record.clone()));
        }
        Ok(self.factory.store.load_registry(&self.owner.zoid)?)
    }

    fn record_or_new(&self, txn: &Transaction) -> Result<RegistryRecord, IndexingError> {
        Ok(self
            .current_record(Some(txn))?
            .unwrap_or_else(|| RegistryRecord::new(self.generated_alias())))
    }

    /// Alias of this owner. Assigned and persisted on first access; when no
    /// transaction is given the assignment commits on its own.
    pub fn get_index_name(&self, txn: Option<&mut Transaction>) -> Result<String, IndexingError> {
        match txn {
            Some(txn) => {
                if let Some(record) = self.current_record(Some(txn))? {
                    return Ok(record.index_name);
                }
                let record = RegistryRecord::new(self.generated_alias());
                let alias = record.index_name.clone();
                txn.put_registry(self.owner.zoid.clone(), record);
                Ok(alias)
            }
            None => {
                if let Some(record) = self.current_record(None)? {
                    return Ok(record.index_name);
                }
                let record = RegistryRecord::new(self.generated_alias());
                let alias = record.index_name.clone();
                let mut own = Transaction::new();
                own.put_registry(self.owner.zoid.clone(), record);
                self.factory.store.commit(own)?;
                debug!(owner = %self.owner.zoid, alias = %alias, "Assigned index name");
                Ok(alias)
            }
        }
    }

    /// Active physical index; `{alias}_1` before anything was recorded.
    pub fn get_real_index_name(&self) -> Result<String, IndexingError> {
        Ok(match self.current_record(None)? {
            Some(record) => record.real_index_name(),
            None => physical_index_name(&self.generated_alias(), 1),
        })
    }

    pub fn get_migration_index_name(&self) -> Result<Option<String>, IndexingError> {
        Ok(self.current_record(None)?.and_then(|r| r.migration_index_name()))
    }

    /// Stage `next = current + 1` and return the next physical name.
    pub fn start_migration(&self, txn: &mut Transaction, force: bool) -> Result<String, IndexingError> {
        let mut record = self.record_or_new(txn)?;
        if record.is_migrating() && !force {
            return Err(IndexingError::MigrationInProgress(record.index_name));
        }
        record.next_index_version = Some(record.index_version + 1);
        let next = physical_index_name(&record.index_name, record.index_version + 1);
        txn.put_registry(self.owner.zoid.clone(), record);
        Ok(next)
    }

    /// Promote the pending version. Reads the persisted record, not a staged one.
    pub fn finish_migration(&self, txn: &mut Transaction) -> Result<RegistryRecord, IndexingError> {
        let mut record = self
            .factory
            .store
            .load_registry(&self.owner.zoid)?
            .ok_or_else(|| IndexingError::NotMigrating(self.generated_alias()))?;
        let Some(next) = record.next_index_version else {
            return Err(IndexingError::NotMigrating(record.index_name));
        };
        record.index_version = next;
        record.next_index_version = None;
        txn.put_registry(self.owner.zoid.clone(), record.clone());
        Ok(record)
    }

    /// Clear the pending version. The physical next index is left alone.
    pub fn cancel_migration(&self, txn: &mut Transaction) -> Result<(), IndexingError> {
        if let Some(mut record) = self.current_record(Some(txn))? {
            if record.next_index_version.take().is_some() {
                txn.put_registry(self.owner.zoid.clone(), record);
            }
        }
        Ok(())
    }

    /// Hold the per-alias mutex.
    pub async fn lock(&self) -> Result<OwnedMutexGuard<()>, IndexingError> {
        let alias = self.get_index_name(None)?;
        Ok(self.factory.locks.acquire(&alias).await)
    }

    /// Write destinations: the active index, plus the next one while migrating.
    pub async fn get_indexes(&self) -> Result<Vec<String>, IndexingError> {
        let _guard = self.lock().await?;
        let mut indexes = Vec::with_capacity(2);
        match self.current_record(None)? {
            Some(record) => {
                indexes.push(record.real_index_name());
                indexes.extend(record.migration_index_name());
            }
            None => indexes.push(physical_index_name(&self.generated_alias(), 1)),
        }
        Ok(indexes)
    }

    /// Create `{alias}_1` with the computed mapping and point the alias at it.
    /// Does nothing when the active index already exists.
    pub async fn initialize(&self) -> Result<String, IndexingError> {
        let alias = self.get_index_name(None)?;
        let _guard = self.factory.locks.acquire(&alias).await;
        self.create_physical(&alias).await
    }

    async fn create_physical(&self, alias: &str) -> Result<String, IndexingError> {
        let real = self.get_real_index_name()?;
        let client = &self.factory.client;
        if !client.index_exists(&real).await? {
            let mapping = self.factory.registry.compute_mapping()?.to_value();
            let settings = index_settings(&self.factory.naming.index_settings);
            client.create_index(&real, Some(&mapping), Some(&settings)).await?;
            info!(alias = %alias, index = %real, "Created index");
        }
        if !client.get_alias(alias).await?.contains(&real) {
            client.alias_swap(alias, None, &real).await?;
        }
        Ok(real)
    }

    /// Provision the private index of `owner` below this manager's alias.
    ///
    /// The registry record is staged in `txn`; if that commit fails the
    /// physical index is left behind for the vacuum.
    pub async fn create_sub_index(
        &self,
        owner: &StoredObject,
        txn: &mut Transaction,
    ) -> Result<IndexManager, IndexingError> {
        let _guard = self.lock().await?;
        let child = self.factory.for_sub_index(self, owner.clone())?;
        let alias = child.get_index_name(Some(txn))?;
        let real = physical_index_name(&alias, 1);
        let client = &self.factory.client;
        if !client.index_exists(&real).await? {
            let mapping = self.factory.registry.compute_mapping()?.to_value();
            let settings = index_settings(&self.factory.naming.index_settings);
            client.create_index(&real, Some(&mapping), Some(&settings)).await?;
            client.alias_swap(&alias, None, &real).await?;
            info!(alias = %alias, owner = %owner.zoid, "Created sub-index");
        }
        Ok(child)
    }

    /// Drop the physical indices of `owner`'s sub-index.
    ///
    /// The registry record goes away with the owner object when `txn` deletes it.
    pub async fn delete_sub_index(&self, owner: &StoredObject, txn: &mut Transaction) -> Result<(), IndexingError> {
        let _guard = self.lock().await?;
        let Some(record) = self.factory.store.load_registry(&owner.zoid)? else {
            return Ok(());
        };
        let client = &self.factory.client;
        let mut names = vec![record.real_index_name()];
        names.extend(record.migration_index_name());
        for name in names {
            safe_call("delete_index", client.delete_index(&name)).await?;
        }
        txn.delete_object(owner.zoid.clone());
        info!(alias = %record.index_name, owner = %owner.zoid, "Deleted sub-index");
        Ok(())
    }

    /// Alias the sub-index of an object of `type_name` would get.
    pub fn sub_index_alias(&self, type_name: &str, zoid: &str) -> Result<String, IndexingError> {
        Ok(sub_index_alias(&self.get_index_name(None)?, type_name, zoid))
    }
}
