//! Zero-downtime index migration.
//!
//! A migration builds the next physical index next to the live one, brings
//! it up to date with the object store and then moves the alias:
//!
//! 1. Provision: record the pending version and create the next index with
//!    the freshly computed mapping and the live index's settings.
//! 2. Dual writes start on their own: managed writers resolve both indices
//!    from the registry on every flush.
//! 3. Snapshot the ids of the live index and, unless a full rebuild was
//!    asked for, copy its documents over (create-only, so dual-written
//!    documents win).
//! 4. Walk the container. Objects absent from the snapshot are indexed in
//!    full; the others only get the fields whose mapping changed.
//! 5. Ids left in the snapshot that no longer exist in the store are deleted.
//! 6. Swap the alias and promote the version in one critical section, then
//!    retire the old index.
//!
//! A failure before step 6 cancels the migration (the pending version is
//! cleared, the next index is left for a forced rerun to reclaim). A
//! failure during step 6 is reported as [`IndexingError::SwapFailed`].

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use catalog_search::settings::next_index_settings;
use catalog_search::{field_diff, safe_call, top_level_fields};
use catalog_storage::Transaction;
use catalog_types::{BatchEntry, EventSink, IndexProgress, SECURITY_FIELDS};

use crate::adapter::{project, AdapterRegistry};
use crate::error::IndexingError;
use crate::index_manager::IndexManager;
use crate::indexer::{Destinations, Indexer};
use crate::progress::NoOpEventSink;
use crate::scroll::IdScroll;
use crate::walker::{root_location, ContentWalker};

/// Ids fetched per scroll page of the live index.
pub const EXISTING_PAGE_SIZE: usize = 3000;

/// Snapshot ids verified against the store per lookup.
pub const ORPHAN_CHECK_CHUNK: usize = 1000;

/// Walk pages between two memory-tracking log lines.
const MEMORY_LOG_INTERVAL: u64 = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Rebuild every document instead of copying and patching
    pub full: bool,
    /// Reclaim a pending or leftover next index
    pub force: bool,
    /// Also rewrite the access-control fields of every document
    pub reindex_security: bool,
    /// Copy and swap only: no walk, no orphan sweep
    pub mapping_only: bool,
    /// Log every missing and orphaned id
    pub log_details: bool,
    /// Periodically log the snapshot size and walk depth
    pub memory_tracking: bool,
}

impl MigrationOptions {
    pub fn full() -> Self {
        Self {
            full: true,
            ..Default::default()
        }
    }

    pub fn mapping_only() -> Self {
        Self {
            mapping_only: true,
            ..Default::default()
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// What a migration did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationReport {
    pub alias: String,
    pub old_index: String,
    pub new_index: String,
    /// Ids in the live index when the snapshot was taken
    pub existing: u64,
    /// Documents the backend copied
    pub copied: u64,
    /// Objects visited by the walk
    pub processed: u64,
    /// Objects that had no document
    pub missing: Vec<String>,
    /// Documents patched with changed fields
    pub updated: u64,
    /// Documents whose object is gone
    pub orphaned: Vec<String>,
    /// Ids the indexer gave up on
    pub failed: Vec<String>,
    pub mapping_diff: BTreeSet<String>,
    /// Sub-index owners met during the walk
    pub sub_indices: Vec<String>,
    pub elapsed: Duration,
}

/// State carried from provisioning to the swap.
#[derive(Debug)]
pub struct MigrationRun {
    existing: HashSet<String>,
    report: MigrationReport,
    started: Instant,
}

impl MigrationRun {
    pub fn new_index(&self) -> &str {
        &self.report.new_index
    }

    pub fn old_index(&self) -> &str {
        &self.report.old_index
    }

    pub fn report(&self) -> &MigrationReport {
        &self.report
    }
}

pub struct Migrator {
    manager: Arc<IndexManager>,
    adapters: Arc<AdapterRegistry>,
    options: MigrationOptions,
    bulk_size: usize,
    cancel: CancellationToken,
    sink: Arc<dyn EventSink>,
}

impl Migrator {
    pub fn new(manager: Arc<IndexManager>, adapters: Arc<AdapterRegistry>, options: MigrationOptions) -> Self {
        Self {
            manager,
            adapters,
            options,
            bulk_size: 50,
            cancel: CancellationToken::new(),
            sink: Arc::new(NoOpEventSink),
        }
    }

    pub fn with_bulk_size(mut self, bulk_size: usize) -> Self {
        self.bulk_size = bulk_size;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn check_cancelled(&self) -> Result<(), IndexingError> {
        if self.cancel.is_cancelled() {
            return Err(IndexingError::Cancelled);
        }
        Ok(())
    }

    /// Run every phase. Failures before the swap cancel the migration.
    pub async fn run(&self) -> Result<MigrationReport, IndexingError> {
        let mut run = match self.provision().await {
            Ok(run) => run,
            // Someone else's migration: leave its pending version alone
            Err(e @ IndexingError::MigrationInProgress(_)) => return Err(e),
            Err(e) => {
                self.cancel_after(&e);
                return Err(e);
            }
        };
        if let Err(e) = self.populate(&mut run).await {
            self.cancel_after(&e);
            return Err(e);
        }
        self.finish(run).await
    }

    fn cancel_after(&self, cause: &IndexingError) {
        warn!(error = %cause, "Migration failed, cancelling");
        if let Err(e) = self.cancel() {
            error!(error = %e, "Could not cancel migration");
        }
    }

    /// Phase 1: stage the pending version and create the next index.
    pub async fn provision(&self) -> Result<MigrationRun, IndexingError> {
        self.check_cancelled()?;
        let manager = &self.manager;
        let client = manager.client();
        let store = manager.factory().store();

        let old_index = manager.initialize().await?;
        let alias = manager.get_index_name(None)?;

        if let Some(stale) = manager.get_migration_index_name()? {
            if !self.options.force {
                return Err(IndexingError::MigrationInProgress(alias));
            }
            warn!(alias = %alias, index = %stale, "Dropping pending migration index");
            safe_call("delete_index", client.delete_index(&stale)).await?;
        }

        let mapping = manager.factory().registry().compute_mapping()?;

        let mut txn = Transaction::new();
        let new_index = manager.start_migration(&mut txn, self.options.force)?;
        if client.index_exists(&new_index).await? {
            if !self.options.force {
                return Err(IndexingError::MigrationInProgress(alias));
            }
            warn!(index = %new_index, "Dropping leftover index of a cancelled migration");
            client.delete_index(&new_index).await?;
        }

        let live_settings = client.get_settings(&old_index).await?;
        let settings = next_index_settings(&live_settings, &manager.factory().naming().index_settings);
        client
            .create_index(&new_index, Some(&mapping.to_value()), Some(&settings))
            .await?;
        store.commit(txn)?;

        info!(alias = %alias, from = %old_index, to = %new_index, "Migration started");
        self.sink.on_progress(&IndexProgress::started(alias.clone(), None));

        Ok(MigrationRun {
            existing: HashSet::new(),
            report: MigrationReport {
                alias,
                old_index,
                new_index,
                ..Default::default()
            },
            started: Instant::now(),
        })
    }

    /// Phases 3 to 5: snapshot and copy, walk, orphan sweep.
    pub async fn populate(&self, run: &mut MigrationRun) -> Result<(), IndexingError> {
        let client = self.manager.client();

        if !self.options.mapping_only {
            run.existing = IdScroll::new(client.as_ref(), run.report.old_index.clone(), EXISTING_PAGE_SIZE)
                .collect(&self.cancel)
                .await?;
            run.report.existing = run.existing.len() as u64;
            debug!(existing = run.report.existing, "Snapshot of live ids taken");
        }

        if !self.options.full || self.options.mapping_only {
            let copied = client.reindex(&run.report.old_index, &run.report.new_index).await?;
            run.report.copied = copied.created;
            if copied.version_conflicts > 0 {
                debug!(
                    conflicts = copied.version_conflicts,
                    "Documents already written to the next index were kept"
                );
            }
            info!(copied = copied.created, "Copied live documents");
        }
        self.check_cancelled()?;

        if self.options.mapping_only {
            return Ok(());
        }
        self.walk(run).await?;
        self.sweep_orphans(run).await
    }

    /// Phase 4.
    async fn walk(&self, run: &mut MigrationRun) -> Result<(), IndexingError> {
        let manager = &self.manager;
        let client = manager.client();
        let factory = manager.factory();
        let store = factory.store();
        let registry = factory.registry();

        let old_mapping = client.get_mapping(&run.report.old_index).await?;
        let new_mapping = client.get_mapping(&run.report.new_index).await?;
        run.report.mapping_diff = field_diff(&old_mapping, &new_mapping);
        let mut patch_fields = top_level_fields(&run.report.mapping_diff);
        if self.options.reindex_security {
            patch_fields.extend(SECURITY_FIELDS.iter().map(|f| f.to_string()));
        }
        if !patch_fields.is_empty() {
            info!(fields = ?patch_fields, "Fields to rewrite on existing documents");
        }

        let root = manager.owner().clone();
        let root_location = root_location(store.as_ref(), registry, &root)?;

        let mut indexer = Indexer::new(
            client.clone(),
            Destinations::Fixed(vec![run.report.new_index.clone()]),
            self.bulk_size,
        );
        let mut walker = ContentWalker::new(store.as_ref(), registry, root, root_location);
        let mut pages = 0u64;

        while let Some(page) = walker.next_page()? {
            self.check_cancelled()?;
            pages += 1;
            for (object, location) in page {
                let owns_index = registry.schema(&object.type_name).is_some_and(|s| s.sub_index);
                let content_index = if owns_index {
                    run.report.sub_indices.push(object.zoid.clone());
                    Some(manager.sub_index_alias(&object.type_name, &object.zoid)?)
                } else {
                    None
                };

                let known = run.existing.remove(&object.zoid);
                let entry = if !known || self.options.full {
                    if !known {
                        if self.options.log_details {
                            info!(zoid = %object.zoid, path = %location.path, "Missing document");
                        }
                        run.report.missing.push(object.zoid.clone());
                    }
                    let doc = self.adapters.document(&object, &location, content_index.as_deref())?;
                    Some(BatchEntry::index(object.zoid.clone(), object.type_name.clone(), doc))
                } else if !patch_fields.is_empty() {
                    let doc = self.adapters.document(&object, &location, content_index.as_deref())?;
                    run.report.updated += 1;
                    let fields = project(&doc, patch_fields.iter().map(String::as_str));
                    Some(BatchEntry::update(object.zoid.clone(), object.type_name.clone(), fields))
                } else {
                    None
                };

                run.report.processed += 1;
                if let Some(entry) = entry {
                    if indexer.add(entry).await? {
                        self.emit_running(run);
                    }
                }
            }

            if self.options.memory_tracking && pages % MEMORY_LOG_INTERVAL == 0 {
                info!(
                    snapshot = run.existing.len(),
                    frames = walker.pending_frames(),
                    processed = run.report.processed,
                    "Memory tracking"
                );
            }
        }

        indexer.flush().await?;
        self.emit_running(run);
        run.report.failed.extend(indexer.stats().failed.iter().cloned());
        info!(
            processed = run.report.processed,
            missing = run.report.missing.len(),
            updated = run.report.updated,
            "Walk finished"
        );
        Ok(())
    }

    /// Phase 5.
    async fn sweep_orphans(&self, run: &mut MigrationRun) -> Result<(), IndexingError> {
        let store = self.manager.factory().store();
        let mut leftover: Vec<String> = run.existing.drain().collect();
        leftover.sort();

        let mut indexer = Indexer::new(
            self.manager.client().clone(),
            Destinations::Fixed(vec![run.report.new_index.clone()]),
            self.bulk_size,
        );
        for chunk in leftover.chunks(ORPHAN_CHECK_CHUNK) {
            self.check_cancelled()?;
            let found = store.existing_zoids(chunk)?;
            for id in chunk.iter().filter(|id| !found.contains(*id)) {
                if self.options.log_details {
                    info!(zoid = %id, "Orphaned document");
                }
                run.report.orphaned.push(id.clone());
                indexer.add(BatchEntry::delete(id.clone(), String::new(), None)).await?;
            }
        }
        indexer.flush().await?;
        run.report.failed.extend(indexer.stats().failed.iter().cloned());
        if !run.report.orphaned.is_empty() {
            info!(orphaned = run.report.orphaned.len(), "Removed orphaned documents");
        }
        Ok(())
    }

    fn emit_running(&self, run: &MigrationRun) {
        self.sink.on_progress(&IndexProgress::running(
            run.report.alias.clone(),
            run.report.processed,
            None,
        ));
    }

    /// Phase 6: promote the version and move the alias, then retire the old index.
    pub async fn finish(&self, run: MigrationRun) -> Result<MigrationReport, IndexingError> {
        let MigrationRun { mut report, started, .. } = run;
        let manager = &self.manager;
        let client = manager.client();
        let store = manager.factory().store();

        {
            let _guard = manager.lock().await.map_err(swap_failed)?;
            let mut txn = Transaction::new();
            manager.finish_migration(&mut txn).map_err(swap_failed)?;
            client
                .alias_swap(&report.alias, Some(&report.old_index), &report.new_index)
                .await
                .map_err(swap_failed)?;
            if let Err(e) = store.commit(txn) {
                error!(alias = %report.alias, error = %e, "Registry commit failed after swap, reverting alias");
                if let Err(revert) = client
                    .alias_swap(&report.alias, Some(&report.new_index), &report.old_index)
                    .await
                {
                    error!(alias = %report.alias, error = %revert, "Alias revert failed");
                }
                return Err(swap_failed(e));
            }
        }

        safe_call("close_index", client.close_index(&report.old_index)).await?;
        safe_call("delete_index", client.delete_index(&report.old_index)).await?;

        report.elapsed = started.elapsed();
        info!(
            alias = %report.alias,
            index = %report.new_index,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Migration finished"
        );
        self.sink.on_progress(&IndexProgress::finished(
            report.alias.clone(),
            report.processed,
            Some(report.processed),
        ));
        Ok(report)
    }

    /// Clear the pending version. The next physical index stays.
    pub fn cancel(&self) -> Result<(), IndexingError> {
        let mut txn = Transaction::new();
        self.manager.cancel_migration(&mut txn)?;
        if !txn.is_empty() {
            self.manager.factory().store().commit(txn)?;
            warn!(owner = %self.manager.owner().zoid, "Migration cancelled");
        }
        Ok(())
    }
}

fn swap_failed(err: impl std::fmt::Display) -> IndexingError {
    IndexingError::SwapFailed(err.to_string())
}

/// Install the computed mapping on the active index without migrating and
/// touch every document so new fields get indexed.
pub async fn force_mapping(manager: &IndexManager) -> Result<u64, IndexingError> {
    let client = manager.client();
    let index = manager.initialize().await?;
    let mapping = manager.factory().registry().compute_mapping()?;
    client.put_mapping(&index, &mapping.to_value()).await?;
    let response = client
        .update_by_query(&index, &json!({ "match_all": {} }), None)
        .await?;
    if response.version_conflicts > 0 {
        warn!(index = %index, conflicts = response.version_conflicts, "Conflicts while touching documents");
    }
    info!(index = %index, updated = response.updated, "Mapping forced");
    Ok(response.updated)
}

/// Move to a fresh index with the computed mapping, copying documents as is.
pub async fn update_mapping(
    manager: Arc<IndexManager>,
    adapters: Arc<AdapterRegistry>,
    force: bool,
) -> Result<MigrationReport, IndexingError> {
    Migrator::new(manager, adapters, MigrationOptions::mapping_only().with_force(force))
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use catalog_search::{InMemoryBackend, MappingRegistry, SearchClient};
    use catalog_storage::{ObjectStore, Storage};
    use catalog_types::{CatalogType, ContentSchema, IndexField, StoredObject, ROOT_ZOID};
    use serde_json::Value;
    use tempfile::TempDir;

    use super::*;
    use crate::index_manager::{IndexManagerFactory, IndexNaming};
    use crate::progress::{BroadcastEventSink, CatalogEvent};
    use crate::writer::CatalogWriter;

    struct Fixture {
        factory: IndexManagerFactory,
        adapters: Arc<AdapterRegistry>,
        backend: Arc<InMemoryBackend>,
        store: Arc<Storage>,
        _dir: TempDir,
    }

    impl Fixture {
        fn manager(&self) -> Arc<IndexManager> {
            let container = self.store.get_object("c0").unwrap().unwrap();
            Arc::new(self.factory.for_container(container))
        }

        fn migrator(&self, options: MigrationOptions) -> Migrator {
            Migrator::new(self.manager(), self.adapters.clone(), options).with_bulk_size(7)
        }

        fn writer(&self) -> CatalogWriter {
            CatalogWriter::new(self.factory.clone(), self.adapters.clone())
        }
    }

    fn schemas(item_type: CatalogType) -> Vec<ContentSchema> {
        vec![
            ContentSchema::new("Item").with_field(IndexField::new("item", item_type)),
            ContentSchema::new("Archive").with_sub_index(true),
        ]
    }

    fn fixture_with(dir: TempDir, store: Arc<Storage>, backend: Arc<InMemoryBackend>, item_type: CatalogType) -> Fixture {
        let registry = Arc::new(MappingRegistry::new(schemas(item_type)));
        let adapters = Arc::new(AdapterRegistry::from_registry(&registry));
        let factory = IndexManagerFactory::new(
            store.clone(),
            backend.clone(),
            registry,
            IndexNaming::new("guillotina-", "db"),
        );
        Fixture {
            factory,
            adapters,
            backend,
            store,
            _dir: dir,
        }
    }

    async fn fixture(items: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Storage::open(dir.path()).unwrap());
        let backend = Arc::new(InMemoryBackend::new());
        let fx = fixture_with(dir, store, backend, CatalogType::Int);
        let writer = fx.writer();
        writer
            .object_added(StoredObject::new("c0", Some(ROOT_ZOID.into()), "c", "Container"))
            .await
            .unwrap();
        for i in 0..items {
            writer
                .object_added(
                    StoredObject::new(format!("i{:03}", i), Some("c0".into()), format!("item-{:03}", i), "Item")
                        .with_attribute("item", json!(i)),
                )
                .await
                .unwrap();
        }
        fx
    }

    #[tokio::test]
    async fn test_empty_container_migration_swaps_versions() {
        let fx = fixture(0).await;
        let report = fx.migrator(MigrationOptions::default()).run().await.unwrap();

        assert_eq!(report.old_index, "guillotina-db-c_1");
        assert_eq!(report.new_index, "guillotina-db-c_2");
        let record = fx.store.load_registry("c0").unwrap().unwrap();
        assert_eq!(record.index_version, 2);
        assert!(record.next_index_version.is_none());
        assert!(!fx.backend.index_exists("guillotina-db-c_1").await.unwrap());
        assert_eq!(
            fx.backend.get_alias("guillotina-db-c").await.unwrap(),
            vec!["guillotina-db-c_2"]
        );
    }

    #[tokio::test]
    async fn test_migration_copies_and_finds_missing() {
        let fx = fixture(20).await;
        fx.backend
            .bulk(
                &[catalog_search::BulkOp::Delete {
                    index: "guillotina-db-c_1".into(),
                    id: "i005".into(),
                }],
                true,
            )
            .await
            .unwrap();

        let report = fx.migrator(MigrationOptions::default()).run().await.unwrap();
        assert_eq!(report.existing, 19);
        assert_eq!(report.copied, 19);
        assert_eq!(report.processed, 20);
        assert_eq!(report.missing, vec!["i005"]);
        assert!(report.orphaned.is_empty());
        assert!(report.mapping_diff.is_empty());
        assert_eq!(fx.backend.count("guillotina-db-c", None).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_orphans_are_not_carried_over() {
        let fx = fixture(3).await;
        fx.backend
            .bulk(
                &[catalog_search::BulkOp::Index {
                    index: "guillotina-db-c_1".into(),
                    id: "foobar".into(),
                    doc: json!({"uuid": "foobar"}),
                }],
                true,
            )
            .await
            .unwrap();

        let report = fx.migrator(MigrationOptions::default()).run().await.unwrap();
        assert_eq!(report.orphaned, vec!["foobar"]);
        assert_eq!(fx.backend.doc_ids("guillotina-db-c"), vec!["i000", "i001", "i002"]);
    }

    #[tokio::test]
    async fn test_full_rebuild_skips_copy() {
        let fx = fixture(4).await;
        let report = fx.migrator(MigrationOptions::full()).run().await.unwrap();
        assert_eq!(report.copied, 0);
        assert!(report.missing.is_empty());
        assert_eq!(fx.backend.count("guillotina-db-c", None).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_changed_field_is_patched() {
        let fx = fixture(3).await;
        // same store and backend, `item` now declared as a float
        let Fixture { store, backend, _dir, .. } = fx;
        let fx = fixture_with(_dir, store, backend, CatalogType::Float);

        let report = fx.migrator(MigrationOptions::default()).run().await.unwrap();
        assert!(report.mapping_diff.contains("item"));
        assert_eq!(report.updated, 3);
        let mapping = fx.backend.get_mapping("guillotina-db-c").await.unwrap();
        assert_eq!(mapping["properties"]["item"]["type"], "float");
    }

    #[tokio::test]
    async fn test_pending_migration_requires_force() {
        let fx = fixture(1).await;
        let migrator = fx.migrator(MigrationOptions::default());
        let run = migrator.provision().await.unwrap();
        assert_eq!(run.new_index(), "guillotina-db-c_2");

        let err = fx.migrator(MigrationOptions::default()).run().await.unwrap_err();
        assert!(matches!(err, IndexingError::MigrationInProgress(_)));
        // the pending migration was left untouched
        assert!(fx.store.load_registry("c0").unwrap().unwrap().is_migrating());

        let report = fx
            .migrator(MigrationOptions::default().with_force(true))
            .run()
            .await
            .unwrap();
        assert_eq!(report.new_index, "guillotina-db-c_2");
        assert_eq!(fx.backend.count("guillotina-db-c", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_migration_clears_pending_version() {
        let fx = fixture(2).await;
        let cancel = CancellationToken::new();
        let migrator = fx.migrator(MigrationOptions::default()).with_cancel(cancel.clone());
        let mut run = migrator.provision().await.unwrap();
        cancel.cancel();

        let err = migrator.populate(&mut run).await.unwrap_err();
        assert!(matches!(err, IndexingError::Cancelled));
        migrator.cancel().unwrap();

        let record = fx.store.load_registry("c0").unwrap().unwrap();
        assert_eq!(record.index_version, 1);
        assert!(!record.is_migrating());
        // the next index stays until a forced run reclaims it
        assert!(fx.backend.index_exists("guillotina-db-c_2").await.unwrap());
        assert_eq!(
            fx.backend.get_alias("guillotina-db-c").await.unwrap(),
            vec!["guillotina-db-c_1"]
        );
    }

    #[tokio::test]
    async fn test_dual_write_during_migration() {
        let fx = fixture(2).await;
        let migrator = fx.migrator(MigrationOptions::default());
        let mut run = migrator.provision().await.unwrap();

        fx.writer()
            .object_added(StoredObject::new("new", Some("c0".into()), "new", "Item"))
            .await
            .unwrap();
        assert!(fx.backend.get("guillotina-db-c_1", "new").await.is_ok());
        assert!(fx.backend.get("guillotina-db-c_2", "new").await.is_ok());

        migrator.populate(&mut run).await.unwrap();
        let report = migrator.finish(run).await.unwrap();
        assert!(report.missing.is_empty());
        assert!(fx.backend.get("guillotina-db-c_2", "new").await.is_ok());
        assert!(!fx.backend.index_exists("guillotina-db-c_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_sub_index_owners_reported() {
        let fx = fixture(1).await;
        fx.writer()
            .object_added(StoredObject::new("a1", Some("c0".into()), "archive", "Archive"))
            .await
            .unwrap();
        let report = fx.migrator(MigrationOptions::default()).run().await.unwrap();
        assert_eq!(report.sub_indices, vec!["a1"]);
    }

    #[tokio::test]
    async fn test_progress_events() {
        let fx = fixture(10).await;
        let sink = Arc::new(BroadcastEventSink::new(64));
        let mut rx = sink.subscribe();
        fx.migrator(MigrationOptions::full())
            .with_sink(sink.clone())
            .run()
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(CatalogEvent::Progress(p)) = rx.try_recv() {
            events.push(p);
        }
        assert_eq!(events.first().unwrap().processed, 0);
        assert!(events.last().unwrap().is_completed());
        assert!(events.len() >= 3);
    }

    #[tokio::test]
    async fn test_mapping_only_and_force_mapping() {
        let fx = fixture(3).await;
        let report = update_mapping(fx.manager(), fx.adapters.clone(), false).await.unwrap();
        assert_eq!(report.copied, 3);
        assert_eq!(report.processed, 0);
        assert_eq!(fx.backend.count("guillotina-db-c", None).await.unwrap(), 3);

        let touched = force_mapping(&fx.manager()).await.unwrap();
        assert_eq!(touched, 3);
        let mapping: Value = fx.backend.get_mapping("guillotina-db-c").await.unwrap();
        assert_eq!(mapping["dynamic"], false);
    }
}
