//! Reconciliation between the object store and the search backend.
//!
//! Two checks run per container:
//!
//! - Orphans: documents whose object no longer exists. Found by scrolling
//!   the alias and looking every page of ids up in the store.
//! - Missing: objects without a document. With a single container the
//!   store's commit-order index is scanned from a persisted cursor; with
//!   several containers the tree is walked breadth-first instead.
//!
//! Both checks have a repair step. Objects or documents that disappear
//! between check and repair are skipped.
//!
//! A last step drops sub-indices below the container alias that no registry
//! record names any more, left behind when their owner was deleted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use catalog_search::{safe_call, SearchClient, SearchRequest};
use catalog_storage::{ObjectStore, TidRow};
use catalog_types::{is_system_zoid, sub_index_alias, BatchEntry, StoredObject, UID_FIELD};

use crate::adapter::AdapterRegistry;
use crate::checkpoint::VacuumCursor;
use crate::error::IndexingError;
use crate::index_manager::{IndexManager, IndexManagerFactory};
use crate::indexer::{Destinations, Indexer};
use crate::scroll::IdScroll;
use crate::walker::{locate, ContentWalker, Location, WalkOrder};

/// Ids per orphan-check scroll page.
pub const ORPHAN_PAGE_SIZE: usize = 1000;

/// Rows per commit-order scan page, and objects per walk page.
pub const MISSING_PAGE_SIZE: usize = 1000;

/// How missing objects are looked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingStrategy {
    /// Scan the commit-order index from the container's cursor
    TidScan,
    /// Walk the container breadth-first
    ParentWalk,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VacuumReport {
    pub container: String,
    pub alias: String,
    pub orphaned: Vec<String>,
    pub orphans_removed: u64,
    pub missing: Vec<String>,
    pub repaired: u64,
    /// Physical sub-indices dropped because their owner is gone
    pub leaked_sub_indices: Vec<String>,
    pub strategy: MissingStrategy,
    pub elapsed: Duration,
}

pub struct Vacuum {
    factory: IndexManagerFactory,
    adapters: Arc<AdapterRegistry>,
    bulk_size: usize,
    page_size: usize,
    strategy: Option<MissingStrategy>,
    cursors: HashMap<String, VacuumCursor>,
    cancel: CancellationToken,
}

impl Vacuum {
    pub fn new(factory: IndexManagerFactory, adapters: Arc<AdapterRegistry>) -> Self {
        Self {
            factory,
            adapters,
            bulk_size: 50,
            page_size: MISSING_PAGE_SIZE,
            strategy: None,
            cursors: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_bulk_size(mut self, bulk_size: usize) -> Self {
        self.bulk_size = bulk_size;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Force a strategy instead of choosing by container count.
    pub fn with_strategy(mut self, strategy: MissingStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn store(&self) -> &Arc<dyn ObjectStore> {
        self.factory.store()
    }

    fn client(&self) -> &Arc<dyn SearchClient> {
        self.factory.client()
    }

    fn check_cancelled(&self) -> Result<(), IndexingError> {
        if self.cancel.is_cancelled() {
            return Err(IndexingError::Cancelled);
        }
        Ok(())
    }

    /// Containers to vacuum; `only` matches a container id or zoid.
    pub fn containers(&self, only: Option<&str>) -> Result<Vec<StoredObject>, IndexingError> {
        let containers = self.store().containers()?;
        Ok(match only {
            Some(wanted) => containers
                .into_iter()
                .filter(|c| c.id == wanted || c.zoid == wanted)
                .collect(),
            None => containers,
        })
    }

    pub fn strategy(&self) -> Result<MissingStrategy, IndexingError> {
        if let Some(strategy) = self.strategy {
            return Ok(strategy);
        }
        Ok(if self.store().containers()?.len() <= 1 {
            MissingStrategy::TidScan
        } else {
            MissingStrategy::ParentWalk
        })
    }

    /// Alias of an indexed container; `None` when it was never indexed.
    fn indexed_alias(&self, manager: &IndexManager) -> Result<Option<String>, IndexingError> {
        Ok(manager.current_record(None)?.map(|r| r.index_name))
    }

    /// Documents of `container` without a stored object.
    pub async fn check_orphans(&self, container: &StoredObject) -> Result<Vec<String>, IndexingError> {
        let manager = self.factory.for_container(container.clone());
        let Some(alias) = self.indexed_alias(&manager)? else {
            return Ok(Vec::new());
        };

        let mut orphans = Vec::new();
        let mut scroll = IdScroll::new(self.client().as_ref(), alias.clone(), ORPHAN_PAGE_SIZE);
        while let Some(page) = scroll.next_page().await? {
            if self.cancel.is_cancelled() {
                scroll.close().await?;
                return Err(IndexingError::Cancelled);
            }
            let found = self.store().existing_zoids(&page)?;
            orphans.extend(page.into_iter().filter(|id| !found.contains(id)));
        }
        orphans.sort();
        info!(alias = %alias, orphans = orphans.len(), "Orphan check done");
        Ok(orphans)
    }

    /// Delete `orphans` from every index of `container`.
    pub async fn repair_orphans(&self, container: &StoredObject, orphans: &[String]) -> Result<u64, IndexingError> {
        if orphans.is_empty() {
            return Ok(0);
        }
        let manager = self.factory.for_container(container.clone());
        let mut deleted = 0;
        for index in manager.get_indexes().await? {
            for chunk in orphans.chunks(ORPHAN_PAGE_SIZE) {
                let query = json!({ "terms": { UID_FIELD: chunk } });
                deleted += self.client().delete_by_query(&index, &query).await?.deleted;
            }
        }
        info!(container = %container.id, deleted, "Orphans removed");
        Ok(deleted)
    }

    /// Subset of `ids` with no document behind `alias`.
    async fn absent_ids(&self, alias: &str, ids: &[String]) -> Result<Vec<String>, IndexingError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let request = SearchRequest::new()
            .with_query(json!({ "terms": { UID_FIELD: ids } }))
            .with_size(ids.len())
            .without_source();
        let page = self.client().search(alias, &request, None).await?;
        let found: HashSet<String> = page.ids().into_iter().collect();
        Ok(ids.iter().filter(|id| !found.contains(*id)).cloned().collect())
    }

    /// Objects of `container` that have no document.
    pub async fn check_missing(&mut self, container: &StoredObject) -> Result<Vec<String>, IndexingError> {
        let manager = self.factory.for_container(container.clone());
        let Some(alias) = self.indexed_alias(&manager)? else {
            return Ok(Vec::new());
        };
        let missing = match self.strategy()? {
            MissingStrategy::TidScan => self.missing_by_tid_scan(container, &alias).await?,
            MissingStrategy::ParentWalk => self.missing_by_walk(container, &alias).await?,
        };
        info!(alias = %alias, missing = missing.len(), "Missing check done");
        Ok(missing)
    }

    fn cursor(&self, container: &str) -> Result<VacuumCursor, IndexingError> {
        match self.cursors.get(container) {
            Some(cursor) => Ok(cursor.clone()),
            None => VacuumCursor::load(self.store().as_ref(), container),
        }
    }

    /// Current cursor position of `container`.
    pub fn cursor_position(&self, container: &str) -> Result<(i64, Option<String>), IndexingError> {
        let cursor = self.cursor(container)?;
        Ok((cursor.last_tid, cursor.last_zoid))
    }

    /// Rescan `container` from the first commit on the next pass.
    pub fn reset_cursor(&mut self, container: &str) -> Result<(), IndexingError> {
        let mut cursor = self.cursor(container)?;
        cursor.reset();
        cursor.save(self.store().as_ref())?;
        self.cursors.insert(container.to_string(), cursor);
        info!(container, "Vacuum cursor reset");
        Ok(())
    }

    /// Commit-order scan.
    ///
    /// Rows come in `(tid, zoid)` order. A full page ending inside a tid
    /// leaves the cursor on that tid's last zoid and the rest of the tid is
    /// drained before moving to the next one. A short page ends the pass
    /// with the cursor one past its last tid; an empty one ends it in place.
    async fn missing_by_tid_scan(&mut self, container: &StoredObject, alias: &str) -> Result<Vec<String>, IndexingError> {
        let store = self.store().clone();
        let containers: HashSet<String> = store.containers()?.into_iter().map(|c| c.zoid).collect();
        let mut cursor = self.cursor(&container.zoid)?;
        let mut missing = Vec::new();
        let mut scanned = 0u64;

        loop {
            self.check_cancelled()?;
            let draining = cursor.last_zoid.clone();
            let mut rows: Vec<TidRow> = match &draining {
                Some(after) => store.scan_tid_after(cursor.last_tid, after, self.page_size)?,
                None => store.scan_tids(cursor.last_tid, self.page_size)?,
            };
            let full = rows.len() == self.page_size;

            match (draining.is_some(), rows.last().cloned()) {
                (true, Some(last)) if full => cursor.advance(last.tid, Some(last.zoid)),
                (true, _) => cursor.advance(cursor.last_tid + 1, None),
                (false, None) => break,
                (false, Some(last)) if full => cursor.advance(last.tid, Some(last.zoid)),
                (false, Some(last)) => cursor.advance(last.tid + 1, None),
            }

            scanned += rows.len() as u64;
            rows.retain(|row| !is_system_zoid(&row.zoid) && !containers.contains(&row.zoid));
            let ids: Vec<String> = rows.into_iter().map(|row| row.zoid).collect();
            for zoid in self.absent_ids(alias, &ids).await? {
                if self.belongs_to(&zoid, container)?.is_some() {
                    missing.push(zoid);
                }
            }

            if draining.is_none() && !full {
                break;
            }
        }

        cursor.passes += 1;
        cursor.save(store.as_ref())?;
        debug!(
            container = %container.zoid,
            scanned,
            last_tid = cursor.last_tid,
            passes = cursor.passes,
            "Commit-order scan pass done"
        );
        self.cursors.insert(container.zoid.clone(), cursor);
        Ok(missing)
    }

    /// Location of `zoid` when it should have a document in `container`'s index.
    fn belongs_to(&self, zoid: &str, container: &StoredObject) -> Result<Option<Location>, IndexingError> {
        let store = self.store();
        let Some(object) = store.get_object(zoid)? else {
            return Ok(None);
        };
        let location = locate(store.as_ref(), self.factory.registry(), &object)?;
        Ok(location.filter(|l| {
            l.container == container.zoid && l.sub_index_owner.is_none() && !l.is_container()
        }))
    }

    async fn missing_by_walk(&self, container: &StoredObject, alias: &str) -> Result<Vec<String>, IndexingError> {
        let store = self.store().clone();
        let registry = self.factory.registry().clone();
        let mut walker = ContentWalker::new(
            store.as_ref(),
            registry.as_ref(),
            container.clone(),
            Location::container_root(container),
        )
        .with_order(WalkOrder::BreadthFirst)
        .with_page_size(self.page_size);

        let mut missing = Vec::new();
        while let Some(page) = walker.next_page()? {
            self.check_cancelled()?;
            let ids: Vec<String> = page.into_iter().map(|(object, _)| object.zoid).collect();
            missing.extend(self.absent_ids(alias, &ids).await?);
        }
        Ok(missing)
    }

    /// Index `missing` objects of `container`. Returns how many were written.
    pub async fn repair_missing(&self, container: &StoredObject, missing: &[String]) -> Result<u64, IndexingError> {
        if missing.is_empty() {
            return Ok(0);
        }
        let manager = Arc::new(self.factory.for_container(container.clone()));
        let mut indexer = Indexer::new(
            self.client().clone(),
            Destinations::Managed(manager.clone()),
            self.bulk_size,
        );
        let registry = self.factory.registry();
        for zoid in missing {
            // Deleted since the check
            let Some(location) = self.belongs_to(zoid, container)? else {
                debug!(zoid = %zoid, "Skipping vanished object");
                continue;
            };
            let Some(object) = self.store().get_object(zoid)? else {
                continue;
            };
            let content_index = if registry.schema(&object.type_name).is_some_and(|s| s.sub_index) {
                Some(manager.sub_index_alias(&object.type_name, &object.zoid)?)
            } else {
                None
            };
            let doc = self.adapters.document(&object, &location, content_index.as_deref())?;
            indexer
                .add(BatchEntry::index(object.zoid.clone(), object.type_name.clone(), doc))
                .await?;
        }
        indexer.flush().await?;
        let stats = indexer.stats();
        info!(container = %container.id, repaired = stats.processed, failed = stats.failed.len(), "Missing objects indexed");
        Ok(stats.processed)
    }

    /// Physical sub-indices below `container`'s alias whose alias no
    /// registry record names.
    pub async fn check_leaked_sub_indices(&self, container: &StoredObject) -> Result<Vec<String>, IndexingError> {
        let manager = self.factory.for_container(container.clone());
        let Some(alias) = self.indexed_alias(&manager)? else {
            return Ok(Vec::new());
        };
        let live: HashSet<String> = self
            .store()
            .registry_records()?
            .into_iter()
            .map(|(_, record)| record.index_name)
            .collect();

        let mut leaked = Vec::new();
        for schema in self.factory.registry().sub_index_types() {
            let prefix = sub_index_alias(&alias, &schema.type_name, "");
            for name in self.client().list_indexes(&prefix).await? {
                let Some((sub_alias, version)) = name.rsplit_once('_') else {
                    continue;
                };
                if version.parse::<u32>().is_ok() && !live.contains(sub_alias) {
                    leaked.push(name);
                }
            }
        }
        leaked.sort();
        if !leaked.is_empty() {
            info!(alias = %alias, leaked = leaked.len(), "Leaked sub-indices found");
        }
        Ok(leaked)
    }

    /// Delete the physical indices in `names`.
    pub async fn drop_sub_indices(&self, names: &[String]) -> Result<(), IndexingError> {
        for name in names {
            safe_call("delete_index", self.client().delete_index(name)).await?;
            info!(index = %name, "Dropped leaked sub-index");
        }
        Ok(())
    }

    /// Check and repair one container.
    pub async fn vacuum_container(&mut self, container: &StoredObject) -> Result<VacuumReport, IndexingError> {
        let started = Instant::now();
        let manager = self.factory.for_container(container.clone());
        let alias = self.indexed_alias(&manager)?.unwrap_or_default();
        let strategy = self.strategy()?;

        let orphaned = self.check_orphans(container).await?;
        let orphans_removed = self.repair_orphans(container, &orphaned).await?;
        let missing = self.check_missing(container).await?;
        let repaired = self.repair_missing(container, &missing).await?;
        let leaked_sub_indices = self.check_leaked_sub_indices(container).await?;
        self.drop_sub_indices(&leaked_sub_indices).await?;

        Ok(VacuumReport {
            container: container.zoid.clone(),
            alias,
            orphaned,
            orphans_removed,
            missing,
            repaired,
            leaked_sub_indices,
            strategy,
            elapsed: started.elapsed(),
        })
    }

    /// One pass over every container, or the one named by `only`.
    pub async fn run_once(&mut self, only: Option<&str>) -> Result<Vec<VacuumReport>, IndexingError> {
        let containers = self.containers(only)?;
        if containers.is_empty() {
            warn!(container = ?only, "No container to vacuum");
        }
        let mut reports = Vec::with_capacity(containers.len());
        for container in &containers {
            self.check_cancelled()?;
            reports.push(self.vacuum_container(container).await?);
        }
        Ok(reports)
    }

    /// Repeat passes until cancelled, sleeping `sleep` plus up to 10% jitter
    /// between them. Returns the number of completed passes.
    pub async fn run_continuous(&mut self, only: Option<&str>, sleep: Duration) -> Result<u64, IndexingError> {
        let mut passes = 0;
        loop {
            match self.run_once(only).await {
                Ok(reports) => {
                    passes += 1;
                    let orphans: usize = reports.iter().map(|r| r.orphaned.len()).sum();
                    let missing: usize = reports.iter().map(|r| r.missing.len()).sum();
                    info!(pass = passes, orphans, missing, "Vacuum pass complete");
                }
                Err(IndexingError::Cancelled) => break,
                Err(e) => return Err(e),
            }

            let delay = sleep + jitter(sleep / 10);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Vacuum stopped");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        Ok(passes)
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_ms))
}
