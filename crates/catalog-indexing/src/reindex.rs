//! In-place reindexing of a container's active index.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use catalog_types::{BatchEntry, EventSink, IndexProgress};

use crate::adapter::AdapterRegistry;
use crate::error::IndexingError;
use crate::index_manager::IndexManager;
use crate::indexer::{Destinations, Indexer};
use crate::migrate::EXISTING_PAGE_SIZE;
use crate::progress::NoOpEventSink;
use crate::scroll::IdScroll;
use crate::walker::{root_location, ContentWalker};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexOptions {
    /// Only rewrite the access-control fields
    pub security: bool,
    /// Delete every document first
    pub clean: bool,
    /// Partial updates with upsert instead of full index operations
    pub update: bool,
    /// Only index objects that have no document yet
    pub update_missing: bool,
    pub log_details: bool,
    pub memory_tracking: bool,
}

impl ReindexOptions {
    pub fn security() -> Self {
        Self {
            security: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReindexReport {
    pub alias: String,
    pub index: String,
    /// Objects visited
    pub processed: u64,
    /// Objects written
    pub indexed: u64,
    /// Objects skipped because a document already existed
    pub skipped: u64,
    /// Documents removed by `clean`
    pub cleaned: u64,
    pub failed: Vec<String>,
    pub sub_indices: Vec<String>,
    pub elapsed: Duration,
}

pub struct Reindexer {
    manager: Arc<IndexManager>,
    adapters: Arc<AdapterRegistry>,
    options: ReindexOptions,
    bulk_size: usize,
    cancel: CancellationToken,
    sink: Arc<dyn EventSink>,
}

impl Reindexer {
    pub fn new(manager: Arc<IndexManager>, adapters: Arc<AdapterRegistry>, options: ReindexOptions) -> Self {
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

    pub async fn run(&self) -> Result<ReindexReport, IndexingError> {
        let started = Instant::now();
        let manager = &self.manager;
        let client = manager.client();
        let factory = manager.factory();
        let store = factory.store();
        let registry = factory.registry();

        let index = manager.initialize().await?;
        let alias = manager.get_index_name(None)?;
        let mut report = ReindexReport {
            alias: alias.clone(),
            index: index.clone(),
            ..Default::default()
        };

        if self.options.clean {
            let response = client.delete_by_query(&index, &json!({ "match_all": {} })).await?;
            report.cleaned = response.deleted;
            info!(index = %index, deleted = response.deleted, "Cleaned index");
        }

        let existing: HashSet<String> = if self.options.update_missing && !self.options.clean {
            IdScroll::new(client.as_ref(), index.clone(), EXISTING_PAGE_SIZE)
                .collect(&self.cancel)
                .await?
        } else {
            HashSet::new()
        };

        let total = store.count_descendants(&manager.owner().zoid).ok();
        self.sink.on_progress(&IndexProgress::started(alias.clone(), total));
        info!(alias = %alias, index = %index, options = ?self.options, "Reindex started");

        let mut indexer = Indexer::new(client.clone(), Destinations::Fixed(vec![index.clone()]), self.bulk_size)
            .with_upsert(self.options.update);
        let root = manager.owner().clone();
        let location = root_location(store.as_ref(), registry, &root)?;
        let mut walker = ContentWalker::new(store.as_ref(), registry, root, location);

        while let Some(page) = walker.next_page()? {
            if self.cancel.is_cancelled() {
                return Err(IndexingError::Cancelled);
            }
            for (object, location) in page {
                report.processed += 1;
                let owns_index = registry.schema(&object.type_name).is_some_and(|s| s.sub_index);
                if owns_index {
                    report.sub_indices.push(object.zoid.clone());
                }
                if existing.contains(&object.zoid) {
                    report.skipped += 1;
                    continue;
                }
                let content_index = if owns_index {
                    Some(manager.sub_index_alias(&object.type_name, &object.zoid)?)
                } else {
                    None
                };

                let zoid = object.zoid.clone();
                let type_name = object.type_name.clone();
                let entry = if self.options.security {
                    BatchEntry::update(zoid, type_name, self.adapters.security_document(&object, &location)?)
                } else {
                    let doc = self.adapters.document(&object, &location, content_index.as_deref())?;
                    if self.options.update {
                        BatchEntry::update(zoid, type_name, doc)
                    } else {
                        BatchEntry::index(zoid, type_name, doc)
                    }
                };
                if self.options.log_details {
                    debug!(zoid = %object.zoid, path = %location.path, "Reindexing");
                }
                report.indexed += 1;
                if indexer.add(entry).await? {
                    self.sink
                        .on_progress(&IndexProgress::running(alias.clone(), report.processed, total));
                }
            }
            if self.options.memory_tracking {
                debug!(frames = walker.pending_frames(), processed = report.processed, "Memory tracking");
            }
        }

        indexer.flush().await?;
        report.failed = indexer.stats().failed.clone();
        report.elapsed = started.elapsed();
        self.sink
            .on_progress(&IndexProgress::finished(alias.clone(), report.processed, total));
        info!(
            alias = %alias,
            processed = report.processed,
            indexed = report.indexed,
            failed = report.failed.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Reindex finished"
        );
        Ok(report)
    }
}
