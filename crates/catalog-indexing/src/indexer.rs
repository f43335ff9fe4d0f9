//! Buffered bulk writer.
//!
//! Entries accumulate until `bulk_size` is reached or the caller flushes.
//! Each flush resolves its destinations once and sends the same batch to
//! every one of them, so a migration's next index receives every write made
//! while it is pending.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use catalog_search::{safe_call, BulkOp, BulkResponse, SearchClient, SearchError};
use catalog_types::{BatchAction, BatchEntry, PATH_FIELD};

use crate::error::IndexingError;
use crate::index_manager::IndexManager;

/// Attempts per flush before its ids are recorded as failed.
pub const FLUSH_ATTEMPTS: u32 = 5;

/// Pause between flush attempts.
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Backend-side retries of a partial update racing another write.
pub const RETRY_ON_CONFLICT: u32 = 3;

/// Where a flush goes.
#[derive(Debug, Clone)]
pub enum Destinations {
    /// Active index plus the pending migration index, captured per flush
    Managed(Arc<IndexManager>),
    /// Exactly these physical indices
    Fixed(Vec<String>),
}

impl Destinations {
    pub async fn resolve(&self) -> Result<Vec<String>, IndexingError> {
        match self {
            Destinations::Managed(manager) => manager.get_indexes().await,
            Destinations::Fixed(indexes) => Ok(indexes.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexerStats {
    /// Entries written successfully
    pub processed: u64,
    pub flushes: u64,
    pub retries: u64,
    /// Ids that failed permanently, in flush order
    pub failed: Vec<String>,
}

pub struct Indexer {
    client: Arc<dyn SearchClient>,
    destinations: Destinations,
    bulk_size: usize,
    refresh: bool,
    upsert: bool,
    retry_delay: Duration,
    buffer: Vec<BatchEntry>,
    stats: IndexerStats,
}

impl Indexer {
    pub fn new(client: Arc<dyn SearchClient>, destinations: Destinations, bulk_size: usize) -> Self {
        let bulk_size = bulk_size.max(1);
        Self {
            client,
            destinations,
            bulk_size,
            refresh: false,
            upsert: false,
            retry_delay: RETRY_DELAY,
            buffer: Vec::with_capacity(bulk_size),
            stats: IndexerStats::default(),
        }
    }

    /// Ask the backend to make every flush visible immediately.
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Partial updates create the document when it is absent.
    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> &IndexerStats {
        &self.stats
    }

    /// Buffer `entry`; returns true when the buffer filled up and was flushed.
    pub async fn add(&mut self, entry: BatchEntry) -> Result<bool, IndexingError> {
        self.buffer.push(entry);
        if self.buffer.len() >= self.bulk_size {
            self.flush().await?;
            return Ok(true);
        }
        Ok(false)
    }

    fn bulk_ops(&self, entries: &[BatchEntry], indexes: &[String]) -> Vec<BulkOp> {
        let mut ops = Vec::with_capacity(entries.len() * indexes.len());
        for index in indexes {
            for entry in entries {
                let op = match &entry.action {
                    BatchAction::Index(doc) => BulkOp::Index {
                        index: index.clone(),
                        id: entry.id.clone(),
                        doc: Value::Object(doc.clone()),
                    },
                    BatchAction::Update(fields) => BulkOp::Update {
                        index: index.clone(),
                        id: entry.id.clone(),
                        doc: Value::Object(fields.clone()),
                        doc_as_upsert: self.upsert,
                        retry_on_conflict: RETRY_ON_CONFLICT,
                    },
                    BatchAction::Delete { .. } => BulkOp::Delete {
                        index: index.clone(),
                        id: entry.id.clone(),
                    },
                };
                ops.push(op);
            }
        }
        ops
    }

    /// Send one bulk, retrying transient failures with a constant pause.
    /// `None` when every attempt failed.
    async fn send(&mut self, ops: &[BulkOp]) -> Option<BulkResponse> {
        let mut backoff = Constant::new(self.retry_delay);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.bulk(ops, self.refresh).await {
                Ok(response) => return Some(response),
                Err(e) if e.is_transient() && attempt < FLUSH_ATTEMPTS => {
                    let delay = backoff.next_backoff().unwrap_or(self.retry_delay);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Bulk request failed, retrying"
                    );
                    self.stats.retries += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(attempt, error = %e, ops = ops.len(), "Bulk request failed permanently");
                    return None;
                }
            }
        }
    }

    /// Write everything buffered. Returns the number of entries flushed.
    pub async fn flush(&mut self) -> Result<usize, IndexingError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let entries = std::mem::take(&mut self.buffer);
        let indexes = self.destinations.resolve().await?;
        let ops = self.bulk_ops(&entries, &indexes);
        self.stats.flushes += 1;

        // Subtree deletes go first so a descendant re-indexed in this batch survives
        for entry in &entries {
            if let BatchAction::Delete { path: Some(path) } = &entry.action {
                self.delete_descendants(&indexes, path).await?;
            }
        }

        let mut failed: Vec<String> = match self.send(&ops).await {
            Some(response) => response.failed().map(|item| {
                debug!(
                    id = %item.id,
                    index = %item.index,
                    status = item.status,
                    error = item.error.as_deref().unwrap_or_default(),
                    "Bulk item failed"
                );
                item.id.clone()
            }).collect(),
            None => entries.iter().map(|e| e.id.clone()).collect(),
        };
        failed.sort();
        failed.dedup();

        self.stats.processed += (entries.len() - failed.len().min(entries.len())) as u64;
        if !failed.is_empty() {
            let err = IndexingError::BulkPartialFailure(failed.clone());
            error!(error = %err, ids = ?failed, "Some documents were not written");
            self.stats.failed.extend(failed);
        }
        debug!(entries = entries.len(), destinations = indexes.len(), "Flushed");
        Ok(entries.len())
    }

    async fn delete_descendants(&self, indexes: &[String], path: &str) -> Result<(), IndexingError> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let query = json!({ "prefix": { PATH_FIELD: prefix } });
        for index in indexes {
            match safe_call("delete_by_query", self.client.delete_by_query(index, &query)).await {
                Ok(Some(response)) if response.deleted > 0 => {
                    debug!(index = %index, path = %path, deleted = response.deleted, "Deleted descendants");
                }
                Ok(_) => {}
                Err(SearchError::Request { status: 404, .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use catalog_search::{InMemoryBackend, MappingRegistry};
    use catalog_types::Document;

    use super::*;

    async fn backend() -> Arc<InMemoryBackend> {
        let backend = Arc::new(InMemoryBackend::new());
        let mapping = MappingRegistry::default().compute_mapping().unwrap().to_value();
        for name in ["c_1", "c_2"] {
            backend.create_index(name, Some(&mapping), None).await.unwrap();
        }
        backend
    }

    fn doc(uuid: &str, path: &str) -> Document {
        let mut doc = Document::new();
        doc.insert("uuid".into(), json!(uuid));
        doc.insert("path".into(), json!(path));
        doc
    }

    #[tokio::test]
    async fn test_flushes_when_full() {
        let backend = backend().await;
        let mut indexer = Indexer::new(backend.clone(), Destinations::Fixed(vec!["c_1".into()]), 2);

        assert!(!indexer.add(BatchEntry::index("a", "Item", doc("a", "/a"))).await.unwrap());
        assert_eq!(indexer.pending(), 1);
        assert!(indexer.add(BatchEntry::index("b", "Item", doc("b", "/b"))).await.unwrap());
        assert_eq!(indexer.pending(), 0);
        assert_eq!(backend.doc_ids("c_1"), vec!["a", "b"]);
        assert_eq!(indexer.stats().flushes, 1);
        assert_eq!(indexer.stats().processed, 2);
    }

    #[tokio::test]
    async fn test_same_batch_to_every_destination() {
        let backend = backend().await;
        let dest = Destinations::Fixed(vec!["c_1".into(), "c_2".into()]);
        let mut indexer = Indexer::new(backend.clone(), dest, 10);
        indexer.add(BatchEntry::index("a", "Item", doc("a", "/a"))).await.unwrap();
        assert_eq!(indexer.flush().await.unwrap(), 1);
        assert_eq!(backend.doc_ids("c_1"), vec!["a"]);
        assert_eq!(backend.doc_ids("c_2"), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let backend = backend().await;
        backend.fail_next_bulks(2);
        let mut indexer = Indexer::new(backend.clone(), Destinations::Fixed(vec!["c_1".into()]), 10);
        indexer.add(BatchEntry::index("a", "Item", doc("a", "/a"))).await.unwrap();
        indexer.flush().await.unwrap();

        assert_eq!(indexer.stats().retries, 2);
        assert!(indexer.stats().failed.is_empty());
        assert_eq!(backend.doc_ids("c_1"), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ids_recorded_after_last_attempt() {
        let backend = backend().await;
        backend.fail_next_bulks(FLUSH_ATTEMPTS);
        let mut indexer = Indexer::new(backend.clone(), Destinations::Fixed(vec!["c_1".into()]), 10);
        indexer.add(BatchEntry::index("b", "Item", doc("b", "/b"))).await.unwrap();
        indexer.add(BatchEntry::index("a", "Item", doc("a", "/a"))).await.unwrap();
        indexer.flush().await.unwrap();

        assert_eq!(indexer.stats().failed, vec!["a", "b"]);
        assert_eq!(indexer.stats().processed, 0);
        assert!(backend.doc_ids("c_1").is_empty());
    }

    #[tokio::test]
    async fn test_item_failures_do_not_stop_the_batch() {
        let backend = backend().await;
        let mut indexer = Indexer::new(backend.clone(), Destinations::Fixed(vec!["c_1".into()]), 10);
        let mut bad = doc("bad", "/bad");
        bad.insert("not_mapped".into(), json!(1));
        indexer.add(BatchEntry::index("bad", "Item", bad)).await.unwrap();
        indexer.add(BatchEntry::index("good", "Item", doc("good", "/good"))).await.unwrap();
        indexer.flush().await.unwrap();

        assert_eq!(indexer.stats().failed, vec!["bad"]);
        assert_eq!(indexer.stats().processed, 1);
        assert_eq!(backend.doc_ids("c_1"), vec!["good"]);
    }

    #[tokio::test]
    async fn test_update_with_and_without_upsert() {
        let backend = backend().await;
        let dest = Destinations::Fixed(vec!["c_1".into()]);
        let mut fields = Document::new();
        fields.insert("title".into(), json!("new"));

        let mut plain = Indexer::new(backend.clone(), dest.clone(), 10);
        plain.add(BatchEntry::update("a", "Item", fields.clone())).await.unwrap();
        plain.flush().await.unwrap();
        assert_eq!(plain.stats().failed, vec!["a"]);

        let mut upsert = Indexer::new(backend.clone(), dest, 10).with_upsert(true);
        upsert.add(BatchEntry::update("a", "Item", fields)).await.unwrap();
        upsert.flush().await.unwrap();
        assert!(upsert.stats().failed.is_empty());
        let hit = backend.get("c_1", "a").await.unwrap();
        assert_eq!(hit.source.unwrap()["title"], "new");
    }

    #[tokio::test]
    async fn test_delete_removes_descendants_by_path() {
        let backend = backend().await;
        let mut indexer = Indexer::new(backend.clone(), Destinations::Fixed(vec!["c_1".into()]), 10);
        indexer.add(BatchEntry::index("f", "Folder", doc("f", "/folder"))).await.unwrap();
        indexer.add(BatchEntry::index("i", "Item", doc("i", "/folder/item"))).await.unwrap();
        indexer.add(BatchEntry::index("x", "Item", doc("x", "/folder-2"))).await.unwrap();
        indexer.flush().await.unwrap();

        indexer
            .add(BatchEntry::delete("f", "Folder", Some("/folder".into())))
            .await
            .unwrap();
        indexer.flush().await.unwrap();
        assert_eq!(backend.doc_ids("c_1"), vec!["x"]);
    }

    #[tokio::test]
    async fn test_descendant_rewritten_in_same_batch_survives_subtree_delete() {
        let backend = backend().await;
        let mut indexer = Indexer::new(backend.clone(), Destinations::Fixed(vec!["c_1".into()]), 10);
        indexer.add(BatchEntry::index("f", "Folder", doc("f", "/folder"))).await.unwrap();
        indexer.add(BatchEntry::index("i", "Item", doc("i", "/folder/item"))).await.unwrap();
        indexer.flush().await.unwrap();

        // Folder removed while its item is rewritten under the old path
        indexer
            .add(BatchEntry::delete("f", "Folder", Some("/folder".into())))
            .await
            .unwrap();
        indexer.add(BatchEntry::index("i", "Item", doc("i", "/folder/item"))).await.unwrap();
        indexer.flush().await.unwrap();

        assert_eq!(backend.doc_ids("c_1"), vec!["i"]);
        assert_eq!(indexer.stats().processed, 4);
    }
}
