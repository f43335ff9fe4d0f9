//! Event sinks for indexing progress and search completion.

use tokio::sync::broadcast;
use tracing::{debug, info};

use catalog_types::{EventSink, IndexProgress, SearchDone};

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {}

/// Logs progress at info level and searches at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn on_progress(&self, progress: &IndexProgress) {
        info!(
            context = %progress.context,
            processed = progress.processed,
            total = ?progress.total,
            completed = progress.is_completed(),
            "Indexing progress"
        );
    }

    fn on_search(&self, done: &SearchDone) {
        debug!(
            total = done.total,
            elapsed_ms = done.elapsed.as_millis() as u64,
            "Search done"
        );
    }
}

/// Event fanned out by [`BroadcastEventSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEvent {
    Progress(IndexProgress),
    Search(SearchDone),
}

/// Publishes events on a tokio broadcast channel for status endpoints.
///
/// Slow subscribers lag and lose events; sending never blocks the caller.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<CatalogEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn on_progress(&self, progress: &IndexProgress) {
        // No receivers is fine
        let _ = self.sender.send(CatalogEvent::Progress(progress.clone()));
    }

    fn on_search(&self, done: &SearchDone) {
        let _ = self.sender.send(CatalogEvent::Search(done.clone()));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_broadcast_delivers_in_order() {
        let sink = BroadcastEventSink::new(8);
        let mut rx = sink.subscribe();

        sink.on_progress(&IndexProgress::started("c", None));
        sink.on_search(&SearchDone {
            query: json!({"match_all": {}}),
            total: 3,
            elapsed: Duration::from_millis(4),
        });
        sink.on_progress(&IndexProgress::finished("c", 3, Some(3)));

        assert!(matches!(rx.recv().await.unwrap(), CatalogEvent::Progress(p) if p.processed == 0));
        assert!(matches!(rx.recv().await.unwrap(), CatalogEvent::Search(s) if s.total == 3));
        assert!(matches!(rx.recv().await.unwrap(), CatalogEvent::Progress(p) if p.is_completed()));
    }

    #[test]
    fn test_broadcast_without_subscribers() {
        let sink = BroadcastEventSink::new(1);
        sink.on_progress(&IndexProgress::started("c", None));
    }
}
