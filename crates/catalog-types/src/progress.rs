//! Progress and completion signals for observers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Indexing progress for one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexProgress {
    /// Container (or sub-index owner) the operation runs against
    pub context: String,
    /// Documents processed so far
    pub processed: u64,
    /// Expected total, when known up front
    pub total: Option<u64>,
    /// `Some(true)` on the final event, `None` otherwise
    pub completed: Option<bool>,
}

impl IndexProgress {
    /// Progress event emitted before any work is done.
    pub fn started(context: impl Into<String>, total: Option<u64>) -> Self {
        Self {
            context: context.into(),
            processed: 0,
            total,
            completed: None,
        }
    }

    pub fn running(context: impl Into<String>, processed: u64, total: Option<u64>) -> Self {
        Self {
            context: context.into(),
            processed,
            total,
            completed: None,
        }
    }

    pub fn finished(context: impl Into<String>, processed: u64, total: Option<u64>) -> Self {
        Self {
            context: context.into(),
            processed,
            total,
            completed: Some(true),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed == Some(true)
    }
}

/// Emitted after each successful query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDone {
    pub query: Value,
    pub total: u64,
    pub elapsed: Duration,
}

/// Receives progress and search completion signals.
///
/// Sinks are called inline from the indexing and search paths and must not
/// block.
pub trait EventSink: Send + Sync {
    fn on_progress(&self, _progress: &IndexProgress) {}

    fn on_search(&self, _done: &SearchDone) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_lifecycle() {
        let start = IndexProgress::started("c", Some(10));
        assert_eq!(start.processed, 0);
        assert_eq!(start.completed, None);

        let end = IndexProgress::finished("c", 10, Some(10));
        assert!(end.is_completed());
        assert!(!IndexProgress::running("c", 5, None).is_completed());
    }

    #[test]
    fn test_default_sink_ignores_events() {
        struct Quiet;
        impl EventSink for Quiet {}
        Quiet.on_progress(&IndexProgress::started("c", None));
    }
}
