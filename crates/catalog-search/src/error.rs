//! Search error types.

use std::future::Future;

use thiserror::Error;
use tracing::warn;

/// Errors that can occur while talking to the search backend.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Network failure, timeout, 429 or 5xx. The caller may retry.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Semantic 4xx from the backend. Terminal.
    #[error("Request error ({status}): {reason}")]
    Request { status: u16, reason: String },

    /// Point lookup found nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Shard failure during a search; carries the first failure reason
    #[error("Query error: {0}")]
    Query(String),

    /// Two content types declare the same field differently
    #[error("Mapping conflict on field '{field}': {first} vs {second}")]
    MappingConflict {
        field: String,
        first: String,
        second: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SearchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SearchError::Transport(_))
    }

    /// HTTP status the service layer answers with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            SearchError::Query(_) => 488,
            SearchError::Request { status, .. } => *status,
            SearchError::NotFound(_) => 404,
            SearchError::MappingConflict { .. } => 412,
            SearchError::Transport(_) => 503,
            SearchError::Serialization(_) | SearchError::Config(_) => 500,
        }
    }

    /// Classify a non-success backend response.
    pub fn from_status(status: u16, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        if status == 429 || status >= 500 {
            SearchError::Transport(format!("HTTP {}: {}", status, reason))
        } else {
            SearchError::Request { status, reason }
        }
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::Serialization(err.to_string())
    }
}

/// Await a backend call, downgrading transport errors to a warning.
///
/// Only for best-effort cleanup paths. Returns `Ok(None)` when the call was
/// swallowed; every other error is propagated.
pub async fn safe_call<T, F>(what: &str, call: F) -> Result<Option<T>, SearchError>
where
    F: Future<Output = Result<T, SearchError>>,
{
    match call.await {
        Ok(value) => Ok(Some(value)),
        Err(SearchError::Transport(reason)) => {
            warn!(operation = what, error = %reason, "Ignoring backend transport error");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
