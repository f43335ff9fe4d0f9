//! Write-pipeline entries.
//!
//! A [`BatchEntry`] is created for every write event and lives until the
//! bulk request that carries it is acknowledged or fails permanently.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Indexable projection of an object, keyed by field name.
pub type Document = Map<String, Value>;

/// What a batch entry does to the target document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "payload")]
pub enum BatchAction {
    /// Upsert of the full document
    Index(Document),
    /// Partial merge of the given fields
    Update(Document),
    /// Removal by id; descendants under `path` are removed by query
    Delete { path: Option<String> },
}

impl BatchAction {
    pub fn name(&self) -> &'static str {
        match self {
            BatchAction::Index(_) => "index",
            BatchAction::Update(_) => "update",
            BatchAction::Delete { .. } => "delete",
        }
    }
}

/// One queued write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Document id (object uid)
    pub id: String,
    /// Content type of the source object
    pub doc_type: String,
    #[serde(flatten)]
    pub action: BatchAction,
}

impl BatchEntry {
    pub fn index(id: impl Into<String>, doc_type: impl Into<String>, document: Document) -> Self {
        Self {
            id: id.into(),
            doc_type: doc_type.into(),
            action: BatchAction::Index(document),
        }
    }

    pub fn update(id: impl Into<String>, doc_type: impl Into<String>, fields: Document) -> Self {
        Self {
            id: id.into(),
            doc_type: doc_type.into(),
            action: BatchAction::Update(fields),
        }
    }

    pub fn delete(id: impl Into<String>, doc_type: impl Into<String>, path: Option<String>) -> Self {
        Self {
            id: id.into(),
            doc_type: doc_type.into(),
            action: BatchAction::Delete { path },
        }
    }
}
