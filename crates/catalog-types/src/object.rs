//! Objects as held by the authoritative object store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Oid of the database root object.
pub const ROOT_ZOID: &str = "0000000000000000";

/// Oid of the trash bin object.
pub const TRASHED_ZOID: &str = "D1BA5EDDEADBEEF";

/// True for oids that never correspond to indexable content.
pub fn is_system_zoid(zoid: &str) -> bool {
    zoid == ROOT_ZOID || zoid == TRASHED_ZOID
}

/// A persisted object.
///
/// `zoid` doubles as the document id in the search backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Stable object identifier
    pub zoid: String,

    /// Transaction that last wrote this object
    #[serde(default)]
    pub tid: i64,

    /// Parent oid, `None` only for the root
    pub parent_id: Option<String>,

    /// Name of the object inside its parent
    pub id: String,

    /// Registered content type
    pub type_name: String,

    /// Content attributes
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl StoredObject {
    pub fn new(
        zoid: impl Into<String>,
        parent_id: Option<String>,
        id: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        Self {
            zoid: zoid.into(),
            tid: 0,
            parent_id,
            id: id.into(),
            type_name: type_name.into(),
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_zoids() {
        assert!(is_system_zoid(ROOT_ZOID));
        assert!(is_system_zoid(TRASHED_ZOID));
        assert!(!is_system_zoid("a1b2c3"));
    }

    #[test]
    fn test_object_bytes() {
        let obj = StoredObject::new("abc", Some(ROOT_ZOID.to_string()), "c", "Container")
            .with_attribute("title", json!("Container"));
        let decoded = StoredObject::from_bytes(&obj.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, obj);
        assert_eq!(decoded.attribute("title"), Some(&json!("Container")));
    }
}
