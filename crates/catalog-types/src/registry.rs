//! Per-container index registry record.
//!
//! The record is the single persisted source of truth for which physical
//! index backs a container alias and whether a migration is pending.

use serde::{Deserialize, Serialize};

/// Build the alias for a container: `{prefix}{db_id}-{container_id}`.
pub fn alias_name(prefix: &str, db_id: &str, container_id: &str) -> String {
    format!("{}{}-{}", prefix, db_id, container_id).to_lowercase()
}

/// Build a physical index name: `{alias}_{version}`.
pub fn physical_index_name(alias: &str, version: u32) -> String {
    format!("{}_{}", alias, version)
}

/// Build the alias of a content sub-index: `{alias}__{type}-{short_uid}`.
pub fn sub_index_alias(parent_alias: &str, type_name: &str, zoid: &str) -> String {
    let short_uid: String = zoid.chars().take(8).collect();
    format!("{}__{}-{}", parent_alias, type_name, short_uid).to_lowercase()
}

/// Registry record stored alongside the owning object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    /// Alias, immutable once assigned
    #[serde(rename = "el_index_name")]
    pub index_name: String,

    /// Active physical index version
    #[serde(rename = "el_index_version")]
    pub index_version: u32,

    /// Pending version while a migration is in progress
    #[serde(rename = "el_next_index_version", default)]
    pub next_index_version: Option<u32>,
}

impl RegistryRecord {
    pub fn new(index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
            index_version: 1,
            next_index_version: None,
        }
    }

    pub fn real_index_name(&self) -> String {
        physical_index_name(&self.index_name, self.index_version)
    }

    pub fn migration_index_name(&self) -> Option<String> {
        self.next_index_version
            .map(|version| physical_index_name(&self.index_name, version))
    }

    pub fn is_migrating(&self) -> bool {
        self.next_index_version.is_some()
    }

    /// Serialize to JSON bytes for storage
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

    #[test]
    fn test_alias_name() {
        assert_eq!(alias_name("guillotina-", "db", "c"), "guillotina-db-c");
    }

    #[test]
    fn test_physical_name() {
        assert_eq!(physical_index_name("guillotina-db-c", 2), "guillotina-db-c_2");
    }

    #[test]
    fn test_sub_index_alias_uses_short_uid() {
        let name = sub_index_alias("catalog-db-c", "Archive", "0123456789abcdef");
        assert_eq!(name, "catalog-db-c__archive-01234567");
    }

    #[test]
    fn test_record_names() {
        let mut record = RegistryRecord::new("catalog-db-c");
        assert_eq!(record.real_index_name(), "catalog-db-c_1");
        assert!(record.migration_index_name().is_none());

        record.next_index_version = Some(2);
        assert!(record.is_migrating());
        assert_eq!(record.migration_index_name().unwrap(), "catalog-db-c_2");
    }

    #[test]
    fn test_record_json_field_names() {
        let record = RegistryRecord::new("catalog-db-c");
        let json = String::from_utf8(record.to_bytes().unwrap()).unwrap();
        assert!(json.contains("\"el_index_name\":\"catalog-db-c\""));
        assert!(json.contains("\"el_index_version\":1"));
        assert!(json.contains("\"el_next_index_version\":null"));
    }
}
