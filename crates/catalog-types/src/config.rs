//! Configuration loading for catalog-index.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/catalog-index/config.toml.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::Value;

use crate::error::CatalogError;
use crate::schema::ContentSchema;

/// Which search backend implementation the engine talks to.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Elasticsearch/OpenSearch over HTTP (default)
    #[default]
    Http,
    /// Process-local backend, state is lost on exit
    Memory,
}

/// How to reach the search backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionSettings {
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,

    /// Timeout for regular calls. Bulk copies run without a timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub username: Option<String>,

    /// Loaded from config or CATALOG_CONNECTION_SETTINGS__PASSWORD
    #[serde(default)]
    pub password: Option<SecretString>,
}

fn default_hosts() -> Vec<String> {
    vec!["http://localhost:9200".to_string()]
}

fn default_timeout_secs() -> u64 {
    2
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            timeout_secs: default_timeout_secs(),
            username: None,
            password: None,
        }
    }
}

impl ConnectionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Main application settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Path to the RocksDB object store
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Database id used in alias names
    #[serde(default = "default_db_id")]
    pub db_id: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Flush threshold of the write pipeline, in operations
    #[serde(default = "default_bulk_size")]
    pub bulk_size: usize,

    /// Request an immediate visibility refresh on every write
    #[serde(default)]
    pub refresh: bool,

    /// Must stay false: unknown fields are rejected by the backend
    #[serde(default)]
    pub dynamic_mapping: bool,

    #[serde(default = "default_index_name_prefix")]
    pub index_name_prefix: String,

    #[serde(default)]
    pub connection_settings: ConnectionSettings,

    /// Backend index settings (analyzers, tokenizers, filters) merged over defaults
    #[serde(default)]
    pub index: Value,

    /// Name of the security filter builder ("default" or "none")
    #[serde(default = "default_security_query_builder")]
    pub security_query_builder: String,

    #[serde(default)]
    pub backend: BackendKind,

    /// Pause between continuous vacuum passes
    #[serde(default = "default_vacuum_sleep_secs")]
    pub vacuum_sleep_secs: u64,

    /// Registered content types and their index fields
    #[serde(default)]
    pub content_types: Vec<ContentSchema>,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "catalog-index")
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_db_id() -> String {
    "db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bulk_size() -> usize {
    50
}

fn default_index_name_prefix() -> String {
    "catalog-".to_string()
}

fn default_security_query_builder() -> String {
    "default".to_string()
}

fn default_vacuum_sleep_secs() -> u64 {
    600
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            db_id: default_db_id(),
            log_level: default_log_level(),
            bulk_size: default_bulk_size(),
            refresh: false,
            dynamic_mapping: false,
            index_name_prefix: default_index_name_prefix(),
            connection_settings: ConnectionSettings::default(),
            index: Value::Null,
            security_query_builder: default_security_query_builder(),
            backend: BackendKind::default(),
            vacuum_sleep_secs: default_vacuum_sleep_secs(),
            content_types: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/catalog-index/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (CATALOG_*, nested keys separated by `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, CatalogError> {
        let config_dir = ProjectDirs::from("", "", "catalog-index")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| CatalogError::Config(e.to_string()))?
            .set_default("db_id", default_db_id())
            .map_err(|e| CatalogError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| CatalogError::Config(e.to_string()))?
            .set_default("bulk_size", default_bulk_size() as i64)
            .map_err(|e| CatalogError::Config(e.to_string()))?
            .set_default("index_name_prefix", default_index_name_prefix())
            .map_err(|e| CatalogError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: CATALOG_BULK_SIZE, CATALOG_CONNECTION_SETTINGS__TIMEOUT_SECS, ...
        builder = builder.add_source(
            Environment::with_prefix("CATALOG")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| CatalogError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| CatalogError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.bulk_size == 0 {
            return Err(CatalogError::Config("bulk_size must be > 0".to_string()));
        }
        if self.dynamic_mapping {
            return Err(CatalogError::Config(
                "dynamic_mapping must be false: documents are validated against the computed mapping"
                    .to_string(),
            ));
        }
        if self.backend == BackendKind::Http && self.connection_settings.hosts.is_empty() {
            return Err(CatalogError::Config(
                "connection_settings.hosts must list at least one host".to_string(),
            ));
        }
        if self.db_id.is_empty() {
            return Err(CatalogError::Config("db_id must not be empty".to_string()));
        }
        Ok(())
    }

    /// Expand ~ in db_path to the home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            if let Some(home) = directories::BaseDirs::new() {
                return home.home_dir().join(rest);
            }
        }
        PathBuf::from(&self.db_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.bulk_size, 50);
        assert!(!settings.refresh);
        assert!(!settings.dynamic_mapping);
        assert_eq!(settings.index_name_prefix, "catalog-");
        assert_eq!(settings.connection_settings.timeout(), Duration::from_secs(2));
        assert_eq!(settings.backend, BackendKind::Http);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_with_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.db_id, "db");
        assert_eq!(settings.security_query_builder, "default");
    }

    #[test]
    fn test_dynamic_mapping_rejected() {
        let settings = Settings {
            dynamic_mapping: true,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(CatalogError::Config(_))));
    }

    #[test]
    fn test_zero_bulk_size_rejected() {
        let settings = Settings {
            bulk_size: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("catalog.toml");
        std::fs::write(
            &path,
            r#"
bulk_size = 75
index_name_prefix = "guillotina-"
backend = "memory"

[connection_settings]
hosts = ["http://es1:9200", "http://es2:9200"]
timeout_secs = 5

[[content_types]]
type_name = "Item"
index_fields = [{ name = "item", type = "float" }]
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(settings.bulk_size, 75);
        assert_eq!(settings.index_name_prefix, "guillotina-");
        assert_eq!(settings.backend, BackendKind::Memory);
        assert_eq!(settings.connection_settings.hosts.len(), 2);
        assert_eq!(settings.content_types.len(), 1);
        assert_eq!(settings.content_types[0].type_name, "Item");
    }

    #[test]
    fn test_expanded_db_path_plain() {
        let settings = Settings {
            db_path: "/var/lib/catalog".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.expanded_db_path(), PathBuf::from("/var/lib/catalog"));
    }
}
