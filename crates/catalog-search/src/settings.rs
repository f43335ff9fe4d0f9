//! Backend index settings.

use serde_json::{json, Value};

use crate::mapping::PATH_ANALYZER;

/// Settings keys the backend assigns itself; never copied to a new index.
const GENERATED_KEYS: &[&str] = &["uuid", "version", "creation_date", "provided_name", "routing"];

/// Settings every catalog index is created with.
pub fn default_settings() -> Value {
    json!({
        "analysis": {
            "analyzer": {
                PATH_ANALYZER: { "tokenizer": "path_tokenizer" }
            },
            "tokenizer": {
                "path_tokenizer": { "type": "path_hierarchy", "delimiter": "/" }
            },
            "filter": {},
            "char_filter": {}
        }
    })
}

/// Recursively merge `overlay` into `base`; objects merge, everything else replaces.
pub fn merge_settings(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_settings(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Default settings with the configured `index` settings merged over them.
pub fn index_settings(configured: &Value) -> Value {
    let mut settings = default_settings();
    merge_settings(&mut settings, configured);
    settings
}

/// Settings read from a live index, minus the keys the backend generates.
pub fn copyable_settings(live: &Value) -> Value {
    let mut settings = live.clone();
    if let Value::Object(map) = &mut settings {
        for key in GENERATED_KEYS {
            map.remove(*key);
        }
    }
    settings
}

/// Settings for a migration target: the live index's settings with the
/// configured ones merged on top.
pub fn next_index_settings(live: &Value, configured: &Value) -> Value {
    let mut settings = copyable_settings(live);
    if settings.is_null() {
        settings = default_settings();
    }
    merge_settings(&mut settings, &index_settings(configured));
    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_install_path_analyzer() {
        let settings = default_settings();
        assert_eq!(
            settings["analysis"]["tokenizer"]["path_tokenizer"]["type"],
            "path_hierarchy"
        );
        assert_eq!(
            settings["analysis"]["analyzer"][PATH_ANALYZER]["tokenizer"],
            "path_tokenizer"
        );
    }

    #[test]
    fn test_configured_settings_merge_deeply() {
        let configured = json!({
            "number_of_shards": 3,
            "analysis": {"filter": {"lowercase_ascii": {"type": "asciifolding"}}}
        });
        let settings = index_settings(&configured);
        assert_eq!(settings["number_of_shards"], 3);
        assert!(settings["analysis"]["filter"]["lowercase_ascii"].is_object());
        assert!(settings["analysis"]["tokenizer"]["path_tokenizer"].is_object());
    }

    #[test]
    fn test_null_overlay_is_ignored() {
        assert_eq!(index_settings(&Value::Null), default_settings());
    }

    #[test]
    fn test_copyable_settings_drop_generated_keys() {
        let live = json!({
            "uuid": "x",
            "creation_date": "1",
            "provided_name": "catalog-db-c_1",
            "number_of_shards": "1"
        });
        let copied = copyable_settings(&live);
        assert!(copied.get("uuid").is_none());
        assert!(copied.get("provided_name").is_none());
        assert_eq!(copied["number_of_shards"], "1");
    }

    #[test]
    fn test_next_index_settings_keep_live_values() {
        let live = json!({"number_of_replicas": "2", "uuid": "x"});
        let settings = next_index_settings(&live, &json!({"refresh_interval": "5s"}));
        assert_eq!(settings["number_of_replicas"], "2");
        assert_eq!(settings["refresh_interval"], "5s");
        assert!(settings["analysis"]["analyzer"][PATH_ANALYZER].is_object());
    }
}
