//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TaskcastSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `TASKCAST_*` environment overrides (highest priority)
//! 4. Validate the result

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{LogLevel, TaskcastSettings};

/// Resolve the default settings file (`~/.taskcast/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".taskcast").join("settings.json")
}

/// Load settings from `path` with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid final value is
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<TaskcastSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<TaskcastSettings> {
    let malformed = |source| SettingsError::Malformed { path: path.to_path_buf(), source };
    let defaults = serde_json::to_value(TaskcastSettings::default()).map_err(malformed)?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)
            .map_err(|source| SettingsError::Read { path: path.to_path_buf(), source })?;
        let user: Value = serde_json::from_str(&content).map_err(malformed)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    serde_json::from_value(merged).map_err(malformed)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TASKCAST_*` environment overrides.
pub fn apply_env_overrides(settings: &mut TaskcastSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Values that fail to parse or fall outside their range are logged and
/// ignored, leaving the file/default value in place.
pub fn apply_overrides<F>(settings: &mut TaskcastSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("TASKCAST_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("TASKCAST_PORT") {
        match parse_u16_range(&v, 0, 65535) {
            Some(port) => settings.server.port = port,
            None => ignored("TASKCAST_PORT", &v),
        }
    }
    if let Some(v) = read("TASKCAST_MAX_CONNECTIONS") {
        match parse_usize_range(&v, 1, 1_000_000) {
            Some(n) => settings.server.max_connections = n,
            None => ignored("TASKCAST_MAX_CONNECTIONS", &v),
        }
    }
    if let Some(v) = read("TASKCAST_HEARTBEAT_INTERVAL_SECS") {
        match parse_u64_range(&v, 1, 3600) {
            Some(n) => settings.server.heartbeat_interval_secs = n,
            None => ignored("TASKCAST_HEARTBEAT_INTERVAL_SECS", &v),
        }
    }
    if let Some(v) = read("TASKCAST_LOG_LEVEL") {
        match LogLevel::parse(&v) {
            Some(level) => settings.logging.level = level,
            None => ignored("TASKCAST_LOG_LEVEL", &v),
        }
    }
    if let Some(v) = read("TASKCAST_LOG_JSON") {
        match parse_bool(&v) {
            Some(json) => settings.logging.json = json,
            None => ignored("TASKCAST_LOG_JSON", &v),
        }
    }
}

fn ignored(key: &str, value: &str) {
    warn!(key, value, "invalid env var, ignoring");
}

// ── Pure parsing functions ──────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8080, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── files ───────────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = read_settings_file(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings, TaskcastSettings::default());
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9090, "maxConnections": 8}, "logging": {"json": true}}"#,
        )
        .unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.max_connections, 8);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert!(settings.logging.json);
        assert_eq!(settings.logging.level, LogLevel::Info);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        let err = read_settings_file(&path).unwrap_err();
        assert!(matches!(&err, SettingsError::Malformed { path: p, .. } if p == &path));
    }

    #[test]
    fn wrong_type_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": "high"}}"#).unwrap();
        assert!(matches!(read_settings_file(&path), Err(SettingsError::Malformed { .. })));
    }

    #[test]
    fn unreadable_path_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_settings_file(dir.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
    }

    #[test]
    fn invalid_final_value_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"sendQueueCapacity": 0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::OutOfRange { key: "sendQueueCapacity", .. })
        ));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut settings = TaskcastSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("TASKCAST_HOST", "127.0.0.1"),
                ("TASKCAST_PORT", "7000"),
                ("TASKCAST_MAX_CONNECTIONS", "16"),
                ("TASKCAST_HEARTBEAT_INTERVAL_SECS", "5"),
                ("TASKCAST_LOG_LEVEL", "debug"),
                ("TASKCAST_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 7000);
        assert_eq!(settings.server.max_connections, 16);
        assert_eq!(settings.server.heartbeat_interval_secs, 5);
        assert_eq!(settings.logging.level, LogLevel::Debug);
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_overrides_ignored() {
        let mut settings = TaskcastSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("TASKCAST_HOST", ""),
                ("TASKCAST_PORT", "70000"),
                ("TASKCAST_MAX_CONNECTIONS", "0"),
                ("TASKCAST_HEARTBEAT_INTERVAL_SECS", "soon"),
                ("TASKCAST_LOG_LEVEL", "chatty"),
                ("TASKCAST_LOG_JSON", "maybe"),
            ]),
        );
        assert_eq!(settings, TaskcastSettings::default());
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_values() {
        for v in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("-1", 0, 65535), None);
        assert_eq!(parse_u64_range("3600", 1, 3600), Some(3600));
        assert_eq!(parse_u64_range("3601", 1, 3600), None);
        assert_eq!(parse_usize_range("abc", 1, 10), None);
    }

    #[test]
    fn default_path_under_home() {
        let path = settings_path();
        assert!(path.ends_with(".taskcast/settings.json"));
    }
}
