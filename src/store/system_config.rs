use serde_json::{Map, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::{read_guard, write_guard};
use crate::dispatcher::config::{normalize_dispatcher_config, DispatcherConfig};

pub const KEY_EVENTS_RETENTION_DAYS: &str = "events.retention_days";
pub const KEY_RULE_LOGS_RETENTION_DAYS: &str = "rule_logs.retention_days";
pub const KEY_ENTITY_SYNC_INTERVAL_SECONDS: &str = "entity_sync.interval_seconds";
pub const KEY_DISPATCHER: &str = "dispatcher";

const DEFAULT_EVENTS_RETENTION_DAYS: i64 = 30;
const DEFAULT_RULE_LOGS_RETENTION_DAYS: i64 = 14;
const DEFAULT_ENTITY_SYNC_INTERVAL_SECONDS: i64 = 300;

/// Persisted JSON config, one flat object with dotted key names. Missing or
/// unparseable files fall back to defaults; writes persist best-effort.
pub struct SystemConfigStore {
    path: PathBuf,
    inner: RwLock<Map<String, JsonValue>>,
}

impl SystemConfigStore {
    pub fn load(path: &Path) -> Self {
        let values = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<JsonValue>(&contents) {
                Ok(JsonValue::Object(map)) => map,
                Ok(_) => {
                    tracing::warn!(path = %path.display(), "system config is not an object; using defaults");
                    Map::new()
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to parse system config; using defaults");
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        };
        Self {
            path: path.to_path_buf(),
            inner: RwLock::new(values),
        }
    }

    pub fn get(&self, key: &str) -> Option<JsonValue> {
        read_guard(&self.inner).get(key).cloned()
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
    }

    pub fn set(&self, key: &str, value: JsonValue) {
        let snapshot = {
            let mut inner = write_guard(&self.inner);
            inner.insert(key.to_string(), value);
            inner.clone()
        };
        self.persist(&snapshot);
    }

    fn persist(&self, values: &Map<String, JsonValue>) {
        if let Some(parent) = self.path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to create config directory");
                return;
            }
        }
        let body = JsonValue::Object(values.clone());
        match serde_json::to_string_pretty(&body) {
            Ok(contents) => {
                if let Err(err) = std::fs::write(&self.path, contents) {
                    tracing::warn!(path = %self.path.display(), error = %err, "failed to persist system config");
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize system config");
            }
        }
    }

    pub fn events_retention_days(&self) -> i64 {
        self.get_i64(KEY_EVENTS_RETENTION_DAYS, DEFAULT_EVENTS_RETENTION_DAYS)
            .max(1)
    }

    pub fn rule_logs_retention_days(&self) -> i64 {
        self.get_i64(KEY_RULE_LOGS_RETENTION_DAYS, DEFAULT_RULE_LOGS_RETENTION_DAYS)
            .max(1)
    }

    pub fn entity_sync_interval_seconds(&self) -> i64 {
        self.get_i64(
            KEY_ENTITY_SYNC_INTERVAL_SECONDS,
            DEFAULT_ENTITY_SYNC_INTERVAL_SECONDS,
        )
        .max(10)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        normalize_dispatcher_config(self.get(KEY_DISPATCHER).as_ref())
    }
}
