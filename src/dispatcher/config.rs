use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Normalized runtime knobs for the rule trigger dispatcher. Values outside
/// the allowed ranges are clamped; unknown keys in the raw object are
/// discarded; non-object input yields the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub debounce_ms: u64,
    pub batch_size_limit: usize,
    pub rate_limit_per_sec: u64,
    pub rate_limit_burst: u64,
    pub worker_concurrency: usize,
    pub queue_max_depth: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 200,
            batch_size_limit: 100,
            rate_limit_per_sec: 10,
            rate_limit_burst: 50,
            worker_concurrency: 4,
            queue_max_depth: 1000,
        }
    }
}

pub fn normalize_dispatcher_config(raw: Option<&JsonValue>) -> DispatcherConfig {
    let defaults = DispatcherConfig::default();
    let Some(JsonValue::Object(map)) = raw else {
        return defaults;
    };

    let int = |key: &str, default: u64| -> u64 {
        map.get(key)
            .and_then(JsonValue::as_u64)
            .unwrap_or(default)
    };

    DispatcherConfig {
        debounce_ms: int("debounce_ms", defaults.debounce_ms).clamp(50, 2000),
        batch_size_limit: int("batch_size_limit", defaults.batch_size_limit as u64).clamp(1, 1000)
            as usize,
        rate_limit_per_sec: int("rate_limit_per_sec", defaults.rate_limit_per_sec).max(1),
        rate_limit_burst: int("rate_limit_burst", defaults.rate_limit_burst).max(1),
        worker_concurrency: int("worker_concurrency", defaults.worker_concurrency as u64)
            .clamp(1, 16) as usize,
        queue_max_depth: int("queue_max_depth", defaults.queue_max_depth as u64).max(10) as usize,
    }
}
