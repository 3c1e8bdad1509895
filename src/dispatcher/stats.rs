use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;

/// Per-source sub-counters.
#[derive(Debug, Clone, Default)]
pub struct SourceStats {
    pub triggered: u64,
    pub entities_received: u64,
    pub debounced: u64,
    pub last_dispatch_at: Option<DateTime<Utc>>,
}

impl SourceStats {
    pub fn as_json(&self) -> JsonValue {
        json!({
            "triggered": self.triggered,
            "entities_received": self.entities_received,
            "debounced": self.debounced,
            "last_dispatch_at": self.last_dispatch_at.map(|v| v.to_rfc3339()),
        })
    }
}

/// Dispatcher observability counters. Mutated under the dispatcher's stats
/// mutex; all recording methods are O(1).
#[derive(Debug, Clone, Default)]
pub struct DispatcherStats {
    pub triggered: u64,
    pub deduped: u64,
    pub debounced: u64,
    pub rate_limited: u64,
    pub dropped_batches: u64,
    pub rules_evaluated: u64,
    pub rules_fired: u64,
    pub rules_scheduled: u64,
    pub rules_errors: u64,
    pub last_dispatch_at: Option<DateTime<Utc>>,
    pub by_source: HashMap<String, SourceStats>,
}

impl DispatcherStats {
    pub fn record_trigger(&mut self, source: &str, entities: u64, now: DateTime<Utc>) {
        self.triggered += 1;
        self.last_dispatch_at = Some(now);
        let per_source = self.by_source.entry(source.to_string()).or_default();
        per_source.triggered += 1;
        per_source.entities_received += entities;
        per_source.last_dispatch_at = Some(now);
    }

    pub fn record_debounce(&mut self, source: &str, count: u64) {
        self.debounced += count;
        self.by_source.entry(source.to_string()).or_default().debounced += count;
    }

    pub fn record_dedupe(&mut self, count: u64) {
        self.deduped += count;
    }

    pub fn record_rate_limit(&mut self, count: u64) {
        self.rate_limited += count;
    }

    pub fn record_dropped_batch(&mut self) {
        self.dropped_batches += 1;
    }

    pub fn record_rules_result(&mut self, evaluated: u64, fired: u64, scheduled: u64, errors: u64) {
        self.rules_evaluated += evaluated;
        self.rules_fired += fired;
        self.rules_scheduled += scheduled;
        self.rules_errors += errors;
    }

    pub fn as_json(&self) -> JsonValue {
        let mut by_source = Map::new();
        for (source, stats) in &self.by_source {
            by_source.insert(source.clone(), stats.as_json());
        }
        json!({
            "triggered": self.triggered,
            "deduped": self.deduped,
            "debounced": self.debounced,
            "rate_limited": self.rate_limited,
            "dropped_batches": self.dropped_batches,
            "rules_evaluated": self.rules_evaluated,
            "rules_fired": self.rules_fired,
            "rules_scheduled": self.rules_scheduled,
            "rules_errors": self.rules_errors,
            "last_dispatch_at": self.last_dispatch_at.map(|v| v.to_rfc3339()),
            "by_source": JsonValue::Object(by_source),
        })
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn default_values_are_zero() {
        let stats = DispatcherStats::default();
        assert_eq!(stats.triggered, 0);
        assert_eq!(stats.deduped, 0);
        assert_eq!(stats.debounced, 0);
        assert_eq!(stats.rate_limited, 0);
        assert_eq!(stats.dropped_batches, 0);
        assert!(stats.last_dispatch_at.is_none());
        assert!(stats.by_source.is_empty());
    }

    #[test]
    fn record_trigger_updates_totals_and_source() {
        let mut stats = DispatcherStats::default();
        stats.record_trigger("zigbee2mqtt", 5, now());

        assert_eq!(stats.triggered, 1);
        assert_eq!(stats.last_dispatch_at, Some(now()));
        let source = stats.by_source.get("zigbee2mqtt").unwrap();
        assert_eq!(source.triggered, 1);
        assert_eq!(source.entities_received, 5);
    }

    #[test]
    fn record_debounce_counts_per_source() {
        let mut stats = DispatcherStats::default();
        stats.record_debounce("frigate", 3);

        assert_eq!(stats.debounced, 3);
        assert_eq!(stats.by_source.get("frigate").unwrap().debounced, 3);
    }

    #[test]
    fn record_dedupe_rate_limit_and_drops() {
        let mut stats = DispatcherStats::default();
        stats.record_dedupe(10);
        stats.record_rate_limit(2);
        stats.record_dropped_batch();

        assert_eq!(stats.deduped, 10);
        assert_eq!(stats.rate_limited, 2);
        assert_eq!(stats.dropped_batches, 1);
    }

    #[test]
    fn record_rules_result_accumulates() {
        let mut stats = DispatcherStats::default();
        stats.record_rules_result(10, 3, 2, 1);

        assert_eq!(stats.rules_evaluated, 10);
        assert_eq!(stats.rules_fired, 3);
        assert_eq!(stats.rules_scheduled, 2);
        assert_eq!(stats.rules_errors, 1);
    }

    #[test]
    fn as_json_serializes_sources() {
        let mut stats = DispatcherStats::default();
        stats.record_trigger("zigbee2mqtt", 5, now());
        stats.record_dedupe(2);

        let body = stats.as_json();
        assert_eq!(body["triggered"], 1);
        assert_eq!(body["deduped"], 2);
        assert!(body["by_source"].get("zigbee2mqtt").is_some());
    }

    #[test]
    fn reset_clears_everything() {
        let mut stats = DispatcherStats::default();
        stats.record_trigger("zigbee2mqtt", 5, now());
        stats.record_dedupe(10);

        stats.reset();
        assert_eq!(stats.triggered, 0);
        assert_eq!(stats.deduped, 0);
        assert!(stats.by_source.is_empty());
        assert!(stats.last_dispatch_at.is_none());
    }

    #[test]
    fn multiple_sources_tracked_independently() {
        let mut stats = DispatcherStats::default();
        stats.record_trigger("zigbee2mqtt", 10, now());
        stats.record_trigger("frigate", 5, now());
        stats.record_trigger("zigbee2mqtt", 3, now());

        assert_eq!(stats.triggered, 3);
        assert_eq!(stats.by_source.get("zigbee2mqtt").unwrap().triggered, 2);
        assert_eq!(
            stats.by_source.get("zigbee2mqtt").unwrap().entities_received,
            13
        );
        assert_eq!(stats.by_source.get("frigate").unwrap().triggered, 1);
        assert_eq!(stats.by_source.get("frigate").unwrap().entities_received, 5);
    }
}
