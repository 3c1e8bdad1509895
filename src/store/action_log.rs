use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use std::collections::VecDeque;
use std::sync::RwLock;

use super::{read_guard, write_guard};

/// One row per rule firing with structured per-action results.
#[derive(Debug, Clone)]
pub struct ActionLogEntry {
    pub id: i64,
    pub rule_id: i64,
    pub rule_name: String,
    pub fired_at: DateTime<Utc>,
    pub ok: bool,
    pub results: Vec<JsonValue>,
}

impl ActionLogEntry {
    pub fn as_json(&self) -> JsonValue {
        json!({
            "id": self.id,
            "rule_id": self.rule_id,
            "rule_name": self.rule_name,
            "fired_at": self.fired_at.to_rfc3339(),
            "ok": self.ok,
            "results": self.results,
        })
    }
}

struct LogState {
    next_id: i64,
    entries: VecDeque<ActionLogEntry>,
}

pub struct ActionLogStore {
    inner: RwLock<LogState>,
}

impl ActionLogStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(LogState {
                next_id: 1,
                entries: VecDeque::new(),
            }),
        }
    }

    pub fn append(
        &self,
        rule_id: i64,
        rule_name: &str,
        fired_at: DateTime<Utc>,
        ok: bool,
        results: Vec<JsonValue>,
    ) -> i64 {
        let mut inner = write_guard(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push_back(ActionLogEntry {
            id,
            rule_id,
            rule_name: rule_name.to_string(),
            fired_at,
            ok,
            results,
        });
        id
    }

    /// Most recent entries first.
    pub fn recent(&self, limit: usize) -> Vec<ActionLogEntry> {
        read_guard(&self.inner)
            .entries
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn for_rule(&self, rule_id: i64) -> Vec<ActionLogEntry> {
        read_guard(&self.inner)
            .entries
            .iter()
            .filter(|entry| entry.rule_id == rule_id)
            .cloned()
            .collect()
    }

    pub fn prune_fired_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut inner = write_guard(&self.inner);
        let before = inner.entries.len();
        inner.entries.retain(|entry| entry.fired_at >= cutoff);
        before - inner.entries.len()
    }

    pub fn len(&self) -> usize {
        read_guard(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ActionLogStore {
    fn default() -> Self {
        Self::new()
    }
}
