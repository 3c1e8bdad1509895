use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{read_guard, write_guard};

/// Per-rule, per-condition-node runtime facts. Keyed by `(rule_id, node_id)`
/// where node ids are condition-tree paths ("when", "when.for", ...).
/// Created on first evaluation and never destroyed; operators may clear a
/// suspension explicitly.
#[derive(Debug, Clone)]
pub struct RuleRuntimeState {
    pub rule_id: i64,
    pub node_id: String,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub last_when_matched: Option<bool>,
    pub last_when_transition_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub next_allowed_at: Option<DateTime<Utc>>,
    pub error_suspended: bool,
    pub last_error: Option<String>,
}

impl RuleRuntimeState {
    pub fn new(rule_id: i64, node_id: &str) -> Self {
        Self {
            rule_id,
            node_id: node_id.to_string(),
            last_fired_at: None,
            last_when_matched: None,
            last_when_transition_at: None,
            consecutive_failures: 0,
            last_failure_at: None,
            next_allowed_at: None,
            error_suspended: false,
            last_error: None,
        }
    }

    pub fn as_json(&self) -> JsonValue {
        json!({
            "rule_id": self.rule_id,
            "node_id": self.node_id,
            "last_fired_at": self.last_fired_at.map(|v| v.to_rfc3339()),
            "last_when_matched": self.last_when_matched,
            "last_when_transition_at": self.last_when_transition_at.map(|v| v.to_rfc3339()),
            "consecutive_failures": self.consecutive_failures,
            "last_failure_at": self.last_failure_at.map(|v| v.to_rfc3339()),
            "next_allowed_at": self.next_allowed_at.map(|v| v.to_rfc3339()),
            "error_suspended": self.error_suspended,
            "last_error": self.last_error,
        })
    }
}

pub struct RuleRuntimeStore {
    inner: RwLock<HashMap<(i64, String), RuleRuntimeState>>,
}

impl RuleRuntimeStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, rule_id: i64, node_id: &str) -> Option<RuleRuntimeState> {
        read_guard(&self.inner)
            .get(&(rule_id, node_id.to_string()))
            .cloned()
    }

    pub fn get_or_create(&self, rule_id: i64, node_id: &str) -> RuleRuntimeState {
        let mut inner = write_guard(&self.inner);
        inner
            .entry((rule_id, node_id.to_string()))
            .or_insert_with(|| RuleRuntimeState::new(rule_id, node_id))
            .clone()
    }

    /// Replaces the row for `(state.rule_id, state.node_id)`. The store's
    /// write lock serializes concurrent updates of the same key, standing in
    /// for a select-for-update row lock.
    pub fn save(&self, state: RuleRuntimeState) {
        let mut inner = write_guard(&self.inner);
        inner.insert((state.rule_id, state.node_id.clone()), state);
    }

    pub fn update<F>(&self, rule_id: i64, node_id: &str, apply: F) -> RuleRuntimeState
    where
        F: FnOnce(&mut RuleRuntimeState),
    {
        let mut inner = write_guard(&self.inner);
        let state = inner
            .entry((rule_id, node_id.to_string()))
            .or_insert_with(|| RuleRuntimeState::new(rule_id, node_id));
        apply(state);
        state.clone()
    }

    pub fn list_suspended(&self) -> Vec<RuleRuntimeState> {
        let mut out: Vec<RuleRuntimeState> = read_guard(&self.inner)
            .values()
            .filter(|state| state.error_suspended)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.rule_id.cmp(&b.rule_id).then(a.node_id.cmp(&b.node_id)));
        out
    }

    /// Clears suspension state for every suspended node of a rule. Returns
    /// the number of rows cleared (0 when nothing was suspended).
    pub fn clear_suspension(&self, rule_id: i64) -> usize {
        let mut inner = write_guard(&self.inner);
        let mut cleared = 0;
        for ((id, _), state) in inner.iter_mut() {
            if *id == rule_id && state.error_suspended {
                state.error_suspended = false;
                state.consecutive_failures = 0;
                state.next_allowed_at = None;
                state.last_error = None;
                cleared += 1;
            }
        }
        cleared
    }

    pub fn remove_rule(&self, rule_id: i64) {
        let mut inner = write_guard(&self.inner);
        inner.retain(|(id, _), _| *id != rule_id);
    }
}

impl Default for RuleRuntimeStore {
    fn default() -> Self {
        Self::new()
    }
}
