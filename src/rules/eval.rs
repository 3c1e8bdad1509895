use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, HashSet};

use crate::alarm::AlarmState;
use crate::store::detections::DetectionStore;
use crate::store::runtime::{RuleRuntimeState, RuleRuntimeStore};

use super::conditions::{
    time_in_range_matches, DetectionAggregation, OnUnavailable, WhenNode,
};

const DETECTION_LABEL: &str = "person";

/// Inputs for one evaluation pass. `now` is the only time source; detections
/// and alarm state are optional collaborators.
pub struct EvalContext<'a> {
    pub entity_states: &'a HashMap<String, String>,
    pub now: DateTime<Utc>,
    pub detections: Option<&'a DetectionStore>,
    pub alarm_state: Option<AlarmState>,
    pub assume_for_seconds: Option<i64>,
}

/// Short-lived view over the per-node runtime rows of one rule. The engine
/// loads it before evaluation and flushes dirty rows in a single write at
/// the end; simulation uses a detached view that is never flushed.
pub struct RuntimeView {
    rule_id: i64,
    entries: HashMap<String, RuleRuntimeState>,
    dirty: HashSet<String>,
}

pub const ROOT_NODE_ID: &str = "when";

impl RuntimeView {
    pub fn load(store: &RuleRuntimeStore, rule_id: i64, when: Option<&WhenNode>) -> Self {
        let mut paths = vec![ROOT_NODE_ID.to_string()];
        if let Some(when) = when {
            collect_for_paths(when, ROOT_NODE_ID, &mut paths);
        }
        let entries = paths
            .into_iter()
            .map(|path| {
                let state = store.get_or_create(rule_id, &path);
                (path, state)
            })
            .collect();
        Self {
            rule_id,
            entries,
            dirty: HashSet::new(),
        }
    }

    pub fn detached(rule_id: i64) -> Self {
        Self {
            rule_id,
            entries: HashMap::new(),
            dirty: HashSet::new(),
        }
    }

    pub fn node(&mut self, path: &str) -> &RuleRuntimeState {
        let rule_id = self.rule_id;
        self.entries
            .entry(path.to_string())
            .or_insert_with(|| RuleRuntimeState::new(rule_id, path))
    }

    pub fn node_mut(&mut self, path: &str) -> &mut RuleRuntimeState {
        self.dirty.insert(path.to_string());
        let rule_id = self.rule_id;
        self.entries
            .entry(path.to_string())
            .or_insert_with(|| RuleRuntimeState::new(rule_id, path))
    }

    /// Writes every dirty row back to the store.
    pub fn flush(self, store: &RuleRuntimeStore) {
        for path in self.dirty {
            if let Some(state) = self.entries.get(&path) {
                store.save(state.clone());
            }
        }
    }
}

fn collect_for_paths(node: &WhenNode, path: &str, out: &mut Vec<String>) {
    match node {
        WhenNode::For { child, .. } => {
            let for_path = format!("{path}.for");
            out.push(for_path.clone());
            collect_for_paths(child, &for_path, out);
        }
        WhenNode::All { children } => {
            for (index, child) in children.iter().enumerate() {
                collect_for_paths(child, &format!("{path}.all[{index}]"), out);
            }
        }
        WhenNode::Any { children } => {
            for (index, child) in children.iter().enumerate() {
                collect_for_paths(child, &format!("{path}.any[{index}]"), out);
            }
        }
        WhenNode::Not { child } => collect_for_paths(child, &format!("{path}.not"), out),
        _ => {}
    }
}

struct NodeEval {
    passed: bool,
    trace: JsonValue,
}

pub fn eval_when(
    node: &WhenNode,
    ctx: &EvalContext<'_>,
    view: &mut RuntimeView,
) -> Result<bool, String> {
    eval_node(node, ctx, view, ROOT_NODE_ID).map(|eval| eval.passed)
}

/// Side-effect-free form used by simulation: same result, plus a trace with
/// `op`, per-child results, and operator diagnostics.
pub fn eval_when_explain(
    node: &WhenNode,
    ctx: &EvalContext<'_>,
    view: &mut RuntimeView,
) -> Result<(bool, JsonValue), String> {
    eval_node(node, ctx, view, ROOT_NODE_ID).map(|eval| (eval.passed, eval.trace))
}

fn eval_node(
    node: &WhenNode,
    ctx: &EvalContext<'_>,
    view: &mut RuntimeView,
    path: &str,
) -> Result<NodeEval, String> {
    match node {
        WhenNode::EntityState {
            entity_id,
            equals,
            not_equals,
            in_states,
        } => {
            let entity_id = entity_id.trim();
            let state = ctx.entity_states.get(entity_id);
            // Unknown entity is "no match", never an error.
            let passed = match (state, equals, not_equals, in_states) {
                (None, ..) => false,
                (Some(state), Some(equals), _, _) => state == equals,
                (Some(state), _, Some(not_equals), _) => state != not_equals,
                (Some(state), _, _, Some(in_states)) => in_states.iter().any(|v| v == state),
                (Some(_), None, None, None) => false,
            };
            Ok(NodeEval {
                passed,
                trace: json!({
                    "op": "entity_state",
                    "entity_id": entity_id,
                    "state": state,
                    "result": passed,
                }),
            })
        }
        WhenNode::All { children } => {
            let mut passed = true;
            let mut traces = Vec::with_capacity(children.len());
            for (index, child) in children.iter().enumerate() {
                let child_path = format!("{path}.all[{index}]");
                let eval = eval_node(child, ctx, view, &child_path)?;
                passed = passed && eval.passed;
                traces.push(eval.trace);
            }
            Ok(NodeEval {
                passed,
                trace: json!({"op": "all", "result": passed, "children": traces}),
            })
        }
        WhenNode::Any { children } => {
            let mut passed = false;
            let mut traces = Vec::with_capacity(children.len());
            for (index, child) in children.iter().enumerate() {
                let child_path = format!("{path}.any[{index}]");
                let eval = eval_node(child, ctx, view, &child_path)?;
                passed = passed || eval.passed;
                traces.push(eval.trace);
            }
            Ok(NodeEval {
                passed,
                trace: json!({"op": "any", "result": passed, "children": traces}),
            })
        }
        WhenNode::Not { child } => {
            let eval = eval_node(child, ctx, view, &format!("{path}.not"))?;
            Ok(NodeEval {
                passed: !eval.passed,
                trace: json!({"op": "not", "result": !eval.passed, "child": eval.trace}),
            })
        }
        WhenNode::For { seconds, child } => {
            let for_path = format!("{path}.for");
            let child_eval = eval_node(child, ctx, view, &for_path)?;

            // Track child edges on this node's runtime row so continuity
            // survives across evaluations.
            let now = ctx.now;
            let state = view.node(&for_path);
            let transition_at = if state.last_when_matched == Some(child_eval.passed) {
                state.last_when_transition_at.unwrap_or(now)
            } else {
                let state = view.node_mut(&for_path);
                state.last_when_matched = Some(child_eval.passed);
                state.last_when_transition_at = Some(now);
                now
            };

            let elapsed = match ctx.assume_for_seconds {
                Some(assumed) => assumed,
                None => (now - transition_at).num_seconds(),
            };
            let passed = child_eval.passed && elapsed >= *seconds;
            Ok(NodeEval {
                passed,
                trace: json!({
                    "op": "for",
                    "seconds": seconds,
                    "elapsed": elapsed,
                    "result": passed,
                    "child": child_eval.trace,
                }),
            })
        }
        WhenNode::AlarmStateIn { states } => {
            let current = ctx.alarm_state.map(AlarmState::as_str);
            let passed = current.is_some_and(|state| states.iter().any(|s| s == state));
            Ok(NodeEval {
                passed,
                trace: json!({
                    "op": "alarm_state_in",
                    "current_state": current,
                    "result": passed,
                }),
            })
        }
        WhenNode::FrigatePersonDetected {
            cameras,
            zones,
            within_seconds,
            min_confidence_pct,
            aggregation,
            on_unavailable,
        } => {
            let Some(store) = ctx.detections else {
                return match on_unavailable {
                    OnUnavailable::TreatAsNoMatch => Ok(NodeEval {
                        passed: false,
                        trace: json!({
                            "op": "frigate_person_detected",
                            "result": false,
                            "unavailable": true,
                        }),
                    }),
                    OnUnavailable::Error => Err("detection store unavailable".to_string()),
                };
            };

            let since = ctx.now - chrono::Duration::seconds((*within_seconds).max(0));
            let candidates = store.recent(
                DETECTION_LABEL,
                cameras.as_deref(),
                zones.as_deref(),
                since,
            );
            let passed = match aggregation {
                DetectionAggregation::Max => candidates
                    .iter()
                    .map(|d| d.confidence_pct)
                    .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.max(v))))
                    .is_some_and(|max| max >= *min_confidence_pct),
                DetectionAggregation::Avg => {
                    if candidates.is_empty() {
                        false
                    } else {
                        let sum: f64 = candidates.iter().map(|d| d.confidence_pct).sum();
                        sum / candidates.len() as f64 >= *min_confidence_pct
                    }
                }
                DetectionAggregation::Count => candidates.len() as f64 >= *min_confidence_pct,
            };
            Ok(NodeEval {
                passed,
                trace: json!({
                    "op": "frigate_person_detected",
                    "candidates_count": candidates.len(),
                    "result": passed,
                }),
            })
        }
        WhenNode::TimeInRange {
            start,
            end,
            tz,
            days,
        } => {
            let passed =
                time_in_range_matches(start, end, tz.as_deref(), days.as_deref(), ctx.now);
            Ok(NodeEval {
                passed,
                trace: json!({"op": "time_in_range", "result": passed}),
            })
        }
    }
}
