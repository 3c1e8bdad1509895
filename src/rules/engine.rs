use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::alarm::{AlarmState, AlarmStateStore};
use crate::gateways::ActionGateways;
use crate::store::rules::Rule;
use crate::store::Stores;

use super::actions::{ActionContext, ActionExecutor};
use super::conditions::parse_definition;
use super::eval::{eval_when, eval_when_explain, EvalContext, RuntimeView, ROOT_NODE_ID};
use super::extract::extract_entity_ids_from_definition;
use super::failure::{is_rule_allowed, record_failure, record_success};

/// Aggregate outcome of one engine run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunRulesResult {
    pub evaluated: u64,
    pub fired: u64,
    pub scheduled: u64,
    pub errors: u64,
    pub skipped_cooldown: u64,
    pub skipped_edge: u64,
    pub skipped_suspended: u64,
}

impl RunRulesResult {
    pub fn merge(&mut self, other: RunRulesResult) {
        self.evaluated += other.evaluated;
        self.fired += other.fired;
        self.scheduled += other.scheduled;
        self.errors += other.errors;
        self.skipped_cooldown += other.skipped_cooldown;
        self.skipped_edge += other.skipped_edge;
        self.skipped_suspended += other.skipped_suspended;
    }

    pub fn as_json(&self) -> JsonValue {
        json!({
            "evaluated": self.evaluated,
            "fired": self.fired,
            "scheduled": self.scheduled,
            "errors": self.errors,
            "skipped_cooldown": self.skipped_cooldown,
            "skipped_edge": self.skipped_edge,
            "skipped_suspended": self.skipped_suspended,
        })
    }
}

/// Evaluates rules against a consistent entity snapshot at an explicit
/// `now`, enforcing edge-trigger, cooldown, and circuit-breaker policy
/// before running actions.
pub struct RulesEngine {
    stores: Stores,
    alarm: Arc<AlarmStateStore>,
    gateways: ActionGateways,
    executor: ActionExecutor,
}

impl RulesEngine {
    pub fn new(stores: Stores, alarm: Arc<AlarmStateStore>, gateways: ActionGateways) -> Self {
        Self {
            stores,
            alarm,
            gateways,
            executor: ActionExecutor::new(),
        }
    }

    /// Runs the given rules (typically the impacted subset) against the
    /// pre-read entity states. Rules evaluate independently; one failing
    /// rule never aborts the rest.
    pub async fn run_rules(
        &self,
        rules: &[Rule],
        entity_states: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> RunRulesResult {
        let mut ordered: Vec<&Rule> = rules.iter().collect();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        let mut result = RunRulesResult::default();
        for rule in ordered {
            self.run_rule(rule, entity_states, now, &mut result).await;
        }
        result
    }

    /// Convenience for the admin "run now" path: evaluates every enabled
    /// rule against the states of all entities it references.
    pub async fn run_all_enabled(&self, now: DateTime<Utc>) -> RunRulesResult {
        let rules = self.stores.rules.enabled_rules();
        let mut wanted: BTreeSet<String> = BTreeSet::new();
        for rule in &rules {
            wanted.extend(self.referenced_entity_ids(rule));
        }
        let entity_states = self.stores.entities.read_states(&wanted);
        self.run_rules(&rules, &entity_states, now).await
    }

    pub fn referenced_entity_ids(&self, rule: &Rule) -> BTreeSet<String> {
        let refs = self.stores.rules.entity_refs(rule.id);
        if refs.is_empty() {
            extract_entity_ids_from_definition(&rule.definition)
        } else {
            refs
        }
    }

    async fn run_rule(
        &self,
        rule: &Rule,
        entity_states: &HashMap<String, String>,
        now: DateTime<Utc>,
        result: &mut RunRulesResult,
    ) {
        let definition = match parse_definition(&rule.definition) {
            Ok(definition) => definition,
            Err(err) => {
                tracing::warn!(rule_id = rule.id, error = %err, "rule definition unparseable");
                result.errors += 1;
                return;
            }
        };

        result.evaluated += 1;
        let mut view = RuntimeView::load(&self.stores.runtime, rule.id, definition.when.as_ref());

        let passed = match &definition.when {
            Some(when) => {
                let ctx = EvalContext {
                    entity_states,
                    now,
                    detections: Some(&self.stores.detections),
                    alarm_state: Some(self.alarm.current_state(now)),
                    assume_for_seconds: None,
                };
                match eval_when(when, &ctx, &mut view) {
                    Ok(passed) => passed,
                    Err(err) => {
                        tracing::warn!(rule_id = rule.id, error = %err, "rule evaluation failed");
                        result.errors += 1;
                        let root = view.node_mut(ROOT_NODE_ID);
                        record_failure(root, now, &err);
                        view.flush(&self.stores.runtime);
                        return;
                    }
                }
            }
            None => false,
        };

        let previous = view.node(ROOT_NODE_ID).last_when_matched;

        if !passed {
            if previous != Some(false) {
                let root = view.node_mut(ROOT_NODE_ID);
                root.last_when_matched = Some(false);
                root.last_when_transition_at = Some(now);
            }
            view.flush(&self.stores.runtime);
            return;
        }

        // Rules fire only on the false->true transition of the root `when`.
        let newly_true = previous != Some(true);
        {
            let root = view.node_mut(ROOT_NODE_ID);
            if newly_true {
                root.last_when_transition_at = Some(now);
            }
            root.last_when_matched = Some(true);
        }
        if !newly_true {
            result.skipped_edge += 1;
            view.flush(&self.stores.runtime);
            return;
        }

        let root_state = view.node(ROOT_NODE_ID).clone();

        // A null cooldown and a zero cooldown both mean "none".
        if let Some(cooldown) = rule.cooldown_seconds.filter(|value| *value > 0) {
            if let Some(last_fired_at) = root_state.last_fired_at {
                if (now - last_fired_at).num_seconds() < cooldown {
                    result.skipped_cooldown += 1;
                    view.flush(&self.stores.runtime);
                    return;
                }
            }
        }

        if !is_rule_allowed(&root_state, now).is_allowed() {
            result.skipped_suspended += 1;
            view.flush(&self.stores.runtime);
            return;
        }

        let (action_results, first_error, scheduled) =
            self.run_actions(rule, &definition.then, now).await;

        {
            // `last_fired_at` advances regardless of action success so the
            // cooldown bounds retries.
            let root = view.node_mut(ROOT_NODE_ID);
            root.last_fired_at = Some(now);
            match &first_error {
                Some(error) => record_failure(root, now, error),
                None => record_success(root),
            }
        }
        view.flush(&self.stores.runtime);

        result.fired += 1;
        if scheduled {
            result.scheduled += 1;
        }
        if first_error.is_some() {
            result.errors += 1;
        }
        self.stores.action_log.append(
            rule.id,
            &rule.name,
            now,
            first_error.is_none(),
            action_results,
        );
    }

    async fn run_actions(
        &self,
        rule: &Rule,
        then: &[JsonValue],
        now: DateTime<Utc>,
    ) -> (Vec<JsonValue>, Option<String>, bool) {
        let ctx = ActionContext {
            rule,
            actor_user: rule.created_by.as_deref(),
            now,
            alarm: &self.alarm,
            profiles: &self.stores.profiles,
            gateways: &self.gateways,
        };

        let mut results = Vec::with_capacity(then.len());
        let mut first_error: Option<String> = None;
        let mut scheduled = false;
        for action in then {
            let (result, error) = self.executor.execute(action, &ctx).await;
            if result.get("ok") == Some(&json!(true))
                && result.get("arming") == Some(&json!(true))
            {
                scheduled = true;
            }
            if first_error.is_none() {
                first_error = error;
            }
            results.push(result);
        }
        (results, first_error, scheduled)
    }

    /// Non-persisting evaluation with injected entity states and optional
    /// `for:`/alarm-state assumptions. Returns a summary plus per-rule
    /// traces; no actions run and no runtime state is written.
    pub fn simulate(
        &self,
        entity_state_overrides: &HashMap<String, String>,
        assume_for_seconds: Option<i64>,
        alarm_state: Option<AlarmState>,
        now: DateTime<Utc>,
    ) -> JsonValue {
        let rules = self.stores.rules.enabled_rules();

        let mut wanted: BTreeSet<String> = BTreeSet::new();
        for rule in &rules {
            wanted.extend(self.referenced_entity_ids(rule));
        }
        let mut entity_states = self.stores.entities.read_states(&wanted);
        for (entity_id, state) in entity_state_overrides {
            entity_states.insert(entity_id.clone(), state.clone());
        }

        let alarm_state = alarm_state.unwrap_or_else(|| self.alarm.current_state(now));

        let mut evaluated = 0u64;
        let mut matched = 0u64;
        let mut traces = Vec::with_capacity(rules.len());
        for rule in &rules {
            let definition = match parse_definition(&rule.definition) {
                Ok(definition) => definition,
                Err(err) => {
                    traces.push(json!({
                        "rule_id": rule.id,
                        "rule_name": rule.name,
                        "error": err,
                    }));
                    continue;
                }
            };
            let Some(when) = &definition.when else {
                continue;
            };
            evaluated += 1;

            let ctx = EvalContext {
                entity_states: &entity_states,
                now,
                detections: Some(&self.stores.detections),
                alarm_state: Some(alarm_state),
                assume_for_seconds,
            };
            let mut view = RuntimeView::detached(rule.id);
            match eval_when_explain(when, &ctx, &mut view) {
                Ok((passed, trace)) => {
                    if passed {
                        matched += 1;
                    }
                    traces.push(json!({
                        "rule_id": rule.id,
                        "rule_name": rule.name,
                        "result": passed,
                        "trace": trace,
                    }));
                }
                Err(err) => {
                    traces.push(json!({
                        "rule_id": rule.id,
                        "rule_name": rule.name,
                        "error": err,
                    }));
                }
            }
        }

        json!({
            "evaluated": evaluated,
            "matched": matched,
            "rules": traces,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::failure::{AUTO_RECOVERY_SECONDS, CIRCUIT_BREAKER_THRESHOLD};
    use crate::test_support::{self, TestHarness};
    use chrono::Duration;

    fn front_door_rule(harness: &TestHarness, cooldown: Option<i64>) -> Rule {
        test_support::insert_rule(
            harness,
            "Front door",
            json!({
                "when": {"op": "entity_state", "entity_id": "binary_sensor.front_door", "equals": "on"},
                "then": [],
            }),
            cooldown,
            true,
        )
    }

    fn door_states(state: &str) -> HashMap<String, String> {
        [("binary_sensor.front_door".to_string(), state.to_string())]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn edge_trigger_fires_once_per_transition() {
        let harness = test_support::test_harness();
        let engine = harness.engine();
        let rule = front_door_rule(&harness, None);
        let now = harness.now();

        // First true evaluation fires.
        let result = engine.run_rules(&[rule.clone()], &door_states("on"), now).await;
        assert_eq!(result.fired, 1);

        // Still true: edge already consumed.
        let result = engine.run_rules(&[rule.clone()], &door_states("on"), now).await;
        assert_eq!(result.fired, 0);
        assert_eq!(result.skipped_edge, 1);

        // Goes false: no fire, edge state flips.
        let result = engine.run_rules(&[rule.clone()], &door_states("off"), now).await;
        assert_eq!(result.fired, 0);
        assert_eq!(result.skipped_edge, 0);

        // True again: fires again.
        let result = engine.run_rules(&[rule.clone()], &door_states("on"), now).await;
        assert_eq!(result.fired, 1);
    }

    #[tokio::test]
    async fn cooldown_skips_then_allows() {
        let harness = test_support::test_harness();
        let engine = harness.engine();
        let rule = front_door_rule(&harness, Some(60));
        let now = harness.now();

        harness.stores.runtime.update(rule.id, "when", |state| {
            state.last_fired_at = Some(now - Duration::seconds(30));
        });
        let result = engine.run_rules(&[rule.clone()], &door_states("on"), now).await;
        assert_eq!(result.fired, 0);
        assert_eq!(result.skipped_cooldown, 1);

        // Out of cooldown on the next false->true edge.
        harness.stores.runtime.update(rule.id, "when", |state| {
            state.last_fired_at = Some(now - Duration::seconds(120));
            state.last_when_matched = Some(false);
        });
        let result = engine.run_rules(&[rule.clone()], &door_states("on"), now).await;
        assert_eq!(result.fired, 1);
        assert_eq!(result.skipped_cooldown, 0);
    }

    #[tokio::test]
    async fn event_time_for_window_gates_firing() {
        let harness = test_support::test_harness();
        let engine = harness.engine();
        let rule = test_support::insert_rule(
            &harness,
            "Door held open",
            json!({
                "when": {
                    "op": "for",
                    "seconds": 30,
                    "child": {"op": "entity_state", "entity_id": "binary_sensor.front_door", "equals": "on"},
                },
                "then": [],
            }),
            None,
            true,
        );
        let t0 = harness.now();

        let result = engine.run_rules(&[rule.clone()], &door_states("on"), t0).await;
        assert_eq!(result.fired, 0);

        let result = engine
            .run_rules(&[rule.clone()], &door_states("on"), t0 + Duration::seconds(10))
            .await;
        assert_eq!(result.fired, 0);

        let result = engine
            .run_rules(&[rule.clone()], &door_states("on"), t0 + Duration::seconds(31))
            .await;
        assert_eq!(result.fired, 1);
    }

    #[tokio::test]
    async fn all_matching_rules_fire_and_disabled_are_excluded() {
        let harness = test_support::test_harness();
        let engine = harness.engine();
        for name in ["low", "high", "medium"] {
            test_support::insert_rule(
                &harness,
                name,
                json!({
                    "when": {"op": "entity_state", "entity_id": "binary_sensor.front_door", "equals": "on"},
                    "then": [],
                }),
                None,
                true,
            );
        }
        test_support::insert_rule(
            &harness,
            "disabled",
            json!({
                "when": {"op": "entity_state", "entity_id": "binary_sensor.front_door", "equals": "on"},
                "then": [],
            }),
            None,
            false,
        );

        harness.stores.entities.upsert(
            "binary_sensor.front_door",
            "on",
            None,
            "test",
            None,
            harness.now(),
        );
        let result = engine.run_all_enabled(harness.now()).await;
        assert_eq!(result.evaluated, 3);
        assert_eq!(result.fired, 3);
    }

    #[tokio::test]
    async fn firing_writes_action_log() {
        let harness = test_support::test_harness();
        let engine = harness.engine();
        let rule = test_support::insert_rule(
            &harness,
            "Porch light",
            json!({
                "when": {"op": "entity_state", "entity_id": "binary_sensor.front_door", "equals": "on"},
                "then": [{"type": "zigbee2mqtt_switch", "entity_id": "porch_plug", "state": "on"}],
            }),
            None,
            true,
        );

        let result = engine
            .run_rules(&[rule.clone()], &door_states("on"), harness.now())
            .await;
        assert_eq!(result.fired, 1);

        let logs = harness.stores.action_log.for_rule(rule.id);
        assert_eq!(logs.len(), 1);
        assert!(logs[0].ok);
        assert_eq!(logs[0].results[0]["type"], "zigbee2mqtt_switch");
    }

    #[tokio::test]
    async fn consecutive_failures_trip_the_circuit_breaker() {
        let harness = test_support::test_harness();
        harness.recorder.set_failing(true);
        let engine = harness.engine();
        let rule = test_support::insert_rule(
            &harness,
            "Flaky gateway",
            json!({
                "when": {"op": "entity_state", "entity_id": "binary_sensor.front_door", "equals": "on"},
                "then": [{"type": "zigbee2mqtt_switch", "entity_id": "plug", "state": "on"}],
            }),
            None,
            true,
        );
        let t0 = harness.now();

        let mut now = t0;
        for i in 0..CIRCUIT_BREAKER_THRESHOLD {
            // Re-arm the edge and clear backoff so each firing is a fresh
            // consecutive failure.
            harness.stores.runtime.update(rule.id, "when", |state| {
                state.last_when_matched = Some(false);
                state.next_allowed_at = None;
            });
            let result = engine.run_rules(&[rule.clone()], &door_states("on"), now).await;
            assert_eq!(result.fired, 1, "firing {i}");
            assert_eq!(result.errors, 1, "firing {i}");
            now += Duration::seconds(1);
        }

        let state = harness.stores.runtime.get(rule.id, "when").unwrap();
        assert!(state.error_suspended);
        assert_eq!(state.consecutive_failures, CIRCUIT_BREAKER_THRESHOLD);
        let last_fire = now - Duration::seconds(1);
        assert_eq!(
            state.next_allowed_at,
            Some(last_fire + Duration::seconds(AUTO_RECOVERY_SECONDS))
        );

        // While suspended, a fresh edge is skipped.
        harness.stores.runtime.update(rule.id, "when", |state| {
            state.last_when_matched = Some(false);
        });
        let result = engine.run_rules(&[rule.clone()], &door_states("on"), now).await;
        assert_eq!(result.fired, 0);
        assert_eq!(result.skipped_suspended, 1);

        // After the recovery window a successful firing clears the breaker.
        harness.recorder.set_failing(false);
        harness.stores.runtime.update(rule.id, "when", |state| {
            state.last_when_matched = Some(false);
        });
        let recovered_at = last_fire + Duration::seconds(AUTO_RECOVERY_SECONDS + 1);
        let result = engine
            .run_rules(&[rule.clone()], &door_states("on"), recovered_at)
            .await;
        assert_eq!(result.fired, 1);
        let state = harness.stores.runtime.get(rule.id, "when").unwrap();
        assert!(!state.error_suspended);
        assert_eq!(state.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn failed_actions_still_advance_last_fired_at() {
        let harness = test_support::test_harness();
        harness.recorder.set_failing(true);
        let engine = harness.engine();
        let rule = test_support::insert_rule(
            &harness,
            "Failing",
            json!({
                "when": {"op": "entity_state", "entity_id": "binary_sensor.front_door", "equals": "on"},
                "then": [{"type": "zigbee2mqtt_switch", "entity_id": "plug", "state": "on"}],
            }),
            Some(60),
            true,
        );

        let now = harness.now();
        engine.run_rules(&[rule.clone()], &door_states("on"), now).await;
        let state = harness.stores.runtime.get(rule.id, "when").unwrap();
        assert_eq!(state.last_fired_at, Some(now));

        let logs = harness.stores.action_log.for_rule(rule.id);
        assert!(!logs[0].ok);
    }

    #[tokio::test]
    async fn simulate_reports_traces_without_persisting() {
        let harness = test_support::test_harness();
        let engine = harness.engine();
        let rule = front_door_rule(&harness, None);

        let overrides = door_states("on");
        let report = engine.simulate(&overrides, None, None, harness.now());
        assert_eq!(report["evaluated"], 1);
        assert_eq!(report["matched"], 1);
        assert_eq!(report["rules"][0]["rule_id"], rule.id);
        assert_eq!(report["rules"][0]["trace"]["op"], "entity_state");

        // Nothing fired, nothing persisted.
        assert!(harness.stores.action_log.is_empty());
        assert!(harness.stores.runtime.get(rule.id, "when").is_none());
    }

    #[tokio::test]
    async fn simulate_honors_assumed_alarm_state() {
        let harness = test_support::test_harness();
        let engine = harness.engine();
        test_support::insert_rule(
            &harness,
            "Armed only",
            json!({
                "when": {
                    "op": "all",
                    "children": [
                        {"op": "alarm_state_in", "states": ["armed_away"]},
                        {"op": "entity_state", "entity_id": "binary_sensor.front_door", "equals": "on"},
                    ],
                },
                "then": [],
            }),
            None,
            true,
        );

        let overrides = door_states("on");
        let report = engine.simulate(&overrides, None, None, harness.now());
        assert_eq!(report["matched"], 0);

        let report = engine.simulate(
            &overrides,
            None,
            Some(AlarmState::ArmedAway),
            harness.now(),
        );
        assert_eq!(report["matched"], 1);
    }
}
