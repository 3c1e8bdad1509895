use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;

use crate::alarm::{AlarmState, AlarmStateStore};
use crate::gateways::ActionGateways;
use crate::store::profiles::SettingsProfileStore;
use crate::store::rules::Rule;

mod alarm;
mod ha_call_service;
mod send_notification;
mod zigbee2mqtt;
mod zwavejs;

/// Action types that may only appear on rules last modified by an admin.
pub const ADMIN_ONLY_ACTION_TYPES: &[&str] = &[
    "alarm_arm",
    "alarm_disarm",
    "alarm_trigger",
    "ha_call_service",
    "zwavejs_set_value",
];

const KNOWN_ACTION_TYPES: &[&str] = &[
    "alarm_arm",
    "alarm_disarm",
    "alarm_trigger",
    "ha_call_service",
    "send_notification",
    "zigbee2mqtt_light",
    "zigbee2mqtt_switch",
    "zigbee2mqtt_set_value",
    "zwavejs_set_value",
];

/// Immutable bundle of dependencies available to every action handler.
pub struct ActionContext<'a> {
    pub rule: &'a Rule,
    pub actor_user: Option<&'a str>,
    pub now: DateTime<Utc>,
    pub alarm: &'a AlarmStateStore,
    pub profiles: &'a SettingsProfileStore,
    pub gateways: &'a ActionGateways,
}

/// `(result, hard_error)`: the result object always carries `ok` and
/// `type`; a non-null second element counts as a firing failure for the
/// circuit breaker. Handlers never propagate failures any other way.
pub type ActionOutcome = (JsonValue, Option<String>);

pub type ActionHandler =
    for<'a> fn(&'a JsonValue, &'a ActionContext<'a>) -> BoxFuture<'a, ActionOutcome>;

/// Static `type -> handler` table built once at startup.
pub struct ActionExecutor {
    handlers: HashMap<&'static str, ActionHandler>,
}

impl ActionExecutor {
    pub fn new() -> Self {
        let mut executor = Self {
            handlers: HashMap::new(),
        };
        alarm::register(&mut executor);
        ha_call_service::register(&mut executor);
        send_notification::register(&mut executor);
        zigbee2mqtt::register(&mut executor);
        zwavejs::register(&mut executor);
        executor
    }

    /// Duplicate registrations are a startup bug, not a runtime condition.
    pub fn register(&mut self, action_type: &'static str, handler: ActionHandler) {
        if self.handlers.insert(action_type, handler).is_some() {
            panic!("duplicate handler registration for {action_type:?}");
        }
    }

    pub async fn execute(&self, action: &JsonValue, ctx: &ActionContext<'_>) -> ActionOutcome {
        let action_type = action
            .get("type")
            .and_then(JsonValue::as_str)
            .unwrap_or("")
            .to_string();

        let Some(handler) = self.handlers.get(action_type.as_str()) else {
            return (
                json!({"ok": false, "type": action_type, "error": "unknown_action_type"}),
                Some("unknown_action_type".to_string()),
            );
        };

        if ADMIN_ONLY_ACTION_TYPES.contains(&action_type.as_str()) && !ctx.rule.created_by_admin {
            return (
                json!({"ok": false, "type": action_type, "error": "admin_required"}),
                None,
            );
        }

        handler(action, ctx).await
    }
}

impl Default for ActionExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Upsert-time validation of one action object; returns per-field errors or
/// `None` when valid. Unknown types fail here, not at runtime.
pub fn validate_action(action: &JsonValue, _schema_version: i64) -> Option<JsonValue> {
    let mut errors = Map::new();
    let Some(obj) = action.as_object() else {
        errors.insert("non_field_errors".to_string(), json!("action must be an object"));
        return Some(JsonValue::Object(errors));
    };

    let Some(action_type) = obj.get("type").and_then(JsonValue::as_str) else {
        errors.insert("type".to_string(), json!("is required"));
        return Some(JsonValue::Object(errors));
    };
    if !KNOWN_ACTION_TYPES.contains(&action_type) {
        errors.insert("type".to_string(), json!(format!("unknown action type '{action_type}'")));
        return Some(JsonValue::Object(errors));
    }

    match action_type {
        "alarm_arm" => {
            let mode = obj.get("mode").and_then(JsonValue::as_str);
            let valid = mode
                .and_then(AlarmState::parse)
                .is_some_and(AlarmState::is_armed);
            if !valid {
                errors.insert(
                    "mode".to_string(),
                    json!("must be one of armed_home, armed_away, armed_night, armed_vacation"),
                );
            }
        }
        "alarm_disarm" | "alarm_trigger" => {}
        "ha_call_service" => {
            let action_str = obj.get("action").and_then(JsonValue::as_str).unwrap_or("");
            if !action_str.contains('.') {
                errors.insert("action".to_string(), json!("must be 'domain.service'"));
            }
            for key in ["target", "data"] {
                if let Some(value) = obj.get(key).filter(|v| !v.is_null()) {
                    if !value.is_object() {
                        errors.insert(key.to_string(), json!("must be an object"));
                    }
                }
            }
        }
        "send_notification" => {
            if obj
                .get("provider_id")
                .and_then(JsonValue::as_str)
                .map_or(true, str::is_empty)
            {
                errors.insert("provider_id".to_string(), json!("is required"));
            }
            if obj
                .get("message")
                .and_then(JsonValue::as_str)
                .map_or(true, str::is_empty)
            {
                errors.insert("message".to_string(), json!("is required"));
            }
            if let Some(data) = obj.get("data").filter(|v| !v.is_null()) {
                if !data.is_object() {
                    errors.insert("data".to_string(), json!("must be an object"));
                }
            }
        }
        "zigbee2mqtt_light" | "zigbee2mqtt_switch" => {
            if obj
                .get("entity_id")
                .and_then(JsonValue::as_str)
                .map_or(true, |v| v.trim().is_empty())
            {
                errors.insert("entity_id".to_string(), json!("is required"));
            }
            let state = obj.get("state").and_then(JsonValue::as_str);
            if !matches!(state, Some("on") | Some("off")) {
                errors.insert("state".to_string(), json!("must be 'on' or 'off'"));
            }
            if action_type == "zigbee2mqtt_light" {
                if let Some(brightness) = obj.get("brightness").filter(|v| !v.is_null()) {
                    if !brightness.is_i64() && !brightness.is_u64() {
                        errors.insert("brightness".to_string(), json!("must be an integer"));
                    }
                }
            }
        }
        "zigbee2mqtt_set_value" => {
            if obj
                .get("entity_id")
                .and_then(JsonValue::as_str)
                .map_or(true, |v| v.trim().is_empty())
            {
                errors.insert("entity_id".to_string(), json!("is required"));
            }
            if !obj.contains_key("value") {
                errors.insert("value".to_string(), json!("is required"));
            }
        }
        "zwavejs_set_value" => {
            if !obj.get("node_id").is_some_and(JsonValue::is_i64) {
                errors.insert("node_id".to_string(), json!("must be an integer"));
            }
            match obj.get("value_id").and_then(JsonValue::as_object) {
                Some(value_id) => {
                    if !value_id.get("commandClass").is_some_and(JsonValue::is_i64) {
                        errors.insert("value_id".to_string(), json!("commandClass must be an integer"));
                    } else if value_id
                        .get("endpoint")
                        .is_some_and(|v| !v.is_null() && !v.is_i64())
                    {
                        errors.insert("value_id".to_string(), json!("endpoint must be an integer"));
                    } else if !value_id.contains_key("property") {
                        errors.insert("value_id".to_string(), json!("property is required"));
                    }
                }
                None => {
                    errors.insert("value_id".to_string(), json!("is required"));
                }
            }
            if !obj.contains_key("value") {
                errors.insert("value".to_string(), json!("is required"));
            }
        }
        _ => {}
    }

    if errors.is_empty() {
        None
    } else {
        Some(JsonValue::Object(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn validate_rejects_unknown_type() {
        let errors = validate_action(&json!({"type": "reboot_everything"}), 1).unwrap();
        assert!(errors.get("type").is_some());
    }

    #[test]
    fn validate_alarm_arm_mode() {
        assert!(validate_action(&json!({"type": "alarm_arm", "mode": "armed_home"}), 1).is_none());
        assert!(validate_action(&json!({"type": "alarm_arm", "mode": "disarmed"}), 1).is_some());
        assert!(validate_action(&json!({"type": "alarm_arm"}), 1).is_some());
    }

    #[test]
    fn validate_zwavejs_value_id() {
        let valid = json!({
            "type": "zwavejs_set_value",
            "node_id": 3,
            "value_id": {"commandClass": 37, "endpoint": 0, "property": "targetValue"},
            "value": true,
        });
        assert!(validate_action(&valid, 1).is_none());

        let missing_property = json!({
            "type": "zwavejs_set_value",
            "node_id": 3,
            "value_id": {"commandClass": 37},
            "value": true,
        });
        assert!(validate_action(&missing_property, 1).is_some());
    }

    #[test]
    fn validate_ha_call_service_format() {
        assert!(validate_action(&json!({"type": "ha_call_service", "action": "light.turn_on"}), 1).is_none());
        assert!(validate_action(&json!({"type": "ha_call_service", "action": "lightturnon"}), 1).is_some());
    }

    #[test]
    #[should_panic(expected = "duplicate handler registration")]
    fn duplicate_registration_panics() {
        fn noop<'a>(
            _action: &'a JsonValue,
            _ctx: &'a ActionContext<'a>,
        ) -> futures::future::BoxFuture<'a, ActionOutcome> {
            Box::pin(async { (json!({}), None) })
        }
        let mut executor = ActionExecutor::new();
        executor.register("alarm_arm", noop);
    }

    #[tokio::test]
    async fn unknown_type_returns_structured_error() {
        let harness = test_support::test_harness();
        let rule = test_support::admin_rule(&harness, json!({"then": []}));
        let ctx = harness.action_context(&rule);

        let executor = ActionExecutor::new();
        let (result, error) = executor.execute(&json!({"type": "bogus"}), &ctx).await;
        assert_eq!(result["ok"], false);
        assert_eq!(result["error"], "unknown_action_type");
        assert!(error.is_some());
    }

    #[tokio::test]
    async fn admin_only_actions_rejected_for_non_admin_rules() {
        let harness = test_support::test_harness();
        let rule = test_support::non_admin_rule(&harness, json!({"then": []}));
        let ctx = harness.action_context(&rule);

        let executor = ActionExecutor::new();
        let (result, error) = executor
            .execute(&json!({"type": "alarm_trigger"}), &ctx)
            .await;
        assert_eq!(result["ok"], false);
        assert_eq!(result["error"], "admin_required");
        assert!(error.is_none());

        // Non-admin rules may still drive zigbee devices.
        let (result, _) = executor
            .execute(
                &json!({"type": "zigbee2mqtt_switch", "entity_id": "plug", "state": "on"}),
                &ctx,
            )
            .await;
        assert_eq!(result["ok"], true);
    }
}
