use futures::future::BoxFuture;
use serde_json::{json, Map, Value as JsonValue};

use super::{ActionContext, ActionExecutor, ActionOutcome};

pub(super) fn register(executor: &mut ActionExecutor) {
    executor.register("zigbee2mqtt_light", handle_light);
    executor.register("zigbee2mqtt_switch", handle_switch);
    executor.register("zigbee2mqtt_set_value", handle_set_value);
}

fn handle_light<'a>(
    action: &'a JsonValue,
    ctx: &'a ActionContext<'a>,
) -> BoxFuture<'a, ActionOutcome> {
    Box::pin(async move {
        let entity_id = action
            .get("entity_id")
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .unwrap_or("");
        if entity_id.is_empty() {
            return (
                json!({"ok": false, "type": "zigbee2mqtt_light", "error": "missing_entity_id"}),
                None,
            );
        }
        let state = action.get("state").and_then(JsonValue::as_str);
        if !matches!(state, Some("on") | Some("off")) {
            return (
                json!({"ok": false, "type": "zigbee2mqtt_light", "entity_id": entity_id, "error": "invalid_state"}),
                None,
            );
        }
        let brightness = match action.get("brightness") {
            None | Some(JsonValue::Null) => None,
            Some(value) => match value.as_i64() {
                Some(brightness) => Some(brightness),
                None => {
                    return (
                        json!({"ok": false, "type": "zigbee2mqtt_light", "entity_id": entity_id, "error": "invalid_brightness"}),
                        None,
                    );
                }
            },
        };

        let mut payload = Map::new();
        payload.insert("state".to_string(), json!(state == Some("on")));
        if let Some(brightness) = brightness {
            payload.insert("brightness".to_string(), json!(brightness));
        }

        let mut result = json!({
            "ok": true,
            "type": "zigbee2mqtt_light",
            "entity_id": entity_id,
            "state": state,
        });
        if let Some(brightness) = brightness {
            result["brightness"] = json!(brightness);
        }

        set_entity_value(ctx, entity_id, JsonValue::Object(payload), result).await
    })
}

fn handle_switch<'a>(
    action: &'a JsonValue,
    ctx: &'a ActionContext<'a>,
) -> BoxFuture<'a, ActionOutcome> {
    Box::pin(async move {
        let entity_id = action
            .get("entity_id")
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .unwrap_or("");
        if entity_id.is_empty() {
            return (
                json!({"ok": false, "type": "zigbee2mqtt_switch", "error": "missing_entity_id"}),
                None,
            );
        }
        let state = action.get("state").and_then(JsonValue::as_str);
        if !matches!(state, Some("on") | Some("off")) {
            return (
                json!({"ok": false, "type": "zigbee2mqtt_switch", "entity_id": entity_id, "error": "invalid_state"}),
                None,
            );
        }

        let payload = json!({"state": state == Some("on")});
        let result = json!({
            "ok": true,
            "type": "zigbee2mqtt_switch",
            "entity_id": entity_id,
            "state": state,
        });
        set_entity_value(ctx, entity_id, payload, result).await
    })
}

fn handle_set_value<'a>(
    action: &'a JsonValue,
    ctx: &'a ActionContext<'a>,
) -> BoxFuture<'a, ActionOutcome> {
    Box::pin(async move {
        let entity_id = action
            .get("entity_id")
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .unwrap_or("");
        if entity_id.is_empty() {
            return (
                json!({"ok": false, "type": "zigbee2mqtt_set_value", "error": "missing_entity_id"}),
                None,
            );
        }
        let Some(value) = action.get("value") else {
            return (
                json!({"ok": false, "type": "zigbee2mqtt_set_value", "entity_id": entity_id, "error": "missing_value"}),
                None,
            );
        };

        let result = json!({
            "ok": true,
            "type": "zigbee2mqtt_set_value",
            "entity_id": entity_id,
            "value": value,
        });
        set_entity_value(ctx, entity_id, value.clone(), result).await
    })
}

async fn set_entity_value(
    ctx: &ActionContext<'_>,
    entity_id: &str,
    payload: JsonValue,
    ok_result: JsonValue,
) -> ActionOutcome {
    match ctx.gateways.zigbee2mqtt.set_entity_value(entity_id, &payload).await {
        Ok(()) => (ok_result, None),
        Err(err) => {
            tracing::warn!(rule_id = ctx.rule.id, entity_id, error = %err, "zigbee2mqtt write failed");
            let mut result = ok_result;
            result["ok"] = json!(false);
            result["error"] = json!(err.to_string());
            (result, Some(err.to_string()))
        }
    }
}
