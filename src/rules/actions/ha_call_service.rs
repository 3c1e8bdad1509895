use futures::future::BoxFuture;
use serde_json::{json, Value as JsonValue};

use super::{ActionContext, ActionExecutor, ActionOutcome};

pub(super) fn register(executor: &mut ActionExecutor) {
    executor.register("ha_call_service", handle);
}

fn handle<'a>(action: &'a JsonValue, ctx: &'a ActionContext<'a>) -> BoxFuture<'a, ActionOutcome> {
    Box::pin(async move {
        let action_str = action.get("action").and_then(JsonValue::as_str).unwrap_or("");
        let Some((domain, service)) = action_str.split_once('.') else {
            return (
                json!({"ok": false, "type": "ha_call_service", "error": "invalid_action_format"}),
                None,
            );
        };
        let target = action.get("target").filter(|v| v.is_object());
        let data = action.get("data").filter(|v| v.is_object());

        match ctx
            .gateways
            .ha
            .call_service(domain, service, target, data, None)
            .await
        {
            Ok(_) => (
                json!({"ok": true, "type": "ha_call_service", "action": action_str}),
                None,
            ),
            Err(err) => {
                tracing::warn!(rule_id = ctx.rule.id, error = %err, "ha_call_service failed");
                (
                    json!({
                        "ok": false,
                        "type": "ha_call_service",
                        "action": action_str,
                        "error": err.to_string(),
                    }),
                    Some(err.to_string()),
                )
            }
        }
    })
}
