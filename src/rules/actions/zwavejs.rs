use futures::future::BoxFuture;
use serde_json::{json, Value as JsonValue};

use super::{ActionContext, ActionExecutor, ActionOutcome};

pub(super) fn register(executor: &mut ActionExecutor) {
    executor.register("zwavejs_set_value", handle);
}

fn handle<'a>(action: &'a JsonValue, ctx: &'a ActionContext<'a>) -> BoxFuture<'a, ActionOutcome> {
    Box::pin(async move {
        let node_id = action.get("node_id").and_then(JsonValue::as_i64);
        let value_id = action.get("value_id").and_then(JsonValue::as_object);
        let (Some(node_id), Some(value_id)) = (node_id, value_id) else {
            return (
                json!({"ok": false, "type": "zwavejs_set_value", "error": "missing_node_id_or_value_id"}),
                None,
            );
        };

        let command_class = value_id.get("commandClass").and_then(JsonValue::as_i64);
        let endpoint = value_id
            .get("endpoint")
            .and_then(JsonValue::as_i64)
            .unwrap_or(0);
        let property = value_id.get("property");
        let (Some(command_class), Some(property)) = (command_class, property) else {
            return (
                json!({"ok": false, "type": "zwavejs_set_value", "error": "invalid_value_id"}),
                None,
            );
        };
        let property_key = value_id
            .get("propertyKey")
            .filter(|v| v.is_string() || v.is_i64());
        let value = action.get("value").cloned().unwrap_or(JsonValue::Null);

        match ctx
            .gateways
            .zwavejs
            .set_value(node_id, endpoint, command_class, property, property_key, &value)
            .await
        {
            Ok(()) => (
                json!({
                    "ok": true,
                    "type": "zwavejs_set_value",
                    "node_id": node_id,
                    "value_id": JsonValue::Object(value_id.clone()),
                }),
                None,
            ),
            Err(err) => {
                tracing::warn!(rule_id = ctx.rule.id, node_id, error = %err, "zwavejs_set_value failed");
                (
                    json!({
                        "ok": false,
                        "type": "zwavejs_set_value",
                        "node_id": node_id,
                        "value_id": JsonValue::Object(value_id.clone()),
                        "error": err.to_string(),
                    }),
                    Some(err.to_string()),
                )
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::super::ActionExecutor;
    use crate::test_support;
    use serde_json::json;

    #[tokio::test]
    async fn set_value_reaches_gateway() {
        let harness = test_support::test_harness();
        let rule = test_support::admin_rule(&harness, json!({"then": []}));
        let executor = ActionExecutor::new();

        {
            let ctx = harness.action_context(&rule);
            let (result, error) = executor
                .execute(
                    &json!({
                        "type": "zwavejs_set_value",
                        "node_id": 3,
                        "value_id": {"commandClass": 37, "endpoint": 0, "property": "targetValue"},
                        "value": true,
                    }),
                    &ctx,
                )
                .await;
            assert_eq!(result["ok"], true);
            assert!(error.is_none());
        }
        let calls = harness.recorder.calls();
        assert_eq!(calls[0]["gateway"], "zwavejs");
        assert_eq!(calls[0]["node_id"], 3);
        assert_eq!(calls[0]["command_class"], 37);
    }

    #[tokio::test]
    async fn malformed_value_id_is_a_soft_failure() {
        let harness = test_support::test_harness();
        let rule = test_support::admin_rule(&harness, json!({"then": []}));
        let ctx = harness.action_context(&rule);
        let executor = ActionExecutor::new();

        let (result, error) = executor
            .execute(
                &json!({"type": "zwavejs_set_value", "node_id": 3, "value_id": {"endpoint": 0}}),
                &ctx,
            )
            .await;
        assert_eq!(result["error"], "invalid_value_id");
        assert!(error.is_none());
    }
}
