use futures::future::BoxFuture;
use serde_json::{json, Value as JsonValue};

use super::{ActionContext, ActionExecutor, ActionOutcome};

pub(super) fn register(executor: &mut ActionExecutor) {
    executor.register("send_notification", handle);
}

fn handle<'a>(action: &'a JsonValue, ctx: &'a ActionContext<'a>) -> BoxFuture<'a, ActionOutcome> {
    Box::pin(async move {
        let provider_id = action.get("provider_id").and_then(JsonValue::as_str);
        let message = action.get("message").and_then(JsonValue::as_str);
        let title = action.get("title").and_then(JsonValue::as_str);
        let data = action.get("data").filter(|v| v.is_object());

        let Some(provider_id) = provider_id.filter(|v| !v.is_empty()) else {
            return (
                json!({"ok": false, "type": "send_notification", "error": "missing_provider_id"}),
                None,
            );
        };
        let Some(message) = message.filter(|v| !v.is_empty()) else {
            return (
                json!({"ok": false, "type": "send_notification", "error": "missing_message"}),
                None,
            );
        };

        let profile = ctx.profiles.ensure_active(ctx.now);
        let (delivery, enqueue_result) = ctx.gateways.notifications.enqueue(
            &profile,
            provider_id,
            message,
            title,
            data,
            Some(ctx.rule.name.as_str()),
            ctx.now,
        );

        match delivery {
            Some(delivery) => (
                json!({
                    "ok": true,
                    "type": "send_notification",
                    "provider_id": provider_id,
                    "delivery_id": delivery.id,
                    "queued": true,
                }),
                None,
            ),
            None => {
                let message = enqueue_result.message;
                (
                    json!({
                        "ok": false,
                        "type": "send_notification",
                        "provider_id": provider_id,
                        "error": message.clone(),
                        "error_code": enqueue_result.error_code,
                    }),
                    Some(message),
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
    async fn enqueues_through_active_profile() {
        let harness = test_support::test_harness();
        let rule = test_support::admin_rule(&harness, json!({"then": []}));
        let ctx = harness.action_context(&rule);
        let executor = ActionExecutor::new();

        let (result, error) = executor
            .execute(
                &json!({"type": "send_notification", "provider_id": "pb", "message": "Door open"}),
                &ctx,
            )
            .await;
        assert_eq!(result["ok"], true);
        assert_eq!(result["queued"], true);
        assert!(error.is_none());
        assert_eq!(harness.gateways.notifications.pending().len(), 1);
    }

    #[tokio::test]
    async fn unknown_provider_is_a_hard_error() {
        let harness = test_support::test_harness();
        let rule = test_support::admin_rule(&harness, json!({"then": []}));
        let ctx = harness.action_context(&rule);
        let executor = ActionExecutor::new();

        let (result, error) = executor
            .execute(
                &json!({"type": "send_notification", "provider_id": "nope", "message": "Hi"}),
                &ctx,
            )
            .await;
        assert_eq!(result["ok"], false);
        assert_eq!(result["error_code"], "unknown_provider");
        assert!(error.is_some());
    }

    #[tokio::test]
    async fn missing_fields_are_soft_failures() {
        let harness = test_support::test_harness();
        let rule = test_support::admin_rule(&harness, json!({"then": []}));
        let ctx = harness.action_context(&rule);
        let executor = ActionExecutor::new();

        let (result, error) = executor
            .execute(&json!({"type": "send_notification", "message": "Hi"}), &ctx)
            .await;
        assert_eq!(result["error"], "missing_provider_id");
        assert!(error.is_none());

        let (result, error) = executor
            .execute(&json!({"type": "send_notification", "provider_id": "pb"}), &ctx)
            .await;
        assert_eq!(result["error"], "missing_message");
        assert!(error.is_none());
    }
}
