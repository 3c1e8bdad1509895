use futures::future::BoxFuture;
use serde_json::{json, Value as JsonValue};

use crate::alarm::AlarmState;

use super::{ActionContext, ActionExecutor, ActionOutcome};

pub(super) fn register(executor: &mut ActionExecutor) {
    executor.register("alarm_arm", handle_arm);
    executor.register("alarm_disarm", handle_disarm);
    executor.register("alarm_trigger", handle_trigger);
}

fn handle_arm<'a>(
    action: &'a JsonValue,
    ctx: &'a ActionContext<'a>,
) -> BoxFuture<'a, ActionOutcome> {
    Box::pin(async move {
        let Some(mode) = action.get("mode").and_then(JsonValue::as_str) else {
            return (
                json!({"ok": false, "type": "alarm_arm", "error": "missing_mode"}),
                None,
            );
        };
        let Some(target_state) = AlarmState::parse(mode).filter(|state| state.is_armed()) else {
            return (
                json!({"ok": false, "type": "alarm_arm", "mode": mode, "error": "invalid_mode"}),
                None,
            );
        };

        let reason = format!("rule:{}", ctx.rule.id);
        match ctx.alarm.arm(target_state, ctx.actor_user, &reason, ctx.now) {
            Ok(snapshot) => (
                json!({
                    "ok": true,
                    "type": "alarm_arm",
                    "mode": mode,
                    "arming": snapshot.current_state == AlarmState::Arming,
                }),
                None,
            ),
            Err(err) => {
                let message = err.to_string();
                tracing::warn!(rule_id = ctx.rule.id, error = %message, "alarm_arm failed");
                (
                    json!({"ok": false, "type": "alarm_arm", "mode": mode, "error": err.message}),
                    Some(message),
                )
            }
        }
    })
}

fn handle_disarm<'a>(
    _action: &'a JsonValue,
    ctx: &'a ActionContext<'a>,
) -> BoxFuture<'a, ActionOutcome> {
    Box::pin(async move {
        let reason = format!("rule:{}", ctx.rule.id);
        ctx.alarm.disarm(ctx.actor_user, &reason, ctx.now);
        (json!({"ok": true, "type": "alarm_disarm"}), None)
    })
}

fn handle_trigger<'a>(
    _action: &'a JsonValue,
    ctx: &'a ActionContext<'a>,
) -> BoxFuture<'a, ActionOutcome> {
    Box::pin(async move {
        let reason = format!("rule:{}", ctx.rule.id);
        ctx.alarm.trigger(ctx.actor_user, &reason, ctx.now);
        (json!({"ok": true, "type": "alarm_trigger"}), None)
    })
}
