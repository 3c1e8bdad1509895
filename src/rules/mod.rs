use serde_json::{json, Map, Value as JsonValue};

use crate::store::rules::RuleKind;

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod eval;
pub mod extract;
pub mod failure;

/// Derives the rule kind from the first action in the `then` clause when the
/// caller didn't provide one.
pub fn derive_kind_from_actions(definition: &JsonValue) -> RuleKind {
    let first_type = definition
        .get("then")
        .and_then(JsonValue::as_array)
        .and_then(|actions| actions.first())
        .and_then(|action| action.get("type"))
        .and_then(JsonValue::as_str);

    match first_type {
        Some("alarm_trigger") => RuleKind::Trigger,
        Some("alarm_disarm") => RuleKind::Disarm,
        Some("alarm_arm") => RuleKind::Arm,
        _ => RuleKind::Trigger,
    }
}

/// Upsert-time validation of a full rule definition. Returns a field-keyed
/// error object, or `None` when the definition is valid.
pub fn validate_definition(definition: &JsonValue, schema_version: i64) -> Option<JsonValue> {
    let mut errors = Map::new();
    let Some(obj) = definition.as_object() else {
        errors.insert("definition".to_string(), json!("must be an object"));
        return Some(JsonValue::Object(errors));
    };

    if let Some(when) = obj.get("when").filter(|v| !v.is_null()) {
        if let Some(when_errors) = conditions::validate_when_node(when) {
            errors.insert("when".to_string(), when_errors);
        }
    }

    if let Some(then) = obj.get("then").filter(|v| !v.is_null()) {
        match then.as_array() {
            Some(then_actions) => {
                let mut action_errors = Map::new();
                for (index, action) in then_actions.iter().enumerate() {
                    if let Some(errs) = actions::validate_action(action, schema_version) {
                        action_errors.insert(index.to_string(), errs);
                    }
                }
                if !action_errors.is_empty() {
                    errors.insert("then".to_string(), JsonValue::Object(action_errors));
                }
            }
            None => {
                errors.insert("then".to_string(), json!("must be a list of actions"));
            }
        }
    }

    if errors.is_empty() {
        None
    } else {
        Some(JsonValue::Object(errors))
    }
}
