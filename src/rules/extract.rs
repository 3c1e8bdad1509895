use serde_json::Value as JsonValue;
use std::collections::BTreeSet;

/// Collects every entity_id referenced by an `entity_state` node anywhere in
/// the definition's `when` tree. Works on raw JSON so it also serves rules
/// whose definitions predate the current schema. Other operators
/// (`alarm_state_in`, `frigate_person_detected`, `time_in_range`) contribute
/// nothing.
pub fn extract_entity_ids_from_definition(definition: &JsonValue) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    if let Some(when) = definition.get("when") {
        walk(when, &mut out);
    }
    out
}

fn walk(node: &JsonValue, out: &mut BTreeSet<String>) {
    let Some(obj) = node.as_object() else {
        return;
    };
    match obj.get("op").and_then(JsonValue::as_str) {
        Some("entity_state") => {
            if let Some(entity_id) = obj.get("entity_id").and_then(JsonValue::as_str) {
                let entity_id = entity_id.trim();
                if !entity_id.is_empty() {
                    out.insert(entity_id.to_string());
                }
            }
        }
        Some("all") | Some("any") => {
            if let Some(children) = obj.get("children").and_then(JsonValue::as_array) {
                for child in children {
                    walk(child, out);
                }
            }
        }
        Some("not") | Some("for") => {
            if let Some(child) = obj.get("child") {
                walk(child, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(definition: JsonValue) -> BTreeSet<String> {
        extract_entity_ids_from_definition(&definition)
    }

    #[test]
    fn empty_definition_returns_empty_set() {
        assert!(ids(json!(null)).is_empty());
        assert!(ids(json!({})).is_empty());
        assert!(ids(json!({"then": []})).is_empty());
    }

    #[test]
    fn entity_state_extracts_entity_id() {
        let result = ids(json!({
            "when": {"op": "entity_state", "entity_id": "binary_sensor.front_door", "equals": "on"},
            "then": [{"type": "alarm_trigger"}],
        }));
        assert_eq!(result, ["binary_sensor.front_door".to_string()].into_iter().collect());
    }

    #[test]
    fn all_and_any_extract_from_children() {
        let result = ids(json!({
            "when": {
                "op": "all",
                "children": [
                    {"op": "entity_state", "entity_id": "binary_sensor.front_door", "equals": "on"},
                    {"op": "any", "children": [
                        {"op": "entity_state", "entity_id": "binary_sensor.motion_1", "equals": "on"},
                        {"op": "entity_state", "entity_id": "binary_sensor.motion_2", "equals": "on"},
                    ]},
                ],
            },
        }));
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn not_and_for_extract_from_child() {
        let result = ids(json!({
            "when": {
                "op": "for",
                "seconds": 10,
                "child": {
                    "op": "not",
                    "child": {"op": "entity_state", "entity_id": "binary_sensor.window", "equals": "open"},
                },
            },
        }));
        assert_eq!(result, ["binary_sensor.window".to_string()].into_iter().collect());
    }

    #[test]
    fn non_entity_ops_ignored() {
        let result = ids(json!({
            "when": {
                "op": "all",
                "children": [
                    {"op": "alarm_state_in", "states": ["armed_home", "armed_away"]},
                    {"op": "frigate_person_detected", "cameras": ["front"], "within_seconds": 30, "min_confidence_pct": 80},
                    {"op": "time_in_range", "start": "22:00", "end": "06:00"},
                    {"op": "entity_state", "entity_id": "sensor.real", "equals": "on"},
                ],
            },
        }));
        assert_eq!(result, ["sensor.real".to_string()].into_iter().collect());
    }

    #[test]
    fn whitespace_trimmed_and_empty_skipped() {
        let result = ids(json!({
            "when": {
                "op": "all",
                "children": [
                    {"op": "entity_state", "entity_id": "  sensor.trimmed  ", "equals": "on"},
                    {"op": "entity_state", "entity_id": "", "equals": "on"},
                    {"op": "entity_state", "entity_id": "   ", "equals": "on"},
                ],
            },
        }));
        assert_eq!(result, ["sensor.trimmed".to_string()].into_iter().collect());
    }
}
