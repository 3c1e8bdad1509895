use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};

use crate::time::parse_hhmm_strict;

pub const MAX_CONDITION_DEPTH: usize = 8;
pub const MAX_CONDITION_NODES: usize = 50;

/// Condition-tree DSL. Rules match when their root `when` node evaluates
/// true against an entity snapshot and an explicit `now`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WhenNode {
    EntityState {
        entity_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        equals: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        not_equals: Option<String>,
        #[serde(default, rename = "in", skip_serializing_if = "Option::is_none")]
        in_states: Option<Vec<String>>,
    },
    All {
        #[serde(default)]
        children: Vec<WhenNode>,
    },
    Any {
        #[serde(default)]
        children: Vec<WhenNode>,
    },
    Not {
        child: Box<WhenNode>,
    },
    For {
        seconds: i64,
        child: Box<WhenNode>,
    },
    AlarmStateIn {
        states: Vec<String>,
    },
    FrigatePersonDetected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cameras: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        zones: Option<Vec<String>>,
        within_seconds: i64,
        min_confidence_pct: f64,
        #[serde(default)]
        aggregation: DetectionAggregation,
        #[serde(default)]
        on_unavailable: OnUnavailable,
    },
    TimeInRange {
        start: String,
        end: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        days: Option<Vec<String>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetectionAggregation {
    #[default]
    Max,
    Avg,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnUnavailable {
    #[default]
    TreatAsNoMatch,
    Error,
}

/// Parsed rule definition: optional `when` tree plus the raw action list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleDefinition {
    #[serde(default)]
    pub when: Option<WhenNode>,
    #[serde(default)]
    pub then: Vec<JsonValue>,
}

pub fn parse_definition(value: &JsonValue) -> Result<RuleDefinition, String> {
    serde_json::from_value(value.clone()).map_err(|err| format!("invalid definition: {err}"))
}

/// Structural validation of a `when` node, returning per-field errors keyed
/// the way the admin API reports them. `None` means valid.
pub fn validate_when_node(node: &JsonValue) -> Option<JsonValue> {
    let mut node_count = 0usize;
    let mut errors = validate_node(node, 1, &mut node_count).unwrap_or_default();

    // A time window alone is not a trigger: time must guard a data-driven
    // condition (sensor, detection, or alarm state).
    if errors.is_empty() && !has_data_driven_node(node) {
        errors.insert(
            "non_field_errors".to_string(),
            json!("time_in_range cannot stand alone; combine it with a sensor- or state-driven condition"),
        );
    }

    if errors.is_empty() {
        None
    } else {
        Some(JsonValue::Object(errors))
    }
}

fn validate_node(
    node: &JsonValue,
    depth: usize,
    node_count: &mut usize,
) -> Option<Map<String, JsonValue>> {
    let mut errors = Map::new();
    let Some(obj) = node.as_object() else {
        errors.insert("non_field_errors".to_string(), json!("condition must be an object"));
        return Some(errors);
    };
    if depth > MAX_CONDITION_DEPTH {
        errors.insert(
            "non_field_errors".to_string(),
            json!(format!("condition depth exceeds max {MAX_CONDITION_DEPTH}")),
        );
        return Some(errors);
    }
    *node_count += 1;
    if *node_count > MAX_CONDITION_NODES {
        errors.insert(
            "non_field_errors".to_string(),
            json!(format!("condition node count exceeds max {MAX_CONDITION_NODES}")),
        );
        return Some(errors);
    }

    let Some(op) = obj.get("op").and_then(JsonValue::as_str) else {
        errors.insert("op".to_string(), json!("is required"));
        return Some(errors);
    };

    match op {
        "entity_state" => {
            let entity_id = obj.get("entity_id").and_then(JsonValue::as_str).unwrap_or("");
            if entity_id.trim().is_empty() {
                errors.insert("entity_id".to_string(), json!("is required"));
            }
            let mut comparators = 0;
            if obj.get("equals").is_some_and(|v| !v.is_null()) {
                if !obj["equals"].is_string() {
                    errors.insert("equals".to_string(), json!("must be a string"));
                }
                comparators += 1;
            }
            if obj.get("not_equals").is_some_and(|v| !v.is_null()) {
                if !obj["not_equals"].is_string() {
                    errors.insert("not_equals".to_string(), json!("must be a string"));
                }
                comparators += 1;
            }
            if let Some(in_states) = obj.get("in").filter(|v| !v.is_null()) {
                match in_states.as_array() {
                    Some(values) if !values.is_empty() && values.iter().all(JsonValue::is_string) => {}
                    _ => {
                        errors.insert("in".to_string(), json!("must be a non-empty list of strings"));
                    }
                }
                comparators += 1;
            }
            if comparators != 1 {
                errors.insert(
                    "non_field_errors".to_string(),
                    json!("exactly one of equals, not_equals, in is required"),
                );
            }
        }
        "all" | "any" => match obj.get("children").and_then(JsonValue::as_array) {
            Some(children) => {
                let mut child_errors = Map::new();
                for (index, child) in children.iter().enumerate() {
                    if let Some(errs) = validate_node(child, depth + 1, node_count) {
                        child_errors.insert(index.to_string(), JsonValue::Object(errs));
                    }
                }
                if !child_errors.is_empty() {
                    errors.insert("children".to_string(), JsonValue::Object(child_errors));
                }
            }
            None => {
                errors.insert("children".to_string(), json!("must be a list"));
            }
        },
        "not" => match obj.get("child") {
            Some(child) => {
                if let Some(errs) = validate_node(child, depth + 1, node_count) {
                    errors.insert("child".to_string(), JsonValue::Object(errs));
                }
            }
            None => {
                errors.insert("child".to_string(), json!("is required"));
            }
        },
        "for" => {
            match obj.get("seconds").and_then(JsonValue::as_i64) {
                Some(seconds) if seconds >= 0 => {}
                _ => {
                    errors.insert("seconds".to_string(), json!("must be an integer >= 0"));
                }
            }
            match obj.get("child") {
                Some(child) => {
                    if let Some(errs) = validate_node(child, depth + 1, node_count) {
                        errors.insert("child".to_string(), JsonValue::Object(errs));
                    }
                }
                None => {
                    errors.insert("child".to_string(), json!("is required"));
                }
            }
        }
        "alarm_state_in" => match obj.get("states").and_then(JsonValue::as_array) {
            Some(states)
                if !states.is_empty()
                    && states
                        .iter()
                        .all(|s| s.as_str().is_some_and(|v| !v.trim().is_empty())) => {}
            _ => {
                errors.insert("states".to_string(), json!("must be a non-empty list of strings"));
            }
        },
        "frigate_person_detected" => {
            for key in ["cameras", "zones"] {
                if let Some(value) = obj.get(key).filter(|v| !v.is_null()) {
                    match value.as_array() {
                        Some(values) if values.iter().all(JsonValue::is_string) => {}
                        _ => {
                            errors.insert(key.to_string(), json!("must be a list of strings"));
                        }
                    }
                }
            }
            match obj.get("within_seconds").and_then(JsonValue::as_i64) {
                Some(seconds) if seconds >= 0 => {}
                _ => {
                    errors.insert("within_seconds".to_string(), json!("must be an integer >= 0"));
                }
            }
            match obj.get("min_confidence_pct").and_then(JsonValue::as_f64) {
                Some(pct) if (0.0..=100.0).contains(&pct) => {}
                _ => {
                    errors.insert(
                        "min_confidence_pct".to_string(),
                        json!("must be a number in [0, 100]"),
                    );
                }
            }
            if let Some(aggregation) = obj.get("aggregation").and_then(JsonValue::as_str) {
                if !matches!(aggregation, "max" | "avg" | "count") {
                    errors.insert("aggregation".to_string(), json!("must be one of max, avg, count"));
                }
            }
            if let Some(on_unavailable) = obj.get("on_unavailable").and_then(JsonValue::as_str) {
                if !matches!(on_unavailable, "treat_as_no_match" | "error") {
                    errors.insert(
                        "on_unavailable".to_string(),
                        json!("must be one of treat_as_no_match, error"),
                    );
                }
            }
        }
        "time_in_range" => {
            let start = obj.get("start").and_then(JsonValue::as_str).unwrap_or("");
            let end = obj.get("end").and_then(JsonValue::as_str).unwrap_or("");
            let start_ok = parse_hhmm_strict(start).is_some();
            let end_ok = parse_hhmm_strict(end).is_some();
            if !start_ok {
                errors.insert("start".to_string(), json!("must be HH:MM (24h, zero-padded)"));
            }
            if !end_ok {
                errors.insert("end".to_string(), json!("must be HH:MM (24h, zero-padded)"));
            }
            if start_ok && end_ok && start == end {
                errors.insert("end".to_string(), json!("must differ from start"));
            }
            if let Some(tz) = obj.get("tz").and_then(JsonValue::as_str) {
                if tz.parse::<Tz>().is_err() {
                    errors.insert("tz".to_string(), json!("must be a valid IANA time zone"));
                }
            }
            if let Some(days) = obj.get("days").filter(|v| !v.is_null()) {
                let valid = days.as_array().is_some_and(|values| {
                    values.iter().all(|d| {
                        d.as_str().is_some_and(|code| {
                            matches!(code, "mon" | "tue" | "wed" | "thu" | "fri" | "sat" | "sun")
                        })
                    })
                });
                if !valid {
                    errors.insert("days".to_string(), json!("must be a subset of mon..sun"));
                }
            }
        }
        other => {
            errors.insert("op".to_string(), json!(format!("unsupported operator '{other}'")));
        }
    }

    if errors.is_empty() {
        None
    } else {
        Some(errors)
    }
}

fn has_data_driven_node(node: &JsonValue) -> bool {
    let Some(obj) = node.as_object() else {
        return false;
    };
    match obj.get("op").and_then(JsonValue::as_str) {
        Some("entity_state") | Some("alarm_state_in") | Some("frigate_person_detected") => true,
        Some("all") | Some("any") => obj
            .get("children")
            .and_then(JsonValue::as_array)
            .is_some_and(|children| children.iter().any(has_data_driven_node)),
        Some("not") | Some("for") => obj.get("child").is_some_and(has_data_driven_node),
        _ => false,
    }
}

pub(crate) fn weekday_code(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

fn resolve_tz(tz: Option<&str>) -> Tz {
    if let Some(parsed) = tz.and_then(|value| value.parse::<Tz>().ok()) {
        return parsed;
    }
    iana_time_zone::get_timezone()
        .ok()
        .and_then(|value| value.parse::<Tz>().ok())
        .unwrap_or(chrono_tz::UTC)
}

/// Inclusive start, exclusive end; wraps midnight when `start > end`.
pub(crate) fn time_in_range_matches(
    start: &str,
    end: &str,
    tz: Option<&str>,
    days: Option<&[String]>,
    now: DateTime<Utc>,
) -> bool {
    let Some((start_hour, start_minute)) = parse_hhmm_strict(start) else {
        return false;
    };
    let Some((end_hour, end_minute)) = parse_hhmm_strict(end) else {
        return false;
    };

    let local = now.with_timezone(&resolve_tz(tz));
    if let Some(days) = days {
        if !days.is_empty() {
            let code = weekday_code(local.weekday());
            if !days.iter().any(|day| day == code) {
                return false;
            }
        }
    }

    let minutes = local.hour() * 60 + local.minute();
    let start_minutes = start_hour * 60 + start_minute;
    let end_minutes = end_hour * 60 + end_minute;
    if start_minutes < end_minutes {
        minutes >= start_minutes && minutes < end_minutes
    } else {
        minutes >= start_minutes || minutes < end_minutes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn time_in_range_wraps_across_midnight() {
        assert!(time_in_range_matches("22:00", "06:00", Some("UTC"), None, utc(2026, 1, 1, 23, 0)));
        assert!(time_in_range_matches("22:00", "06:00", Some("UTC"), None, utc(2026, 1, 2, 5, 59)));
        assert!(!time_in_range_matches("22:00", "06:00", Some("UTC"), None, utc(2026, 1, 2, 6, 0)));
        assert!(!time_in_range_matches("22:00", "06:00", Some("UTC"), None, utc(2026, 1, 2, 7, 0)));
    }

    #[test]
    fn time_in_range_non_wrapping() {
        assert!(time_in_range_matches("09:00", "17:00", Some("UTC"), None, utc(2026, 1, 1, 9, 0)));
        assert!(time_in_range_matches("09:00", "17:00", Some("UTC"), None, utc(2026, 1, 1, 16, 59)));
        assert!(!time_in_range_matches("09:00", "17:00", Some("UTC"), None, utc(2026, 1, 1, 17, 0)));
    }

    #[test]
    fn time_in_range_respects_days_filter() {
        let days = vec!["mon".to_string()];
        // 2026-01-05 is a Monday, 2026-01-06 a Tuesday.
        assert!(time_in_range_matches("00:00", "23:59", Some("UTC"), Some(&days), utc(2026, 1, 5, 12, 0)));
        assert!(!time_in_range_matches("00:00", "23:59", Some("UTC"), Some(&days), utc(2026, 1, 6, 12, 0)));
    }

    #[test]
    fn time_in_range_honors_zone_offset() {
        // 23:30 UTC is 01:30 in Europe/Berlin (+02:00 in summer).
        let node_matches = time_in_range_matches(
            "01:00",
            "02:00",
            Some("Europe/Berlin"),
            None,
            utc(2026, 7, 1, 23, 30),
        );
        assert!(node_matches);
    }

    #[test]
    fn validation_rejects_loose_time_format() {
        let errors = validate_when_node(&json!({
            "op": "time_in_range", "start": "9:00", "end": "06:00", "tz": "UTC",
        }))
        .unwrap();
        assert!(errors.get("start").is_some());
    }

    #[test]
    fn validation_rejects_start_equal_end() {
        let errors = validate_when_node(&json!({
            "op": "time_in_range", "start": "06:00", "end": "06:00", "tz": "UTC",
        }))
        .unwrap();
        assert!(errors.get("end").is_some());
    }

    #[test]
    fn validation_rejects_time_only_rules() {
        let errors = validate_when_node(&json!({
            "op": "time_in_range", "start": "22:00", "end": "06:00", "tz": "UTC",
        }))
        .unwrap();
        assert!(errors.get("non_field_errors").is_some());
    }

    #[test]
    fn validation_allows_time_as_guard() {
        let errors = validate_when_node(&json!({
            "op": "all",
            "children": [
                {"op": "time_in_range", "start": "22:00", "end": "06:00", "tz": "UTC"},
                {"op": "entity_state", "entity_id": "binary_sensor.front_door", "equals": "on"},
            ],
        }));
        assert!(errors.is_none());
    }

    #[test]
    fn validation_rejects_unknown_operator() {
        let errors = validate_when_node(&json!({"op": "bogus"})).unwrap();
        assert!(errors.get("op").is_some());
    }

    #[test]
    fn validation_requires_exactly_one_comparator() {
        let errors = validate_when_node(&json!({
            "op": "entity_state", "entity_id": "sensor.a",
        }))
        .unwrap();
        assert!(errors.get("non_field_errors").is_some());

        let errors = validate_when_node(&json!({
            "op": "entity_state", "entity_id": "sensor.a", "equals": "on", "not_equals": "off",
        }))
        .unwrap();
        assert!(errors.get("non_field_errors").is_some());
    }

    #[test]
    fn validation_rejects_bad_tz_and_days() {
        let errors = validate_when_node(&json!({
            "op": "all",
            "children": [
                {"op": "time_in_range", "start": "22:00", "end": "06:00", "tz": "Mars/Olympus"},
                {"op": "entity_state", "entity_id": "sensor.a", "equals": "1"},
            ],
        }))
        .unwrap();
        let child = &errors["children"]["0"];
        assert!(child.get("tz").is_some());

        let errors = validate_when_node(&json!({
            "op": "all",
            "children": [
                {"op": "time_in_range", "start": "22:00", "end": "06:00", "days": ["monday"]},
                {"op": "entity_state", "entity_id": "sensor.a", "equals": "1"},
            ],
        }))
        .unwrap();
        let child = &errors["children"]["0"];
        assert!(child.get("days").is_some());
    }

    #[test]
    fn validation_enforces_depth_cap() {
        let mut node = json!({"op": "entity_state", "entity_id": "sensor.a", "equals": "1"});
        for _ in 0..MAX_CONDITION_DEPTH {
            node = json!({"op": "not", "child": node});
        }
        let errors = validate_when_node(&node).unwrap();
        assert!(errors.to_string().contains("depth"));
    }

    #[test]
    fn frigate_node_round_trips_through_serde() {
        let raw = json!({
            "op": "frigate_person_detected",
            "cameras": ["backyard"],
            "zones": ["yard"],
            "within_seconds": 30,
            "min_confidence_pct": 90,
            "aggregation": "max",
            "on_unavailable": "treat_as_no_match",
        });
        assert!(validate_when_node(&raw).is_none());
        let node: WhenNode = serde_json::from_value(raw).unwrap();
        match node {
            WhenNode::FrigatePersonDetected {
                aggregation,
                on_unavailable,
                within_seconds,
                ..
            } => {
                assert_eq!(aggregation, DetectionAggregation::Max);
                assert_eq!(on_unavailable, OnUnavailable::TreatAsNoMatch);
                assert_eq!(within_seconds, 30);
            }
            other => panic!("unexpected node {other:?}"),
        }
    }
}
