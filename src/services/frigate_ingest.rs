use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value as JsonValue;

use crate::dispatcher::RuleDispatcher;
use crate::store::detections::Detection;
use crate::store::Stores;

pub const SOURCE: &str = "frigate";

/// Accepts either a fraction in [0, 1] (common in Frigate payloads) or a
/// percent in [0, 100]; returns a percent clamped to [0, 100].
pub fn normalize_confidence_pct(value: Option<&JsonValue>) -> Option<f64> {
    let raw = value?.as_f64()?;
    if raw.is_nan() {
        return None;
    }
    if (0.0..=1.0).contains(&raw) {
        return Some((raw * 100.0).clamp(0.0, 100.0));
    }
    Some(raw.clamp(0.0, 100.0))
}

fn datetime_from_epoch_seconds(value: Option<&JsonValue>) -> Option<DateTime<Utc>> {
    let seconds = value?.as_f64()?;
    if seconds <= 0.0 {
        return None;
    }
    Utc.timestamp_opt(seconds as i64, ((seconds.fract()) * 1e9) as u32)
        .single()
}

/// Parses the common `frigate/events` message shape: a wrapper with
/// `before`/`after` (the `after` object is authoritative), or the event
/// payload published directly.
pub fn parse_frigate_events_payload(
    payload: &JsonValue,
    source_topic: &str,
    now: DateTime<Utc>,
) -> Option<Detection> {
    let obj = payload.as_object()?;
    let after = obj
        .get("after")
        .and_then(JsonValue::as_object)
        .unwrap_or(obj);

    let label = after
        .get("label")
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .unwrap_or("");
    let camera = after
        .get("camera")
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .unwrap_or("");
    if label.is_empty() || camera.is_empty() {
        return None;
    }

    let event_id = after
        .get("id")
        .or_else(|| obj.get("id"))
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .unwrap_or("")
        .to_string();

    let zones = after
        .get("entered_zones")
        .or_else(|| after.get("current_zones"))
        .and_then(JsonValue::as_array)
        .map(|raw| {
            raw.iter()
                .filter_map(JsonValue::as_str)
                .map(str::trim)
                .filter(|zone| !zone.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let score = after
        .get("top_score")
        .or_else(|| after.get("score"))
        .or_else(|| after.get("confidence"));
    let confidence_pct = normalize_confidence_pct(score)?;

    let observed_at = datetime_from_epoch_seconds(after.get("end_time"))
        .or_else(|| datetime_from_epoch_seconds(after.get("start_time")))
        .unwrap_or(now);

    Some(Detection {
        provider: SOURCE.to_string(),
        event_id,
        label: label.to_string(),
        camera: camera.to_string(),
        zones,
        confidence_pct,
        observed_at,
        source_topic: source_topic.to_string(),
        raw: payload.clone(),
    })
}

/// Ingestion surface for camera events: normalizes, upserts, and nudges the
/// dispatcher with the camera's synthetic entity id so camera-bound rules
/// re-evaluate.
pub fn ingest_frigate_event(
    stores: &Stores,
    dispatcher: Option<&RuleDispatcher>,
    payload: &JsonValue,
    source_topic: &str,
    now: DateTime<Utc>,
) -> Option<Detection> {
    let detection = parse_frigate_events_payload(payload, source_topic, now)?;
    let camera_entity = format!("camera.{}", detection.camera);
    let observed_at = detection.observed_at;
    stores.detections.upsert(detection.clone());
    if let Some(dispatcher) = dispatcher {
        dispatcher.submit(SOURCE, vec![camera_entity], Some(observed_at));
    }
    Some(detection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn confidence_fraction_becomes_percent() {
        assert_eq!(normalize_confidence_pct(Some(&json!(0.92))), Some(92.0));
        assert_eq!(normalize_confidence_pct(Some(&json!(92.0))), Some(92.0));
        assert_eq!(normalize_confidence_pct(Some(&json!(150.0))), Some(100.0));
        assert_eq!(normalize_confidence_pct(Some(&json!("high"))), None);
        assert_eq!(normalize_confidence_pct(None), None);
    }

    #[test]
    fn parses_events_wrapper() {
        let payload = json!({
            "type": "update",
            "before": {},
            "after": {
                "id": "evt-1",
                "camera": "backyard",
                "label": "person",
                "top_score": 0.92,
                "entered_zones": ["yard", ""],
                "end_time": 1767268800.0,
            },
        });
        let detection = parse_frigate_events_payload(&payload, "frigate/events", now()).unwrap();
        assert_eq!(detection.camera, "backyard");
        assert_eq!(detection.label, "person");
        assert_eq!(detection.event_id, "evt-1");
        assert_eq!(detection.zones, vec!["yard".to_string()]);
        assert_eq!(detection.confidence_pct, 92.0);
    }

    #[test]
    fn parses_direct_payload_and_falls_back_to_now() {
        let payload = json!({
            "id": "evt-2",
            "camera": "porch",
            "label": "person",
            "score": 88.5,
        });
        let detection = parse_frigate_events_payload(&payload, "frigate/events", now()).unwrap();
        assert_eq!(detection.observed_at, now());
        assert_eq!(detection.confidence_pct, 88.5);
    }

    #[test]
    fn rejects_payloads_without_label_or_camera() {
        assert!(parse_frigate_events_payload(&json!({"after": {"camera": "x"}}), "t", now()).is_none());
        assert!(parse_frigate_events_payload(&json!({"after": {"label": "person"}}), "t", now()).is_none());
        assert!(parse_frigate_events_payload(&json!("nope"), "t", now()).is_none());
    }

    #[test]
    fn ingest_upserts_detection() {
        let stores = Stores::new();
        let payload = json!({
            "after": {
                "id": "evt-3",
                "camera": "backyard",
                "label": "person",
                "top_score": 0.95,
                "entered_zones": ["yard"],
            },
        });
        let detection = ingest_frigate_event(&stores, None, &payload, "frigate/events", now()).unwrap();
        assert_eq!(detection.confidence_pct, 95.0);
        assert_eq!(stores.detections.len(), 1);
    }
}
