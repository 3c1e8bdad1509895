use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;

use crate::error::{data_envelope, AppError, AppResult};
use crate::services::frigate_ingest::ingest_frigate_event;
use crate::state::AppState;

/// Ingestion surface for camera events, mirroring what the MQTT bridge
/// feeds in production deployments.
#[utoipa::path(
    post,
    path = "/api/detections/frigate",
    tag = "detections",
    responses(
        (status = 200, description = "Normalized detection"),
        (status = 400, description = "Unrecognized event payload")
    )
)]
pub(crate) async fn ingest_frigate_handler(
    State(state): State<AppState>,
    Json(body): Json<JsonValue>,
) -> AppResult<Json<JsonValue>> {
    let topic = body
        .get("topic")
        .and_then(JsonValue::as_str)
        .unwrap_or("frigate/events");
    let payload = body.get("payload").unwrap_or(&body);

    let detection = ingest_frigate_event(
        &state.stores,
        Some(&state.dispatcher),
        payload,
        topic,
        state.clock.now(),
    )
    .ok_or_else(|| AppError::validation("Unrecognized frigate event payload."))?;

    Ok(Json(data_envelope(json!({
        "provider": detection.provider,
        "event_id": detection.event_id,
        "camera": detection.camera,
        "label": detection.label,
        "zones": detection.zones,
        "confidence_pct": detection.confidence_pct,
        "observed_at": detection.observed_at.to_rfc3339(),
    }))))
}

#[utoipa::path(
    get,
    path = "/api/detections",
    tag = "detections",
    params(
        ("within_seconds" = Option<i64>, Query, description = "Lookback window, default 300"),
        ("label" = Option<String>, Query, description = "Detection label, default person")
    ),
    responses((status = 200, description = "Recent detections"))
)]
pub(crate) async fn list_detections_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Json<JsonValue>> {
    let within_seconds: i64 = params
        .get("within_seconds")
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(300);
    let label = params
        .get("label")
        .map(String::as_str)
        .unwrap_or("person");
    let since = state.clock.now() - chrono::Duration::seconds(within_seconds.max(0));

    let rows: Vec<JsonValue> = state
        .stores
        .detections
        .recent(label, None, None, since)
        .iter()
        .map(|detection| {
            json!({
                "provider": detection.provider,
                "event_id": detection.event_id,
                "camera": detection.camera,
                "label": detection.label,
                "zones": detection.zones,
                "confidence_pct": detection.confidence_pct,
                "observed_at": detection.observed_at.to_rfc3339(),
            })
        })
        .collect();
    Ok(Json(data_envelope(json!(rows))))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/detections", get(list_detections_handler))
        .route("/api/detections/frigate", post(ingest_frigate_handler))
}

#[cfg(test)]
mod tests {
    use crate::test_support;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value as JsonValue};
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> JsonValue {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn ingest_then_list_round_trip() {
        let state = test_support::test_state();
        let app = crate::routes::router(state);

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/detections/frigate")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({
                            "topic": "frigate/events",
                            "payload": {
                                "after": {
                                    "id": "evt-1",
                                    "camera": "backyard",
                                    "label": "person",
                                    "top_score": 0.92,
                                    "entered_zones": ["yard"],
                                },
                            },
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["confidence_pct"], 92.0);

        let response = app
            .oneshot(Request::get("/api/detections").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["camera"], "backyard");
    }

    #[tokio::test]
    async fn malformed_event_is_a_validation_error() {
        let state = test_support::test_state();
        let app = crate::routes::router(state);

        let response = app
            .oneshot(
                Request::post("/api/detections/frigate")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"payload": {"after": {}}}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
