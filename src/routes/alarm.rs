use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use crate::alarm::AlarmState;
use crate::error::{data_envelope, AppError, AppResult};
use crate::state::AppState;

use super::actor_from_headers;

#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub(crate) struct ArmRequest {
    pub target_state: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/alarm/state",
    tag = "alarm",
    params(("process_timers" = Option<bool>, Query, description = "Advance due timers before reading")),
    responses((status = 200, description = "Current alarm snapshot"))
)]
pub(crate) async fn alarm_state_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Json<JsonValue>> {
    let process_timers = params
        .get("process_timers")
        .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    let snapshot = state.alarm.current_snapshot(process_timers, state.clock.now());
    Ok(Json(data_envelope(snapshot.as_json())))
}

#[utoipa::path(
    post,
    path = "/api/alarm/arm",
    tag = "alarm",
    request_body = ArmRequest,
    responses(
        (status = 200, description = "Arming started or armed"),
        (status = 400, description = "Invalid target state")
    )
)]
pub(crate) async fn arm_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ArmRequest>,
) -> AppResult<Json<JsonValue>> {
    let Some(target_state) = AlarmState::parse(body.target_state.trim()) else {
        return Err(AppError::validation("Invalid target_state."));
    };
    let actor = actor_from_headers(&headers);
    let reason = body.reason.as_deref().unwrap_or("api");
    let snapshot = state.alarm.arm(
        target_state,
        actor.name.as_deref(),
        reason,
        state.clock.now(),
    )?;
    Ok(Json(data_envelope(snapshot.as_json())))
}

#[utoipa::path(
    post,
    path = "/api/alarm/disarm",
    tag = "alarm",
    responses((status = 200, description = "Disarmed"))
)]
pub(crate) async fn disarm_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<JsonValue>> {
    let actor = actor_from_headers(&headers);
    let snapshot = state
        .alarm
        .disarm(actor.name.as_deref(), "api", state.clock.now());
    Ok(Json(data_envelope(snapshot.as_json())))
}

#[utoipa::path(
    post,
    path = "/api/alarm/trigger",
    tag = "alarm",
    responses((status = 200, description = "Alarm triggered"))
)]
pub(crate) async fn trigger_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<JsonValue>> {
    let actor = actor_from_headers(&headers);
    let snapshot = state
        .alarm
        .trigger(actor.name.as_deref(), "api", state.clock.now());
    Ok(Json(data_envelope(snapshot.as_json())))
}

#[utoipa::path(
    post,
    path = "/api/alarm/cancel-arming",
    tag = "alarm",
    responses(
        (status = 200, description = "Arming cancelled"),
        (status = 409, description = "Not arming")
    )
)]
pub(crate) async fn cancel_arming_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<JsonValue>> {
    let actor = actor_from_headers(&headers);
    let snapshot = state
        .alarm
        .cancel_arming(actor.name.as_deref(), state.clock.now())?;
    Ok(Json(data_envelope(snapshot.as_json())))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/alarm/state", get(alarm_state_handler))
        .route("/api/alarm/arm", post(arm_handler))
        .route("/api/alarm/disarm", post(disarm_handler))
        .route("/api/alarm/trigger", post(trigger_handler))
        .route("/api/alarm/cancel-arming", post(cancel_arming_handler))
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
    async fn arm_then_cancel_then_conflict() {
        let state = test_support::test_state();
        let app = crate::routes::router(state);

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/alarm/arm")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"target_state": "armed_away"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["current_state"], "arming");

        let response = app
            .clone()
            .oneshot(Request::post("/api/alarm/cancel-arming").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["current_state"], "disarmed");

        let response = app
            .oneshot(Request::post("/api/alarm/cancel-arming").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"]["status"], "conflict");
    }

    #[tokio::test]
    async fn arm_rejects_invalid_target_state() {
        let state = test_support::test_state();
        let app = crate::routes::router(state);

        let response = app
            .oneshot(
                Request::post("/api/alarm/arm")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"target_state": "sideways"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["status"], "validation");
    }

    #[tokio::test]
    async fn state_endpoint_returns_snapshot() {
        let state = test_support::test_state();
        let app = crate::routes::router(state);

        let response = app
            .oneshot(Request::get("/api/alarm/state").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["current_state"], "disarmed");
        assert!(body["data"]["timing_snapshot"]["trigger_time"].is_i64());
    }
}
