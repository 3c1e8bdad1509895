use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

use crate::error::{data_envelope, AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub(crate) struct CreateProfileRequest {
    pub name: String,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub entries: Option<JsonValue>,
    #[serde(default)]
    pub activate: bool,
}

fn entries_map(raw: Option<&JsonValue>) -> AppResult<HashMap<String, JsonValue>> {
    match raw {
        None => Ok(HashMap::new()),
        Some(JsonValue::Object(map)) => Ok(map.clone().into_iter().collect()),
        Some(_) => Err(AppError::validation("entries must be an object.")),
    }
}

#[utoipa::path(
    get,
    path = "/api/profiles",
    tag = "profiles",
    responses((status = 200, description = "Active settings profile"))
)]
pub(crate) async fn list_profiles_handler(State(state): State<AppState>) -> AppResult<Json<JsonValue>> {
    state.stores.profiles.ensure_active(state.clock.now());
    let active = state.stores.profiles.active();
    let mut body = Map::new();
    body.insert(
        "active".to_string(),
        active.map(|profile| profile.as_json()).unwrap_or(JsonValue::Null),
    );
    Ok(Json(data_envelope(JsonValue::Object(body))))
}

#[utoipa::path(
    post,
    path = "/api/profiles",
    tag = "profiles",
    request_body = CreateProfileRequest,
    responses(
        (status = 201, description = "Created profile"),
        (status = 400, description = "Invalid profile payload")
    )
)]
pub(crate) async fn create_profile_handler(
    State(state): State<AppState>,
    Json(body): Json<CreateProfileRequest>,
) -> AppResult<(StatusCode, Json<JsonValue>)> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::validation("name is required"));
    }
    let entries = entries_map(body.entries.as_ref())?;
    let profile = state
        .stores
        .profiles
        .create(name, entries, body.activate, state.clock.now());
    if body.activate {
        state
            .signals
            .emit_settings_profile_changed(profile.id, "created");
    }
    Ok((StatusCode::CREATED, Json(data_envelope(profile.as_json()))))
}

#[utoipa::path(
    post,
    path = "/api/profiles/{profile_id}/activate",
    tag = "profiles",
    params(("profile_id" = i64, Path, description = "Profile id")),
    responses(
        (status = 200, description = "Activated profile"),
        (status = 404, description = "Not found")
    )
)]
pub(crate) async fn activate_profile_handler(
    State(state): State<AppState>,
    Path(profile_id): Path<i64>,
) -> AppResult<Json<JsonValue>> {
    let profile = state
        .stores
        .profiles
        .activate(profile_id, state.clock.now())
        .ok_or_else(|| AppError::not_found("Profile not found."))?;
    state
        .signals
        .emit_settings_profile_changed(profile.id, "activated");
    Ok(Json(data_envelope(profile.as_json())))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/profiles",
            get(list_profiles_handler).post(create_profile_handler),
        )
        .route("/api/profiles/{profile_id}/activate", post(activate_profile_handler))
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
    async fn repeated_activation_keeps_one_active_profile() {
        let state = test_support::test_state();
        let mut rx = state.signals.subscribe_settings_profile();
        let app = crate::routes::router(state.clone());

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/profiles")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"name": "Vacation", "entries": {"arming_time": 0}}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        let profile_id = body["data"]["id"].as_i64().unwrap();

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(
                    Request::post(format!("/api/profiles/{profile_id}/activate"))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(state.stores.profiles.active_count(), 1);
        assert_eq!(state.stores.profiles.active().map(|p| p.id), Some(profile_id));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.profile_id, profile_id);
        assert_eq!(event.reason, "activated");
    }

    #[tokio::test]
    async fn activate_missing_profile_is_not_found() {
        let state = test_support::test_state();
        let app = crate::routes::router(state);

        let response = app
            .oneshot(
                Request::post("/api/profiles/999/activate")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
