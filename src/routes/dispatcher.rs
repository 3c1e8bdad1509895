use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;

use crate::error::{data_envelope, AppError, AppResult};
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/api/dispatcher/status",
    tag = "dispatcher",
    responses((status = 200, description = "Pending batches, queue depth, workers, stats"))
)]
pub(crate) async fn status_handler(State(state): State<AppState>) -> AppResult<Json<JsonValue>> {
    Ok(Json(data_envelope(state.dispatcher.status())))
}

#[utoipa::path(
    get,
    path = "/api/dispatcher/config",
    tag = "dispatcher",
    responses((status = 200, description = "Normalized dispatcher config"))
)]
pub(crate) async fn config_handler(State(state): State<AppState>) -> AppResult<Json<JsonValue>> {
    let config = state.dispatcher.config();
    Ok(Json(data_envelope(json!({
        "enabled": true,
        "debounce_ms": config.debounce_ms,
        "batch_size_limit": config.batch_size_limit,
        "rate_limit_per_sec": config.rate_limit_per_sec,
        "rate_limit_burst": config.rate_limit_burst,
        "worker_concurrency": config.worker_concurrency,
        "queue_max_depth": config.queue_max_depth,
    }))))
}

#[utoipa::path(
    get,
    path = "/api/dispatcher/suspended-rules",
    tag = "dispatcher",
    responses((status = 200, description = "Suspended rule runtime rows with rule metadata"))
)]
pub(crate) async fn suspended_rules_handler(State(state): State<AppState>) -> AppResult<Json<JsonValue>> {
    Ok(Json(data_envelope(json!(state.dispatcher.suspended_rules()))))
}

#[utoipa::path(
    delete,
    path = "/api/dispatcher/suspended-rules",
    tag = "dispatcher",
    params(("rule_id" = i64, Query, description = "Rule whose suspension to clear")),
    responses(
        (status = 200, description = "Suspension cleared"),
        (status = 400, description = "Missing rule_id"),
        (status = 404, description = "Rule is not suspended")
    )
)]
pub(crate) async fn clear_suspended_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Json<JsonValue>> {
    let rule_id: i64 = params
        .get("rule_id")
        .and_then(|value| value.trim().parse().ok())
        .ok_or_else(|| AppError::validation("rule_id is required"))?;

    let cleared = state.dispatcher.clear_suspended_rule(rule_id);
    if cleared == 0 {
        return Err(AppError::not_found("Rule is not suspended."));
    }
    Ok(Json(data_envelope(json!({"cleared": cleared}))))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/dispatcher/status", get(status_handler))
        .route("/api/dispatcher/config", get(config_handler))
        .route(
            "/api/dispatcher/suspended-rules",
            get(suspended_rules_handler).delete(clear_suspended_handler),
        )
}

#[cfg(test)]
mod tests {
    use crate::test_support;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value as JsonValue;
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> JsonValue {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn status_returns_dispatcher_snapshot() {
        let state = test_support::test_state();
        let app = crate::routes::router(state);

        let response = app
            .oneshot(Request::get("/api/dispatcher/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["enabled"], true);
        assert!(body["data"]["pending_entities"].is_u64());
        assert!(body["data"]["stats"]["by_source"].is_object());
    }

    #[tokio::test]
    async fn config_returns_normalized_values() {
        let state = test_support::test_state();
        let app = crate::routes::router(state);

        let response = app
            .oneshot(Request::get("/api/dispatcher/config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["enabled"], true);
        assert_eq!(body["data"]["debounce_ms"], 200);
        assert_eq!(body["data"]["queue_max_depth"], 1000);
    }

    #[tokio::test]
    async fn suspended_rules_list_and_clear() {
        let harness = test_support::test_harness();
        let rule = test_support::insert_rule(
            &harness,
            "Suspended Rule",
            serde_json::json!({"then": []}),
            None,
            true,
        );
        harness.stores.runtime.update(rule.id, "when", |state| {
            state.error_suspended = true;
            state.consecutive_failures = 3;
            state.last_error = Some("boom".to_string());
        });
        let state = test_support::state_from_harness(harness);
        let app = crate::routes::router(state);

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/dispatcher/suspended-rules")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["rule_id"], rule.id);
        assert_eq!(body["data"][0]["rule_name"], "Suspended Rule");
        assert_eq!(body["data"][0]["consecutive_failures"], 3);

        let response = app
            .clone()
            .oneshot(
                Request::delete(format!("/api/dispatcher/suspended-rules?rule_id={}", rule.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["cleared"], 1);

        // Clearing again reports the standard not-found envelope.
        let response = app
            .oneshot(
                Request::delete(format!("/api/dispatcher/suspended-rules?rule_id={}", rule.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"]["status"], "not_found");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .to_lowercase()
            .contains("not suspended"));
    }

    #[tokio::test]
    async fn clear_requires_rule_id() {
        let state = test_support::test_state();
        let app = crate::routes::router(state);

        let response = app
            .oneshot(
                Request::delete("/api/dispatcher/suspended-rules")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
