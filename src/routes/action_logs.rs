use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;

use crate::error::{data_envelope, AppResult};
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[utoipa::path(
    get,
    path = "/api/action-logs",
    tag = "action_logs",
    params(("limit" = Option<i64>, Query, description = "Max rows, default 100, cap 1000")),
    responses((status = 200, description = "Rule firings, newest first"))
)]
pub(crate) async fn list_action_logs_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Json<JsonValue>> {
    let limit = params
        .get("limit")
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_LIMIT)
        .clamp(1, MAX_LIMIT);

    let rows: Vec<JsonValue> = state
        .stores
        .action_log
        .recent(limit)
        .iter()
        .map(|entry| entry.as_json())
        .collect();
    Ok(Json(data_envelope(json!(rows))))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/action-logs", get(list_action_logs_handler))
}
