use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value as JsonValue};

use crate::error::{data_envelope, AppError, AppResult};
use crate::services::entity_sync::sync_entities;
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/api/entities",
    tag = "entities",
    responses((status = 200, description = "Known entities with their last states"))
)]
pub(crate) async fn list_entities_handler(State(state): State<AppState>) -> AppResult<Json<JsonValue>> {
    let rows: Vec<JsonValue> = state
        .stores
        .entities
        .list()
        .iter()
        .map(|entity| entity.as_json())
        .collect();
    Ok(Json(data_envelope(json!(rows))))
}

/// Manual ingestion surface mirroring the periodic gateway sync.
#[utoipa::path(
    post,
    path = "/api/entities/sync",
    tag = "entities",
    responses(
        (status = 200, description = "Imported/updated counts"),
        (status = 400, description = "items missing or not a list")
    )
)]
pub(crate) async fn sync_entities_handler(
    State(state): State<AppState>,
    Json(body): Json<JsonValue>,
) -> AppResult<Json<JsonValue>> {
    let items = body
        .get("items")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| AppError::validation("items must be a list."))?;
    let source = body
        .get("source")
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("home_assistant");

    let outcome = sync_entities(
        &state.stores,
        Some(&state.broadcaster),
        Some(&state.dispatcher),
        items,
        source,
        state.clock.now(),
    );
    Ok(Json(data_envelope(outcome.as_json())))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/entities", get(list_entities_handler))
        .route("/api/entities/sync", post(sync_entities_handler))
}
