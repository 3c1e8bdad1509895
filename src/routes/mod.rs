use axum::http::HeaderMap;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

pub mod action_logs;
pub mod alarm;
pub mod detections;
pub mod dispatcher;
pub mod entities;
pub mod profiles;
pub mod rules;
pub mod ws;

/// Actor attribution for mutating routes. Authentication itself lives in
/// front of this service; absent headers mean the local admin operator.
pub(crate) struct Actor {
    pub name: Option<String>,
    pub is_admin: bool,
}

pub(crate) fn actor_from_headers(headers: &HeaderMap) -> Actor {
    let name = headers
        .get("x-actor")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    let is_admin = headers
        .get("x-actor-admin")
        .and_then(|value| value.to_str().ok())
        .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
        .unwrap_or(true);
    Actor { name, is_admin }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(crate::api::router())
        .merge(alarm::router())
        .merge(rules::router())
        .merge(dispatcher::router())
        .merge(entities::router())
        .merge(detections::router())
        .merge(profiles::router())
        .merge(action_logs::router())
        .merge(ws::router())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
