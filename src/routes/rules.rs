use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeSet, HashMap};

use crate::alarm::AlarmState;
use crate::error::{data_envelope, AppError, AppResult};
use crate::rules::actions::ADMIN_ONLY_ACTION_TYPES;
use crate::rules::extract::extract_entity_ids_from_definition;
use crate::rules::{derive_kind_from_actions, validate_definition};
use crate::state::AppState;
use crate::store::rules::{NewRule, RuleKind};

use super::{actor_from_headers, Actor};

#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub(crate) struct RuleUpsertRequest {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub enabled: Option<bool>,
    pub priority: Option<i64>,
    pub schema_version: Option<i64>,
    #[schema(value_type = Option<Object>)]
    pub definition: Option<JsonValue>,
    #[serde(default)]
    pub cooldown_seconds: Option<i64>,
    pub entity_ids: Option<Vec<String>>,
}

fn normalize_entity_ids(raw: &[String]) -> AppResult<BTreeSet<String>> {
    let mut out = BTreeSet::new();
    for value in raw {
        let entity_id = value.trim();
        if entity_id.is_empty() {
            continue;
        }
        if !entity_id.contains('.') {
            return Err(AppError::validation(format!("Invalid entity_id: {entity_id}")));
        }
        out.insert(entity_id.to_string());
    }
    Ok(out)
}

fn check_definition(definition: &JsonValue, schema_version: i64, actor: &Actor) -> AppResult<()> {
    if let Some(errors) = validate_definition(definition, schema_version) {
        return Err(AppError::validation_with_details(
            "Rule validation failed",
            errors,
        ));
    }
    if !actor.is_admin {
        if let Some(actions) = definition.get("then").and_then(JsonValue::as_array) {
            for action in actions {
                let action_type = action.get("type").and_then(JsonValue::as_str).unwrap_or("");
                if ADMIN_ONLY_ACTION_TYPES.contains(&action_type) {
                    return Err(AppError::validation_with_details(
                        "Rule validation failed",
                        json!({
                            "definition": {
                                "then": format!("Action type '{action_type}' requires admin privileges"),
                            },
                        }),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn parse_kind(raw: Option<&str>, definition: &JsonValue) -> AppResult<RuleKind> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => RuleKind::parse(value)
            .ok_or_else(|| AppError::validation(format!("Invalid kind: {value}"))),
        None => Ok(derive_kind_from_actions(definition)),
    }
}

#[utoipa::path(
    get,
    path = "/api/rules",
    tag = "rules",
    params(
        ("kind" = Option<String>, Query, description = "Filter by kind (trigger, arm, disarm)"),
        ("enabled" = Option<String>, Query, description = "Filter by enabled flag (true/false)")
    ),
    responses(
        (status = 200, description = "Rules with their referenced entity ids"),
        (status = 400, description = "Invalid filter")
    )
)]
pub(crate) async fn list_rules_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Json<JsonValue>> {
    let kind = match params.get("kind").map(String::as_str) {
        Some(value) => Some(
            RuleKind::parse(value)
                .ok_or_else(|| AppError::validation(format!("Invalid kind: {value}")))?,
        ),
        None => None,
    };
    let enabled = match params.get("enabled").map(String::as_str) {
        Some("true") => Some(true),
        Some("false") => Some(false),
        _ => None,
    };

    let rules = state.stores.rules.list(kind, enabled);
    let rows: Vec<JsonValue> = rules
        .iter()
        .map(|rule| rule.as_json(&state.stores.rules.entity_refs(rule.id)))
        .collect();
    Ok(Json(data_envelope(json!(rows))))
}

#[utoipa::path(
    post,
    path = "/api/rules",
    tag = "rules",
    request_body = RuleUpsertRequest,
    responses(
        (status = 201, description = "Created rule"),
        (status = 400, description = "Validation failed")
    )
)]
pub(crate) async fn create_rule_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RuleUpsertRequest>,
) -> AppResult<(StatusCode, Json<JsonValue>)> {
    let actor = actor_from_headers(&headers);
    let name = body
        .name
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::validation("name is required"))?;
    let definition = body.definition.clone().unwrap_or_else(|| json!({}));
    let schema_version = body.schema_version.unwrap_or(1);
    check_definition(&definition, schema_version, &actor)?;

    let kind = parse_kind(body.kind.as_deref(), &definition)?;
    let extracted = extract_entity_ids_from_definition(&definition);
    let entity_ids = match &body.entity_ids {
        Some(raw) => {
            let mut ids = normalize_entity_ids(raw)?;
            ids.extend(extracted);
            ids
        }
        None => extracted,
    };

    let rule = state.stores.rules.insert(
        NewRule {
            name: name.to_string(),
            kind,
            enabled: body.enabled.unwrap_or(true),
            priority: body.priority.unwrap_or(0),
            schema_version,
            definition,
            cooldown_seconds: body.cooldown_seconds.filter(|value| *value > 0),
            created_by: actor.name.clone(),
            created_by_admin: actor.is_admin,
        },
        state.clock.now(),
    );
    state.stores.rules.sync_entity_refs(rule.id, entity_ids.clone());
    state.dispatcher.invalidate_entity_rule_index();

    Ok((
        StatusCode::CREATED,
        Json(data_envelope(rule.as_json(&entity_ids))),
    ))
}

#[utoipa::path(
    put,
    path = "/api/rules/{rule_id}",
    tag = "rules",
    params(("rule_id" = i64, Path, description = "Rule id")),
    request_body = RuleUpsertRequest,
    responses(
        (status = 200, description = "Updated rule"),
        (status = 400, description = "Validation failed"),
        (status = 404, description = "Not found")
    )
)]
pub(crate) async fn update_rule_handler(
    State(state): State<AppState>,
    Path(rule_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<RuleUpsertRequest>,
) -> AppResult<Json<JsonValue>> {
    let actor = actor_from_headers(&headers);
    let existing = state
        .stores
        .rules
        .get(rule_id)
        .ok_or_else(|| AppError::not_found("Rule not found."))?;

    let definition = body.definition.clone().unwrap_or_else(|| existing.definition.clone());
    let schema_version = body.schema_version.unwrap_or(existing.schema_version);
    check_definition(&definition, schema_version, &actor)?;
    let kind = parse_kind(body.kind.as_deref(), &definition)?;

    let updated = state
        .stores
        .rules
        .update(rule_id, state.clock.now(), |rule| {
            if let Some(name) = body.name.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                rule.name = name.to_string();
            }
            rule.kind = kind;
            if let Some(enabled) = body.enabled {
                rule.enabled = enabled;
            }
            if let Some(priority) = body.priority {
                rule.priority = priority;
            }
            rule.schema_version = schema_version;
            rule.definition = definition.clone();
            if body.cooldown_seconds.is_some() {
                rule.cooldown_seconds = body.cooldown_seconds.filter(|value| *value > 0);
            }
            rule.created_by = actor.name.clone();
            rule.created_by_admin = actor.is_admin;
        })
        .ok_or_else(|| AppError::not_found("Rule not found."))?;

    let extracted = extract_entity_ids_from_definition(&updated.definition);
    let entity_ids = match &body.entity_ids {
        Some(raw) => {
            let mut ids = normalize_entity_ids(raw)?;
            ids.extend(extracted);
            ids
        }
        None => extracted,
    };
    state.stores.rules.sync_entity_refs(rule_id, entity_ids.clone());
    state.dispatcher.invalidate_entity_rule_index();

    Ok(Json(data_envelope(updated.as_json(&entity_ids))))
}

#[utoipa::path(
    delete,
    path = "/api/rules/{rule_id}",
    tag = "rules",
    params(("rule_id" = i64, Path, description = "Rule id")),
    responses(
        (status = 200, description = "Deleted"),
        (status = 404, description = "Not found")
    )
)]
pub(crate) async fn delete_rule_handler(
    State(state): State<AppState>,
    Path(rule_id): Path<i64>,
) -> AppResult<Json<JsonValue>> {
    if !state.stores.rules.delete(rule_id) {
        return Err(AppError::not_found("Rule not found."));
    }
    state.stores.runtime.remove_rule(rule_id);
    state.dispatcher.invalidate_entity_rule_index();
    Ok(Json(data_envelope(json!({"deleted": true}))))
}

#[utoipa::path(
    post,
    path = "/api/rules/run",
    tag = "rules",
    responses((status = 200, description = "Aggregate engine result"))
)]
pub(crate) async fn run_rules_handler(State(state): State<AppState>) -> AppResult<Json<JsonValue>> {
    let result = state.engine.run_all_enabled(state.clock.now()).await;
    Ok(Json(data_envelope(result.as_json())))
}

#[utoipa::path(
    post,
    path = "/api/rules/simulate",
    tag = "rules",
    responses(
        (status = 200, description = "Non-persisting evaluation result with per-rule traces"),
        (status = 400, description = "Invalid simulation input")
    )
)]
pub(crate) async fn simulate_rules_handler(
    State(state): State<AppState>,
    Json(body): Json<JsonValue>,
) -> AppResult<Json<JsonValue>> {
    let entity_states_raw = body.get("entity_states").filter(|v| !v.is_null());
    let mut entity_states: HashMap<String, String> = HashMap::new();
    if let Some(raw) = entity_states_raw {
        let Some(map) = raw.as_object() else {
            return Err(AppError::validation("entity_states must be an object."));
        };
        for (key, value) in map {
            let entity_id = key.trim();
            let Some(value) = value.as_str() else {
                continue;
            };
            if entity_id.is_empty() {
                continue;
            }
            entity_states.insert(entity_id.to_string(), value.to_string());
        }
    }

    let assume_for_seconds = match body.get("assume_for_seconds").filter(|v| !v.is_null()) {
        Some(value) => Some(
            value
                .as_i64()
                .ok_or_else(|| AppError::validation("assume_for_seconds must be an integer."))?,
        ),
        None => None,
    };

    let alarm_state = match body.get("alarm_state").filter(|v| !v.is_null()) {
        Some(value) => {
            let raw = value
                .as_str()
                .ok_or_else(|| AppError::validation("alarm_state must be a string."))?
                .trim();
            if raw.is_empty() {
                None
            } else {
                Some(
                    AlarmState::parse(raw)
                        .ok_or_else(|| AppError::validation(format!("Invalid alarm_state: {raw}")))?,
                )
            }
        }
        None => None,
    };

    let report = state.engine.simulate(
        &entity_states,
        assume_for_seconds,
        alarm_state,
        state.clock.now(),
    );
    Ok(Json(data_envelope(report)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/rules", get(list_rules_handler).post(create_rule_handler))
        .route(
            "/api/rules/{rule_id}",
            put(update_rule_handler).delete(delete_rule_handler),
        )
        .route("/api/rules/run", post(run_rules_handler))
        .route("/api/rules/simulate", post(simulate_rules_handler))
}
