use utoipa::OpenApi;

use crate::api::HealthResponse;
use crate::routes::alarm::ArmRequest;
use crate::routes::profiles::CreateProfileRequest;
use crate::routes::rules::RuleUpsertRequest;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "alarm-server-rs",
        description = "Home security controller: alarm state machine, rules engine, and rule trigger dispatcher."
    ),
    paths(
        crate::api::healthz_handler,
        crate::routes::alarm::alarm_state_handler,
        crate::routes::alarm::arm_handler,
        crate::routes::alarm::disarm_handler,
        crate::routes::alarm::trigger_handler,
        crate::routes::alarm::cancel_arming_handler,
        crate::routes::rules::list_rules_handler,
        crate::routes::rules::create_rule_handler,
        crate::routes::rules::update_rule_handler,
        crate::routes::rules::delete_rule_handler,
        crate::routes::rules::run_rules_handler,
        crate::routes::rules::simulate_rules_handler,
        crate::routes::dispatcher::status_handler,
        crate::routes::dispatcher::config_handler,
        crate::routes::dispatcher::suspended_rules_handler,
        crate::routes::dispatcher::clear_suspended_handler,
        crate::routes::entities::list_entities_handler,
        crate::routes::entities::sync_entities_handler,
        crate::routes::detections::list_detections_handler,
        crate::routes::detections::ingest_frigate_handler,
        crate::routes::profiles::list_profiles_handler,
        crate::routes::profiles::create_profile_handler,
        crate::routes::profiles::activate_profile_handler,
        crate::routes::action_logs::list_action_logs_handler,
    ),
    components(schemas(
        HealthResponse,
        ArmRequest,
        RuleUpsertRequest,
        CreateProfileRequest,
    ))
)]
struct ApiDoc;

pub fn openapi_json() -> serde_json::Value {
    serde_json::to_value(ApiDoc::openapi()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_covers_the_admin_surface() {
        let doc = openapi_json();
        assert_eq!(doc["info"]["title"], "alarm-server-rs");
        for path in [
            "/healthz",
            "/api/alarm/state",
            "/api/alarm/cancel-arming",
            "/api/rules",
            "/api/rules/{rule_id}",
            "/api/rules/simulate",
            "/api/dispatcher/status",
            "/api/dispatcher/suspended-rules",
            "/api/entities/sync",
            "/api/detections/frigate",
            "/api/profiles/{profile_id}/activate",
            "/api/action-logs",
        ] {
            assert!(doc["paths"][path].is_object(), "missing path {path}");
        }
        for schema in ["HealthResponse", "ArmRequest", "RuleUpsertRequest", "CreateProfileRequest"] {
            assert!(
                doc["components"]["schemas"][schema].is_object(),
                "missing schema {schema}"
            );
        }
    }
}
