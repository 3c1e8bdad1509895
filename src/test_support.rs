use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::alarm::AlarmStateStore;
use crate::broadcast::Broadcaster;
use crate::config::CoreConfig;
use crate::dispatcher::config::DispatcherConfig;
use crate::dispatcher::RuleDispatcher;
use crate::gateways::{
    ActionGateways, GatewayError, HomeAssistantGateway, NotificationOutbox, Zigbee2mqttGateway,
    ZwavejsGateway,
};
use crate::rules::actions::ActionContext;
use crate::rules::engine::RulesEngine;
use crate::rules::extract::extract_entity_ids_from_definition;
use crate::signals::Signals;
use crate::state::AppState;
use crate::store::rules::{NewRule, Rule, RuleKind};
use crate::store::{Stores, SystemConfigStore};
use crate::time::{Clock, ManualClock};

/// Fake for every gateway capability: records calls as JSON, optionally
/// failing each one.
pub struct GatewayRecorder {
    calls: Mutex<Vec<JsonValue>>,
    failing: AtomicBool,
}

impl GatewayRecorder {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<JsonValue> {
        self.calls.lock().unwrap_or_else(|err| err.into_inner()).clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self, call: JsonValue) {
        self.calls
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(call);
    }

    fn check(&self, gateway: &'static str, operation: &str) -> Result<(), GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(GatewayError::Operation {
                gateway,
                operation: operation.to_string(),
                message: "injected failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl Default for GatewayRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HomeAssistantGateway for GatewayRecorder {
    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        target: Option<&JsonValue>,
        service_data: Option<&JsonValue>,
        _timeout_seconds: Option<f64>,
    ) -> Result<JsonValue, GatewayError> {
        self.check("home_assistant", "call_service")?;
        self.record(json!({
            "gateway": "home_assistant",
            "domain": domain,
            "service": service,
            "target": target,
            "data": service_data,
        }));
        Ok(JsonValue::Null)
    }

    async fn get_states(&self) -> Result<Vec<JsonValue>, GatewayError> {
        self.check("home_assistant", "get_states")?;
        Ok(Vec::new())
    }
}

#[async_trait]
impl Zigbee2mqttGateway for GatewayRecorder {
    async fn set_entity_value(
        &self,
        entity_id: &str,
        value: &JsonValue,
    ) -> Result<(), GatewayError> {
        self.check("zigbee2mqtt", "set_entity_value")?;
        self.record(json!({
            "gateway": "zigbee2mqtt",
            "entity_id": entity_id,
            "value": value,
        }));
        Ok(())
    }
}

#[async_trait]
impl ZwavejsGateway for GatewayRecorder {
    async fn set_value(
        &self,
        node_id: i64,
        endpoint: i64,
        command_class: i64,
        property: &JsonValue,
        property_key: Option<&JsonValue>,
        value: &JsonValue,
    ) -> Result<(), GatewayError> {
        self.check("zwavejs", "set_value")?;
        self.record(json!({
            "gateway": "zwavejs",
            "node_id": node_id,
            "endpoint": endpoint,
            "command_class": command_class,
            "property": property,
            "property_key": property_key,
            "value": value,
        }));
        Ok(())
    }
}

pub struct TestHarness {
    pub clock: Clock,
    pub manual_clock: Arc<ManualClock>,
    pub stores: Stores,
    pub signals: Signals,
    pub alarm: Arc<AlarmStateStore>,
    pub gateways: ActionGateways,
    pub recorder: Arc<GatewayRecorder>,
}

impl TestHarness {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn engine(&self) -> RulesEngine {
        RulesEngine::new(self.stores.clone(), self.alarm.clone(), self.gateways.clone())
    }

    pub fn action_context<'a>(&'a self, rule: &'a Rule) -> ActionContext<'a> {
        ActionContext {
            rule,
            actor_user: None,
            now: self.now(),
            alarm: &self.alarm,
            profiles: &self.stores.profiles,
            gateways: &self.gateways,
        }
    }
}

pub fn test_start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
}

pub fn test_harness() -> TestHarness {
    let manual_clock = Arc::new(ManualClock::new(test_start_time()));
    let clock = Clock::from_source(manual_clock.clone());
    let stores = Stores::new();
    let signals = Signals::new();

    let mut entries = HashMap::new();
    entries.insert("delay_time".to_string(), json!(30));
    entries.insert("arming_time".to_string(), json!(30));
    entries.insert("trigger_time".to_string(), json!(120));
    entries.insert(
        "notification_providers".to_string(),
        json!([{"id": "pb", "name": "Pushbullet", "enabled": true}]),
    );
    stores.profiles.create("Default", entries, true, test_start_time());

    let alarm = Arc::new(AlarmStateStore::new(stores.profiles.clone(), signals.clone()));
    let recorder = Arc::new(GatewayRecorder::new());
    let gateways = ActionGateways {
        ha: recorder.clone(),
        zigbee2mqtt: recorder.clone(),
        zwavejs: recorder.clone(),
        notifications: Arc::new(NotificationOutbox::new()),
    };

    TestHarness {
        clock,
        manual_clock,
        stores,
        signals,
        alarm,
        gateways,
        recorder,
    }
}

pub fn insert_rule(
    harness: &TestHarness,
    name: &str,
    definition: JsonValue,
    cooldown_seconds: Option<i64>,
    enabled: bool,
) -> Rule {
    insert_rule_with_admin(harness, name, definition, cooldown_seconds, enabled, true)
}

pub fn insert_rule_with_admin(
    harness: &TestHarness,
    name: &str,
    definition: JsonValue,
    cooldown_seconds: Option<i64>,
    enabled: bool,
    created_by_admin: bool,
) -> Rule {
    let entity_ids = extract_entity_ids_from_definition(&definition);
    let rule = harness.stores.rules.insert(
        NewRule {
            name: name.to_string(),
            kind: RuleKind::Trigger,
            enabled,
            priority: 1,
            schema_version: 1,
            definition,
            cooldown_seconds,
            created_by: None,
            created_by_admin,
        },
        harness.now(),
    );
    harness.stores.rules.sync_entity_refs(rule.id, entity_ids);
    rule
}

pub fn admin_rule(harness: &TestHarness, definition: JsonValue) -> Rule {
    insert_rule_with_admin(harness, "test rule", definition, None, true, true)
}

pub fn non_admin_rule(harness: &TestHarness, definition: JsonValue) -> Rule {
    insert_rule_with_admin(harness, "test rule", definition, None, true, false)
}

/// Dispatcher with the worker pool turned off; tests drive it by calling
/// `flush_pending` and `dispatch_batch` directly.
pub fn drain_dispatcher(harness: &TestHarness) -> RuleDispatcher {
    RuleDispatcher::new(
        DispatcherConfig {
            debounce_ms: 50,
            batch_size_limit: 100,
            rate_limit_per_sec: 10,
            rate_limit_burst: 50,
            worker_concurrency: 0,
            queue_max_depth: 1000,
        },
        harness.clock.clone(),
        harness.stores.clone(),
        Arc::new(harness.engine()),
    )
}

pub fn test_config(data_root: PathBuf) -> CoreConfig {
    CoreConfig {
        system_config_path: data_root.join("system_config.json"),
        data_root,
        mqtt_host: None,
        mqtt_port: 1883,
        mqtt_username: None,
        mqtt_password: None,
        zigbee2mqtt_base_topic: "zigbee2mqtt".to_string(),
        ha_base_url: None,
        ha_token: None,
        ha_timeout_seconds: 10,
        zwavejs_ws_url: None,
        timer_tick_interval_seconds: 1,
        cleanup_interval_seconds: 3600,
    }
}

pub fn test_state() -> AppState {
    let harness = test_harness();
    state_from_harness(harness)
}

pub fn state_from_harness(harness: TestHarness) -> AppState {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let config = test_config(tempdir.keep());
    let system_config = Arc::new(SystemConfigStore::load(&config.system_config_path));
    let broadcaster = Arc::new(Broadcaster::new(harness.clock.clone()));
    let engine = Arc::new(harness.engine());
    let dispatcher = Arc::new(RuleDispatcher::new(
        DispatcherConfig {
            worker_concurrency: 1,
            ..DispatcherConfig::default()
        },
        harness.clock.clone(),
        harness.stores.clone(),
        engine.clone(),
    ));

    AppState {
        config,
        clock: harness.clock,
        stores: harness.stores,
        system_config,
        signals: harness.signals,
        alarm: harness.alarm,
        broadcaster,
        gateways: harness.gateways,
        engine,
        dispatcher,
    }
}
