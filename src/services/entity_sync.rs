use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::broadcast::Broadcaster;
use crate::dispatcher::RuleDispatcher;
use crate::state::AppState;
use crate::store::Stores;

pub const SOURCE: &str = "home_assistant";

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub imported: usize,
    pub updated: usize,
    pub changed: Vec<JsonValue>,
    pub timestamp: DateTime<Utc>,
}

impl SyncOutcome {
    pub fn as_json(&self) -> JsonValue {
        json!({
            "imported": self.imported,
            "updated": self.updated,
            "changed": self.changed.len(),
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }
}

/// Normalizes and upserts a batch of incoming entity states. Invalid items
/// (no object, no `domain.name` id) are skipped. `imported` counts created
/// entities, `updated` counts upserts of existing ones; an `entity_sync`
/// broadcast and a dispatcher submit happen only when at least one entity
/// actually changed state.
pub fn sync_entities(
    stores: &Stores,
    broadcaster: Option<&Broadcaster>,
    dispatcher: Option<&RuleDispatcher>,
    items: &[JsonValue],
    source: &str,
    now: DateTime<Utc>,
) -> SyncOutcome {
    let mut imported = 0;
    let mut updated = 0;
    let mut changed: Vec<JsonValue> = Vec::new();
    let mut changed_ids: Vec<String> = Vec::new();

    for item in items {
        let Some(obj) = item.as_object() else {
            continue;
        };
        let entity_id = obj
            .get("entity_id")
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .unwrap_or("");
        if entity_id.is_empty() || !entity_id.contains('.') {
            continue;
        }
        let state = obj.get("state").and_then(JsonValue::as_str).unwrap_or("");
        let name = obj.get("name").and_then(JsonValue::as_str);
        let attributes = obj.get("attributes").filter(|v| v.is_object()).cloned();

        let Some(outcome) = stores
            .entities
            .upsert(entity_id, state, name, source, attributes, now)
        else {
            continue;
        };
        if outcome.created {
            imported += 1;
        } else {
            updated += 1;
        }
        if outcome.state_changed {
            changed.push(json!({"entity_id": entity_id, "state": state}));
            changed_ids.push(entity_id.to_string());
        }
    }

    if !changed.is_empty() {
        if let Some(broadcaster) = broadcaster {
            broadcaster.broadcast_entity_sync(&changed);
        }
        if let Some(dispatcher) = dispatcher {
            dispatcher.submit(source, changed_ids, Some(now));
        }
    }

    SyncOutcome {
        imported,
        updated,
        changed,
        timestamp: now,
    }
}

/// Periodic pull of entity states from the Home Assistant gateway.
pub struct EntitySyncService {
    state: AppState,
}

impl EntitySyncService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn start(self, cancel: CancellationToken) {
        tokio::spawn(async move {
            let interval_seconds = self
                .state
                .system_config
                .entity_sync_interval_seconds()
                .max(10) as u64;
            let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(err) = self.run_once().await {
                            tracing::warn!(error = %err, "entity sync tick failed");
                        }
                    }
                }
            }
        });
    }

    async fn run_once(&self) -> anyhow::Result<()> {
        let states = match self.state.gateways.ha.get_states().await {
            Ok(states) => states,
            Err(err) => {
                tracing::debug!(error = %err, "entity sync skipped");
                return Ok(());
            }
        };
        let items: Vec<JsonValue> = states
            .into_iter()
            .map(|state| {
                let name = state
                    .get("attributes")
                    .and_then(|attrs| attrs.get("friendly_name"))
                    .and_then(JsonValue::as_str);
                json!({
                    "entity_id": state.get("entity_id"),
                    "state": state.get("state"),
                    "name": name,
                    "attributes": state.get("attributes"),
                })
            })
            .collect();

        let outcome = sync_entities(
            &self.state.stores,
            Some(&self.state.broadcaster),
            Some(&self.state.dispatcher),
            &items,
            SOURCE,
            self.state.clock.now(),
        );
        tracing::debug!(
            imported = outcome.imported,
            updated = outcome.updated,
            changed = outcome.changed.len(),
            "entity sync finished"
        );
        Ok(())
    }
}
