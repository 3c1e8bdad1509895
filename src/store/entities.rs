use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use super::{read_guard, write_guard};

/// Last-known state of one integration entity. Created and mutated only by
/// the ingestion path; never destroyed by the core.
#[derive(Debug, Clone)]
pub struct Entity {
    pub entity_id: String,
    pub domain: String,
    pub name: String,
    pub source: String,
    pub last_state: String,
    pub last_changed: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub attributes: Option<JsonValue>,
}

impl Entity {
    pub fn as_json(&self) -> JsonValue {
        json!({
            "entity_id": self.entity_id,
            "domain": self.domain,
            "name": self.name,
            "source": self.source,
            "last_state": self.last_state,
            "last_changed": self.last_changed.to_rfc3339(),
            "last_seen": self.last_seen.to_rfc3339(),
            "attributes": self.attributes,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityUpsertOutcome {
    pub created: bool,
    pub state_changed: bool,
}

/// Read-mostly map of entity_id -> last state. Readers take a point-in-time
/// view per dispatch; writers never hold the lock across awaits.
pub struct EntityStore {
    inner: RwLock<HashMap<String, Entity>>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Normalizes and upserts one entity. Returns `None` for ids without a
    /// `domain.name` shape, which the ingestion paths skip silently.
    pub fn upsert(
        &self,
        entity_id: &str,
        state: &str,
        name: Option<&str>,
        source: &str,
        attributes: Option<JsonValue>,
        last_changed: DateTime<Utc>,
    ) -> Option<EntityUpsertOutcome> {
        let entity_id = entity_id.trim().to_lowercase();
        let (domain, _) = entity_id.split_once('.')?;
        if domain.is_empty() {
            return None;
        }
        let domain = domain.to_string();

        let mut inner = write_guard(&self.inner);
        match inner.get_mut(&entity_id) {
            Some(existing) => {
                let state_changed = existing.last_state != state;
                if state_changed {
                    existing.last_state = state.to_string();
                    existing.last_changed = last_changed;
                }
                if let Some(name) = name.map(str::trim).filter(|value| !value.is_empty()) {
                    existing.name = name.to_string();
                }
                if let Some(attributes) = attributes {
                    existing.attributes = Some(attributes);
                }
                existing.last_seen = last_changed;
                Some(EntityUpsertOutcome {
                    created: false,
                    state_changed,
                })
            }
            None => {
                let name = name
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .unwrap_or(&entity_id)
                    .to_string();
                inner.insert(
                    entity_id.clone(),
                    Entity {
                        entity_id,
                        domain,
                        name,
                        source: source.to_string(),
                        last_state: state.to_string(),
                        last_changed,
                        last_seen: last_changed,
                        attributes,
                    },
                );
                Some(EntityUpsertOutcome {
                    created: true,
                    state_changed: true,
                })
            }
        }
    }

    pub fn get(&self, entity_id: &str) -> Option<Entity> {
        read_guard(&self.inner).get(entity_id).cloned()
    }

    /// Targeted point-in-time read of only the requested entities.
    pub fn read_states(&self, entity_ids: &BTreeSet<String>) -> HashMap<String, String> {
        let inner = read_guard(&self.inner);
        entity_ids
            .iter()
            .filter_map(|entity_id| {
                inner
                    .get(entity_id)
                    .map(|entity| (entity.entity_id.clone(), entity.last_state.clone()))
            })
            .collect()
    }

    pub fn list(&self) -> Vec<Entity> {
        let mut out: Vec<Entity> = read_guard(&self.inner).values().cloned().collect();
        out.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        out
    }

    pub fn len(&self) -> usize {
        read_guard(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}
