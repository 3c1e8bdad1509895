use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::rules::extract::extract_entity_ids_from_definition;
use crate::store::RuleStore;

struct IndexInner {
    map: HashMap<String, HashSet<i64>>,
    version: Option<u64>,
    updated_at: Option<DateTime<Utc>>,
    next_version: u64,
}

/// entity_id -> set of enabled rule ids referencing it. The index is
/// versioned: readers either see a fully-built snapshot or rebuild it under
/// the index lock; `invalidate` clears the version so the next lookup
/// observes reference changes made before the invalidation.
pub struct EntityRuleIndex {
    inner: Mutex<IndexInner>,
}

impl EntityRuleIndex {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(IndexInner {
                map: HashMap::new(),
                version: None,
                updated_at: None,
                next_version: 1,
            }),
        }
    }

    /// Union of rule-id sets for the given entity ids, rebuilding lazily.
    pub fn lookup(
        &self,
        entity_ids: &HashSet<String>,
        rules: &RuleStore,
        now: DateTime<Utc>,
    ) -> HashSet<i64> {
        let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        if inner.version.is_none() {
            let mut map: HashMap<String, HashSet<i64>> = HashMap::new();
            for (rule_id, refs) in rules.enabled_refs_snapshot() {
                let refs = if refs.is_empty() {
                    // References may lag behind ingestion; fall back to the
                    // definition itself.
                    rules
                        .get(rule_id)
                        .map(|rule| extract_entity_ids_from_definition(&rule.definition))
                        .unwrap_or_default()
                } else {
                    refs
                };
                for entity_id in refs {
                    map.entry(entity_id).or_default().insert(rule_id);
                }
            }
            inner.map = map;
            inner.version = Some(inner.next_version);
            inner.next_version += 1;
            inner.updated_at = Some(now);
        }

        let mut out = HashSet::new();
        for entity_id in entity_ids {
            if let Some(rule_ids) = inner.map.get(entity_id) {
                out.extend(rule_ids.iter().copied());
            }
        }
        out
    }

    pub fn invalidate(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        inner.version = None;
        inner.updated_at = None;
    }

    pub fn version(&self) -> Option<u64> {
        self.inner
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .version
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.inner
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .updated_at
    }
}

impl Default for EntityRuleIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::rules::{NewRule, RuleKind};
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    fn rule_with_refs(store: &RuleStore, name: &str, refs: &[&str]) -> i64 {
        let rule = store.insert(
            NewRule {
                name: name.to_string(),
                kind: RuleKind::Trigger,
                enabled: true,
                priority: 1,
                schema_version: 1,
                definition: json!({}),
                cooldown_seconds: None,
                created_by: None,
                created_by_admin: true,
            },
            now(),
        );
        let refs: BTreeSet<String> = refs.iter().map(|r| r.to_string()).collect();
        store.sync_entity_refs(rule.id, refs);
        rule.id
    }

    #[test]
    fn lookup_returns_union_of_rule_ids() {
        let rules = RuleStore::new();
        let a = rule_with_refs(&rules, "a", &["sensor.x", "sensor.y"]);
        let b = rule_with_refs(&rules, "b", &["sensor.y"]);
        rule_with_refs(&rules, "c", &["sensor.z"]);

        let index = EntityRuleIndex::new();
        let wanted: HashSet<String> =
            ["sensor.x".to_string(), "sensor.y".to_string()].into_iter().collect();
        let hit = index.lookup(&wanted, &rules, now());
        assert_eq!(hit, [a, b].into_iter().collect());
    }

    #[test]
    fn invalidate_clears_version_and_observes_new_refs() {
        let rules = RuleStore::new();
        rule_with_refs(&rules, "a", &["sensor.x"]);

        let index = EntityRuleIndex::new();
        let wanted: HashSet<String> = ["sensor.new".to_string()].into_iter().collect();
        assert!(index.lookup(&wanted, &rules, now()).is_empty());
        assert!(index.version().is_some());

        let b = rule_with_refs(&rules, "b", &["sensor.new"]);
        index.invalidate();
        assert!(index.version().is_none());
        assert!(index.updated_at().is_none());

        let hit = index.lookup(&wanted, &rules, now());
        assert_eq!(hit, [b].into_iter().collect());
    }

    #[test]
    fn fallback_extracts_from_definition_when_refs_missing() {
        let rules = RuleStore::new();
        let rule = rules.insert(
            NewRule {
                name: "no-refs".to_string(),
                kind: RuleKind::Trigger,
                enabled: true,
                priority: 1,
                schema_version: 1,
                definition: json!({
                    "when": {"op": "entity_state", "entity_id": "binary_sensor.front_door", "equals": "on"},
                    "then": [],
                }),
                cooldown_seconds: None,
                created_by: None,
                created_by_admin: true,
            },
            now(),
        );

        let index = EntityRuleIndex::new();
        let wanted: HashSet<String> = ["binary_sensor.front_door".to_string()].into_iter().collect();
        let hit = index.lookup(&wanted, &rules, now());
        assert_eq!(hit, [rule.id].into_iter().collect());
    }

    #[test]
    fn invalidate_is_thread_safe_under_contention() {
        let index = Arc::new(EntityRuleIndex::new());
        let mut handles = Vec::new();
        for _ in 0..5 {
            let index = index.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    index.invalidate();
                }
            }));
        }
        for handle in handles {
            handle.join().expect("thread join");
        }
        assert!(index.version().is_none());
        assert!(index.updated_at().is_none());
    }
}
