use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use super::{read_guard, write_guard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    #[default]
    Trigger,
    Arm,
    Disarm,
}

impl RuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleKind::Trigger => "trigger",
            RuleKind::Arm => "arm",
            RuleKind::Disarm => "disarm",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "trigger" => Some(RuleKind::Trigger),
            "arm" => Some(RuleKind::Arm),
            "disarm" => Some(RuleKind::Disarm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub kind: RuleKind,
    pub enabled: bool,
    pub priority: i64,
    pub schema_version: i64,
    pub definition: JsonValue,
    pub cooldown_seconds: Option<i64>,
    pub created_by: Option<String>,
    pub created_by_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    pub fn as_json(&self, entity_ids: &BTreeSet<String>) -> JsonValue {
        json!({
            "id": self.id,
            "name": self.name,
            "kind": self.kind.as_str(),
            "enabled": self.enabled,
            "priority": self.priority,
            "schema_version": self.schema_version,
            "definition": self.definition,
            "cooldown_seconds": self.cooldown_seconds,
            "created_by": self.created_by,
            "created_at": self.created_at.to_rfc3339(),
            "updated_at": self.updated_at.to_rfc3339(),
            "entity_ids": entity_ids.iter().collect::<Vec<_>>(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewRule {
    pub name: String,
    pub kind: RuleKind,
    pub enabled: bool,
    pub priority: i64,
    pub schema_version: i64,
    pub definition: JsonValue,
    pub cooldown_seconds: Option<i64>,
    pub created_by: Option<String>,
    pub created_by_admin: bool,
}

struct RuleMap {
    next_id: i64,
    rules: HashMap<i64, Rule>,
    entity_refs: HashMap<i64, BTreeSet<String>>,
}

/// Enabled rules with their definitions plus the rule<->entity reference
/// table extracted from `entity_state` nodes.
pub struct RuleStore {
    inner: RwLock<RuleMap>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RuleMap {
                next_id: 1,
                rules: HashMap::new(),
                entity_refs: HashMap::new(),
            }),
        }
    }

    pub fn insert(&self, new: NewRule, now: DateTime<Utc>) -> Rule {
        let mut inner = write_guard(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        let rule = Rule {
            id,
            name: new.name,
            kind: new.kind,
            enabled: new.enabled,
            priority: new.priority,
            schema_version: new.schema_version,
            definition: new.definition,
            cooldown_seconds: new.cooldown_seconds,
            created_by: new.created_by,
            created_by_admin: new.created_by_admin,
            created_at: now,
            updated_at: now,
        };
        inner.rules.insert(id, rule.clone());
        rule
    }

    pub fn update<F>(&self, id: i64, now: DateTime<Utc>, apply: F) -> Option<Rule>
    where
        F: FnOnce(&mut Rule),
    {
        let mut inner = write_guard(&self.inner);
        let rule = inner.rules.get_mut(&id)?;
        apply(rule);
        rule.updated_at = now;
        Some(rule.clone())
    }

    pub fn delete(&self, id: i64) -> bool {
        let mut inner = write_guard(&self.inner);
        inner.entity_refs.remove(&id);
        inner.rules.remove(&id).is_some()
    }

    pub fn get(&self, id: i64) -> Option<Rule> {
        read_guard(&self.inner).rules.get(&id).cloned()
    }

    pub fn enabled_rules(&self) -> Vec<Rule> {
        let mut out: Vec<Rule> = read_guard(&self.inner)
            .rules
            .values()
            .filter(|rule| rule.enabled)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        out
    }

    pub fn list(&self, kind: Option<RuleKind>, enabled: Option<bool>) -> Vec<Rule> {
        let mut out: Vec<Rule> = read_guard(&self.inner)
            .rules
            .values()
            .filter(|rule| kind.map_or(true, |k| rule.kind == k))
            .filter(|rule| enabled.map_or(true, |e| rule.enabled == e))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        out
    }

    /// Replaces the entity reference set for a rule.
    pub fn sync_entity_refs(&self, rule_id: i64, entity_ids: BTreeSet<String>) {
        let mut inner = write_guard(&self.inner);
        if inner.rules.contains_key(&rule_id) {
            inner.entity_refs.insert(rule_id, entity_ids);
        }
    }

    pub fn entity_refs(&self, rule_id: i64) -> BTreeSet<String> {
        read_guard(&self.inner)
            .entity_refs
            .get(&rule_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of (rule_id, refs) for enabled rules, used by the
    /// entity->rule index rebuild.
    pub fn enabled_refs_snapshot(&self) -> Vec<(i64, BTreeSet<String>)> {
        let inner = read_guard(&self.inner);
        inner
            .rules
            .values()
            .filter(|rule| rule.enabled)
            .map(|rule| {
                (
                    rule.id,
                    inner.entity_refs.get(&rule.id).cloned().unwrap_or_default(),
                )
            })
            .collect()
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}
