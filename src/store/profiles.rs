use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{read_guard, write_guard};

/// Known settings keys and their defaults. Unknown keys read as null.
const SETTING_DEFAULTS: &[(&str, i64)] = &[
    ("delay_time", 30),
    ("arming_time", 60),
    ("trigger_time", 120),
];

/// A named bundle of alarm settings. Exactly one profile is active.
#[derive(Debug, Clone)]
pub struct SettingsProfile {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
    pub entries: HashMap<String, JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SettingsProfile {
    pub fn setting_i64(&self, key: &str) -> i64 {
        if let Some(value) = self.entries.get(key).and_then(JsonValue::as_i64) {
            return value;
        }
        SETTING_DEFAULTS
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, default)| *default)
            .unwrap_or(0)
    }

    pub fn setting_json(&self, key: &str) -> Option<&JsonValue> {
        self.entries.get(key)
    }

    pub fn as_json(&self) -> JsonValue {
        json!({
            "id": self.id,
            "name": self.name,
            "is_active": self.is_active,
            "entries": self.entries,
            "created_at": self.created_at.to_rfc3339(),
            "updated_at": self.updated_at.to_rfc3339(),
        })
    }
}

struct ProfileMap {
    next_id: i64,
    profiles: HashMap<i64, SettingsProfile>,
}

pub struct SettingsProfileStore {
    inner: RwLock<ProfileMap>,
}

impl SettingsProfileStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ProfileMap {
                next_id: 1,
                profiles: HashMap::new(),
            }),
        }
    }

    pub fn create(
        &self,
        name: &str,
        entries: HashMap<String, JsonValue>,
        is_active: bool,
        now: DateTime<Utc>,
    ) -> SettingsProfile {
        let mut inner = write_guard(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        if is_active {
            for profile in inner.profiles.values_mut() {
                profile.is_active = false;
            }
        }
        let profile = SettingsProfile {
            id,
            name: name.to_string(),
            is_active,
            entries,
            created_at: now,
            updated_at: now,
        };
        inner.profiles.insert(id, profile.clone());
        profile
    }

    /// Returns the active profile, creating a "Default" one when the store
    /// is empty.
    pub fn ensure_active(&self, now: DateTime<Utc>) -> SettingsProfile {
        if let Some(active) = self.active() {
            return active;
        }
        let mut inner = write_guard(&self.inner);
        if let Some(active) = inner.profiles.values().find(|p| p.is_active) {
            return active.clone();
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let profile = SettingsProfile {
            id,
            name: "Default".to_string(),
            is_active: true,
            entries: HashMap::new(),
            created_at: now,
            updated_at: now,
        };
        inner.profiles.insert(id, profile.clone());
        profile
    }

    pub fn active(&self) -> Option<SettingsProfile> {
        read_guard(&self.inner)
            .profiles
            .values()
            .find(|profile| profile.is_active)
            .cloned()
    }

    /// Activates a profile, deactivating every other. Idempotent: repeated
    /// activation leaves exactly one active profile.
    pub fn activate(&self, id: i64, now: DateTime<Utc>) -> Option<SettingsProfile> {
        let mut inner = write_guard(&self.inner);
        if !inner.profiles.contains_key(&id) {
            return None;
        }
        for (profile_id, profile) in inner.profiles.iter_mut() {
            let should_be_active = *profile_id == id;
            if profile.is_active != should_be_active {
                profile.is_active = should_be_active;
                profile.updated_at = now;
            }
        }
        inner.profiles.get(&id).cloned()
    }

    pub fn set_entries(
        &self,
        id: i64,
        entries: HashMap<String, JsonValue>,
        now: DateTime<Utc>,
    ) -> Option<SettingsProfile> {
        let mut inner = write_guard(&self.inner);
        let profile = inner.profiles.get_mut(&id)?;
        profile.entries = entries;
        profile.updated_at = now;
        Some(profile.clone())
    }

    pub fn active_count(&self) -> usize {
        read_guard(&self.inner)
            .profiles
            .values()
            .filter(|profile| profile.is_active)
            .count()
    }
}

impl Default for SettingsProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn ensure_active_bootstraps_default() {
        let store = SettingsProfileStore::new();
        let profile = store.ensure_active(now());
        assert_eq!(profile.name, "Default");
        assert!(profile.is_active);
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn repeated_activation_leaves_one_active_profile() {
        let store = SettingsProfileStore::new();
        let first = store.create("Home", HashMap::new(), true, now());
        let second = store.create("Vacation", HashMap::new(), false, now());

        store.activate(second.id, now());
        store.activate(second.id, now());
        assert_eq!(store.active_count(), 1);
        assert_eq!(store.active().map(|p| p.id), Some(second.id));

        store.activate(first.id, now());
        assert_eq!(store.active_count(), 1);
        assert_eq!(store.active().map(|p| p.id), Some(first.id));
    }

    #[test]
    fn settings_fall_back_to_registered_defaults() {
        let store = SettingsProfileStore::new();
        let mut entries = HashMap::new();
        entries.insert("delay_time".to_string(), serde_json::json!(15));
        let profile = store.create("P", entries, true, now());

        assert_eq!(profile.setting_i64("delay_time"), 15);
        assert_eq!(profile.setting_i64("arming_time"), 60);
        assert_eq!(profile.setting_i64("trigger_time"), 120);
        assert_eq!(profile.setting_i64("unknown_key"), 0);
    }
}
