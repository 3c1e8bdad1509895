use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::sync::{Arc, Mutex};

use crate::error::{AppError, AppResult};
use crate::signals::Signals;
use crate::store::profiles::{SettingsProfile, SettingsProfileStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    Disarmed,
    Arming,
    ArmedHome,
    ArmedAway,
    ArmedNight,
    ArmedVacation,
    Pending,
    Triggered,
}

impl AlarmState {
    pub fn as_str(self) -> &'static str {
        match self {
            AlarmState::Disarmed => "disarmed",
            AlarmState::Arming => "arming",
            AlarmState::ArmedHome => "armed_home",
            AlarmState::ArmedAway => "armed_away",
            AlarmState::ArmedNight => "armed_night",
            AlarmState::ArmedVacation => "armed_vacation",
            AlarmState::Pending => "pending",
            AlarmState::Triggered => "triggered",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "disarmed" => Some(AlarmState::Disarmed),
            "arming" => Some(AlarmState::Arming),
            "armed_home" => Some(AlarmState::ArmedHome),
            "armed_away" => Some(AlarmState::ArmedAway),
            "armed_night" => Some(AlarmState::ArmedNight),
            "armed_vacation" => Some(AlarmState::ArmedVacation),
            "pending" => Some(AlarmState::Pending),
            "triggered" => Some(AlarmState::Triggered),
            _ => None,
        }
    }

    pub fn is_armed(self) -> bool {
        matches!(
            self,
            AlarmState::ArmedHome
                | AlarmState::ArmedAway
                | AlarmState::ArmedNight
                | AlarmState::ArmedVacation
        )
    }
}

/// Resolved delay/arming/trigger durations from the active settings profile,
/// captured on each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingSnapshot {
    pub delay_time: i64,
    pub arming_time: i64,
    pub trigger_time: i64,
}

impl TimingSnapshot {
    pub fn from_profile(profile: &SettingsProfile) -> Self {
        Self {
            delay_time: profile.setting_i64("delay_time").max(0),
            arming_time: profile.setting_i64("arming_time").max(0),
            trigger_time: profile.setting_i64("trigger_time").max(0),
        }
    }

    pub fn as_json(&self) -> JsonValue {
        json!({
            "delay_time": self.delay_time,
            "arming_time": self.arming_time,
            "trigger_time": self.trigger_time,
        })
    }
}

/// The single committed alarm-state row. Transitions mutate it in place
/// under the store mutex.
#[derive(Debug, Clone)]
pub struct AlarmStateSnapshot {
    pub current_state: AlarmState,
    pub previous_state: Option<AlarmState>,
    pub target_armed_state: Option<AlarmState>,
    pub profile_id: Option<i64>,
    pub entered_at: DateTime<Utc>,
    pub exit_at: Option<DateTime<Utc>>,
    pub last_transition_reason: String,
    pub last_transition_by: Option<String>,
    pub timing: TimingSnapshot,
}

impl AlarmStateSnapshot {
    pub fn as_json(&self) -> JsonValue {
        json!({
            "current_state": self.current_state.as_str(),
            "previous_state": self.previous_state.map(AlarmState::as_str),
            "target_armed_state": self.target_armed_state.map(AlarmState::as_str),
            "profile_id": self.profile_id,
            "entered_at": self.entered_at.to_rfc3339(),
            "exit_at": self.exit_at.map(|v| v.to_rfc3339()),
            "last_transition_reason": self.last_transition_reason,
            "last_transition_by": self.last_transition_by,
            "timing_snapshot": self.timing.as_json(),
        })
    }
}

/// Alarm state machine summary: one snapshot row, transitions serialized by
/// an exclusive lock, `alarm_state_change_committed` emitted after the lock
/// is released (the on-commit hook analog).
pub struct AlarmStateStore {
    inner: Mutex<Option<AlarmStateSnapshot>>,
    profiles: Arc<SettingsProfileStore>,
    signals: Signals,
}

impl AlarmStateStore {
    pub fn new(profiles: Arc<SettingsProfileStore>, signals: Signals) -> Self {
        Self {
            inner: Mutex::new(None),
            profiles,
            signals,
        }
    }

    fn resolve_timing(&self, now: DateTime<Utc>) -> (Option<i64>, TimingSnapshot) {
        let profile = self.profiles.ensure_active(now);
        let timing = TimingSnapshot::from_profile(&profile);
        (Some(profile.id), timing)
    }

    fn bootstrap(&self, now: DateTime<Utc>) -> AlarmStateSnapshot {
        let (profile_id, timing) = self.resolve_timing(now);
        AlarmStateSnapshot {
            current_state: AlarmState::Disarmed,
            previous_state: None,
            target_armed_state: None,
            profile_id,
            entered_at: now,
            exit_at: None,
            last_transition_reason: "bootstrap".to_string(),
            last_transition_by: None,
            timing,
        }
    }

    pub fn current_snapshot(&self, process_timers: bool, now: DateTime<Utc>) -> AlarmStateSnapshot {
        if process_timers {
            self.process_due_timers(now);
        }
        let mut guard = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        guard.get_or_insert_with(|| self.bootstrap(now)).clone()
    }

    pub fn current_state(&self, now: DateTime<Utc>) -> AlarmState {
        self.current_snapshot(false, now).current_state
    }

    pub fn arm(
        &self,
        target_state: AlarmState,
        user: Option<&str>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> AppResult<AlarmStateSnapshot> {
        if !target_state.is_armed() {
            return Err(AppError::validation("Invalid target_state."));
        }

        let committed;
        let snapshot = {
            let mut guard = self.inner.lock().unwrap_or_else(|err| err.into_inner());
            let snapshot = guard.get_or_insert_with(|| self.bootstrap(now));
            let (profile_id, timing) = self.resolve_timing(now);
            snapshot.profile_id = profile_id;
            snapshot.timing = timing;

            if timing.arming_time > 0 {
                apply_transition(
                    snapshot,
                    AlarmState::Arming,
                    now,
                    Some(now + Duration::seconds(timing.arming_time)),
                    reason,
                    user,
                );
                snapshot.target_armed_state = Some(target_state);
            } else {
                apply_transition(snapshot, target_state, now, None, reason, user);
                snapshot.target_armed_state = Some(target_state);
            }
            committed = snapshot.current_state;
            snapshot.clone()
        };
        self.signals.emit_alarm_state_committed(committed);
        Ok(snapshot)
    }

    pub fn disarm(
        &self,
        user: Option<&str>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> AlarmStateSnapshot {
        let snapshot = {
            let mut guard = self.inner.lock().unwrap_or_else(|err| err.into_inner());
            let snapshot = guard.get_or_insert_with(|| self.bootstrap(now));
            let (profile_id, timing) = self.resolve_timing(now);
            snapshot.profile_id = profile_id;
            snapshot.timing = timing;
            apply_transition(snapshot, AlarmState::Disarmed, now, None, reason, user);
            snapshot.target_armed_state = None;
            snapshot.clone()
        };
        self.signals.emit_alarm_state_committed(AlarmState::Disarmed);
        snapshot
    }

    pub fn trigger(
        &self,
        user: Option<&str>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> AlarmStateSnapshot {
        let snapshot = {
            let mut guard = self.inner.lock().unwrap_or_else(|err| err.into_inner());
            let snapshot = guard.get_or_insert_with(|| self.bootstrap(now));
            let (profile_id, timing) = self.resolve_timing(now);
            snapshot.profile_id = profile_id;
            snapshot.timing = timing;
            let exit_at = if timing.trigger_time > 0 {
                Some(now + Duration::seconds(timing.trigger_time))
            } else {
                None
            };
            apply_transition(snapshot, AlarmState::Triggered, now, exit_at, reason, user);
            snapshot.clone()
        };
        self.signals.emit_alarm_state_committed(AlarmState::Triggered);
        snapshot
    }

    /// Valid only while arming; anything else is a state conflict.
    pub fn cancel_arming(
        &self,
        user: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<AlarmStateSnapshot> {
        let snapshot = {
            let mut guard = self.inner.lock().unwrap_or_else(|err| err.into_inner());
            let snapshot = guard.get_or_insert_with(|| self.bootstrap(now));
            if snapshot.current_state != AlarmState::Arming {
                return Err(AppError::conflict("Not arming."));
            }
            apply_transition(snapshot, AlarmState::Disarmed, now, None, "cancel_arming", user);
            snapshot.target_armed_state = None;
            snapshot.clone()
        };
        self.signals.emit_alarm_state_committed(AlarmState::Disarmed);
        Ok(snapshot)
    }

    /// Advances due timers: arming completes into the target state, pending
    /// escalates to triggered, triggered resolves back to the previous armed
    /// state (or disarmed). Returns the new snapshot when a transition
    /// happened.
    pub fn process_due_timers(&self, now: DateTime<Utc>) -> Option<AlarmStateSnapshot> {
        let (committed, snapshot) = {
            let mut guard = self.inner.lock().unwrap_or_else(|err| err.into_inner());
            let snapshot = guard.as_mut()?;
            let exit_at = snapshot.exit_at?;
            if exit_at > now {
                return None;
            }

            match snapshot.current_state {
                AlarmState::Arming => {
                    let target = snapshot
                        .target_armed_state
                        .unwrap_or(AlarmState::Disarmed);
                    apply_transition(snapshot, target, now, None, "arming_complete", None);
                }
                AlarmState::Pending => {
                    let exit_at = if snapshot.timing.trigger_time > 0 {
                        Some(now + Duration::seconds(snapshot.timing.trigger_time))
                    } else {
                        None
                    };
                    apply_transition(
                        snapshot,
                        AlarmState::Triggered,
                        now,
                        exit_at,
                        "entry_delay_expired",
                        None,
                    );
                }
                AlarmState::Triggered => {
                    let next = snapshot
                        .previous_state
                        .filter(|state| state.is_armed())
                        .unwrap_or(AlarmState::Disarmed);
                    apply_transition(snapshot, next, now, None, "trigger_time_expired", None);
                }
                _ => {
                    snapshot.exit_at = None;
                    return None;
                }
            }
            (snapshot.current_state, snapshot.clone())
        };
        self.signals.emit_alarm_state_committed(committed);
        Some(snapshot)
    }
}

fn apply_transition(
    snapshot: &mut AlarmStateSnapshot,
    state_to: AlarmState,
    now: DateTime<Utc>,
    exit_at: Option<DateTime<Utc>>,
    reason: &str,
    user: Option<&str>,
) {
    snapshot.previous_state = Some(snapshot.current_state);
    snapshot.current_state = state_to;
    snapshot.entered_at = now;
    snapshot.exit_at = exit_at;
    snapshot.last_transition_reason = reason.to_string();
    snapshot.last_transition_by = user.map(str::to_string);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    fn store_with_timing(arming: i64, trigger: i64) -> AlarmStateStore {
        let profiles = Arc::new(SettingsProfileStore::new());
        let mut entries = HashMap::new();
        entries.insert("arming_time".to_string(), json!(arming));
        entries.insert("trigger_time".to_string(), json!(trigger));
        entries.insert("delay_time".to_string(), json!(30));
        profiles.create("Default", entries, true, now());
        AlarmStateStore::new(profiles, Signals::new())
    }

    #[test]
    fn bootstraps_to_disarmed() {
        let store = store_with_timing(30, 120);
        let snapshot = store.current_snapshot(false, now());
        assert_eq!(snapshot.current_state, AlarmState::Disarmed);
        assert_eq!(snapshot.last_transition_reason, "bootstrap");
    }

    #[test]
    fn arm_enters_arming_with_exit_timer() {
        let store = store_with_timing(30, 120);
        let snapshot = store
            .arm(AlarmState::ArmedAway, Some("alice"), "test", now())
            .unwrap();
        assert_eq!(snapshot.current_state, AlarmState::Arming);
        assert_eq!(snapshot.target_armed_state, Some(AlarmState::ArmedAway));
        assert_eq!(snapshot.exit_at, Some(now() + Duration::seconds(30)));
    }

    #[test]
    fn arm_with_zero_arming_time_is_immediate() {
        let store = store_with_timing(0, 120);
        let snapshot = store
            .arm(AlarmState::ArmedHome, None, "test", now())
            .unwrap();
        assert_eq!(snapshot.current_state, AlarmState::ArmedHome);
        assert!(snapshot.exit_at.is_none());
    }

    #[test]
    fn arm_rejects_invalid_target() {
        let store = store_with_timing(30, 120);
        let err = store.arm(AlarmState::Disarmed, None, "test", now()).unwrap_err();
        assert_eq!(err.kind.as_str(), "validation");
    }

    #[test]
    fn cancel_arming_succeeds_then_conflicts() {
        let store = store_with_timing(30, 120);
        store.arm(AlarmState::ArmedAway, None, "test", now()).unwrap();

        let snapshot = store.cancel_arming(None, now()).unwrap();
        assert_eq!(snapshot.current_state, AlarmState::Disarmed);

        let err = store.cancel_arming(None, now()).unwrap_err();
        assert_eq!(err.kind.as_str(), "conflict");
    }

    #[test]
    fn arming_timer_completes_into_target_state() {
        let store = store_with_timing(30, 120);
        store.arm(AlarmState::ArmedNight, None, "test", now()).unwrap();

        assert!(store.process_due_timers(now() + Duration::seconds(29)).is_none());
        let snapshot = store
            .process_due_timers(now() + Duration::seconds(30))
            .unwrap();
        assert_eq!(snapshot.current_state, AlarmState::ArmedNight);
        assert!(snapshot.exit_at.is_none());
    }

    #[test]
    fn trigger_sets_exit_and_resolves_to_previous_armed_state() {
        let store = store_with_timing(0, 120);
        store.arm(AlarmState::ArmedAway, None, "test", now()).unwrap();
        let snapshot = store.trigger(None, "rule:1", now());
        assert_eq!(snapshot.current_state, AlarmState::Triggered);
        assert_eq!(snapshot.exit_at, Some(now() + Duration::seconds(120)));

        let snapshot = store
            .process_due_timers(now() + Duration::seconds(120))
            .unwrap();
        assert_eq!(snapshot.current_state, AlarmState::ArmedAway);
    }

    #[test]
    fn disarm_clears_target() {
        let store = store_with_timing(30, 120);
        store.arm(AlarmState::ArmedAway, None, "test", now()).unwrap();
        let snapshot = store.disarm(Some("bob"), "keypad", now());
        assert_eq!(snapshot.current_state, AlarmState::Disarmed);
        assert!(snapshot.target_armed_state.is_none());
        assert_eq!(snapshot.last_transition_by.as_deref(), Some("bob"));
    }
}
