use tokio::sync::broadcast;

use crate::alarm::AlarmState;

/// Named in-process event channels. Producers emit after their own state is
/// committed; subscribers react to the payload alone and never write back to
/// the producer synchronously, which keeps the signal graph acyclic.
#[derive(Debug, Clone)]
pub struct AlarmStateChanged {
    pub state_to: AlarmState,
}

#[derive(Debug, Clone)]
pub struct SettingsProfileChanged {
    pub profile_id: i64,
    pub reason: String,
}

#[derive(Clone)]
pub struct Signals {
    alarm_tx: broadcast::Sender<AlarmStateChanged>,
    settings_tx: broadcast::Sender<SettingsProfileChanged>,
}

impl Signals {
    pub fn new() -> Self {
        let (alarm_tx, _) = broadcast::channel(64);
        let (settings_tx, _) = broadcast::channel(64);
        Self {
            alarm_tx,
            settings_tx,
        }
    }

    pub fn subscribe_alarm_state(&self) -> broadcast::Receiver<AlarmStateChanged> {
        self.alarm_tx.subscribe()
    }

    pub fn subscribe_settings_profile(&self) -> broadcast::Receiver<SettingsProfileChanged> {
        self.settings_tx.subscribe()
    }

    /// Best-effort: no subscribers is not an error.
    pub fn emit_alarm_state_committed(&self, state_to: AlarmState) {
        let _ = self.alarm_tx.send(AlarmStateChanged { state_to });
    }

    pub fn emit_settings_profile_changed(&self, profile_id: i64, reason: &str) {
        let _ = self.settings_tx.send(SettingsProfileChanged {
            profile_id,
            reason: reason.to_string(),
        });
    }
}

impl Default for Signals {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_reach_subscribers() {
        let signals = Signals::new();
        let mut rx = signals.subscribe_alarm_state();
        signals.emit_alarm_state_committed(AlarmState::ArmedAway);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.state_to, AlarmState::ArmedAway);
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let signals = Signals::new();
        signals.emit_alarm_state_committed(AlarmState::Disarmed);
        signals.emit_settings_profile_changed(1, "activated");
    }
}
