use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Advances due alarm timers (arming completion, entry delay, trigger
/// resolution) on a short interval.
pub struct AlarmTimerService {
    state: AppState,
}

impl AlarmTimerService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn start(self, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                self.state.config.timer_tick_interval_seconds.max(1),
            ));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let now = self.state.clock.now();
                        if let Some(snapshot) = self.state.alarm.process_due_timers(now) {
                            tracing::info!(
                                state = snapshot.current_state.as_str(),
                                reason = %snapshot.last_transition_reason,
                                "alarm timer advanced"
                            );
                        }
                    }
                }
            }
        });
    }
}
