use chrono::Duration;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Prunes historical rows past their configured retention windows:
/// camera detections (`events.retention_days`) and rule action logs
/// (`rule_logs.retention_days`).
pub struct RetentionCleanupService {
    state: AppState,
}

impl RetentionCleanupService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn start(self, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                self.state.config.cleanup_interval_seconds.max(60),
            ));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => self.run_once(),
                }
            }
        });
    }

    fn run_once(&self) {
        let now = self.state.clock.now();
        let detection_cutoff =
            now - Duration::days(self.state.system_config.events_retention_days());
        let log_cutoff = now - Duration::days(self.state.system_config.rule_logs_retention_days());

        let detections_removed = self
            .state
            .stores
            .detections
            .prune_observed_before(detection_cutoff);
        let logs_removed = self.state.stores.action_log.prune_fired_before(log_cutoff);
        if detections_removed > 0 || logs_removed > 0 {
            tracing::info!(detections_removed, logs_removed, "retention cleanup finished");
        }
    }
}
