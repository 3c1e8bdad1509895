use chrono::{DateTime, Duration, Utc};

use crate::store::runtime::RuleRuntimeState;

/// Strictly increasing per-failure backoff, capped at the last entry.
pub const BACKOFF_SCHEDULE_SECONDS: [i64; 5] = [5, 15, 60, 300, 1800];

/// Consecutive firing failures before a rule is suspended.
pub const CIRCUIT_BREAKER_THRESHOLD: u32 = 5;

/// Suspended rules become eligible again after this window.
pub const AUTO_RECOVERY_SECONDS: i64 = 3600;

pub fn get_backoff_seconds(consecutive_failures: u32) -> i64 {
    if consecutive_failures == 0 {
        return 0;
    }
    let index = (consecutive_failures as usize - 1).min(BACKOFF_SCHEDULE_SECONDS.len() - 1);
    BACKOFF_SCHEDULE_SECONDS[index]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleGate {
    Allowed,
    AutoRecovery,
    Suspended,
    Backoff,
}

impl RuleGate {
    pub fn reason(self) -> &'static str {
        match self {
            RuleGate::Allowed => "allowed",
            RuleGate::AutoRecovery => "auto_recovery",
            RuleGate::Suspended => "suspended",
            RuleGate::Backoff => "backoff",
        }
    }

    pub fn is_allowed(self) -> bool {
        matches!(self, RuleGate::Allowed | RuleGate::AutoRecovery)
    }
}

/// Whether a rule may fire right now. Suspended rules become allowed again
/// (as `auto_recovery`) once `next_allowed_at` has passed; non-suspended
/// rules wait out their backoff window.
pub fn is_rule_allowed(runtime: &RuleRuntimeState, now: DateTime<Utc>) -> RuleGate {
    if runtime.error_suspended {
        match runtime.next_allowed_at {
            Some(next_allowed_at) if now < next_allowed_at => RuleGate::Suspended,
            _ => RuleGate::AutoRecovery,
        }
    } else {
        match runtime.next_allowed_at {
            Some(next_allowed_at) if now < next_allowed_at => RuleGate::Backoff,
            _ => RuleGate::Allowed,
        }
    }
}

/// Records one firing failure: bumps the counter, applies the backoff
/// schedule, and trips the circuit breaker at the threshold.
pub fn record_failure(runtime: &mut RuleRuntimeState, now: DateTime<Utc>, error: &str) {
    runtime.consecutive_failures = runtime.consecutive_failures.saturating_add(1);
    runtime.last_failure_at = Some(now);
    runtime.last_error = Some(error.to_string());
    if runtime.consecutive_failures >= CIRCUIT_BREAKER_THRESHOLD {
        runtime.error_suspended = true;
        runtime.next_allowed_at = Some(now + Duration::seconds(AUTO_RECOVERY_SECONDS));
    } else {
        runtime.next_allowed_at =
            Some(now + Duration::seconds(get_backoff_seconds(runtime.consecutive_failures)));
    }
}

/// A successful firing clears failure state, ending any suspension.
pub fn record_success(runtime: &mut RuleRuntimeState) {
    runtime.consecutive_failures = 0;
    runtime.last_error = None;
    runtime.next_allowed_at = None;
    runtime.error_suspended = false;
}
