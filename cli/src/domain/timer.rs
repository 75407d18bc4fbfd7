//! Self-destruct timer evaluation.

use chrono::{DateTime, Utc};
use leasekeeper_common::{SelfDestructTimer, WarningThreshold};

/// What a sweep should do for one timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    Expire,
    Warn(WarningThreshold),
    Idle,
}

/// Decide the next action for `timer` at `now`.
///
/// At most one warning is produced per call, earliest threshold first, so
/// the 10-minute warning always precedes the 5-minute one even when a
/// sweep lands below both thresholds at once.
#[must_use]
pub fn evaluate(timer: &SelfDestructTimer, now: DateTime<Utc>) -> TimerAction {
    let remaining = timer.remaining(now);
    if remaining <= chrono::Duration::zero() {
        return TimerAction::Expire;
    }
    WarningThreshold::ALL
        .into_iter()
        .find(|t| remaining <= chrono::Duration::minutes(t.minutes()) && !timer.has_warned(*t))
        .map_or(TimerAction::Idle, TimerAction::Warn)
}

/// Render a remaining duration as `1h 05m`, `4m 30s`, or `expired`.
#[must_use]
pub fn format_remaining(remaining: chrono::Duration) -> String {
    let secs = remaining.num_seconds();
    if secs <= 0 {
        return "expired".to_string();
    }
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m")
    } else {
        format!("{m}m {s:02}s")
    }
}
