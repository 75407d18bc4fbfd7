//! Self-destruct timers: arming, extension, and the periodic sweep.

use std::time::Duration;

use chrono::{DateTime, Utc};
use leasekeeper_common::{InstanceRecord, WarningThreshold};
use tracing::{debug, error, info, warn};

use crate::application::context::OrchestratorContext;
use crate::application::ports::{Clock, CloudProvider, Notifier};
use crate::domain::error::OrchestratorError;
use crate::domain::notice::Notice;
use crate::domain::timer::{TimerAction, evaluate};

/// Cadence of the sweep loop.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// What one sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub warned: Vec<(String, WarningThreshold)>,
    pub expired: Vec<String>,
    /// Expired instances whose deletion failed; the next sweep retries them.
    pub retry: Vec<String>,
    pub pruned: Vec<String>,
}

impl SweepReport {
    /// Whether the registry changed in a way the panel should show.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.warned.is_empty() || !self.expired.is_empty() || !self.pruned.is_empty()
    }
}

/// Arm the default-lifetime timer. Idempotent.
///
/// # Errors
///
/// Returns `NotFound` when the instance is not tracked.
pub fn arm(
    ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
    id: &str,
) -> Result<bool, OrchestratorError> {
    let now = ctx.now();
    let lifetime = ctx.settings.lifetime;
    ctx.registry.write(|r| r.arm_timer(id, now, lifetime))
}

/// Push the expiry back by one extension increment.
///
/// # Errors
///
/// Returns `NotFound` for untracked ids and `NoActiveTimer` when no timer is armed.
pub fn extend(
    ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
    id: &str,
) -> Result<DateTime<Utc>, OrchestratorError> {
    let now = ctx.now();
    let increment = ctx.settings.extension;
    let expires_at = ctx.registry.write(|r| r.extend_timer(id, increment, now))?;
    info!(instance_id = %id, %expires_at, "self-destruct timer extended");
    Ok(expires_at)
}

/// Evaluate every armed timer once.
///
/// Each record is re-read right before acting on it, so an extension that
/// lands while an earlier instance is being deleted is honoured.
pub async fn sweep(ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>) -> SweepReport {
    let mut report = SweepReport::default();
    let armed: Vec<String> = ctx.registry.read(|r| {
        r.records()
            .filter(|rec| rec.is_active() && rec.self_destruct.is_some())
            .map(|rec| rec.id.clone())
            .collect()
    });

    for id in armed {
        let now = ctx.now();
        let Some(record) = ctx.registry.get(&id) else {
            continue;
        };
        let Some(timer) = record.self_destruct.as_ref() else {
            continue;
        };
        match evaluate(timer, now) {
            TimerAction::Idle => {}
            TimerAction::Warn(threshold) => {
                if warn_once(ctx, &record, threshold).await {
                    report.warned.push((id, threshold));
                }
            }
            TimerAction::Expire => match expire(ctx, &record).await {
                Ok(true) => report.expired.push(id),
                Ok(false) => {}
                Err(err) => {
                    error!(instance_id = %id, error = %err, "expired instance could not be deleted; retrying next sweep");
                    report.retry.push(id);
                }
            },
        }
    }

    let now = ctx.now();
    let retention = ctx.settings.retention;
    report.pruned = ctx.registry.write(|r| r.prune_destroyed(now, retention));
    if !report.pruned.is_empty() {
        debug!(count = report.pruned.len(), "pruned destroyed records");
    }
    report
}

/// Record the warning first, then notify, so a warning is never sent twice.
async fn warn_once(
    ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
    record: &InstanceRecord,
    threshold: WarningThreshold,
) -> bool {
    if !ctx.registry.write(|r| r.record_warning(&record.id, threshold)) {
        return false;
    }
    let Some(timer) = record.self_destruct.as_ref() else {
        return false;
    };
    let now = ctx.now();
    let minutes_left = (timer.remaining(now).num_seconds() + 59) / 60;
    info!(instance_id = %record.id, threshold = threshold.label(), "expiry warning");
    ctx.notify(
        &record.creator,
        Notice::ExpiryWarning {
            id: record.id.clone(),
            name: record.display_name().to_string(),
            minutes_left,
            expires_at: timer.expires_at,
        },
    )
    .await;
    true
}

/// Delete an expired instance after confirming it still exists.
///
/// Returns `Ok(false)` when the timer was extended in the meantime.
async fn expire(
    ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
    record: &InstanceRecord,
) -> Result<bool, OrchestratorError> {
    let id = record.id.as_str();
    match ctx.provider.get_instance(id).await {
        Err(err) if err.proves_absence() => {
            info!(instance_id = %id, "expired instance already gone");
            let now = ctx.now();
            ctx.registry.write(|r| {
                r.mark_destroyed(id, now);
            });
            return Ok(true);
        }
        Err(err) => return Err(err.into()),
        Ok(_) => {}
    }

    // The timer may have been extended while the existence check was in flight.
    let now = ctx.now();
    let still_expired = ctx
        .registry
        .get(id)
        .and_then(|r| r.self_destruct)
        .is_some_and(|t| evaluate(&t, now) == TimerAction::Expire);
    if !still_expired {
        warn!(instance_id = %id, "timer changed before deletion; skipping");
        return Ok(false);
    }

    match ctx.provider.delete_instance(id).await {
        Ok(()) => {}
        Err(err) if err.proves_absence() => {}
        Err(err) => return Err(err.into()),
    }
    let now = ctx.now();
    ctx.registry.write(|r| {
        r.mark_destroyed(id, now);
    });
    info!(instance_id = %id, "expired instance destroyed");
    ctx.notify(
        &record.creator,
        Notice::Expired {
            id: id.to_string(),
            name: record.display_name().to_string(),
        },
    )
    .await;
    Ok(true)
}
