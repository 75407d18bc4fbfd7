//! Readiness polling for freshly created instances.
//!
//! Observes only. The poller never starts, stops, or reboots anything:
//! an instance that is active but powered off is still restoring its image.

use std::time::Duration;

use leasekeeper_common::{InstanceRecord, InstanceStatus};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::application::context::OrchestratorContext;
use crate::application::ports::{Clock, CloudProvider, Notifier};
use crate::domain::error::ProviderError;
use crate::domain::instance::{InstanceHandle, MetadataPatch, Readiness, readiness};
use crate::domain::notice::Notice;

/// Cadence of readiness checks.
pub const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(45);
/// Stop waiting after this long. The instance is left in place.
pub const READINESS_CEILING: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq)]
pub enum ReadinessOutcome {
    Ready(InstanceRecord),
    TimedOut,
    Failed(String),
    /// The provider stopped knowing the instance while we waited.
    Vanished,
    /// A permanent provider failure ended polling early.
    Rejected(ProviderError),
}

/// Poll until the instance is ready, fails, vanishes, or the ceiling passes.
///
/// On success the record turns `running`, its timer is armed, and exactly
/// one ready notice goes to the requester. Progress notices are sent only
/// when the observed phase changes.
pub async fn await_ready(
    ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
    handle: &InstanceHandle,
) -> ReadinessOutcome {
    let id = handle.id.as_str();
    let _owned = ctx.readiness.watch(id);
    let deadline = Instant::now() + READINESS_CEILING;
    let mut last_phase: Option<&'static str> = None;

    loop {
        if ctx
            .registry
            .get(id)
            .is_some_and(|r| r.status == InstanceStatus::Destroyed)
        {
            debug!(instance_id = %id, "record destroyed while waiting; polling stopped");
            return ReadinessOutcome::Vanished;
        }
        match ctx.provider.get_instance(id).await {
            Ok(instance) => {
                let now = ctx.now();
                let patch = MetadataPatch::from_provider(&instance);
                ctx.registry.write(|r| {
                    r.patch(id, &patch, now);
                });

                let state = readiness(&instance);
                match state {
                    Readiness::Ready => return mark_ready(ctx, handle, &patch).await,
                    Readiness::Failed(reason) => {
                        warn!(instance_id = %id, reason = %reason, "instance failed during creation");
                        return ReadinessOutcome::Failed(reason);
                    }
                    Readiness::Creating | Readiness::Restoring => {
                        let phase = state.phase_name();
                        if last_phase != Some(phase) {
                            last_phase = Some(phase);
                            debug!(instance_id = %id, phase, "readiness phase changed");
                            if let Some(creator) = ctx.registry.get(id).map(|r| r.creator) {
                                ctx.notify(
                                    &creator,
                                    Notice::Progress {
                                        name: handle.name.clone(),
                                        phase,
                                    },
                                )
                                .await;
                            }
                        }
                    }
                }
            }
            Err(ProviderError::NotFound) => return mark_vanished(ctx, handle).await,
            Err(err) if !err.is_transient() && !err.proves_absence() => {
                warn!(instance_id = %id, error = %err, "provider refused readiness check; polling stopped");
                return ReadinessOutcome::Rejected(err);
            }
            Err(err) => debug!(instance_id = %id, error = %err, "readiness check failed; retrying"),
        }

        if Instant::now() + READINESS_POLL_INTERVAL > deadline {
            return timed_out(ctx, handle).await;
        }
        tokio::time::sleep(READINESS_POLL_INTERVAL).await;
    }
}

async fn mark_ready(
    ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
    handle: &InstanceHandle,
    patch: &MetadataPatch,
) -> ReadinessOutcome {
    let id = handle.id.as_str();
    let now = ctx.now();
    let lifetime = ctx.settings.lifetime;
    let record = ctx.registry.write(|r| {
        let current = r.get(id).map(|rec| rec.status)?;
        if current == InstanceStatus::Destroyed {
            return r.get(id).cloned();
        }
        r.set_status(id, InstanceStatus::Running, patch, now);
        // Arming twice is a no-op.
        if let Err(err) = r.arm_timer(id, now, lifetime) {
            warn!(instance_id = %id, error = %err, "self-destruct timer could not be armed");
        }
        r.get(id).cloned()
    });
    let Some(record) = record else {
        return ReadinessOutcome::Vanished;
    };
    if record.status == InstanceStatus::Destroyed {
        return ReadinessOutcome::Vanished;
    }

    info!(instance_id = %id, ip = record.ip.as_deref().unwrap_or("-"), "instance ready");
    ctx.notify(
        &record.creator,
        Notice::Ready {
            id: record.id.clone(),
            name: handle.name.clone(),
            ip: record.ip.clone().unwrap_or_default(),
            region: record.region.clone().unwrap_or_else(|| handle.region.clone()),
            expires_at: record.self_destruct.as_ref().map(|t| t.expires_at),
        },
    )
    .await;
    ReadinessOutcome::Ready(record)
}

async fn mark_vanished(
    ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
    handle: &InstanceHandle,
) -> ReadinessOutcome {
    let id = handle.id.as_str();
    let now = ctx.now();
    let previous = ctx.registry.get(id);
    ctx.registry.write(|r| {
        r.mark_destroyed(id, now);
    });
    match previous {
        Some(record) if record.status != InstanceStatus::Destroyed => {
            warn!(instance_id = %id, "instance disappeared before becoming ready");
            ctx.notify(
                &record.creator,
                Notice::Destroyed {
                    id: id.to_string(),
                    name: handle.name.clone(),
                },
            )
            .await;
        }
        _ => debug!(instance_id = %id, "instance already destroyed"),
    }
    ReadinessOutcome::Vanished
}

async fn timed_out(
    ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
    handle: &InstanceHandle,
) -> ReadinessOutcome {
    let waited_minutes = READINESS_CEILING.as_secs() / 60;
    warn!(instance_id = %handle.id, waited_minutes, "instance not ready before the ceiling");
    if let Some(record) = ctx.registry.get(&handle.id) {
        ctx.notify(
            &record.creator,
            Notice::ReadinessTimedOut {
                id: handle.id.clone(),
                name: handle.name.clone(),
                waited_minutes,
            },
        )
        .await;
    }
    ReadinessOutcome::TimedOut
}
