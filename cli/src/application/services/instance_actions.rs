//! Operator power actions and on-demand status refresh.

use std::fmt;

use leasekeeper_common::{InstanceRecord, InstanceStatus};
use tracing::{info, warn};

use crate::application::context::OrchestratorContext;
use crate::application::ports::{Clock, CloudProvider, Notifier};
use crate::domain::error::{OrchestratorError, ProviderError};
use crate::domain::instance::MetadataPatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Start,
    Stop,
    Restart,
}

impl PowerAction {
    /// Status the record takes once the provider accepted the action.
    #[must_use]
    pub fn resulting_status(self) -> InstanceStatus {
        match self {
            Self::Start | Self::Restart => InstanceStatus::Running,
            Self::Stop => InstanceStatus::Stopped,
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        })
    }
}

/// Run a power action against a tracked instance.
///
/// Liveness is re-checked with the provider first. An instance the provider
/// no longer knows is a failure here and is marked destroyed locally.
///
/// # Errors
///
/// - `NotFound` when the id is untracked, destroyed, or gone from the provider
/// - `ProviderTransient` / `ProviderPermanent` when the provider rejects the call
pub async fn power(
    ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
    id: &str,
    action: PowerAction,
) -> Result<InstanceRecord, OrchestratorError> {
    let tracked = ctx
        .registry
        .get(id)
        .filter(InstanceRecord::is_active)
        .ok_or_else(|| OrchestratorError::NotFound(format!("instance {id}")))?;

    let live = match ctx.provider.get_instance(id).await {
        Ok(instance) => instance,
        Err(err) if err.proves_absence() => {
            warn!(instance_id = %id, %action, "instance gone before power action");
            let now = ctx.now();
            ctx.registry.write(|r| {
                r.mark_destroyed(id, now);
            });
            return Err(OrchestratorError::NotFound(format!("instance {id}")));
        }
        Err(err) => return Err(err.into()),
    };

    let result = match action {
        PowerAction::Start => ctx.provider.start_instance(id).await,
        PowerAction::Stop => ctx.provider.halt_instance(id).await,
        PowerAction::Restart => ctx.provider.reboot_instance(id).await,
    };
    result.map_err(|err| match err {
        ProviderError::NotFound => OrchestratorError::NotFound(format!("instance {id}")),
        other => other.into(),
    })?;

    let status = action.resulting_status();
    let now = ctx.now();
    let lifetime = ctx.settings.lifetime;
    let patch = MetadataPatch::from_provider(&live);
    let record = ctx.registry.write(|r| {
        r.set_status(id, status, &patch, now);
        if status == InstanceStatus::Running {
            // Never resets an existing timer.
            if let Err(err) = r.arm_timer(id, now, lifetime) {
                warn!(instance_id = %id, error = %err, "self-destruct timer could not be armed");
            }
        }
        r.get(id).cloned()
    });
    info!(instance_id = %id, %action, owner = %tracked.creator.requester_id, "power action accepted");
    record.ok_or_else(|| OrchestratorError::NotFound(format!("instance {id}")))
}

/// Refresh one record from the provider and return it.
///
/// Untracked instances the provider knows are adopted as recovered. A
/// running instance gets its timer here if nothing armed it yet.
///
/// # Errors
///
/// `NotFound` when neither the registry nor the provider knows the id.
pub async fn refresh_status(
    ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
    id: &str,
) -> Result<InstanceRecord, OrchestratorError> {
    if let Some(record) = ctx.registry.get(id).filter(|r| !r.is_active()) {
        return Ok(record);
    }
    match ctx.provider.get_instance(id).await {
        Ok(instance) => {
            let now = ctx.now();
            let lifetime = ctx.settings.lifetime;
            let polled = ctx.readiness.ids();
            let record = ctx.registry.write(|r| {
                if r.get(id).is_none() {
                    r.adopt(&instance, now);
                }
                // Records still owned by their provisioning pipeline keep `creating`.
                r.observe(&instance, &polled, now, lifetime);
                r.get(id).cloned()
            });
            record.ok_or_else(|| OrchestratorError::NotFound(format!("instance {id}")))
        }
        Err(err) if err.proves_absence() => {
            let now = ctx.now();
            ctx.registry
                .write(|r| r.mark_destroyed(id, now).cloned())
                .ok_or_else(|| OrchestratorError::NotFound(format!("instance {id}")))
        }
        Err(err) => ctx.registry.get(id).ok_or_else(|| err.into()),
    }
}
