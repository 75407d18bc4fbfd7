//! Provisioning pipeline: create an instance and prove it is firewalled.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.
//! Either returns a fully hardened instance or leaves nothing running.

use std::time::Duration;

use leasekeeper_common::{Creator, InstanceStatus};
use tracing::{debug, error, info, warn};

use crate::application::context::OrchestratorContext;
use crate::application::ports::{Clock, CloudProvider, Notifier};
use crate::application::services::destruction_poller::{self, DestroyOutcome};
use crate::domain::config::validate_firewall_group_id;
use crate::domain::error::{OrchestratorError, ProviderError};
use crate::domain::instance::{
    InstanceHandle, InstanceSpec, MetadataPatch, ProviderInstance, ProvisionRequest,
    firewall_group_matches, validate_label,
};

/// Attach-and-verify attempts before the instance is torn down.
pub const ATTACH_ATTEMPTS: u32 = 10;
/// Wait between requesting the attachment and re-reading the instance.
pub const ATTACH_SETTLE: Duration = Duration::from_secs(3);
const ATTACH_BACKOFF_MIN_SECS: u64 = 5;
const ATTACH_BACKOFF_MAX_SECS: u64 = 10;

/// Create, firewall, and harden an instance for `requester`.
///
/// # Errors
///
/// - `Configuration` when the firewall group id is missing or malformed
/// - `Validation` for a bad name or region, `NotFound` for an unknown image
/// - `SecurityAttachmentFailed` after the instance was torn down
/// - `ProviderTransient` / `ProviderPermanent` for other provider rejections
pub async fn provision(
    ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
    requester: &Creator,
    request: &ProvisionRequest,
) -> Result<InstanceHandle, OrchestratorError> {
    let group = ctx.settings.firewall_group_id.as_str();
    validate_firewall_group_id(group)?;
    validate_label(&request.name)?;
    check_catalog(ctx, request).await?;

    let spec = InstanceSpec {
        snapshot_id: &request.image_ref,
        label: &request.name,
        region: &request.region,
        plan: &ctx.settings.plan,
    };
    info!(
        name = %request.name,
        image = %request.image_ref,
        region = %request.region,
        requester = %requester.requester_id,
        "creating instance"
    );
    let created = create(ctx, &spec).await?;
    let id = created.id.clone();

    let patch = MetadataPatch {
        name: Some(request.name.clone()),
        region: Some(request.region.clone()),
        plan: Some(ctx.settings.plan.clone()),
        ..MetadataPatch::from_provider(&created)
    };
    let now = ctx.now();
    ctx.registry.write(|r| {
        r.upsert(&id, requester.clone(), InstanceStatus::Creating, &patch, now);
    });
    // Sync must not promote the record before the firewall is verified.
    let _owned = ctx.readiness.watch(&id);

    if let Err(err) = secure(ctx, &id, group).await {
        teardown(ctx, &id).await;
        return Err(err);
    }

    if ctx.settings.ddos_protection
        && let Err(err) = ctx.provider.enable_ddos_protection(&id).await
    {
        warn!(instance_id = %id, error = %err, "DDoS protection could not be enabled");
    }

    Ok(InstanceHandle {
        id,
        name: request.name.clone(),
        region: request.region.clone(),
    })
}

/// Fail fast on unknown snapshots and regions before anything billable exists.
async fn check_catalog(
    ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
    request: &ProvisionRequest,
) -> Result<(), OrchestratorError> {
    let snapshots = ctx.provider.list_snapshots().await?;
    if !snapshots.iter().any(|s| s.id == request.image_ref) {
        return Err(OrchestratorError::NotFound(format!(
            "snapshot '{}'",
            request.image_ref
        )));
    }
    let regions = ctx.provider.list_regions().await?;
    if !regions.iter().any(|r| r.id == request.region) {
        return Err(OrchestratorError::Validation(format!(
            "unknown region '{}'",
            request.region
        )));
    }
    Ok(())
}

/// Create the instance. An empty success response is re-checked directly
/// against the instance list instead of being retried blindly, since a
/// retry could create a second billable instance.
async fn create(
    ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
    spec: &InstanceSpec<'_>,
) -> Result<ProviderInstance, OrchestratorError> {
    match ctx.provider.create_instance(spec).await {
        Ok(instance) if !instance.id.is_empty() => Ok(instance),
        Ok(_) | Err(ProviderError::Malformed(_)) => {
            warn!(label = spec.label, "create returned no instance id; checking instance list");
            recheck_created(ctx, spec).await
        }
        Err(err) => Err(err.into()),
    }
}

async fn recheck_created(
    ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
    spec: &InstanceSpec<'_>,
) -> Result<ProviderInstance, OrchestratorError> {
    let instances = ctx.provider.list_instances().await?;
    let mut candidates: Vec<ProviderInstance> = instances
        .into_iter()
        .filter(|i| i.label == spec.label && i.region == spec.region)
        .filter(|i| ctx.registry.get(&i.id).is_none())
        .collect();
    candidates.sort_by_key(|i| i.date_created);
    match candidates.pop() {
        Some(instance) => {
            info!(instance_id = %instance.id, "adopting instance found after empty create response");
            Ok(instance)
        }
        None => Err(OrchestratorError::ProviderTransient(
            "create returned an empty response and no matching instance exists".to_string(),
        )),
    }
}

/// Attach the firewall group and verify it by re-reading the instance.
///
/// Only a matching re-read counts; the attach call succeeding proves nothing.
async fn secure(
    ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
    id: &str,
    group: &str,
) -> Result<(), OrchestratorError> {
    for attempt in 1..=ATTACH_ATTEMPTS {
        if let Err(err) = ctx.provider.attach_firewall_group(id, group).await {
            debug!(instance_id = %id, attempt, error = %err, "attach request failed");
        }
        tokio::time::sleep(ATTACH_SETTLE).await;

        match ctx.provider.get_instance(id).await {
            Ok(instance) if firewall_group_matches(&instance, group) => {
                info!(instance_id = %id, attempt, "firewall group verified");
                return Ok(());
            }
            Ok(instance) => debug!(
                instance_id = %id,
                attempt,
                reported = %instance.firewall_group_id,
                "firewall group not attached yet"
            ),
            Err(err) => debug!(instance_id = %id, attempt, error = %err, "verification read failed"),
        }

        if attempt < ATTACH_ATTEMPTS {
            tokio::time::sleep(attach_backoff(attempt)).await;
        }
    }
    error!(instance_id = %id, attempts = ATTACH_ATTEMPTS, "firewall group never verified");
    Err(OrchestratorError::SecurityAttachmentFailed {
        instance_id: id.to_string(),
        attempts: ATTACH_ATTEMPTS,
    })
}

/// Backoff between failed attempts: 5s growing by a second per attempt, capped at 10s.
#[must_use]
pub fn attach_backoff(attempt: u32) -> Duration {
    let secs = ATTACH_BACKOFF_MIN_SECS + u64::from(attempt.saturating_sub(1));
    Duration::from_secs(secs.min(ATTACH_BACKOFF_MAX_SECS))
}

/// Delete an instance whose firewall could not be verified.
///
/// One delete is issued. If the provider refuses it for a reason other
/// than absence, the bounded destruction poller takes over.
async fn teardown(
    ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
    id: &str,
) {
    warn!(instance_id = %id, "tearing down unprotected instance");
    match ctx.provider.delete_instance(id).await {
        Ok(()) => {}
        Err(err) if err.proves_absence() => {}
        Err(err) => {
            error!(instance_id = %id, error = %err, "teardown delete rejected; polling for removal");
            if destruction_poller::confirm_destruction(ctx, id).await != DestroyOutcome::Confirmed {
                error!(instance_id = %id, "unprotected instance could not be confirmed destroyed");
            }
            return;
        }
    }
    let now = ctx.now();
    ctx.registry.write(|r| {
        r.mark_destroyed(id, now);
    });
}
