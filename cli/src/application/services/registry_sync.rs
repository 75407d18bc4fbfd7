//! Registry discovery: converge the registry with the provider's instance list.

use tracing::{debug, info, warn};

use crate::application::context::OrchestratorContext;
use crate::application::ports::{Clock, CloudProvider, Notifier};
use crate::domain::error::OrchestratorError;
use crate::domain::instance::ProviderInstance;
use crate::domain::registry::ReconcileReport;

/// Fetch the instance list and reconcile against it.
///
/// # Errors
///
/// Propagates the provider error when the list cannot be fetched; the
/// registry is left untouched in that case.
pub async fn sync(
    ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
) -> Result<ReconcileReport, OrchestratorError> {
    let instances = ctx.provider.list_instances().await?;
    Ok(reconcile_with(ctx, &instances).await)
}

/// Reconcile against an instance list the caller already fetched.
///
/// Tracked instances missing from the list are looked up one by one and
/// only marked destroyed when the provider proves they are gone.
pub async fn reconcile_with(
    ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
    instances: &[ProviderInstance],
) -> ReconcileReport {
    let now = ctx.now();
    let lifetime = ctx.settings.lifetime;
    let polled = ctx.readiness.ids();
    let mut report = ctx.registry.write(|r| r.reconcile(instances, &polled, now, lifetime));
    for id in &report.discovered {
        info!(instance_id = %id, "recovered untracked instance");
    }

    for id in &report.missing {
        match ctx.provider.get_instance(id).await {
            Err(err) if err.proves_absence() => {
                let now = ctx.now();
                ctx.registry.write(|r| {
                    r.mark_destroyed(id, now);
                });
                info!(instance_id = %id, "tracked instance confirmed gone; marked destroyed");
                report.vanished.push(id.clone());
            }
            Ok(instance) => {
                debug!(instance_id = %id, "instance missing from listing but still present");
                let now = ctx.now();
                let polled = ctx.readiness.ids();
                let changed = ctx.registry.write(|r| r.observe(&instance, &polled, now, lifetime));
                if changed {
                    report.updated.push(id.clone());
                }
            }
            Err(err) => warn!(instance_id = %id, error = %err, "missing instance could not be checked"),
        }
    }

    if !report.updated.is_empty() {
        debug!(count = report.updated.len(), "instance statuses updated from provider");
    }
    report
}
