//! Destruction confirmation: keep deleting until the provider stops listing the instance.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::application::context::OrchestratorContext;
use crate::application::ports::{Clock, CloudProvider, Notifier};
use crate::domain::error::ProviderError;

/// Cadence of the confirmation loop.
pub const DESTROY_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Give up after this long and tell the requester to check manually.
pub const DESTROY_POLL_CEILING: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyOutcome {
    /// The provider no longer knows the instance.
    Confirmed,
    TimedOut,
    /// A permanent provider failure (bad credentials, say). Not retried.
    Rejected(ProviderError),
}

/// Poll until `id` is gone, re-issuing the delete while it still exists.
/// A confirmed instance is marked destroyed in the registry.
///
/// Only provider answers decide the outcome. A 400 answer to the delete
/// means the instance is busy and is retried on the next tick; 404 and
/// 403 prove absence. Any other non-transient failure ends the loop at
/// once with `Rejected`.
pub async fn confirm_destruction(
    ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
    id: &str,
) -> DestroyOutcome {
    let deadline = Instant::now() + DESTROY_POLL_CEILING;
    loop {
        match ctx.provider.get_instance(id).await {
            Err(err) if err.proves_absence() => return confirmed(ctx, id),
            Err(err) if !err.is_transient() => return rejected(id, err),
            Err(err) => debug!(instance_id = %id, error = %err, "destruction check failed"),
            Ok(instance) => {
                debug!(instance_id = %id, status = %instance.status, "instance still present");
                match ctx.provider.delete_instance(id).await {
                    Ok(()) => {}
                    Err(err) if err.proves_absence() => return confirmed(ctx, id),
                    Err(ProviderError::Busy(msg)) => {
                        debug!(instance_id = %id, reason = %msg, "instance busy; delete retried next tick");
                    }
                    Err(err) if !err.is_transient() => return rejected(id, err),
                    Err(err) => debug!(instance_id = %id, error = %err, "delete request failed"),
                }
            }
        }

        if Instant::now() + DESTROY_POLL_INTERVAL > deadline {
            warn!(instance_id = %id, "destruction not confirmed before the ceiling");
            return DestroyOutcome::TimedOut;
        }
        tokio::time::sleep(DESTROY_POLL_INTERVAL).await;
    }
}

fn confirmed(
    ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
    id: &str,
) -> DestroyOutcome {
    info!(instance_id = %id, "destruction confirmed");
    let now = ctx.now();
    ctx.registry.write(|r| {
        r.mark_destroyed(id, now);
    });
    DestroyOutcome::Confirmed
}

fn rejected(id: &str, err: ProviderError) -> DestroyOutcome {
    error!(instance_id = %id, error = %err, "provider refused destruction; not retrying");
    DestroyOutcome::Rejected(err)
}
