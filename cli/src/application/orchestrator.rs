//! Orchestrator facade: the operations a front-end calls.
//!
//! Everything runs on one `LocalSet`. Long-running work (readiness polling,
//! destruction confirmation, renders) is handed to a `TaskTracker` so
//! callers and tests can await it instead of losing track of it.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use leasekeeper_common::{Creator, InstanceRecord, InstanceStatus};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::application::context::OrchestratorContext;
use crate::application::ports::{Clock, CloudProvider, Notifier, PanelPublisher, PanelStateStore};
use crate::application::services::destruction_poller::{self, DestroyOutcome};
use crate::application::services::instance_actions::{self, PowerAction};
use crate::application::services::render_serializer::{RenderSerializer, RenderTrigger};
use crate::application::services::status_poller::{self, ReadinessOutcome};
use crate::application::services::{provisioning, registry_sync, timer_engine};
use crate::domain::config::validate_firewall_group_id;
use crate::domain::error::OrchestratorError;
use crate::domain::instance::{ProvisionRequest, validate_label};
use crate::domain::notice::Notice;

/// Synchronous answer to a destroy request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyAck {
    Started,
    /// A destruction poller already owns this id.
    AlreadyInProgress,
    AlreadyDestroyed,
}

struct Shared<P, N, C, B, S> {
    ctx: OrchestratorContext<P, N, C>,
    panel: RenderSerializer<B, S>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
    destroying: RefCell<HashSet<String>>,
}

pub struct Orchestrator<P, N, C, B, S> {
    inner: Rc<Shared<P, N, C, B, S>>,
}

impl<P, N, C, B, S> Clone for Orchestrator<P, N, C, B, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

/// Removes an id from the in-flight destroy set when the poller finishes.
struct DestroyGuard<'a> {
    set: &'a RefCell<HashSet<String>>,
    id: String,
}

impl Drop for DestroyGuard<'_> {
    fn drop(&mut self) {
        self.set.borrow_mut().remove(&self.id);
    }
}

impl<P, N, C, B, S> Orchestrator<P, N, C, B, S>
where
    P: CloudProvider + 'static,
    N: Notifier + 'static,
    C: Clock + 'static,
    B: PanelPublisher + 'static,
    S: PanelStateStore + 'static,
{
    #[must_use]
    pub fn new(ctx: OrchestratorContext<P, N, C>, panel: RenderSerializer<B, S>) -> Self {
        Self {
            inner: Rc::new(Shared {
                ctx,
                panel,
                tasks: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                destroying: RefCell::new(HashSet::new()),
            }),
        }
    }

    #[must_use]
    pub fn context(&self) -> &OrchestratorContext<P, N, C> {
        &self.inner.ctx
    }

    #[must_use]
    pub fn panel(&self) -> &RenderSerializer<B, S> {
        &self.inner.panel
    }

    /// Restore panel state, discover existing instances, and render once.
    pub async fn startup(&self) {
        if let Err(err) = self.inner.panel.restore().await {
            warn!(error = %err, "panel state could not be restored; a new panel will be created");
        }
        match registry_sync::sync(&self.inner.ctx).await {
            Ok(report) => info!(
                discovered = report.discovered.len(),
                vanished = report.vanished.len(),
                "registry synchronised with provider"
            ),
            Err(err) => warn!(error = %err, "initial registry sync failed"),
        }
        self.inner.panel.request_render(&self.inner.ctx, RenderTrigger::Startup).await;
    }

    /// Start provisioning. Validation failures return immediately; the
    /// pipeline and readiness polling continue on the returned task.
    ///
    /// # Errors
    ///
    /// `Configuration` for a missing/malformed firewall group id and
    /// `Validation` for a bad instance name.
    pub fn provision(
        &self,
        requester: Creator,
        request: ProvisionRequest,
    ) -> Result<JoinHandle<Result<InstanceRecord, OrchestratorError>>, OrchestratorError> {
        validate_firewall_group_id(&self.inner.ctx.settings.firewall_group_id)?;
        validate_label(&request.name)?;
        let this = self.clone();
        Ok(self
            .inner
            .tasks
            .spawn_local(async move { this.run_provision(requester, request).await }))
    }

    async fn run_provision(
        &self,
        requester: Creator,
        request: ProvisionRequest,
    ) -> Result<InstanceRecord, OrchestratorError> {
        let ctx = &self.inner.ctx;
        let handle = match provisioning::provision(ctx, &requester, &request).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(name = %request.name, error = %err, "provisioning failed");
                ctx.notify(
                    &requester,
                    Notice::ProvisionFailed {
                        name: request.name.clone(),
                        reason: err.to_string(),
                    },
                )
                .await;
                self.request_render(RenderTrigger::InstanceChanged);
                return Err(err);
            }
        };
        self.request_render(RenderTrigger::InstanceChanged);

        let outcome = status_poller::await_ready(ctx, &handle).await;
        self.request_render(RenderTrigger::InstanceChanged);
        match outcome {
            ReadinessOutcome::Ready(record) => Ok(record),
            ReadinessOutcome::TimedOut => Err(OrchestratorError::ProviderTransient(format!(
                "instance {} was not ready within {} minutes",
                handle.id,
                status_poller::READINESS_CEILING.as_secs() / 60
            ))),
            ReadinessOutcome::Failed(reason) => {
                ctx.notify(
                    &requester,
                    Notice::ProvisionFailed {
                        name: handle.name.clone(),
                        reason: reason.clone(),
                    },
                )
                .await;
                Err(OrchestratorError::ProviderPermanent(reason))
            }
            ReadinessOutcome::Vanished => Err(OrchestratorError::NotFound(format!("instance {}", handle.id))),
            ReadinessOutcome::Rejected(err) => {
                ctx.notify(
                    &requester,
                    Notice::ProvisionFailed {
                        name: handle.name.clone(),
                        reason: err.to_string(),
                    },
                )
                .await;
                Err(err.into())
            }
        }
    }

    /// Refresh one instance from the provider.
    ///
    /// # Errors
    ///
    /// `NotFound` when neither the registry nor the provider knows the id.
    pub async fn request_status(&self, id: &str) -> Result<InstanceRecord, OrchestratorError> {
        instance_actions::refresh_status(&self.inner.ctx, id).await
    }

    /// Start confirmed destruction unless one is already running for `id`.
    ///
    /// # Errors
    ///
    /// `NotFound` when the id is not tracked.
    pub fn request_destroy(&self, id: &str) -> Result<DestroyAck, OrchestratorError> {
        let record = self
            .inner
            .ctx
            .registry
            .get(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("instance {id}")))?;
        if record.status == InstanceStatus::Destroyed {
            return Ok(DestroyAck::AlreadyDestroyed);
        }
        if !self.inner.destroying.borrow_mut().insert(id.to_string()) {
            debug!(instance_id = %id, "destroy already in progress");
            return Ok(DestroyAck::AlreadyInProgress);
        }
        info!(instance_id = %id, "destroy requested");
        let this = self.clone();
        let id = id.to_string();
        self.inner.tasks.spawn_local(async move { this.run_destroy(id, record).await });
        Ok(DestroyAck::Started)
    }

    async fn run_destroy(&self, id: String, record: InstanceRecord) {
        let _guard = DestroyGuard {
            set: &self.inner.destroying,
            id: id.clone(),
        };
        let ctx = &self.inner.ctx;
        let name = record.display_name().to_string();
        let notice = match destruction_poller::confirm_destruction(ctx, &id).await {
            DestroyOutcome::Confirmed => Notice::Destroyed { id, name },
            DestroyOutcome::TimedOut => Notice::DestroyTimedOut { id, name },
            DestroyOutcome::Rejected(err) => Notice::DestroyFailed {
                id,
                name,
                reason: err.to_string(),
            },
        };
        ctx.notify(&record.creator, notice).await;
        self.request_render(RenderTrigger::InstanceChanged);
    }

    /// Push the self-destruct deadline back by one extension increment.
    ///
    /// # Errors
    ///
    /// `NotFound` for untracked ids, `NoActiveTimer` when no timer is armed.
    pub fn extend_timer(&self, id: &str) -> Result<DateTime<Utc>, OrchestratorError> {
        let expires_at = timer_engine::extend(&self.inner.ctx, id)?;
        self.request_render(RenderTrigger::InstanceChanged);
        Ok(expires_at)
    }

    /// Start, stop, or restart a tracked instance.
    ///
    /// # Errors
    ///
    /// `OperationInProgress` while the instance is being destroyed, plus
    /// everything [`instance_actions::power`] returns.
    pub async fn power(&self, id: &str, action: PowerAction) -> Result<InstanceRecord, OrchestratorError> {
        if self.inner.destroying.borrow().contains(id) {
            return Err(OrchestratorError::OperationInProgress(id.to_string()));
        }
        let result = instance_actions::power(&self.inner.ctx, id, action).await;
        self.request_render(RenderTrigger::InstanceChanged);
        result
    }

    /// Ask for a render on a tracked task. Never blocks the caller.
    pub fn request_render(&self, trigger: RenderTrigger) {
        let this = self.clone();
        self.inner.tasks.spawn_local(async move {
            this.inner.panel.request_render(&this.inner.ctx, trigger).await;
        });
    }

    /// Start the timer sweep and the scheduled render loop.
    ///
    /// Both stop when [`Orchestrator::shutdown`] is called.
    #[must_use]
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let sweeper = self.clone();
        let renderer = self.clone();
        vec![
            tokio::task::spawn_local(async move { sweeper.sweep_loop().await }),
            tokio::task::spawn_local(async move { renderer.render_loop().await }),
        ]
    }

    async fn sweep_loop(&self) {
        let mut ticker = tokio::time::interval(timer_engine::SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = self.inner.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let report = timer_engine::sweep(&self.inner.ctx).await;
            if report.changed() {
                self.request_render(RenderTrigger::InstanceChanged);
            }
        }
        debug!("timer sweep stopped");
    }

    async fn render_loop(&self) {
        let period = self.inner.ctx.settings.render_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = self.inner.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.inner.panel.request_render(&self.inner.ctx, RenderTrigger::Scheduled).await;
        }
        debug!("scheduled render stopped");
    }

    /// Whether a destruction poller currently owns `id`.
    #[must_use]
    pub fn is_destroying(&self, id: &str) -> bool {
        self.inner.destroying.borrow().contains(id)
    }

    /// Stop the background loops. Tracked tasks keep running to completion.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Wait until every tracked task (provisioning, destroys, renders) finished.
    pub async fn wait_idle(&self) {
        // Tasks spawned while waiting are waited for too.
        while !self.inner.tasks.is_empty() {
            self.inner.tasks.close();
            self.inner.tasks.wait().await;
            self.inner.tasks.reopen();
        }
    }
}
