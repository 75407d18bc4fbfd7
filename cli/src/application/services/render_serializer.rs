//! Render serializer: single-flight, coalescing regeneration of the summary panel.
//!
//! At most one render runs at a time. Requests that arrive while a render
//! is running collapse into a single follow-up render.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use leasekeeper_common::PanelState;
use tracing::{debug, info, warn};

use crate::application::context::OrchestratorContext;
use crate::application::ports::{Clock, CloudProvider, Notifier, PanelPublisher, PanelStateStore};
use crate::application::services::registry_sync;
use crate::domain::panel::{build_panel, render_text};

/// Pause before the coalesced follow-up render.
pub const FOLLOW_UP_DELAY: Duration = Duration::from_secs(2);

/// Why a render was requested. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTrigger {
    Startup,
    Scheduled,
    InstanceChanged,
    Manual,
    FollowUp,
}

pub struct RenderSerializer<B, S> {
    publisher: B,
    store: S,
    state: RefCell<PanelState>,
    in_progress: Cell<bool>,
    pending: Cell<bool>,
    completed: Cell<u64>,
}

/// Clears the in-progress flag however the render loop exits.
struct InProgress<'a>(&'a Cell<bool>);

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<B: PanelPublisher, S: PanelStateStore> RenderSerializer<B, S> {
    #[must_use]
    pub fn new(publisher: B, store: S) -> Self {
        Self {
            publisher,
            store,
            state: RefCell::new(PanelState::default()),
            in_progress: Cell::new(false),
            pending: Cell::new(false),
            completed: Cell::new(0),
        }
    }

    /// Load the persisted panel location so renders keep updating the same artifact.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file exists but cannot be read.
    pub async fn restore(&self) -> Result<()> {
        if let Some(state) = self.store.load_async().await? {
            debug!(location = ?state.location, "restored panel state");
            *self.state.borrow_mut() = state;
        }
        Ok(())
    }

    #[must_use]
    pub fn publisher(&self) -> &B {
        &self.publisher
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn panel_state(&self) -> PanelState {
        self.state.borrow().clone()
    }

    /// Number of renders that ran to completion (successful or not).
    #[must_use]
    pub fn completed_renders(&self) -> u64 {
        self.completed.get()
    }

    #[must_use]
    pub fn is_rendering(&self) -> bool {
        self.in_progress.get()
    }

    /// Render now, or mark a follow-up if a render is already running.
    ///
    /// Returns once this call's render (and any follow-up it owes) is done,
    /// or immediately when the request was coalesced.
    pub async fn request_render(
        &self,
        ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>,
        trigger: RenderTrigger,
    ) {
        if self.in_progress.get() {
            self.pending.set(true);
            debug!(?trigger, "render in progress; request coalesced");
            return;
        }
        self.in_progress.set(true);
        let _guard = InProgress(&self.in_progress);

        let mut trigger = trigger;
        loop {
            if let Err(err) = self.render_once(ctx).await {
                warn!(?trigger, error = %err, "render failed");
            }
            self.completed.set(self.completed.get() + 1);

            if !self.pending.get() {
                break;
            }
            // Requests landing during the delay fold into this follow-up.
            tokio::time::sleep(FOLLOW_UP_DELAY).await;
            self.pending.set(false);
            trigger = RenderTrigger::FollowUp;
        }
    }

    async fn render_once(&self, ctx: &OrchestratorContext<impl CloudProvider, impl Notifier, impl Clock>) -> Result<()> {
        match ctx.provider.list_instances().await {
            Ok(instances) => {
                registry_sync::reconcile_with(ctx, &instances).await;
            }
            Err(err) => warn!(error = %err, "instance list unavailable; rendering from registry"),
        }

        let monthly_costs: HashMap<String, f64> = match ctx.provider.list_plans().await {
            Ok(plans) => plans.into_iter().map(|p| (p.id, p.monthly_cost)).collect(),
            Err(err) => {
                warn!(error = %err, "plan prices unavailable; costs shown as zero");
                HashMap::new()
            }
        };

        let now = ctx.now();
        let view = build_panel(&ctx.registry.snapshot(), &monthly_costs, now);
        let body = render_text(&view);

        let current = self.state.borrow().location.clone();
        let location = self
            .publisher
            .publish(current.as_ref(), &body)
            .await
            .context("failed to publish panel")?;
        if current.as_ref() != Some(&location) {
            info!(channel = %location.channel_id, message = %location.message_id, "panel relocated");
        }

        let state = PanelState {
            location: Some(location),
            last_update: Some(now),
        };
        *self.state.borrow_mut() = state.clone();
        self.store
            .save_async(&state)
            .await
            .context("failed to save panel state")?;
        debug!(active = view.active.len(), "panel rendered");
        Ok(())
    }
}
