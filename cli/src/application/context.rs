//! Orchestrator context: the collaborators every service works against.
//!
//! One context is built at startup and shared (behind an `Rc`) by every
//! task. Services take `&OrchestratorContext<impl ..>` so tests can inject
//! fakes for each port.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use leasekeeper_common::Creator;
use tracing::warn;

use crate::application::ports::{Clock, Notifier};
use crate::domain::config::Settings;
use crate::domain::notice::Notice;
use crate::domain::registry::SharedRegistry;

/// Ids whose provisioning pipeline or readiness poller is still running.
///
/// While an id is here the pipeline owns its `creating` record; once the
/// poller returns (ready, failed, or timed out) registry sync and status
/// refreshes take the record over.
#[derive(Debug, Clone, Default)]
pub struct ReadinessWatch(Rc<RefCell<HashSet<String>>>);

impl ReadinessWatch {
    /// Register `id` for as long as the returned guard lives.
    #[must_use]
    pub fn watch(&self, id: &str) -> WatchGuard {
        self.0.borrow_mut().insert(id.to_string());
        WatchGuard {
            set: Rc::clone(&self.0),
            id: id.to_string(),
        }
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.0.borrow().contains(id)
    }

    #[must_use]
    pub fn ids(&self) -> HashSet<String> {
        self.0.borrow().clone()
    }
}

pub struct WatchGuard {
    set: Rc<RefCell<HashSet<String>>>,
    id: String,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.set.borrow_mut().remove(&self.id);
    }
}

/// Provider, notifier, clock, registry and validated settings.
pub struct OrchestratorContext<P, N, C> {
    pub provider: P,
    pub notifier: N,
    pub clock: C,
    pub registry: SharedRegistry,
    pub readiness: ReadinessWatch,
    pub settings: Settings,
}

impl<P, N, C> OrchestratorContext<P, N, C> {
    #[must_use]
    pub fn new(provider: P, notifier: N, clock: C, settings: Settings) -> Self {
        Self {
            provider,
            notifier,
            clock,
            registry: SharedRegistry::new(),
            readiness: ReadinessWatch::default(),
            settings,
        }
    }

    /// Use an existing registry (tests pre-populate one).
    #[must_use]
    pub fn with_registry(mut self, registry: SharedRegistry) -> Self {
        self.registry = registry;
        self
    }
}

impl<P, N: Notifier, C: Clock> OrchestratorContext<P, N, C> {
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Deliver a notice, logging instead of failing when delivery breaks.
    pub async fn notify(&self, recipient: &Creator, notice: Notice) {
        if let Err(err) = self.notifier.notify(recipient, &notice).await {
            warn!(
                recipient = %recipient.requester_id,
                kind = notice.kind(),
                error = %err,
                "notification delivery failed"
            );
        }
    }
}
