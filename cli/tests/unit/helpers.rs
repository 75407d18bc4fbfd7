//! Shared in-memory fakes for every port.
//!
//! The provider fake derives boot progress from tokio's clock, so tests run
//! under `start_paused = true` and poll intervals cost no real time.

#![allow(clippy::expect_used, dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use leasekeeper_common::{Creator, PanelLocation, PanelState};
use tokio::time::Instant;

use leasekeeper_cli::application::context::OrchestratorContext;
use leasekeeper_cli::application::orchestrator::Orchestrator;
use leasekeeper_cli::application::ports::{
    Clock, InstanceHardening, InstanceInspector, InstanceLifecycle, Notifier, PanelPublisher,
    PanelStateStore, Plan, ProviderCatalog, ProviderResult, Region, Snapshot,
};
use leasekeeper_cli::application::services::render_serializer::RenderSerializer;
use leasekeeper_cli::domain::config::Settings;
use leasekeeper_cli::domain::error::ProviderError;
use leasekeeper_cli::domain::instance::{InstanceSpec, ProviderInstance};
use leasekeeper_cli::domain::notice::Notice;

pub const FIREWALL_ID: &str = "0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0";
pub const SNAPSHOT: &str = "img-1";
pub const PLAN: &str = "vc2-1c-1gb";
pub const READY_IP: &str = "203.0.113.7";

// ── Provider ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(String),
    Get(String),
    List,
    Start(String),
    Halt(String),
    Reboot(String),
    Delete(String),
    Attach(String),
    Ddos(String),
    Catalog,
}

struct Booting {
    instance: ProviderInstance,
    created: Instant,
    /// Power-state changes made by operator actions freeze the boot sequence.
    settled: bool,
}

struct ProviderState {
    instances: BTreeMap<String, Booting>,
    calls: Vec<Call>,
    next_id: u32,
    get_errors: VecDeque<ProviderError>,
    delete_script: VecDeque<ProviderError>,
    delete_always: Option<ProviderError>,
    /// Ids `list_instances` leaves out, like a stale page.
    unlisted: HashSet<String>,
}

/// Scriptable provider. Instances boot `pending → active/stopped → active/running`.
pub struct FakeProvider {
    state: RefCell<ProviderState>,
    /// When false the firewall group never shows up on re-read.
    pub attach_sticks: Cell<bool>,
    pub create_returns_empty: Cell<bool>,
    pub restoring_after: Cell<Duration>,
    pub ready_after: Cell<Duration>,
    pub list_fails: Cell<bool>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self {
            state: RefCell::new(ProviderState {
                instances: BTreeMap::new(),
                calls: Vec::new(),
                next_id: 1,
                get_errors: VecDeque::new(),
                delete_script: VecDeque::new(),
                delete_always: None,
                unlisted: HashSet::new(),
            }),
            attach_sticks: Cell::new(true),
            create_returns_empty: Cell::new(false),
            restoring_after: Cell::new(Duration::from_secs(60)),
            ready_after: Cell::new(Duration::from_secs(150)),
            list_fails: Cell::new(false),
        }
    }
}

impl FakeProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Put an already-running instance on the account.
    pub fn insert_running(&self, id: &str, label: &str) {
        let instance = ProviderInstance {
            id: id.to_string(),
            label: label.to_string(),
            region: "dfw".to_string(),
            plan: PLAN.to_string(),
            status: "active".to_string(),
            power_status: "running".to_string(),
            server_status: "ok".to_string(),
            main_ip: READY_IP.to_string(),
            firewall_group_id: FIREWALL_ID.to_string(),
            date_created: None,
        };
        self.insert(instance);
    }

    pub fn insert(&self, instance: ProviderInstance) {
        self.state.borrow_mut().instances.insert(
            instance.id.clone(),
            Booting {
                instance,
                created: Instant::now(),
                settled: true,
            },
        );
    }

    /// Remove an instance behind the orchestrator's back.
    pub fn remove(&self, id: &str) {
        self.state.borrow_mut().instances.remove(id);
    }

    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.state.borrow().instances.contains_key(id)
    }

    /// Leave `id` out of instance listings while `get_instance` still finds it.
    pub fn omit_from_list(&self, id: &str) {
        self.state.borrow_mut().unlisted.insert(id.to_string());
    }

    pub fn fail_next_gets(&self, errors: impl IntoIterator<Item = ProviderError>) {
        self.state.borrow_mut().get_errors.extend(errors);
    }

    pub fn script_deletes(&self, errors: impl IntoIterator<Item = ProviderError>) {
        self.state.borrow_mut().delete_script.extend(errors);
    }

    pub fn fail_all_deletes(&self, error: ProviderError) {
        self.state.borrow_mut().delete_always = Some(error);
    }

    /// The instance as `get_instance` would report it now.
    #[must_use]
    pub fn view_of(&self, id: &str) -> Option<ProviderInstance> {
        self.state.borrow().instances.get(id).map(|b| self.view(b))
    }

    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    #[must_use]
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.borrow().calls.iter().filter(|c| pred(c)).count()
    }

    #[must_use]
    pub fn deletes_of(&self, id: &str) -> usize {
        self.count(|c| *c == Call::Delete(id.to_string()))
    }

    #[must_use]
    pub fn starts(&self) -> usize {
        self.count(|c| matches!(c, Call::Start(_)))
    }

    fn record(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }

    fn view(&self, booting: &Booting) -> ProviderInstance {
        let mut instance = booting.instance.clone();
        if booting.settled {
            return instance;
        }
        let elapsed = booting.created.elapsed();
        if elapsed >= self.ready_after.get() {
            instance.status = "active".into();
            instance.power_status = "running".into();
            instance.main_ip = READY_IP.into();
        } else if elapsed >= self.restoring_after.get() {
            instance.status = "active".into();
            instance.power_status = "stopped".into();
        }
        instance
    }

    fn set_power(&self, id: &str, power: &str) -> ProviderResult<()> {
        let mut state = self.state.borrow_mut();
        let booting = state.instances.get_mut(id).ok_or(ProviderError::NotFound)?;
        booting.settled = true;
        booting.instance.status = "active".into();
        booting.instance.power_status = power.into();
        if booting.instance.main_ip.is_empty() || booting.instance.main_ip == "0.0.0.0" {
            booting.instance.main_ip = READY_IP.into();
        }
        Ok(())
    }
}

impl InstanceLifecycle for FakeProvider {
    async fn create_instance(&self, spec: &InstanceSpec<'_>) -> ProviderResult<ProviderInstance> {
        self.record(Call::Create(spec.label.to_string()));
        let instance = {
            let mut state = self.state.borrow_mut();
            let id = format!("inst-{}", state.next_id);
            state.next_id += 1;
            let instance = ProviderInstance {
                id: id.clone(),
                label: spec.label.to_string(),
                region: spec.region.to_string(),
                plan: spec.plan.to_string(),
                status: "pending".into(),
                power_status: "stopped".into(),
                server_status: "none".into(),
                main_ip: "0.0.0.0".into(),
                firewall_group_id: String::new(),
                date_created: None,
            };
            state.instances.insert(
                id,
                Booting {
                    instance: instance.clone(),
                    created: Instant::now(),
                    settled: false,
                },
            );
            instance
        };
        if self.create_returns_empty.get() {
            return Ok(ProviderInstance::default());
        }
        Ok(instance)
    }

    async fn start_instance(&self, id: &str) -> ProviderResult<()> {
        self.record(Call::Start(id.to_string()));
        self.set_power(id, "running")
    }

    async fn halt_instance(&self, id: &str) -> ProviderResult<()> {
        self.record(Call::Halt(id.to_string()));
        self.set_power(id, "stopped")
    }

    async fn reboot_instance(&self, id: &str) -> ProviderResult<()> {
        self.record(Call::Reboot(id.to_string()));
        self.set_power(id, "running")
    }

    async fn delete_instance(&self, id: &str) -> ProviderResult<()> {
        self.record(Call::Delete(id.to_string()));
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.delete_script.pop_front() {
            if err.proves_absence() {
                state.instances.remove(id);
            }
            return Err(err);
        }
        if let Some(err) = state.delete_always.clone() {
            return Err(err);
        }
        state
            .instances
            .remove(id)
            .map(|_| ())
            .ok_or(ProviderError::NotFound)
    }
}

impl InstanceInspector for FakeProvider {
    async fn get_instance(&self, id: &str) -> ProviderResult<ProviderInstance> {
        self.record(Call::Get(id.to_string()));
        if let Some(err) = self.state.borrow_mut().get_errors.pop_front() {
            return Err(err);
        }
        let state = self.state.borrow();
        state
            .instances
            .get(id)
            .map(|b| self.view(b))
            .ok_or(ProviderError::NotFound)
    }

    async fn list_instances(&self) -> ProviderResult<Vec<ProviderInstance>> {
        self.record(Call::List);
        if self.list_fails.get() {
            return Err(ProviderError::Server {
                status: 503,
                message: "maintenance".into(),
            });
        }
        let state = self.state.borrow();
        Ok(state
            .instances
            .values()
            .filter(|b| !state.unlisted.contains(&b.instance.id))
            .map(|b| self.view(b))
            .collect())
    }
}

impl InstanceHardening for FakeProvider {
    async fn attach_firewall_group(&self, id: &str, group_id: &str) -> ProviderResult<()> {
        self.record(Call::Attach(id.to_string()));
        if self.attach_sticks.get() {
            let mut state = self.state.borrow_mut();
            let booting = state.instances.get_mut(id).ok_or(ProviderError::NotFound)?;
            booting.instance.firewall_group_id = group_id.to_string();
        }
        Ok(())
    }

    async fn enable_ddos_protection(&self, id: &str) -> ProviderResult<()> {
        self.record(Call::Ddos(id.to_string()));
        Ok(())
    }
}

impl ProviderCatalog for FakeProvider {
    async fn list_plans(&self) -> ProviderResult<Vec<Plan>> {
        self.record(Call::Catalog);
        Ok(vec![Plan {
            id: PLAN.into(),
            monthly_cost: 7.30,
        }])
    }

    async fn list_snapshots(&self) -> ProviderResult<Vec<Snapshot>> {
        self.record(Call::Catalog);
        Ok(vec![Snapshot {
            id: SNAPSHOT.into(),
            description: "golden image".into(),
        }])
    }

    async fn list_regions(&self) -> ProviderResult<Vec<Region>> {
        self.record(Call::Catalog);
        Ok(vec![
            Region {
                id: "dfw".into(),
                city: "Dallas".into(),
            },
            Region {
                id: "ewr".into(),
                city: "New Jersey".into(),
            },
        ])
    }
}

// ── Notifier ──────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    sent: RefCell<Vec<(Creator, Notice)>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn sent(&self) -> Vec<(Creator, Notice)> {
        self.sent.borrow().clone()
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        self.sent.borrow().iter().map(|(_, n)| n.kind()).collect()
    }

    #[must_use]
    pub fn count(&self, kind: &str) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

impl Notifier for RecordingNotifier {
    async fn notify(&self, recipient: &Creator, notice: &Notice) -> Result<()> {
        self.sent.borrow_mut().push((recipient.clone(), notice.clone()));
        Ok(())
    }
}

// ── Clock ─────────────────────────────────────────────────────────────────────

/// Wall clock that advances with tokio's (paused) clock.
pub struct TestClock {
    base: DateTime<Utc>,
    start: Instant,
}

impl TestClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).single().expect("valid date"),
            start: Instant::now(),
        }
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.start.elapsed()).expect("elapsed fits");
        self.base + elapsed
    }
}

// ── Panel ─────────────────────────────────────────────────────────────────────

/// Publisher that takes `delay` per publish and tracks overlap.
#[derive(Default)]
pub struct RecordingPublisher {
    pub delay: Duration,
    bodies: RefCell<Vec<String>>,
    active: Cell<usize>,
    max_active: Cell<usize>,
    created: Cell<u32>,
}

impl RecordingPublisher {
    #[must_use]
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn bodies(&self) -> Vec<String> {
        self.bodies.borrow().clone()
    }

    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_active.get()
    }

    #[must_use]
    pub fn created(&self) -> u32 {
        self.created.get()
    }
}

impl PanelPublisher for RecordingPublisher {
    async fn publish(&self, location: Option<&PanelLocation>, body: &str) -> Result<PanelLocation> {
        self.active.set(self.active.get() + 1);
        self.max_active.set(self.max_active.get().max(self.active.get()));
        tokio::time::sleep(self.delay).await;
        self.bodies.borrow_mut().push(body.to_string());
        self.active.set(self.active.get() - 1);
        Ok(match location {
            Some(loc) => loc.clone(),
            None => {
                self.created.set(self.created.get() + 1);
                PanelLocation {
                    channel_id: "ops".into(),
                    message_id: format!("panel-{}", self.created.get()),
                }
            }
        })
    }
}

#[derive(Default)]
pub struct MemoryPanelStore {
    pub state: RefCell<Option<PanelState>>,
    pub saves: Cell<u32>,
}

impl PanelStateStore for MemoryPanelStore {
    async fn load_async(&self) -> Result<Option<PanelState>> {
        Ok(self.state.borrow().clone())
    }

    async fn save_async(&self, state: &PanelState) -> Result<()> {
        *self.state.borrow_mut() = Some(state.clone());
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }
}

// ── Builders ──────────────────────────────────────────────────────────────────

pub type TestContext = OrchestratorContext<FakeProvider, RecordingNotifier, TestClock>;

#[must_use]
pub fn settings() -> Settings {
    Settings {
        firewall_group_id: FIREWALL_ID.to_string(),
        plan: PLAN.to_string(),
        ddos_protection: true,
        lifetime: chrono::Duration::minutes(120),
        extension: chrono::Duration::minutes(60),
        retention: chrono::Duration::hours(24),
        render_interval: Duration::from_secs(60),
    }
}

#[must_use]
pub fn context(provider: FakeProvider) -> TestContext {
    OrchestratorContext::new(provider, RecordingNotifier::default(), TestClock::new(), settings())
}

#[must_use]
pub fn context_with(provider: FakeProvider, settings: Settings) -> TestContext {
    OrchestratorContext::new(provider, RecordingNotifier::default(), TestClock::new(), settings)
}

pub type TestOrchestrator =
    Orchestrator<FakeProvider, RecordingNotifier, TestClock, RecordingPublisher, MemoryPanelStore>;

/// Orchestrator over fakes. Must be driven inside a `LocalSet`.
#[must_use]
pub fn orchestrator(provider: FakeProvider, settings: Settings) -> TestOrchestrator {
    Orchestrator::new(
        context_with(provider, settings),
        RenderSerializer::new(RecordingPublisher::default(), MemoryPanelStore::default()),
    )
}

#[must_use]
pub fn alice() -> Creator {
    Creator::new("u-1", "Alice")
}
