//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain` and the shared types crate,
//! never from `crate::infra`, `crate::commands`, or `crate::output`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use leasekeeper_common::{Creator, PanelLocation, PanelState};

use crate::domain::config::LeaseConfig;
use crate::domain::error::ProviderError;
use crate::domain::instance::{InstanceSpec, ProviderInstance};
use crate::domain::notice::Notice;

// ── Value Types ───────────────────────────────────────────────────────────────

/// A billing plan as listed by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub id: String,
    pub monthly_cost: f64,
}

/// A restorable snapshot (the provisioning "image").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: String,
    pub description: String,
}

/// A datacenter region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub id: String,
    pub city: String,
}

/// Result type of every provider call.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

// ── Provider Port Traits ──────────────────────────────────────────────────────

/// Instance lifecycle operations: create, power, destroy.
#[allow(async_fn_in_trait)]
pub trait InstanceLifecycle {
    /// Create an instance from a snapshot.
    async fn create_instance(&self, spec: &InstanceSpec<'_>) -> ProviderResult<ProviderInstance>;
    /// Power on a stopped instance.
    async fn start_instance(&self, id: &str) -> ProviderResult<()>;
    /// Power off a running instance.
    async fn halt_instance(&self, id: &str) -> ProviderResult<()>;
    /// Reboot a running instance.
    async fn reboot_instance(&self, id: &str) -> ProviderResult<()>;
    /// Request deletion. The provider answers 400 while the instance is busy.
    async fn delete_instance(&self, id: &str) -> ProviderResult<()>;
}

/// Instance state inspection.
#[allow(async_fn_in_trait)]
pub trait InstanceInspector {
    /// Fetch one instance; `ProviderError::NotFound` when it does not exist.
    async fn get_instance(&self, id: &str) -> ProviderResult<ProviderInstance>;
    /// List every instance on the account.
    async fn list_instances(&self) -> ProviderResult<Vec<ProviderInstance>>;
}

/// Network isolation and protection settings on an instance.
#[allow(async_fn_in_trait)]
pub trait InstanceHardening {
    /// Request that `group_id` be attached. Success here is not proof of attachment.
    async fn attach_firewall_group(&self, id: &str, group_id: &str) -> ProviderResult<()>;
    /// Enable DDoS protection.
    async fn enable_ddos_protection(&self, id: &str) -> ProviderResult<()>;
}

/// Account catalog lookups used for validation and cost display.
#[allow(async_fn_in_trait)]
pub trait ProviderCatalog {
    async fn list_plans(&self) -> ProviderResult<Vec<Plan>>;
    async fn list_snapshots(&self) -> ProviderResult<Vec<Snapshot>>;
    async fn list_regions(&self) -> ProviderResult<Vec<Region>>;
}

/// Composite trait: any type implementing all four sub-traits is a `CloudProvider`.
pub trait CloudProvider:
    InstanceLifecycle + InstanceInspector + InstanceHardening + ProviderCatalog
{
}

/// Blanket implementation: any type implementing all four sub-traits is a `CloudProvider`.
impl<T> CloudProvider for T where
    T: InstanceLifecycle + InstanceInspector + InstanceHardening + ProviderCatalog
{
}

// ── Notification Port ─────────────────────────────────────────────────────────

/// Delivers notices to the requester who owns an instance.
///
/// Delivery is best-effort: callers log failures and move on.
#[allow(async_fn_in_trait)]
pub trait Notifier {
    async fn notify(&self, recipient: &Creator, notice: &Notice) -> Result<()>;
}

// ── Time Port ─────────────────────────────────────────────────────────────────

/// Wall-clock source for timestamps and timer deadlines.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

// ── Panel Ports ───────────────────────────────────────────────────────────────

/// Writes the rendered summary into the shared external artifact.
#[allow(async_fn_in_trait)]
pub trait PanelPublisher {
    /// Update the artifact at `location`, or create a new one when `location`
    /// is `None` or no longer exists. Returns where the panel now lives.
    async fn publish(&self, location: Option<&PanelLocation>, body: &str) -> Result<PanelLocation>;
}

/// Abstracts panel state persistence (load/save).
#[allow(async_fn_in_trait)]
pub trait PanelStateStore {
    /// Load the persisted panel state, returning `None` if none exists.
    async fn load_async(&self) -> Result<Option<PanelState>>;
    /// Persist the given panel state.
    async fn save_async(&self, state: &PanelState) -> Result<()>;
}

// ── Configuration Port ────────────────────────────────────────────────────────

/// Abstracts loading the YAML configuration file.
pub trait ConfigStore {
    /// Load the config, falling back to defaults when no file exists.
    fn load(&self) -> Result<LeaseConfig>;
    /// Path of the config file.
    fn path(&self) -> Result<std::path::PathBuf>;
}
