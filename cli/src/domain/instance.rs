//! Provider instance snapshots and pure classification helpers.
//!
//! This module is intentionally free of I/O, async, and external layer imports.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use leasekeeper_common::InstanceStatus;

use crate::domain::error::OrchestratorError;

/// Provider lifecycle value for an instance that finished creation.
pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_PENDING: &str = "pending";
pub const STATUS_SUSPENDED: &str = "suspended";
pub const POWER_RUNNING: &str = "running";
pub const POWER_STOPPED: &str = "stopped";

const MAX_LABEL_LEN: usize = 63;

/// One instance as the provider reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderInstance {
    pub id: String,
    pub label: String,
    pub region: String,
    pub plan: String,
    pub status: String,
    pub power_status: String,
    pub server_status: String,
    pub main_ip: String,
    /// Empty when no firewall group is attached.
    pub firewall_group_id: String,
    pub date_created: Option<DateTime<Utc>>,
}

/// Launch parameters for creating a new instance.
#[derive(Debug, Clone, Copy)]
pub struct InstanceSpec<'a> {
    /// Snapshot the instance is restored from.
    pub snapshot_id: &'a str,
    pub label: &'a str,
    pub region: &'a str,
    pub plan: &'a str,
}

/// What a requester asks the provisioning pipeline for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub image_ref: String,
    pub name: String,
    pub region: String,
}

impl ProvisionRequest {
    #[must_use]
    pub fn new(
        image_ref: impl Into<String>,
        name: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            image_ref: image_ref.into(),
            name: name.into(),
            region: region.into(),
        }
    }
}

/// A created, hardened instance handed from the pipeline to the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceHandle {
    pub id: String,
    pub name: String,
    pub region: String,
}

/// Creation progress derived from one provider snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Provider is still allocating the instance.
    Creating,
    /// Active but powered off or without an address: the image is being restored.
    Restoring,
    Ready,
    Failed(String),
}

impl Readiness {
    #[must_use]
    pub fn phase_name(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Restoring => "restoring from image",
            Self::Ready => "ready",
            Self::Failed(_) => "failed",
        }
    }
}

/// Classify a provider snapshot during creation.
///
/// Ready needs all of: lifecycle active, power running, and a real address.
/// Active + stopped is a normal restore phase, never an error.
#[must_use]
pub fn readiness(instance: &ProviderInstance) -> Readiness {
    match instance.status.as_str() {
        STATUS_ACTIVE => {
            if instance.power_status == POWER_RUNNING && !is_placeholder_ip(&instance.main_ip) {
                Readiness::Ready
            } else {
                Readiness::Restoring
            }
        }
        STATUS_SUSPENDED => Readiness::Failed("instance was suspended by the provider".to_string()),
        _ => Readiness::Creating,
    }
}

/// Map a provider snapshot onto the orchestrator's status enum.
#[must_use]
pub fn observed_status(instance: &ProviderInstance) -> InstanceStatus {
    match (instance.status.as_str(), instance.power_status.as_str()) {
        (STATUS_PENDING, _) => InstanceStatus::Creating,
        (STATUS_ACTIVE, POWER_RUNNING) => InstanceStatus::Running,
        (STATUS_ACTIVE | STATUS_SUSPENDED, POWER_STOPPED) => InstanceStatus::Stopped,
        _ => InstanceStatus::Unknown,
    }
}

/// An empty or all-zero address is the provider's "not assigned yet".
#[must_use]
pub fn is_placeholder_ip(ip: &str) -> bool {
    let ip = ip.trim();
    if ip.is_empty() {
        return true;
    }
    ip.parse::<IpAddr>().is_ok_and(|addr| addr.is_unspecified())
}

/// Byte-for-byte comparison of the attached firewall group.
#[must_use]
pub fn firewall_group_matches(instance: &ProviderInstance, requested: &str) -> bool {
    instance.firewall_group_id.as_bytes() == requested.as_bytes()
}

/// Validate a requested instance name.
///
/// # Errors
///
/// Returns `OrchestratorError::Validation` for empty, overlong, or
/// non-hostname-safe names.
pub fn validate_label(name: &str) -> Result<(), OrchestratorError> {
    if name.is_empty() {
        return Err(OrchestratorError::Validation("instance name must not be empty".to_string()));
    }
    if name.len() > MAX_LABEL_LEN {
        return Err(OrchestratorError::Validation(format!(
            "instance name must be at most {MAX_LABEL_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ' ')
    {
        return Err(OrchestratorError::Validation(format!(
            "instance name '{name}' may only contain letters, digits, spaces, '-' and '_'"
        )));
    }
    Ok(())
}

/// Partial metadata update; `None` fields leave the record untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataPatch {
    pub ip: Option<String>,
    pub name: Option<String>,
    pub region: Option<String>,
    pub plan: Option<String>,
}

impl MetadataPatch {
    /// Take whatever the provider reported, skipping placeholder values.
    #[must_use]
    pub fn from_provider(instance: &ProviderInstance) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            ip: (!is_placeholder_ip(&instance.main_ip)).then(|| instance.main_ip.clone()),
            name: non_empty(&instance.label),
            region: non_empty(&instance.region),
            plan: non_empty(&instance.plan),
        }
    }
}
