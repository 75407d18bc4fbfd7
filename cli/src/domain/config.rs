//! Domain types and validators for leasekeeper configuration.
//!
//! Pure functions only. No I/O or filesystem access.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::error::OrchestratorError;

// ── Constants ────────────────────────────────────────────────────────────────

pub const DEFAULT_API_URL: &str = "https://api.vultr.com/v2";
pub const DEFAULT_PLAN: &str = "vc2-1c-1gb";

static FIREWALL_GROUP_ID: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // literal pattern
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap()
});

// ── Config schema ────────────────────────────────────────────────────────────

/// Top-level configuration stored in `~/.leasekeeper/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LeaseConfig {
    pub provider: ProviderConfig,
    pub timers: TimerConfig,
    pub panel: PanelConfig,
}

/// Cloud provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_url: String,
    /// Plan used for every instance this orchestrator creates.
    pub plan: String,
    /// Firewall group attached to every instance. Mandatory.
    pub firewall_group_id: String,
    pub ddos_protection: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            plan: DEFAULT_PLAN.to_string(),
            firewall_group_id: String::new(),
            ddos_protection: true,
        }
    }
}

/// Self-destruct timer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub lifetime_minutes: u32,
    pub extension_minutes: u32,
    /// How long destroyed records stay on the panel.
    pub retention_hours: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            lifetime_minutes: 120,
            extension_minutes: 60,
            retention_hours: 24,
        }
    }
}

/// Summary panel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    /// Directory the file publisher writes into. Defaults under `~/.leasekeeper`.
    pub dir: Option<PathBuf>,
    /// Where the panel pointer is persisted. Defaults under `~/.leasekeeper`.
    pub state_file: Option<PathBuf>,
    pub refresh_seconds: u64,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            dir: None,
            state_file: None,
            refresh_seconds: 60,
        }
    }
}

// ── Runtime settings ─────────────────────────────────────────────────────────

/// Validated settings handed to the application services.
#[derive(Debug, Clone)]
pub struct Settings {
    pub firewall_group_id: String,
    pub plan: String,
    pub ddos_protection: bool,
    pub lifetime: chrono::Duration,
    pub extension: chrono::Duration,
    pub retention: chrono::Duration,
    pub render_interval: std::time::Duration,
}

impl Settings {
    /// Validate a loaded config and convert it into runtime settings.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::Configuration` when the firewall group id
    /// is missing or malformed, or a duration is zero.
    pub fn from_config(config: &LeaseConfig) -> Result<Self, OrchestratorError> {
        validate_firewall_group_id(&config.provider.firewall_group_id)?;
        if config.provider.plan.trim().is_empty() {
            return Err(OrchestratorError::Configuration(
                "provider.plan must not be empty".to_string(),
            ));
        }
        if config.timers.lifetime_minutes == 0 || config.timers.extension_minutes == 0 {
            return Err(OrchestratorError::Configuration(
                "timers.lifetime_minutes and timers.extension_minutes must be positive".to_string(),
            ));
        }
        Ok(Self {
            firewall_group_id: config.provider.firewall_group_id.clone(),
            plan: config.provider.plan.clone(),
            ddos_protection: config.provider.ddos_protection,
            lifetime: chrono::Duration::minutes(i64::from(config.timers.lifetime_minutes)),
            extension: chrono::Duration::minutes(i64::from(config.timers.extension_minutes)),
            retention: chrono::Duration::hours(i64::from(config.timers.retention_hours)),
            render_interval: std::time::Duration::from_secs(config.panel.refresh_seconds.max(5)),
        })
    }
}

// ── Validators ───────────────────────────────────────────────────────────────

/// Validates the mandatory firewall group id (lowercase UUID).
///
/// # Errors
///
/// Returns `OrchestratorError::Configuration` when the id is empty or does
/// not look like a provider firewall group id.
pub fn validate_firewall_group_id(id: &str) -> Result<(), OrchestratorError> {
    if id.is_empty() {
        return Err(OrchestratorError::Configuration(
            "provider.firewall_group_id is not set; refusing to create unprotected instances"
                .to_string(),
        ));
    }
    if !FIREWALL_GROUP_ID.is_match(id) {
        return Err(OrchestratorError::Configuration(format!(
            "provider.firewall_group_id '{id}' is not a valid firewall group id"
        )));
    }
    Ok(())
}

// ── Unit tests ───────────────────────────────────────────────────────────────
