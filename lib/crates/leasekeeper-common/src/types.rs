use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider-reported lifecycle state of a tracked instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Creating,
    Running,
    Stopped,
    Terminated,
    Destroyed,
    /// Provider state could not be mapped (recovered records only).
    Unknown,
}

impl InstanceStatus {
    /// Terminated and destroyed records are excluded from active listings.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Destroyed)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Terminated => "terminated",
            Self::Destroyed => "destroyed",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who asked for an instance. Set once at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Creator {
    pub requester_id: String,
    pub display_name: String,
}

impl Creator {
    pub const UNKNOWN_ID: &'static str = "unknown";

    #[must_use]
    pub fn new(requester_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            requester_id: requester_id.into(),
            display_name: display_name.into(),
        }
    }

    /// Placeholder owner for instances discovered on the provider side.
    #[must_use]
    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN_ID, "unknown")
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.requester_id == Self::UNKNOWN_ID
    }
}

/// Expiry warnings, in firing order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WarningThreshold {
    #[serde(rename = "10min")]
    TenMinutes,
    #[serde(rename = "5min")]
    FiveMinutes,
}

impl WarningThreshold {
    /// All thresholds, earliest-firing first.
    pub const ALL: [Self; 2] = [Self::TenMinutes, Self::FiveMinutes];

    #[must_use]
    pub fn minutes(self) -> i64 {
        match self {
            Self::TenMinutes => 10,
            Self::FiveMinutes => 5,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::TenMinutes => "10min",
            Self::FiveMinutes => "5min",
        }
    }
}

/// Per-instance deadline owned by the timer engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelfDestructTimer {
    pub expires_at: DateTime<Utc>,
    pub initial_duration_ms: i64,
    pub extended_count: u32,
    /// Only ever grows for the lifetime of the timer.
    #[serde(default)]
    pub warnings_sent: BTreeSet<WarningThreshold>,
}

impl SelfDestructTimer {
    #[must_use]
    pub fn new(now: DateTime<Utc>, lifetime: chrono::Duration) -> Self {
        Self {
            expires_at: now + lifetime,
            initial_duration_ms: lifetime.num_milliseconds(),
            extended_count: 0,
            warnings_sent: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.expires_at - now
    }

    #[must_use]
    pub fn has_warned(&self, threshold: WarningThreshold) -> bool {
        self.warnings_sent.contains(&threshold)
    }
}

/// Orchestrator-side view of one provisioned instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceRecord {
    pub id: String,
    pub creator: Creator,
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    /// True when the record was discovered on the provider rather than created here.
    #[serde(default)]
    pub recovered: bool,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destroyed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_destruct: Option<SelfDestructTimer>,
}

impl InstanceRecord {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        creator: Creator,
        status: InstanceStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            creator,
            status,
            ip: None,
            name: None,
            region: None,
            plan: None,
            recovered: false,
            created_at: now,
            last_updated: now,
            destroyed_at: None,
            self_destruct: None,
        }
    }

    /// Human label: the instance name when known, otherwise its id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}
