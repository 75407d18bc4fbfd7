//! User-facing notifications emitted by the orchestrator.

use std::fmt;

use chrono::{DateTime, Utc};

/// One message for the requester who owns an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Progress {
        name: String,
        phase: &'static str,
    },
    Ready {
        id: String,
        name: String,
        ip: String,
        region: String,
        expires_at: Option<DateTime<Utc>>,
    },
    ProvisionFailed {
        name: String,
        reason: String,
    },
    ReadinessTimedOut {
        id: String,
        name: String,
        waited_minutes: u64,
    },
    ExpiryWarning {
        id: String,
        name: String,
        minutes_left: i64,
        expires_at: DateTime<Utc>,
    },
    Expired {
        id: String,
        name: String,
    },
    Destroyed {
        id: String,
        name: String,
    },
    DestroyTimedOut {
        id: String,
        name: String,
    },
    DestroyFailed {
        id: String,
        name: String,
        reason: String,
    },
}

impl Notice {
    /// Stable short tag, used by logs and tests.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Ready { .. } => "ready",
            Self::ProvisionFailed { .. } => "provision_failed",
            Self::ReadinessTimedOut { .. } => "readiness_timed_out",
            Self::ExpiryWarning { .. } => "expiry_warning",
            Self::Expired { .. } => "expired",
            Self::Destroyed { .. } => "destroyed",
            Self::DestroyTimedOut { .. } => "destroy_timed_out",
            Self::DestroyFailed { .. } => "destroy_failed",
        }
    }

    /// Failures are rendered as errors by presentation layers.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ProvisionFailed { .. }
                | Self::ReadinessTimedOut { .. }
                | Self::DestroyTimedOut { .. }
                | Self::DestroyFailed { .. }
        )
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Progress { name, phase } => write!(f, "{name}: {phase}..."),
            Self::Ready {
                id,
                name,
                ip,
                region,
                expires_at,
            } => {
                write!(f, "{name} is ready at {ip} ({region}, id {id})")?;
                if let Some(at) = expires_at {
                    write!(f, ". Self-destructs at {}", at.format("%H:%M UTC"))?;
                }
                Ok(())
            }
            Self::ProvisionFailed { name, reason } => write!(f, "{name} could not be created: {reason}"),
            Self::ReadinessTimedOut {
                id,
                name,
                waited_minutes,
            } => write!(
                f,
                "{name} ({id}) did not become ready within {waited_minutes} minutes"
            ),
            Self::ExpiryWarning {
                name,
                minutes_left,
                expires_at,
                ..
            } => write!(
                f,
                "{name} self-destructs in {minutes_left} minutes (at {}). Extend it to keep it.",
                expires_at.format("%H:%M UTC")
            ),
            Self::Expired { id, name } => write!(f, "{name} ({id}) expired and was destroyed"),
            Self::Destroyed { id, name } => write!(f, "{name} ({id}) was destroyed"),
            Self::DestroyTimedOut { id, name } => write!(
                f,
                "{name} ({id}) could not be confirmed destroyed; check the provider console"
            ),
            Self::DestroyFailed { id, name, reason } => {
                write!(f, "{name} ({id}) could not be destroyed: {reason}")
            }
        }
    }
}
