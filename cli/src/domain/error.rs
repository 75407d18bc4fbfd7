//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, or `std::net`.
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator.

use thiserror::Error;

// ── Orchestrator errors ───────────────────────────────────────────────────────

/// Errors surfaced to the front-end by orchestrator operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Provider temporarily unavailable: {0}")]
    ProviderTransient(String),

    #[error("Provider rejected the request: {0}")]
    ProviderPermanent(String),

    #[error(
        "Firewall group could not be verified on instance {instance_id} after {attempts} attempts. The instance was torn down."
    )]
    SecurityAttachmentFailed { instance_id: String, attempts: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Instance {0} has no active self-destruct timer.")]
    NoActiveTimer(String),

    #[error("Another operation is already running for instance {0}.")]
    OperationInProgress(String),
}

// ── Provider errors ───────────────────────────────────────────────────────────

/// Classified failure of a single provider API call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("resource not found")]
    NotFound,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// HTTP 400. The provider uses it for "busy, try again later".
    #[error("request rejected: {0}")]
    Busy(String),

    #[error("rate limited")]
    RateLimited,

    #[error("provider error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Whether this response proves the instance no longer exists.
    ///
    /// The provider answers 403 for ids that were deleted out from under
    /// the account, so destruction flows accept it alongside 404.
    #[must_use]
    pub fn proves_absence(&self) -> bool {
        matches!(self, Self::NotFound | Self::Forbidden(_))
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Busy(_)
                | Self::RateLimited
                | Self::Server { .. }
                | Self::Transport(_)
                | Self::Malformed(_)
        )
    }
}

impl From<ProviderError> for OrchestratorError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound => Self::NotFound("instance".to_string()),
            ProviderError::Forbidden(_) | ProviderError::Unauthorized(_) => {
                Self::ProviderPermanent(err.to_string())
            }
            ProviderError::Busy(_)
            | ProviderError::RateLimited
            | ProviderError::Server { .. }
            | ProviderError::Transport(_)
            | ProviderError::Malformed(_) => Self::ProviderTransient(err.to_string()),
        }
    }
}
