//! Domain layer: pure business logic, types, and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, or `std::process`.
//! All functions are synchronous and take data in, returning data out.

pub mod config;
pub mod error;
pub mod instance;
pub mod notice;
pub mod panel;
pub mod registry;
pub mod timer;

pub use config::{LeaseConfig, Settings, validate_firewall_group_id};
pub use error::{OrchestratorError, ProviderError};
pub use instance::{InstanceHandle, InstanceSpec, MetadataPatch, ProviderInstance, ProvisionRequest, Readiness};
pub use notice::Notice;
pub use registry::{InstanceRegistry, ReconcileReport, SharedRegistry};
