//! Application layer: port trait definitions and use-case orchestration.
//!
//! This module depends only on `crate::domain`, never on `crate::infra`,
//! `crate::commands`, or `crate::output`.

pub mod context;
pub mod orchestrator;
pub mod ports;
pub mod services;

pub use context::OrchestratorContext;
pub use orchestrator::{DestroyAck, Orchestrator};
pub use ports::{
    Clock, CloudProvider, ConfigStore, InstanceHardening, InstanceInspector, InstanceLifecycle,
    Notifier, PanelPublisher, PanelStateStore, Plan, ProviderCatalog, Region, Snapshot,
};
