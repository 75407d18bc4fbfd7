//! Application services: use-case orchestration.
//!
//! Each service module implements a single use-case by composing domain logic
//! with port trait calls. Services import only from `crate::domain` and
//! `crate::application::ports`, never from `crate::infra`, `crate::commands`,
//! or `crate::output`.

pub mod destruction_poller;
pub mod instance_actions;
pub mod provisioning;
pub mod registry_sync;
pub mod render_serializer;
pub mod status_poller;
pub mod timer_engine;
