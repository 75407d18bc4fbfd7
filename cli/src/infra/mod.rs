//! Infrastructure layer: concrete implementations of application port traits.
//!
//! This module contains all I/O-performing code: the provider REST client,
//! config and panel state files, the panel artifact, and the system clock.
//!
//! Imports from `crate::domain` and `crate::application::ports` are allowed.
//! Imports from `crate::commands` or `crate::output` are forbidden.

pub mod clock;
pub mod config;
pub mod panel_file;
pub mod provider;
pub mod state;
