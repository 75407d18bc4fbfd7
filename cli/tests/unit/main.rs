//! Unit tests for leasekeeper CLI
//!
//! These tests run every service against in-memory fakes on tokio's paused
//! clock, so poll intervals and timer deadlines cost no wall time.

mod destruction_poller;
mod helpers;
mod property_tests;
mod provisioning_service;
