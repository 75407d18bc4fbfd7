//! Property-based tests for timer, label, and classification invariants.
//!
//! Uses `proptest` to verify invariants across many random inputs.

#![allow(clippy::expect_used)]

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use leasekeeper_cli::domain::config::validate_firewall_group_id;
use leasekeeper_cli::domain::instance::{
    MetadataPatch, ProviderInstance, Readiness, is_placeholder_ip, readiness, validate_label,
};
use leasekeeper_cli::domain::registry::InstanceRegistry;
use leasekeeper_cli::domain::timer::{TimerAction, evaluate};
use leasekeeper_common::{Creator, InstanceStatus, WarningThreshold};

/// Drive one armed timer through sweeps every `step_secs`, extending at the
/// given sweep indices, and return the warnings in the order they fired.
fn run_sweeps(
    lifetime_min: i64,
    step_secs: i64,
    extend_at: &[usize],
    extension_min: i64,
) -> (Vec<WarningThreshold>, bool) {
    let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().expect("valid date");
    let mut registry = InstanceRegistry::new();
    registry.upsert("i-1", Creator::unknown(), InstanceStatus::Running, &MetadataPatch::default(), start);
    registry
        .arm_timer("i-1", start, Duration::minutes(lifetime_min))
        .expect("tracked");

    let mut fired = Vec::new();
    let mut expired = false;
    for sweep in 0..100_000usize {
        let now = start + Duration::seconds(step_secs * i64::try_from(sweep).expect("small"));
        if extend_at.contains(&sweep) {
            registry
                .extend_timer("i-1", Duration::minutes(extension_min), now)
                .expect("armed");
        }
        let timer = registry
            .get("i-1")
            .and_then(|r| r.self_destruct.clone())
            .expect("armed");
        match evaluate(&timer, now) {
            TimerAction::Idle => {}
            TimerAction::Warn(threshold) => {
                if registry.record_warning("i-1", threshold) {
                    fired.push(threshold);
                }
            }
            TimerAction::Expire => {
                expired = true;
                break;
            }
        }
    }
    (fired, expired)
}

// ============================================================================
// Self-destruct timer property tests
// ============================================================================

proptest! {
    /// The 10-minute warning always precedes the 5-minute one, each fires at
    /// most once, and expiry is eventually reached.
    #[test]
    fn prop_warnings_fire_in_order_once(
        lifetime_min in 1i64..240,
        step_secs in 1i64..120,
        extend_at in proptest::collection::vec(0usize..400, 0..4),
        extension_min in 1i64..90,
    ) {
        let (fired, expired) = run_sweeps(lifetime_min, step_secs, &extend_at, extension_min);

        prop_assert!(expired, "timer never expired");
        prop_assert!(fired.len() <= 2, "warnings repeated: {:?}", fired);
        if let Some(pos) = fired.iter().position(|t| *t == WarningThreshold::FiveMinutes) {
            let ten = fired.iter().position(|t| *t == WarningThreshold::TenMinutes);
            prop_assert!(ten.is_some_and(|ten| ten < pos), "5min before 10min: {:?}", fired);
        }
    }

    /// Every extension moves the deadline strictly later.
    #[test]
    fn prop_extend_strictly_increases_expiry(
        lifetime_min in 1i64..240,
        increments in proptest::collection::vec(1i64..600, 1..10),
    ) {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().expect("valid date");
        let mut registry = InstanceRegistry::new();
        registry.upsert("i-1", Creator::unknown(), InstanceStatus::Running, &MetadataPatch::default(), start);
        registry.arm_timer("i-1", start, Duration::minutes(lifetime_min)).expect("tracked");

        let mut previous = start + Duration::minutes(lifetime_min);
        for (n, minutes) in increments.iter().enumerate() {
            let next = registry.extend_timer("i-1", Duration::minutes(*minutes), start).expect("armed");
            prop_assert!(next > previous);
            previous = next;
            let count = registry.get("i-1").and_then(|r| r.self_destruct.clone()).expect("armed").extended_count;
            prop_assert_eq!(count as usize, n + 1);
        }
    }

    /// Arming an already-armed timer never changes it.
    #[test]
    fn prop_rearm_is_noop(first in 1i64..240, second in 1i64..240, later in 0i64..10_000) {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().expect("valid date");
        let mut registry = InstanceRegistry::new();
        registry.upsert("i-1", Creator::unknown(), InstanceStatus::Running, &MetadataPatch::default(), start);
        prop_assert!(registry.arm_timer("i-1", start, Duration::minutes(first)).expect("tracked"));
        let before = registry.get("i-1").and_then(|r| r.self_destruct.clone());

        let rearmed = registry
            .arm_timer("i-1", start + Duration::seconds(later), Duration::minutes(second))
            .expect("tracked");

        prop_assert!(!rearmed);
        prop_assert_eq!(registry.get("i-1").and_then(|r| r.self_destruct.clone()), before);
    }
}

// ============================================================================
// Readiness classification property tests
// ============================================================================

proptest! {
    /// Ready requires an active, running instance with a real address.
    #[test]
    fn prop_ready_implies_running_with_address(
        status in prop::sample::select(vec!["pending", "active", "suspended", "resizing"]),
        power in prop::sample::select(vec!["running", "stopped", ""]),
        ip in prop::sample::select(vec!["", "0.0.0.0", "::", "203.0.113.4"]),
    ) {
        let instance = ProviderInstance {
            status: status.into(),
            power_status: power.into(),
            main_ip: ip.into(),
            ..ProviderInstance::default()
        };
        if readiness(&instance) == Readiness::Ready {
            prop_assert_eq!(status, "active");
            prop_assert_eq!(power, "running");
            prop_assert!(!is_placeholder_ip(ip));
        }
        if status == "active" && power == "stopped" {
            prop_assert_eq!(readiness(&instance), Readiness::Restoring);
        }
    }
}

// ============================================================================
// Input validation property tests
// ============================================================================

proptest! {
    /// Names made of hostname-safe characters within the length limit pass.
    #[test]
    fn prop_safe_labels_accepted(name in "[A-Za-z0-9_-][A-Za-z0-9 _-]{0,62}") {
        prop_assert!(validate_label(&name).is_ok(), "rejected: {name}");
    }

    /// Shell metacharacters are always rejected.
    #[test]
    fn prop_metacharacters_rejected(
        prefix in "[a-z]{0,10}",
        bad in prop::sample::select(vec![';', '|', '&', '$', '`', '/', '\'', '"']),
    ) {
        let name = format!("{prefix}{bad}");
        prop_assert!(validate_label(&name).is_err(), "accepted: {name}");
    }

    /// Arbitrary non-UUID strings are never accepted as firewall group ids.
    #[test]
    fn prop_non_uuid_firewall_ids_rejected(id in "[a-z0-9]{0,35}") {
        prop_assert!(validate_firewall_group_id(&id).is_err(), "accepted: {id}");
    }
}
