//! Provisioning pipeline: create, firewall verification, and teardown.

#![allow(clippy::expect_used)]

use leasekeeper_cli::application::services::provisioning::{self, ATTACH_ATTEMPTS};
use leasekeeper_cli::domain::error::{OrchestratorError, ProviderError};
use leasekeeper_cli::domain::instance::ProvisionRequest;
use leasekeeper_common::InstanceStatus;

use crate::helpers::{Call, FIREWALL_ID, FakeProvider, alice, context, context_with, settings};

fn request() -> ProvisionRequest {
    ProvisionRequest::new("img-1", "Test", "dfw")
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_provision_verifies_firewall_and_tracks_record() {
    let ctx = context(FakeProvider::new());

    let handle = provisioning::provision(&ctx, &alice(), &request())
        .await
        .expect("provision");

    assert_eq!(handle.id, "inst-1");
    assert_eq!(handle.name, "Test");
    let record = ctx.registry.get("inst-1").expect("tracked");
    assert_eq!(record.status, InstanceStatus::Creating);
    assert_eq!(record.creator, alice());
    assert_eq!(record.region.as_deref(), Some("dfw"));
    assert!(record.self_destruct.is_none(), "timer is armed only once ready");
    assert_eq!(ctx.provider.count(|c| matches!(c, Call::Attach(_))), 1);
    assert_eq!(ctx.provider.count(|c| matches!(c, Call::Ddos(_))), 1);
}

#[tokio::test(start_paused = true)]
async fn test_provision_skips_ddos_when_disabled() {
    let mut s = settings();
    s.ddos_protection = false;
    let ctx = context_with(FakeProvider::new(), s);

    provisioning::provision(&ctx, &alice(), &request())
        .await
        .expect("provision");

    assert_eq!(ctx.provider.count(|c| matches!(c, Call::Ddos(_))), 0);
}

// ── Firewall failure ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_unverified_firewall_tears_down_with_exactly_one_delete() {
    let provider = FakeProvider::new();
    provider.attach_sticks.set(false);
    let ctx = context(provider);

    let err = provisioning::provision(&ctx, &alice(), &request())
        .await
        .expect_err("firewall never verified");

    assert_eq!(
        err,
        OrchestratorError::SecurityAttachmentFailed {
            instance_id: "inst-1".into(),
            attempts: ATTACH_ATTEMPTS,
        }
    );
    let attaches = ctx.provider.count(|c| matches!(c, Call::Attach(_)));
    assert_eq!(attaches, ATTACH_ATTEMPTS as usize);
    assert_eq!(ctx.provider.deletes_of("inst-1"), 1);
    assert!(!ctx.provider.exists("inst-1"));
    let record = ctx.registry.get("inst-1").expect("record kept for the panel");
    assert_eq!(record.status, InstanceStatus::Destroyed);
    assert_eq!(ctx.provider.count(|c| matches!(c, Call::Ddos(_))), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_teardown_falls_back_to_destruction_poller() {
    let provider = FakeProvider::new();
    provider.attach_sticks.set(false);
    provider.script_deletes([ProviderError::Busy("instance locked".into())]);
    let ctx = context(provider);

    let err = provisioning::provision(&ctx, &alice(), &request())
        .await
        .expect_err("firewall never verified");

    assert!(matches!(err, OrchestratorError::SecurityAttachmentFailed { .. }));
    assert_eq!(ctx.provider.deletes_of("inst-1"), 2);
    assert!(!ctx.provider.exists("inst-1"));
    assert_eq!(
        ctx.registry.get("inst-1").expect("record").status,
        InstanceStatus::Destroyed
    );
}

#[tokio::test(start_paused = true)]
async fn test_firewall_verified_on_later_attempt() {
    let provider = FakeProvider::new();
    provider.attach_sticks.set(false);
    let ctx = context(provider);

    let user = alice();
    let req = request();
    let provision = provisioning::provision(&ctx, &user, &req);
    let flip = async {
        // Between the first re-read and the second attach.
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        ctx.provider.attach_sticks.set(true);
    };
    let (result, ()) = tokio::join!(provision, flip);

    result.expect("verified on a retry");
    assert_eq!(ctx.provider.count(|c| matches!(c, Call::Attach(_))), 2);
    assert_eq!(ctx.provider.deletes_of("inst-1"), 0);
}

// ── Validation ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_missing_firewall_group_is_configuration_error_before_create() {
    let mut s = settings();
    s.firewall_group_id = String::new();
    let ctx = context_with(FakeProvider::new(), s);

    let err = provisioning::provision(&ctx, &alice(), &request())
        .await
        .expect_err("config error");

    assert!(matches!(err, OrchestratorError::Configuration(_)));
    assert!(ctx.provider.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_snapshot_is_not_found() {
    let ctx = context(FakeProvider::new());

    let err = provisioning::provision(&ctx, &alice(), &ProvisionRequest::new("img-404", "Test", "dfw"))
        .await
        .expect_err("unknown image");

    assert!(matches!(err, OrchestratorError::NotFound(ref m) if m.contains("img-404")));
    assert_eq!(ctx.provider.count(|c| matches!(c, Call::Create(_))), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_region_is_validation_error() {
    let ctx = context(FakeProvider::new());

    let err = provisioning::provision(&ctx, &alice(), &ProvisionRequest::new("img-1", "Test", "mars"))
        .await
        .expect_err("unknown region");

    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert_eq!(ctx.provider.count(|c| matches!(c, Call::Create(_))), 0);
}

#[tokio::test(start_paused = true)]
async fn test_bad_name_is_validation_error() {
    let ctx = context(FakeProvider::new());

    let err = provisioning::provision(&ctx, &alice(), &ProvisionRequest::new("img-1", "a;b", "dfw"))
        .await
        .expect_err("bad name");

    assert!(matches!(err, OrchestratorError::Validation(_)));
}

// ── Empty create response ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_empty_create_response_is_rechecked_not_retried() {
    let provider = FakeProvider::new();
    provider.create_returns_empty.set(true);
    let ctx = context(provider);

    let handle = provisioning::provision(&ctx, &alice(), &request())
        .await
        .expect("adopted from instance list");

    assert_eq!(handle.id, "inst-1");
    assert_eq!(ctx.provider.count(|c| matches!(c, Call::Create(_))), 1);
    assert_eq!(ctx.provider.count(|c| *c == Call::List), 1);
    let record = ctx.registry.get("inst-1").expect("tracked");
    assert_eq!(record.creator, alice());
    assert_eq!(
        ctx.provider.view_of("inst-1").expect("exists").firewall_group_id,
        FIREWALL_ID
    );
}
