//! Destruction confirmation loop.

#![allow(clippy::expect_used)]

use std::time::Duration;

use leasekeeper_cli::application::services::destruction_poller::{
    self, DESTROY_POLL_CEILING, DESTROY_POLL_INTERVAL, DestroyOutcome,
};
use leasekeeper_cli::domain::error::ProviderError;
use leasekeeper_cli::domain::instance::MetadataPatch;
use leasekeeper_common::InstanceStatus;
use tokio::time::Instant;

use crate::helpers::{FakeProvider, TestContext, alice, context};

fn tracked(ctx: &TestContext, id: &str) {
    ctx.provider.insert_running(id, "doomed");
    let now = ctx.now();
    ctx.registry.write(|r| {
        r.upsert(id, alice(), InstanceStatus::Running, &MetadataPatch::default(), now);
    });
}

#[tokio::test(start_paused = true)]
async fn test_busy_responses_are_retried_until_absent() {
    let ctx = context(FakeProvider::new());
    tracked(&ctx, "i-1");
    ctx.provider.script_deletes([
        ProviderError::Busy("locked".into()),
        ProviderError::Busy("locked".into()),
        ProviderError::NotFound,
    ]);
    let started = Instant::now();

    let outcome = destruction_poller::confirm_destruction(&ctx, "i-1").await;

    assert_eq!(outcome, DestroyOutcome::Confirmed);
    assert_eq!(ctx.provider.deletes_of("i-1"), 3);
    assert_eq!(started.elapsed(), DESTROY_POLL_INTERVAL * 2);
    assert_eq!(
        ctx.registry.get("i-1").expect("record").status,
        InstanceStatus::Destroyed
    );
}

#[tokio::test(start_paused = true)]
async fn test_already_absent_instance_is_confirmed_without_delete() {
    let ctx = context(FakeProvider::new());
    tracked(&ctx, "i-1");
    ctx.provider.remove("i-1");

    let outcome = destruction_poller::confirm_destruction(&ctx, "i-1").await;

    assert_eq!(outcome, DestroyOutcome::Confirmed);
    assert_eq!(ctx.provider.deletes_of("i-1"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_forbidden_counts_as_absent() {
    let ctx = context(FakeProvider::new());
    tracked(&ctx, "i-1");
    ctx.provider.fail_next_gets([ProviderError::Forbidden("not yours".into())]);

    let outcome = destruction_poller::confirm_destruction(&ctx, "i-1").await;

    assert_eq!(outcome, DestroyOutcome::Confirmed);
    assert_eq!(
        ctx.registry.get("i-1").expect("record").status,
        InstanceStatus::Destroyed
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_check_failures_do_not_confirm() {
    let ctx = context(FakeProvider::new());
    tracked(&ctx, "i-1");
    ctx.provider.fail_next_gets([ProviderError::Transport("reset".into())]);

    let outcome = destruction_poller::confirm_destruction(&ctx, "i-1").await;

    assert_eq!(outcome, DestroyOutcome::Confirmed);
    // The failed check issues no delete; the next tick deletes, the one after confirms.
    assert_eq!(ctx.provider.deletes_of("i-1"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_at_ceiling_and_leaves_record_active() {
    let ctx = context(FakeProvider::new());
    tracked(&ctx, "i-1");
    ctx.provider.fail_all_deletes(ProviderError::Busy("locked".into()));
    let started = Instant::now();

    let outcome = destruction_poller::confirm_destruction(&ctx, "i-1").await;

    assert_eq!(outcome, DestroyOutcome::TimedOut);
    assert!(started.elapsed() <= DESTROY_POLL_CEILING);
    assert!(started.elapsed() >= DESTROY_POLL_CEILING - Duration::from_secs(10));
    assert!(ctx.provider.exists("i-1"));
    assert_eq!(
        ctx.registry.get("i-1").expect("record").status,
        InstanceStatus::Running
    );
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_check_stops_without_retrying() {
    let ctx = context(FakeProvider::new());
    tracked(&ctx, "i-1");
    ctx.provider.fail_next_gets([ProviderError::Unauthorized("bad key".into())]);
    let started = Instant::now();

    let outcome = destruction_poller::confirm_destruction(&ctx, "i-1").await;

    assert_eq!(
        outcome,
        DestroyOutcome::Rejected(ProviderError::Unauthorized("bad key".into()))
    );
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(ctx.provider.deletes_of("i-1"), 0);
    assert_eq!(
        ctx.registry.get("i-1").expect("record").status,
        InstanceStatus::Running
    );
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_delete_stops_after_one_attempt() {
    let ctx = context(FakeProvider::new());
    tracked(&ctx, "i-1");
    ctx.provider.fail_all_deletes(ProviderError::Unauthorized("bad key".into()));

    let outcome = destruction_poller::confirm_destruction(&ctx, "i-1").await;

    assert!(matches!(outcome, DestroyOutcome::Rejected(_)), "{outcome:?}");
    assert_eq!(ctx.provider.deletes_of("i-1"), 1);
    assert!(ctx.provider.exists("i-1"));
}
