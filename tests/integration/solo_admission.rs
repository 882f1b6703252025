//! Single-station admission scenarios: one-use, cooldown, unknown codes,
//! and local at-most-once under concurrency.

mod common;

use common::*;
use gm_test_utils::{Hub, ManualClock};
use mesh_core::DenyReason;

#[tokio::test(start_paused = true)]
async fn one_use_allows_once_per_day() {
    let hub = Hub::new(PORT);
    let clock = ManualClock::new(T0);
    let node = start_node(&hub, &clock, IP_A, 0xA).await;

    let first = node.submit_scan("VIP-0042").await.unwrap();
    assert!(first.allowed);
    assert_eq!(first.today_count, Some(0));
    assert_eq!(first.reason, None);

    // Well past the cooldown: the one-use rule itself must fire.
    advance(&clock, 31_000).await;
    let second = node.submit_scan("VIP-0042").await.unwrap();
    assert!(!second.allowed);
    assert_eq!(second.reason, Some(DenyReason::OneUseAlreadyUsed));
    assert_eq!(second.today_count, None);

    node.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn infinite_pass_cooldown_cycle() {
    let hub = Hub::new(PORT);
    let clock = ManualClock::new(T0);
    let node = start_node(&hub, &clock, IP_A, 0xA).await;

    assert!(node.submit_scan("GA-0001").await.unwrap().allowed);

    advance(&clock, 5_000).await;
    let blocked = node.submit_scan("GA-0001").await.unwrap();
    assert!(!blocked.allowed);
    assert_eq!(blocked.reason, Some(DenyReason::Cooldown));

    advance(&clock, 26_000).await; // t0 + 31s
    let again = node.submit_scan("GA-0001").await.unwrap();
    assert!(again.allowed);
    assert_eq!(again.today_count, Some(1));

    node.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unknown_code_is_denied() {
    let hub = Hub::new(PORT);
    let clock = ManualClock::new(T0);
    let node = start_node(&hub, &clock, IP_A, 0xA).await;

    let outcome = node.submit_scan("NOT-A-PASS").await.unwrap();
    assert!(!outcome.allowed);
    assert_eq!(outcome.reason, Some(DenyReason::Unknown));

    // Nothing entered the replica.
    assert_eq!(node.state_hash().await, "empty");

    node.shutdown().await;
}

/// Across concurrent submits on one device, at most one scan of a one-use
/// code passes.
#[tokio::test(start_paused = true)]
async fn concurrent_local_submits_admit_at_most_once() {
    let hub = Hub::new(PORT);
    let clock = ManualClock::new(T0);
    let node = start_node(&hub, &clock, IP_A, 0xA).await;

    let first = tokio::spawn({
        let node = node.clone();
        async move { node.submit_scan("W-0001").await.unwrap() }
    });
    let second = tokio::spawn({
        let node = node.clone();
        async move { node.submit_scan("W-0001").await.unwrap() }
    });

    let (a, b) = (first.await.unwrap(), second.await.unwrap());
    let allowed = [&a, &b].iter().filter(|o| o.allowed).count();
    assert_eq!(allowed, 1, "exactly one local winner");

    let view = node.query_state().await;
    assert_eq!(view["W-0001"].scans.len(), 1);

    node.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn health_starts_quiet() {
    let hub = Hub::new(PORT);
    let clock = ManualClock::new(T0);
    let node = start_node(&hub, &clock, IP_A, 0xA).await;

    let health = node.query_health().await;
    assert_eq!(health.peers_connected, 0);
    assert_eq!(health.pending_acks, 0);
    assert_eq!(health.pending_broadcasts, 0);
    assert_eq!(health.time_since_last_sync_s, None);

    node.shutdown().await;
}
