//! A station with an empty store joins a fleet that already has history and
//! converges through state-request → full-state.

mod common;

use common::*;
use gm_test_utils::{Hub, ManualClock};
use mesh_core::DenyReason;

#[tokio::test(start_paused = true)]
async fn empty_station_pulls_full_state_on_join() {
    let hub = Hub::new(PORT);
    let clock = ManualClock::new(T0);
    let a = start_node(&hub, &clock, IP_A, 0xA).await;
    let b = start_node(&hub, &clock, IP_B, 0xB).await;
    settle().await;

    assert!(a.submit_scan("VIP-0042").await.unwrap().allowed);
    advance(&clock, 1_000).await;
    assert!(b.submit_scan("GA-0001").await.unwrap().allowed);
    settle().await;
    assert_eq!(a.state_hash().await, b.state_hash().await);

    // C starts cold: its post-init state-request pulls the fleet's state.
    let c = start_node(&hub, &clock, IP_C, 0xC).await;
    settle().await;

    assert_eq!(c.state_hash().await, a.state_hash().await);
    let view = c.query_state().await;
    assert_eq!(view["VIP-0042"].scans.len(), 1);
    assert_eq!(view["GA-0001"].scans.len(), 1);

    // Health reflects the new peers immediately.
    assert!(c.query_health().await.peers_connected >= 1);
    assert_eq!(a.query_health().await.peers_connected, 2);

    // The merged history binds C's admission.
    let reuse = c.submit_scan("VIP-0042").await.unwrap();
    assert!(!reuse.allowed);
    assert_eq!(reuse.reason, Some(DenyReason::OneUseAlreadyUsed));

    a.shutdown().await;
    b.shutdown().await;
    c.shutdown().await;
}

/// The late joiner also learns pass declarations it never had locally.
#[tokio::test(start_paused = true)]
async fn late_joiner_learns_unknown_codes_from_full_state() {
    let hub = Hub::new(PORT);
    let clock = ManualClock::new(T0);
    let a = start_node(&hub, &clock, IP_A, 0xA).await;
    settle().await;

    assert!(a.submit_scan("GA-0002").await.unwrap().allowed);

    // C's snapshot is missing GA-0002 entirely.
    let mut store = gm_store::Store::open_in_memory().unwrap();
    store
        .save_config(r#"{ "passes": { "GA-0001": { "type": "infinite" } } }"#)
        .unwrap();
    let c = start_node_with_store(&hub, &clock, IP_C, 0xC, store).await;
    settle().await;

    // Declared type and scans both arrived with the full state.
    let config = c.query_config().await;
    assert_eq!(
        config.passes.get("GA-0002").map(|p| p.kind),
        Some(gm_protocol::PassKind::Infinite)
    );
    assert_eq!(c.query_state().await["GA-0002"].scans.len(), 1);

    // Cooldown applies to the learned scan like any other.
    let blocked = c.submit_scan("GA-0002").await.unwrap();
    assert!(!blocked.allowed);
    assert_eq!(blocked.reason, Some(DenyReason::Cooldown));

    a.shutdown().await;
    c.shutdown().await;
}
