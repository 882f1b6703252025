//! The double-swipe race: two stations admit the same one-use code before
//! either hears from the other.  Both events are kept; later stations see
//! the code as used.

mod common;

use common::*;
use gm_test_utils::{Hub, ManualClock};
use mesh_core::DenyReason;

#[tokio::test(start_paused = true)]
async fn simultaneous_one_use_accepts_are_both_kept() {
    let hub = Hub::new(PORT);
    let clock = ManualClock::new(T0);
    let a = start_node(&hub, &clock, IP_A, 0xA).await;
    let b = start_node(&hub, &clock, IP_B, 0xB).await;
    settle().await;

    // Back-to-back submits with no scheduler yield in between: neither
    // station has processed the other's delta when it admits.
    let at_a = a.submit_scan("VIP-0042").await.unwrap();
    let at_b = b.submit_scan("VIP-0042").await.unwrap();
    assert!(at_a.allowed, "station A admits locally");
    assert!(at_b.allowed, "station B admits locally");

    settle().await;

    // After the deltas cross, both replicas carry both events — the CRDT
    // records the double swipe rather than resolving it away.
    for node in [&a, &b] {
        let view = node.query_state().await;
        assert_eq!(view["VIP-0042"].scans.len(), 2);
    }
    assert_eq!(a.state_hash().await, b.state_hash().await);

    // A third station that catches up denies any further use.
    let c = start_node(&hub, &clock, IP_C, 0xC).await;
    settle().await;
    assert_eq!(c.query_state().await["VIP-0042"].scans.len(), 2);

    let at_c = c.submit_scan("VIP-0042").await.unwrap();
    assert!(!at_c.allowed);
    assert_eq!(at_c.reason, Some(DenyReason::OneUseAlreadyUsed));

    a.shutdown().await;
    b.shutdown().await;
    c.shutdown().await;
}

/// Once the deltas have crossed, the loser of a later local race sees the
/// merged state.
#[tokio::test(start_paused = true)]
async fn merged_state_blocks_reuse_everywhere() {
    let hub = Hub::new(PORT);
    let clock = ManualClock::new(T0);
    let a = start_node(&hub, &clock, IP_A, 0xA).await;
    let b = start_node(&hub, &clock, IP_B, 0xB).await;
    settle().await;

    assert!(a.submit_scan("W-0001").await.unwrap().allowed);
    settle().await;

    let at_b = b.submit_scan("W-0001").await.unwrap();
    assert!(!at_b.allowed, "B already merged A's accept");
    assert_eq!(at_b.reason, Some(DenyReason::OneUseAlreadyUsed));

    a.shutdown().await;
    b.shutdown().await;
}
