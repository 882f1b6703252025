//! Delta loss and repair: every delta toward one station is dropped, and
//! state-hash reconciliation plus full-state transfer heal the divergence.

mod common;

use common::*;
use gm_test_utils::{Hub, ManualClock};
use std::net::IpAddr;

const CODES: [&str; 5] = ["P-1", "P-2", "P-3", "P-4", "P-5"];

fn is_delta(payload: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Value>(payload)
        .map(|v| v["type"] == "delta")
        .unwrap_or(false)
}

#[tokio::test(start_paused = true)]
async fn dropped_deltas_heal_within_one_hash_cycle() {
    let hub = Hub::new(PORT);
    let clock = ManualClock::new(T0);
    let a = start_node(&hub, &clock, IP_A, 0xA).await;
    let b = start_node(&hub, &clock, IP_B, 0xB).await;
    settle().await;

    // Every delta toward B vanishes; everything else flows.
    let ip_b: IpAddr = IP_B.parse().unwrap();
    hub.set_drop_fn(move |payload, _from, to| to == ip_b && is_delta(payload));

    for code in CODES {
        assert!(a.submit_scan(code).await.unwrap().allowed);
    }
    settle().await;

    // B saw nothing; A is still waiting on five acks.
    assert_eq!(b.state_hash().await, "empty");
    assert_eq!(a.query_health().await.pending_acks, 5);

    // One state-hash interval later B notices the mismatch, requests state,
    // and receives A's full state (not a delta, so it gets through).
    advance(&clock, 21_000).await;

    assert_eq!(a.state_hash().await, b.state_hash().await);
    let view = b.query_state().await;
    for code in CODES {
        assert_eq!(view[code].scans.len(), 1, "{code} repaired");
    }

    // The unacked deltas age out at the attempt cap rather than lingering.
    advance(&clock, 15_000).await;
    assert_eq!(a.query_health().await.pending_acks, 0);

    a.shutdown().await;
    b.shutdown().await;
}

/// With broadcast refused by the environment, payloads land on the
/// persistent retry queue and drain once broadcast comes back.
#[tokio::test(start_paused = true)]
async fn refused_broadcast_queues_and_drains() {
    let hub = Hub::new(PORT);
    let clock = ManualClock::new(T0);

    hub.set_broadcast_enabled(false);
    let a = start_node(&hub, &clock, IP_A, 0xA).await;
    settle().await;

    // The post-init state-request broadcast failed and was queued.
    assert!(a.query_health().await.pending_broadcasts >= 1);

    hub.set_broadcast_enabled(true);
    let b = start_node(&hub, &clock, IP_B, 0xB).await;

    // One retry-queue tick later the queue is empty and the queued
    // state-request has reached B.
    advance(&clock, 4_000).await;
    assert_eq!(a.query_health().await.pending_broadcasts, 0);
    assert_eq!(b.query_health().await.peers_connected, 1);

    a.shutdown().await;
    b.shutdown().await;
}
