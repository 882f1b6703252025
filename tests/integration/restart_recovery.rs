//! Restart durability: the replica, projection, and device identity come
//! back from SQLite, and admission decisions survive the round trip.

mod common;

use common::*;
use gm_store::Store;
use gm_test_utils::{Hub, ManualClock};
use mesh_core::DenyReason;

#[tokio::test(start_paused = true)]
async fn replica_and_identity_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("station.sqlite3");
    let hub = Hub::new(PORT);
    let clock = ManualClock::new(T0);

    let device_id = {
        let mut store = Store::open(&path).unwrap();
        store.save_config(PASSES).unwrap();
        let node = start_node_with_store(&hub, &clock, IP_A, 0xA1, store).await;

        assert!(node.submit_scan("VIP-0042").await.unwrap().allowed);
        advance(&clock, 31_000).await;
        assert!(node.submit_scan("GA-0001").await.unwrap().allowed);

        let device_id = node.device_id().to_owned();
        node.shutdown().await;
        device_id
    };

    advance(&clock, 31_000).await;

    // Same file, fresh process (new id base: minted ids must not repeat).
    let store = Store::open(&path).unwrap();
    let node = start_node_with_store(&hub, &clock, IP_A, 0xA2, store).await;

    assert_eq!(node.device_id(), device_id, "identity is stable");

    let view = node.query_state().await;
    assert_eq!(view["VIP-0042"].scans.len(), 1);
    assert_eq!(view["GA-0001"].scans.len(), 1);
    assert_ne!(node.state_hash().await, "empty");

    // The rebuilt replica still enforces the one-use rule.
    let reuse = node.submit_scan("VIP-0042").await.unwrap();
    assert!(!reuse.allowed);
    assert_eq!(reuse.reason, Some(DenyReason::OneUseAlreadyUsed));

    // And the infinite pass is clear of its cooldown by now.
    assert!(node.submit_scan("GA-0001").await.unwrap().allowed);

    node.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn projection_counts_rebuild_deterministically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("station.sqlite3");
    let hub = Hub::new(PORT);
    let clock = ManualClock::new(T0);

    {
        let mut store = Store::open(&path).unwrap();
        store.save_config(PASSES).unwrap();
        let node = start_node_with_store(&hub, &clock, IP_A, 0xB1, store).await;
        assert!(node.submit_scan("GA-0001").await.unwrap().allowed);
        advance(&clock, 31_000).await;
        assert!(node.submit_scan("GA-0001").await.unwrap().allowed);
        node.shutdown().await;
    }

    let store = Store::open(&path).unwrap();
    let node = start_node_with_store(&hub, &clock, IP_A, 0xB2, store).await;

    let config = node.query_config().await;
    assert_eq!(config.passes["GA-0001"].count, Some(2));

    node.shutdown().await;
}
