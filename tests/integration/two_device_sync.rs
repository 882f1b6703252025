//! Two-station replication: discovery, delta dissemination, acks, and
//! duplicate suppression.

mod common;

use common::*;
use gm_protocol::{DeltaMsg, GossipMessage, ScanRecord};
use gm_test_utils::{Hub, ManualClock};
use mesh_core::day_key;
use uuid::Uuid;

#[tokio::test(start_paused = true)]
async fn stations_discover_each_other() {
    let hub = Hub::new(PORT);
    let clock = ManualClock::new(T0);
    let a = start_node(&hub, &clock, IP_A, 0xA).await;
    let b = start_node(&hub, &clock, IP_B, 0xB).await;
    settle().await;

    assert_eq!(a.query_health().await.peers_connected, 1);
    assert_eq!(b.query_health().await.peers_connected, 1);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn delta_reaches_peer_and_ack_clears_pending() {
    let hub = Hub::new(PORT);
    let clock = ManualClock::new(T0);
    let a = start_node(&hub, &clock, IP_A, 0xA).await;
    let b = start_node(&hub, &clock, IP_B, 0xB).await;
    settle().await;

    let outcome = a.submit_scan("GA-0001").await.unwrap();
    assert!(outcome.allowed);
    settle().await;

    // B learned the scan through the delta, not through full sync.
    let view = b.query_state().await;
    assert_eq!(view["GA-0001"].scans.len(), 1);
    assert_eq!(view["GA-0001"].scans[0].device_id, a.device_id());
    assert_eq!(a.state_hash().await, b.state_hash().await);

    // B's ack removed the pending entry.
    assert_eq!(a.query_health().await.pending_acks, 0);

    // B now has a last-sync stamp.
    assert_eq!(b.query_health().await.time_since_last_sync_s, Some(0));

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scans_flow_both_ways() {
    let hub = Hub::new(PORT);
    let clock = ManualClock::new(T0);
    let a = start_node(&hub, &clock, IP_A, 0xA).await;
    let b = start_node(&hub, &clock, IP_B, 0xB).await;
    settle().await;

    assert!(a.submit_scan("GA-0001").await.unwrap().allowed);
    advance(&clock, 1_000).await;
    assert!(b.submit_scan("GA-0002").await.unwrap().allowed);
    settle().await;

    for node in [&a, &b] {
        let view = node.query_state().await;
        assert_eq!(view["GA-0001"].scans.len(), 1);
        assert_eq!(view["GA-0002"].scans.len(), 1);
    }
    assert_eq!(a.state_hash().await, b.state_hash().await);

    a.shutdown().await;
    b.shutdown().await;
}

/// Law: a re-delivered delta with a known message id changes nothing and
/// produces no extra ack.
#[tokio::test(start_paused = true)]
async fn duplicate_delta_yields_one_ack_and_no_state_change() {
    let hub = Hub::new(PORT);
    let clock = ManualClock::new(T0);
    let b = start_node(&hub, &clock, IP_B, 0xB).await;

    // A bare wire endpoint playing a peer station.
    let (spy, mut spy_rx) = hub.attach(IP_C.parse().unwrap());
    let message_id = Uuid::from_u128(0xF00D);
    let delta = GossipMessage::Delta(DeltaMsg {
        device_id: "spy-dev".to_owned(),
        sequence_num: 1,
        ts_ms: T0,
        message_id,
        deltas: vec![ScanRecord {
            scan_id: Uuid::from_u128(0xBEEF),
            qr_code: "GA-0001".to_owned(),
            ts_ms: T0,
            device_id: "spy-dev".to_owned(),
            day: day_key(T0),
        }],
    });
    let payload = serde_json::to_vec(&delta).unwrap();
    let dest = format!("{IP_B}:{PORT}").parse().unwrap();

    use mesh_core::Transport;
    spy.send_unicast(&payload, dest).await.unwrap();
    settle().await;
    spy.send_unicast(&payload, dest).await.unwrap();
    settle().await;

    let acks: Vec<_> = drain_messages(&mut spy_rx)
        .into_iter()
        .filter_map(|msg| match msg {
            GossipMessage::Ack(ack) => Some(ack),
            _ => None,
        })
        .collect();
    assert_eq!(acks.len(), 1, "exactly one ack for the duplicated delta");
    assert_eq!(acks[0].ack_message_id, message_id);

    let view = b.query_state().await;
    assert_eq!(view["GA-0001"].scans.len(), 1, "duplicate merged nothing");

    b.shutdown().await;
}
