//! Shared helpers for the integration suites.
//!
//! Every suite runs a small fleet of cores over the in-memory hub with one
//! shared manual clock, under paused tokio time.
#![allow(dead_code)]

use gm_protocol::GossipMessage;
use gm_store::Store;
use gm_test_utils::{Hub, HubTransport, ManualClock, SeqIds};
use mesh_core::SyncCore;
use mesh_core::config::{
    AdmissionConfig, CoreConfig, NetworkConfig, PassesConfig, StoreConfig, TimerConfig,
};
use mesh_core::transport::Datagram;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Fleet port shared by every fake station.
pub const PORT: u16 = 43210;

/// 2024-11-14 09:46:40 UTC — a mid-day instant so small advances never
/// cross a local-time day boundary.
pub const T0: i64 = 1_731_580_000_000;

pub const IP_A: &str = "10.1.0.1";
pub const IP_B: &str = "10.1.0.2";
pub const IP_C: &str = "10.1.0.3";

/// The bundled pass snapshot used across the suites.
pub const PASSES: &str = r#"{ "passes": {
    "GA-0001":  { "type": "infinite" },
    "GA-0002":  { "type": "infinite" },
    "VIP-0042": { "type": "one-use" },
    "W-0001":   { "type": "one-use" },
    "P-1": { "type": "one-use" },
    "P-2": { "type": "one-use" },
    "P-3": { "type": "one-use" },
    "P-4": { "type": "one-use" },
    "P-5": { "type": "one-use" }
} }"#;

pub fn test_config() -> CoreConfig {
    CoreConfig {
        schema_version: 1,
        display_name: None,
        network: NetworkConfig {
            port: PORT,
            broadcast_addr: None,
        },
        store: StoreConfig {
            // Unused: suites hand a pre-opened store to init_with.
            sqlite_path: ":memory:".to_owned(),
        },
        admission: AdmissionConfig {
            cooldown_ms: 30_000,
        },
        passes: PassesConfig {
            snapshot_path: None,
        },
        timers: TimerConfig::default(),
    }
}

/// Start a station on the hub with a fresh in-memory store seeded with the
/// shared pass snapshot.
pub async fn start_node(
    hub: &Arc<Hub>,
    clock: &ManualClock,
    ip: &str,
    id_base: u128,
) -> Arc<SyncCore<HubTransport>> {
    let mut store = Store::open_in_memory().expect("open store");
    store.save_config(PASSES).expect("seed passes");
    start_node_with_store(hub, clock, ip, id_base, store).await
}

/// Start a station on the hub against an existing store (restart suites).
pub async fn start_node_with_store(
    hub: &Arc<Hub>,
    clock: &ManualClock,
    ip: &str,
    id_base: u128,
    store: Store,
) -> Arc<SyncCore<HubTransport>> {
    let (transport, inbound) = hub.attach(ip.parse().expect("ip"));
    SyncCore::init_with(
        test_config(),
        store,
        transport,
        inbound,
        Arc::new(clock.clone()),
        Arc::new(SeqIds::new(id_base)),
    )
    .await
    .expect("init")
}

/// Let the receive loops and any message cascade drain.
pub async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

/// Advance both clocks (manual + tokio virtual) and settle.
///
/// Steps one second at a time so every timer keeps its cadence instead of
/// collapsing a long jump into a single tick.
pub async fn advance(clock: &ManualClock, ms: u64) {
    let mut remaining = ms;
    while remaining > 0 {
        let step = remaining.min(1_000);
        clock.advance(step as i64);
        tokio::time::advance(std::time::Duration::from_millis(step)).await;
        settle().await;
        remaining -= step;
    }
}

/// Drain a raw attach()ed receiver, parsing every datagram.
pub fn drain_messages(rx: &mut mpsc::Receiver<Datagram>) -> Vec<GossipMessage> {
    let mut messages = Vec::new();
    while let Ok(dgram) = rx.try_recv() {
        if let Ok(msg) = serde_json::from_slice(&dgram.payload) {
            messages.push(msg);
        }
    }
    messages
}
