//! The known-peer table and per-peer connection phase machine.
//!
//! Peers are keyed by persistent device id and discovered from inbound
//! datagrams.  Stale peers stay in the table (enabling resumption after a
//! partition) but are excluded from peer counts and heartbeat targets.

use gm_store::PeerRow;
use std::collections::HashMap;
use std::net::IpAddr;

/// A peer is counted connected iff heard from within this window.
pub const LIVENESS_WINDOW_MS: i64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPhase {
    Discovering,
    Connected,
    Synced,
    Lost,
}

impl PeerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerPhase::Discovering => "discovering",
            PeerPhase::Connected => "connected",
            PeerPhase::Synced => "synced",
            PeerPhase::Lost => "lost",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "connected" => PeerPhase::Connected,
            "synced" => PeerPhase::Synced,
            "lost" => PeerPhase::Lost,
            _ => PeerPhase::Discovering,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub device_id: String,
    pub ip: Option<IpAddr>,
    pub last_seen_ms: i64,
    pub last_heartbeat_ms: i64,
    pub state_hash: Option<String>,
    pub phase: PeerPhase,
}

impl PeerRecord {
    pub fn to_row(&self) -> PeerRow {
        PeerRow {
            device_id: self.device_id.clone(),
            ip: self.ip.map(|ip| ip.to_string()),
            last_seen_ms: self.last_seen_ms,
            last_heartbeat_ms: self.last_heartbeat_ms,
            state_hash: self.state_hash.clone(),
            phase: self.phase.as_str().to_owned(),
        }
    }

    pub fn from_row(row: &PeerRow) -> Self {
        PeerRecord {
            device_id: row.device_id.clone(),
            ip: row.ip.as_deref().and_then(|s| s.parse().ok()),
            last_seen_ms: row.last_seen_ms,
            last_heartbeat_ms: row.last_heartbeat_ms,
            state_hash: row.state_hash.clone(),
            phase: PeerPhase::from_str(&row.phase),
        }
    }
}

#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<String, PeerRecord>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hydrate a record loaded from the store.
    pub fn insert_loaded(&mut self, record: PeerRecord) {
        self.peers.insert(record.device_id.clone(), record);
    }

    /// Upsert from an inbound datagram; returns true when the sender was
    /// previously unknown.
    ///
    /// Any inbound moves a `Discovering`/`Lost` peer to `Connected`;
    /// heartbeats additionally stamp `last_heartbeat_ms`; a carried state
    /// hash is recorded as-is.
    pub fn observe_inbound(
        &mut self,
        device_id: &str,
        ip: IpAddr,
        now_ms: i64,
        is_heartbeat: bool,
        state_hash: Option<&str>,
    ) -> bool {
        let newly_known = !self.peers.contains_key(device_id);
        let record = self
            .peers
            .entry(device_id.to_owned())
            .or_insert_with(|| PeerRecord {
                device_id: device_id.to_owned(),
                ip: None,
                last_seen_ms: 0,
                last_heartbeat_ms: 0,
                state_hash: None,
                phase: PeerPhase::Discovering,
            });

        record.ip = Some(ip);
        record.last_seen_ms = now_ms;
        if is_heartbeat {
            record.last_heartbeat_ms = now_ms;
        }
        if let Some(hash) = state_hash {
            record.state_hash = Some(hash.to_owned());
        }
        if matches!(record.phase, PeerPhase::Discovering | PeerPhase::Lost) {
            record.phase = PeerPhase::Connected;
        }

        newly_known
    }

    pub fn mark_synced(&mut self, device_id: &str) {
        if let Some(record) = self.peers.get_mut(device_id) {
            record.phase = PeerPhase::Synced;
        }
    }

    /// State-hash mismatch: a synced peer drops back to connected.
    pub fn mark_mismatch(&mut self, device_id: &str) {
        if let Some(record) = self.peers.get_mut(device_id) {
            if record.phase == PeerPhase::Synced {
                record.phase = PeerPhase::Connected;
            }
        }
    }

    /// Move peers outside the liveness window to `Lost`; returns the ids
    /// that transitioned.
    pub fn sweep_liveness(&mut self, now_ms: i64) -> Vec<String> {
        let mut transitioned = Vec::new();
        for record in self.peers.values_mut() {
            if record.phase != PeerPhase::Lost
                && now_ms - record.last_seen_ms >= LIVENESS_WINDOW_MS
            {
                record.phase = PeerPhase::Lost;
                transitioned.push(record.device_id.clone());
            }
        }
        transitioned
    }

    pub fn get(&self, device_id: &str) -> Option<&PeerRecord> {
        self.peers.get(device_id)
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Every known peer with a usable address, lost or not.
    pub fn known_ips(&self) -> Vec<IpAddr> {
        self.peers.values().filter_map(|p| p.ip).collect()
    }

    /// Peers inside the liveness window, with addresses.
    pub fn connected_ips(&self, now_ms: i64) -> Vec<IpAddr> {
        self.peers
            .values()
            .filter(|p| now_ms - p.last_seen_ms < LIVENESS_WINDOW_MS)
            .filter_map(|p| p.ip)
            .collect()
    }

    pub fn connected_count(&self, now_ms: i64) -> usize {
        self.peers
            .values()
            .filter(|p| now_ms - p.last_seen_ms < LIVENESS_WINDOW_MS)
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }
}
