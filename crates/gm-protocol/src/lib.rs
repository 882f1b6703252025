// gm-protocol: Gossip wire protocol types and serialization.
//
// All datagrams use a top-level `type` field for discriminated
// deserialization.  The enum variants map 1:1 to the six frozen gossip
// message kinds.  Field names are camelCase on the wire for cross-version
// compatibility with older station firmware.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Shared sub-types
// ---------------------------------------------------------------------------

/// A single scan event — the sole replicated atom.
///
/// Immutable once created.  Replica membership is keyed by `scan_id`; the
/// remaining fields are payload.  `qr_code` and `device_id` must be
/// non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    /// Globally-unique id minted at the originating device at scan time.
    pub scan_id: Uuid,
    /// The credential code as read from the barcode.
    pub qr_code: String,
    /// Wall-clock milliseconds at origination.
    #[serde(rename = "timestamp")]
    pub ts_ms: i64,
    /// Persistent identity of the originating device.
    pub device_id: String,
    /// Event-day bucket, e.g. "14nov".
    #[serde(rename = "date")]
    pub day: String,
}

/// Admission class of a credential code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PassKind {
    /// Unlimited re-entry; only the cooldown window applies.
    Infinite,
    /// At most one accepted scan per event-day.
    OneUse,
}

/// Per-code slice of a full-state snapshot: declared pass kind plus every
/// scan the sender holds for that code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeState {
    #[serde(rename = "type")]
    pub pass_type: PassKind,
    pub scans: Vec<ScanRecord>,
}

/// Map shape of the `fullState` field: code → declared state.
///
/// BTreeMap so serialization order is deterministic across devices.
pub type FullState = BTreeMap<String, CodeState>;

// ---------------------------------------------------------------------------
// Message bodies
// ---------------------------------------------------------------------------

/// One or more newly-learned scan events.
///
/// Carries a `message_id` so the receiver can acknowledge and the sender can
/// retry per peer.  Receivers suppress duplicates by `message_id` before
/// merging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaMsg {
    pub device_id: String,
    pub sequence_num: u64,
    #[serde(rename = "timestamp")]
    pub ts_ms: i64,
    pub message_id: Uuid,
    pub deltas: Vec<ScanRecord>,
}

/// The sender's entire replica, used for late-joiner catch-up and periodic
/// anti-entropy repair.  Not acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullStateMsg {
    pub device_id: String,
    pub sequence_num: u64,
    #[serde(rename = "timestamp")]
    pub ts_ms: i64,
    pub full_state: FullState,
}

/// Request for peers to send their full state.  Always broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRequestMsg {
    pub device_id: String,
    pub sequence_num: u64,
    #[serde(rename = "timestamp")]
    pub ts_ms: i64,
}

/// Acknowledgement of a single `delta` message, unicast to its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckMsg {
    pub device_id: String,
    pub sequence_num: u64,
    #[serde(rename = "timestamp")]
    pub ts_ms: i64,
    pub ack_message_id: Uuid,
}

/// Liveness beacon carrying the sender's current state hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatMsg {
    pub device_id: String,
    pub sequence_num: u64,
    #[serde(rename = "timestamp")]
    pub ts_ms: i64,
    pub state_hash: String,
}

/// Cheap divergence probe: receivers compare against their own hash and
/// pull a full state on mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateHashMsg {
    pub device_id: String,
    pub sequence_num: u64,
    #[serde(rename = "timestamp")]
    pub ts_ms: i64,
    pub state_hash: String,
}

// ---------------------------------------------------------------------------
// Top-level discriminated union
// ---------------------------------------------------------------------------

/// All gossip datagram kinds.
///
/// Serializes/deserializes using the `type` field as a tag:
///
/// ```json
/// { "type": "delta", "deviceId": "...", ... }
/// ```
///
/// Unknown `type` values and malformed bodies fail deserialization; callers
/// drop such datagrams silently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "kebab-case")]
pub enum GossipMessage {
    Delta(DeltaMsg),
    FullState(FullStateMsg),
    StateRequest(StateRequestMsg),
    Ack(AckMsg),
    Heartbeat(HeartbeatMsg),
    StateHash(StateHashMsg),
}

impl GossipMessage {
    /// The sender's device id.
    pub fn device_id(&self) -> &str {
        match self {
            GossipMessage::Delta(m) => &m.device_id,
            GossipMessage::FullState(m) => &m.device_id,
            GossipMessage::StateRequest(m) => &m.device_id,
            GossipMessage::Ack(m) => &m.device_id,
            GossipMessage::Heartbeat(m) => &m.device_id,
            GossipMessage::StateHash(m) => &m.device_id,
        }
    }

    /// The ack-tracked message id, present only on `delta`.
    pub fn message_id(&self) -> Option<Uuid> {
        match self {
            GossipMessage::Delta(m) => Some(m.message_id),
            _ => None,
        }
    }

    /// The sender's state hash, carried by `heartbeat` and `state-hash`.
    pub fn state_hash(&self) -> Option<&str> {
        match self {
            GossipMessage::Heartbeat(m) => Some(&m.state_hash),
            GossipMessage::StateHash(m) => Some(&m.state_hash),
            _ => None,
        }
    }

    /// True for `heartbeat` (drives `last_heartbeat_ms` on the peer record).
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, GossipMessage::Heartbeat(_))
    }

    /// Wire kind string, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            GossipMessage::Delta(_) => "delta",
            GossipMessage::FullState(_) => "full-state",
            GossipMessage::StateRequest(_) => "state-request",
            GossipMessage::Ack(_) => "ack",
            GossipMessage::Heartbeat(_) => "heartbeat",
            GossipMessage::StateHash(_) => "state-hash",
        }
    }
}
