//! Station configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/gate-mesh/station.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//! - `store.sqlite_path`
//!
//! Everything else carries a default.  Timer periods of 0 disable that
//! timer (convergence latency degrades; CRDT correctness is unaffected).
//!
//! # Pass snapshot
//! `passes.snapshot_path` points at a JSON file of the shape
//! `{ "passes": { "<code>": { "type": "one-use", "days": {...}, "count": 0 } } }`.
//! The snapshot is read on first run and persisted into the store; later
//! runs prefer the persisted copy.

use gm_protocol::PassKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

/// Well-known gossip port.
pub const DEFAULT_PORT: u16 = 43210;
/// Reference cooldown window (ms).
pub const DEFAULT_COOLDOWN_MS: i64 = 30_000;

// ---------------------------------------------------------------------------
// Config types (validated)
// ---------------------------------------------------------------------------

/// Top-level station configuration.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub schema_version: u32,
    /// Optional human-readable name for this station (e.g. "Gate 3").
    pub display_name: Option<String>,
    pub network: NetworkConfig,
    pub store: StoreConfig,
    pub admission: AdmissionConfig,
    pub passes: PassesConfig,
    pub timers: TimerConfig,
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// UDP port shared by the whole fleet.
    pub port: u16,
    /// Explicit subnet broadcast address; None means infer (local IP with
    /// last octet 255, falling back to 255.255.255.255).
    pub broadcast_addr: Option<IpAddr>,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub sqlite_path: String,
}

#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub cooldown_ms: i64,
}

#[derive(Debug, Clone)]
pub struct PassesConfig {
    /// Bundled pass snapshot; None means rely on the persisted copy.
    pub snapshot_path: Option<String>,
}

/// Gossip timer periods in seconds; 0 disables a timer.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    pub heartbeat_s: u64,
    pub retry_ack_s: u64,
    pub state_hash_s: u64,
    pub full_sync_s: u64,
    pub retry_queue_s: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        TimerConfig {
            heartbeat_s: 10,
            retry_ack_s: 2,
            state_hash_s: 20,
            full_sync_s: 30,
            retry_queue_s: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Pass snapshot types
// ---------------------------------------------------------------------------

/// The replicated config snapshot: per-code pass declarations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub passes: BTreeMap<String, PassConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassConfig {
    #[serde(rename = "type")]
    pub kind: PassKind,
    /// Optional per-day admission flags (carried data; the admission
    /// predicate reads only `kind`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<BTreeMap<String, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

impl ConfigSnapshot {
    pub fn from_json(blob: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(blob).map_err(|e| ConfigError::Parse(format!("pass snapshot: {e}")))
    }

    pub fn to_json(&self) -> String {
        // BTreeMap keys keep this deterministic.
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"passes":{}}"#.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    display_name: Option<String>,
    network: Option<RawNetworkConfig>,
    store: Option<RawStoreConfig>,
    admission: Option<RawAdmissionConfig>,
    passes: Option<RawPassesConfig>,
    timers: Option<RawTimerConfig>,
}

#[derive(Debug, Deserialize)]
struct RawNetworkConfig {
    port: Option<u16>,
    broadcast_addr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStoreConfig {
    sqlite_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAdmissionConfig {
    cooldown_ms: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawPassesConfig {
    snapshot_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTimerConfig {
    heartbeat_s: Option<u64>,
    retry_ack_s: Option<u64>,
    state_hash_s: Option<u64>,
    full_sync_s: Option<u64>,
    retry_queue_s: Option<u64>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load station config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<CoreConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load station config from the default path `/etc/gate-mesh/station.toml`.
pub fn load_config() -> Result<CoreConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/gate-mesh/station.toml"))
}

/// Load station config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<CoreConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    // Validate schema_version
    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {}",
            schema_version
        )));
    }

    // Network defaults
    let network = match raw.network {
        Some(n) => NetworkConfig {
            port: n.port.unwrap_or(DEFAULT_PORT),
            broadcast_addr: match n.broadcast_addr {
                Some(s) => Some(s.parse().map_err(|_| {
                    ConfigError::InvalidValue(format!("network.broadcast_addr: '{}'", s))
                })?),
                None => None,
            },
        },
        None => NetworkConfig {
            port: DEFAULT_PORT,
            broadcast_addr: None,
        },
    };

    // Store path is required: there is no sensible default location on
    // every platform the stations run on.
    let raw_store = raw
        .store
        .ok_or_else(|| ConfigError::MissingField("store".to_owned()))?;
    let sqlite_path = raw_store
        .sqlite_path
        .ok_or_else(|| ConfigError::MissingField("store.sqlite_path".to_owned()))?;

    let admission = AdmissionConfig {
        cooldown_ms: raw
            .admission
            .and_then(|a| a.cooldown_ms)
            .unwrap_or(DEFAULT_COOLDOWN_MS),
    };
    if admission.cooldown_ms < 0 {
        return Err(ConfigError::InvalidValue(
            "admission.cooldown_ms must be >= 0".to_owned(),
        ));
    }

    let passes = PassesConfig {
        snapshot_path: raw.passes.and_then(|p| p.snapshot_path),
    };

    let defaults = TimerConfig::default();
    let timers = match raw.timers {
        Some(t) => TimerConfig {
            heartbeat_s: t.heartbeat_s.unwrap_or(defaults.heartbeat_s),
            retry_ack_s: t.retry_ack_s.unwrap_or(defaults.retry_ack_s),
            state_hash_s: t.state_hash_s.unwrap_or(defaults.state_hash_s),
            full_sync_s: t.full_sync_s.unwrap_or(defaults.full_sync_s),
            retry_queue_s: t.retry_queue_s.unwrap_or(defaults.retry_queue_s),
        },
        None => defaults,
    };

    Ok(CoreConfig {
        schema_version,
        display_name: raw.display_name,
        network,
        store: StoreConfig { sqlite_path },
        admission,
        passes,
        timers,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {}", s),
            ConfigError::Parse(s) => write!(f, "Parse error: {}", s),
            ConfigError::MissingField(s) => write!(f, "Missing required field: {}", s),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}
