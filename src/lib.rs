// gate-mesh: Umbrella crate.
//
// Re-exports the sync core surface so shells and the integration suites
// depend on one crate.  All implementation lives in crates/.

pub use mesh_core::{
    Clock, ConfigSnapshot, CoreConfig, CoreError, CoreResult, Datagram, DenyReason, Health,
    IdSource, ReplicaView, ScanOutcome, SyncCore, SystemClock, Transport, UdpTransport, UuidIds,
    day_key, load_config, load_config_from_path,
};
