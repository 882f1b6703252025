// mesh-core: Offline peer-to-peer scan synchronization.
//
// Owns the replica CRDT, the admission predicate, the peer table, and the
// UDP gossip engine.  The capture shell consumes the `SyncCore` surface and
// nothing else.

pub mod admission;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod outbox;
pub mod peers;
pub mod replica;
pub mod transport;

pub use admission::{DenyReason, ScanOutcome};
pub use clock::{Clock, IdSource, SystemClock, UuidIds, day_key};
pub use config::{ConfigSnapshot, CoreConfig, load_config, load_config_from_path};
pub use engine::{Health, ReplicaView, SyncCore};
pub use error::{CoreError, CoreResult};
pub use transport::{Datagram, Transport, UdpTransport};
