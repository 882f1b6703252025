// gm-test-utils: Shared test utilities for the sync suite.
//
// Provides an in-memory datagram fabric standing in for the LAN, a manual
// clock, and a deterministic id source, so whole-fleet scenarios run under
// paused tokio time with no sockets.

pub mod hub;
pub mod time;

pub use hub::{Hub, HubTransport};
pub use time::{ManualClock, SeqIds};
