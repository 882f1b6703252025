//! Pinned time and id sources for deterministic suites.

use mesh_core::{Clock, IdSource};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use uuid::Uuid;

/// A clock that only moves when the test says so.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now_ms: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        ManualClock {
            now_ms: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Deterministic id source: `base` tags the device, the counter orders the
/// ids, so transcripts are reproducible and ids never collide across nodes.
#[derive(Debug)]
pub struct SeqIds {
    base: u128,
    next: AtomicU64,
}

impl SeqIds {
    pub fn new(base: u128) -> Self {
        SeqIds {
            base: base << 64,
            next: AtomicU64::new(1),
        }
    }
}

impl IdSource for SeqIds {
    fn next_id(&self) -> Uuid {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        Uuid::from_u128(self.base | u128::from(n))
    }
}
