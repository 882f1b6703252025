//! Pending-outbound table: ack-tracked delta sends awaiting confirmation.
//!
//! One entry per `(message_id, recipient device)`.  Entries are in-memory
//! only; after a restart the post-init state-request re-learns whatever was
//! in flight.

use std::collections::HashMap;
use std::net::IpAddr;
use uuid::Uuid;

/// Resend an entry once it has been unacked this long.
pub const ACK_TIMEOUT_MS: i64 = 5_000;
/// Give up on a recipient after this many sends.
pub const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct PendingOutbound {
    pub payload: Vec<u8>,
    pub dest: IpAddr,
    pub first_sent_ms: i64,
    pub last_sent_ms: i64,
    pub attempts: u32,
}

/// A resend order produced by the retry sweep.
#[derive(Debug, Clone)]
pub struct Resend {
    pub message_id: Uuid,
    pub device_id: String,
    pub payload: Vec<u8>,
    pub dest: IpAddr,
}

#[derive(Debug, Default)]
pub struct Outbox {
    entries: HashMap<(Uuid, String), PendingOutbound>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        message_id: Uuid,
        device_id: &str,
        payload: Vec<u8>,
        dest: IpAddr,
        now_ms: i64,
    ) {
        self.entries.insert(
            (message_id, device_id.to_owned()),
            PendingOutbound {
                payload,
                dest,
                first_sent_ms: now_ms,
                last_sent_ms: now_ms,
                attempts: 1,
            },
        );
    }

    /// Remove the entry matched by an inbound ack; returns whether one
    /// existed.
    pub fn ack(&mut self, message_id: Uuid, device_id: &str) -> bool {
        self.entries
            .remove(&(message_id, device_id.to_owned()))
            .is_some()
    }

    /// Sweep for entries older than the timeout.
    ///
    /// Entries at the attempt cap are dropped; the rest get their attempt
    /// count bumped and send-time reset, and come back as resend orders.
    /// Returns `(resends, dropped)`.
    pub fn sweep(&mut self, now_ms: i64) -> (Vec<Resend>, usize) {
        let mut resends = Vec::new();
        let mut expired = Vec::new();

        for ((message_id, device_id), entry) in &mut self.entries {
            if now_ms - entry.last_sent_ms <= ACK_TIMEOUT_MS {
                continue;
            }
            if entry.attempts >= MAX_ATTEMPTS {
                expired.push((*message_id, device_id.clone()));
                continue;
            }
            entry.attempts += 1;
            entry.last_sent_ms = now_ms;
            resends.push(Resend {
                message_id: *message_id,
                device_id: device_id.clone(),
                payload: entry.payload.clone(),
                dest: entry.dest,
            });
        }

        let dropped = expired.len();
        for key in expired {
            self.entries.remove(&key);
        }
        (resends, dropped)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, message_id: Uuid, device_id: &str) -> bool {
        self.entries.contains_key(&(message_id, device_id.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEST: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 2));

    #[test]
    fn ack_removes_only_the_matching_recipient() {
        let mut outbox = Outbox::new();
        let mid = Uuid::from_u128(1);
        outbox.insert(mid, "dev-b", b"payload".to_vec(), DEST, 0);
        outbox.insert(mid, "dev-c", b"payload".to_vec(), DEST, 0);

        assert!(outbox.ack(mid, "dev-b"));
        assert!(!outbox.ack(mid, "dev-b"), "second ack is a no-op");
        assert_eq!(outbox.len(), 1);
        assert!(outbox.contains(mid, "dev-c"));
    }

    #[test]
    fn sweep_leaves_fresh_entries_alone() {
        let mut outbox = Outbox::new();
        outbox.insert(Uuid::from_u128(1), "dev-b", b"p".to_vec(), DEST, 0);
        let (resends, dropped) = outbox.sweep(ACK_TIMEOUT_MS);
        assert!(resends.is_empty());
        assert_eq!(dropped, 0);
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn sweep_resends_and_resets_send_time() {
        let mut outbox = Outbox::new();
        outbox.insert(Uuid::from_u128(1), "dev-b", b"p".to_vec(), DEST, 0);

        let (resends, _) = outbox.sweep(6_000);
        assert_eq!(resends.len(), 1);
        assert_eq!(resends[0].device_id, "dev-b");

        // Send-time was reset at 6_000; not yet due again at 10_000.
        let (resends, _) = outbox.sweep(10_000);
        assert!(resends.is_empty());
    }

    #[test]
    fn entries_drop_after_attempt_cap() {
        let mut outbox = Outbox::new();
        outbox.insert(Uuid::from_u128(1), "dev-b", b"p".to_vec(), DEST, 0);

        let mut now = 0;
        let mut total_resends = 0;
        let mut total_dropped = 0;
        for _ in 0..10 {
            now += ACK_TIMEOUT_MS + 1_000;
            let (resends, dropped) = outbox.sweep(now);
            total_resends += resends.len();
            total_dropped += dropped;
        }

        // 1 initial attempt + 4 resends = 5 attempts, then dropped once.
        assert_eq!(total_resends, 4);
        assert_eq!(total_dropped, 1);
        assert!(outbox.is_empty());
    }
}
