//! The sync core: one object owning replica, peer table, pending-outbound
//! table, and dedup cache, wired to a transport and a durable store.
//!
//! # Task model
//! Two background tasks per core: the transport receive loop and a single
//! timer scheduler (heartbeat, retry-ack, state-hash, full-sync,
//! retry-queue in one `select!`).  Both exit when the shutdown watch flips.
//!
//! # Locking
//! `Inner` (replica + peers + outbox + dedup + seq + last-sync stamp) sits
//! behind one async mutex; the store behind another.  Lock order is always
//! inner before store.  `submit_scan` holds the inner lock across the
//! admission check and the append, so two local scans of the same one-use
//! code cannot both pass.

use crate::admission::{self, DenyReason, Evaluation, ScanOutcome};
use crate::clock::{Clock, IdSource, SystemClock, UuidIds};
use crate::config::{ConfigSnapshot, CoreConfig};
use crate::dedup::ReceivedIdCache;
use crate::error::CoreResult;
use crate::outbox::Outbox;
use crate::peers::{PeerRecord, PeerTable};
use crate::replica::{PassEntry, ReplicaState};
use crate::transport::{Datagram, Transport, UdpTransport};
use gm_protocol::{
    AckMsg, DeltaMsg, FullStateMsg, GossipMessage, HeartbeatMsg, PassKind, ScanRecord,
    StateHashMsg, StateRequestMsg,
};
use gm_store::{PassRow, Store};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Broadcast retry attempts before a queued payload is abandoned.
const BROADCAST_MAX_ATTEMPTS: i64 = 5;
/// Queue entries drained per retry-queue tick.
const BROADCAST_BATCH: i64 = 10;

/// The replica view handed to the shell: code → declared kind + scans.
pub type ReplicaView = gm_protocol::FullState;

/// Snapshot returned by `query_health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    pub peers_connected: usize,
    /// Seconds since we last merged remote data or matched a state hash;
    /// `None` before first contact.
    pub time_since_last_sync_s: Option<i64>,
    pub pending_broadcasts: i64,
    pub pending_acks: usize,
}

struct Inner {
    replica: ReplicaState,
    peers: PeerTable,
    outbox: Outbox,
    seen: ReceivedIdCache,
    seq: u64,
    last_sync_ms: Option<i64>,
}

pub struct SyncCore<T: Transport> {
    cfg: CoreConfig,
    device_id: String,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdSource>,
    transport: Arc<T>,
    store: Arc<Mutex<Store>>,
    inner: Mutex<Inner>,
    shutdown_tx: watch::Sender<bool>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl SyncCore<UdpTransport> {
    /// Open the store, bind the fleet port, and start gossiping.
    ///
    /// Fatal only here: a store that cannot open or a socket that cannot
    /// bind surfaces to the caller, who decides between degraded operation
    /// and abort.  Nothing after init is fatal.
    pub async fn init(cfg: CoreConfig) -> CoreResult<Arc<Self>> {
        let store = Store::open(Path::new(&cfg.store.sqlite_path))?;
        let (transport, inbound) =
            UdpTransport::bind(cfg.network.port, cfg.network.broadcast_addr).await?;
        Self::init_with(
            cfg,
            store,
            transport,
            inbound,
            Arc::new(SystemClock),
            Arc::new(UuidIds),
        )
        .await
    }
}

impl<T: Transport> SyncCore<T> {
    /// Init with injected store, transport, clock, and id source.
    pub async fn init_with(
        cfg: CoreConfig,
        mut store: Store,
        transport: T,
        inbound: mpsc::Receiver<Datagram>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdSource>,
    ) -> CoreResult<Arc<Self>> {
        let device_id = store.get_or_create_device_id(|| ids.next_id().to_string())?;

        // Pass snapshot: persisted copy wins; the bundled file seeds first
        // runs and is then written through.
        let snapshot = match store.load_config()? {
            Some(blob) => ConfigSnapshot::from_json(&blob)?,
            None => {
                let snapshot = match &cfg.passes.snapshot_path {
                    Some(path) => {
                        let blob = std::fs::read_to_string(path)?;
                        ConfigSnapshot::from_json(&blob)?
                    }
                    None => ConfigSnapshot::default(),
                };
                store.save_config(&snapshot.to_json())?;
                snapshot
            }
        };

        let mut replica = ReplicaState::new();
        replica.seed_snapshot(&snapshot);
        for row in store.load_pass_types()? {
            let kind = match row.kind.as_str() {
                "infinite" => PassKind::Infinite,
                "one-use" => PassKind::OneUse,
                other => {
                    warn!(code = %row.code, kind = other, "unknown pass kind in store; skipping");
                    continue;
                }
            };
            let day_flags = row
                .day_flags
                .as_deref()
                .and_then(|blob| serde_json::from_str(blob).ok());
            replica.seed_pass(
                &row.code,
                PassEntry {
                    kind,
                    day_flags,
                    count: 0,
                },
            );
        }

        // Rebuild the merged view (and projection counters) from the log.
        let persisted = store.load_all_scans()?;
        let loaded = replica.merge_deltas(persisted);
        info!(
            device_id = %device_id,
            scans = loaded.len(),
            codes = snapshot.passes.len(),
            "replica hydrated"
        );

        let mut peers = PeerTable::new();
        for row in store.load_peers()? {
            peers.insert_loaded(PeerRecord::from_row(&row));
        }

        let (shutdown_tx, _) = watch::channel(false);
        let core = Arc::new(SyncCore {
            cfg,
            device_id,
            clock,
            ids,
            transport: Arc::new(transport),
            store: Arc::new(Mutex::new(store)),
            inner: Mutex::new(Inner {
                replica,
                peers,
                outbox: Outbox::new(),
                seen: ReceivedIdCache::default(),
                seq: 0,
                last_sync_ms: None,
            }),
            shutdown_tx,
            tasks: std::sync::Mutex::new(Vec::new()),
        });

        let receive = core.spawn_receive_loop(inbound);
        let scheduler = core.spawn_scheduler();
        if let Ok(mut tasks) = core.tasks.lock() {
            tasks.push(receive);
            tasks.push(scheduler);
        }

        // Re-learn whatever the fleet knows that we missed while down.
        core.rescan_peers().await;

        Ok(core)
    }

    // -----------------------------------------------------------------------
    // Public surface
    // -----------------------------------------------------------------------

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Admission + local append + dissemination.
    ///
    /// The admission check and the append happen under one lock: across
    /// concurrent local calls, at most one scan of a one-use code wins.
    pub async fn submit_scan(&self, code: &str) -> CoreResult<ScanOutcome> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().await;

        let eval = admission::evaluate(&inner.replica, code, now, self.cfg.admission.cooldown_ms);
        let outcome = ScanOutcome::from(&eval);
        let Evaluation::Allow { day, today_count } = eval else {
            if let Some(reason) = outcome.reason {
                info!(code, reason = %reason, "scan denied");
            }
            return Ok(outcome);
        };

        let Some(event) =
            inner
                .replica
                .apply_local(code, &day, now, &self.device_id, self.ids.as_ref())
        else {
            // Unreachable after an allow, but never panic in the scan path.
            return Ok(ScanOutcome {
                allowed: false,
                reason: Some(DenyReason::Unknown),
                today_count: None,
            });
        };
        info!(
            code,
            scan_id = %event.scan_id,
            day = %day,
            today_count,
            "scan accepted"
        );

        self.persist_events(&inner, std::slice::from_ref(&event)).await;
        self.disseminate_delta(&mut inner, event, now).await;

        Ok(outcome)
    }

    /// The merged replica view.
    pub async fn query_state(&self) -> ReplicaView {
        self.inner.lock().await.replica.to_full_state()
    }

    /// The pass-type projection as a config snapshot.
    pub async fn query_config(&self) -> ConfigSnapshot {
        self.inner.lock().await.replica.to_config_snapshot()
    }

    pub async fn query_health(&self) -> Health {
        let now = self.clock.now_ms();
        let (peers_connected, pending_acks, time_since_last_sync_s) = {
            let inner = self.inner.lock().await;
            (
                inner.peers.connected_count(now),
                inner.outbox.len(),
                inner.last_sync_ms.map(|t| (now - t) / 1000),
            )
        };
        let pending_broadcasts = match self.store.lock().await.queued_broadcast_count() {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "broadcast queue count failed");
                0
            }
        };
        Health {
            peers_connected,
            time_since_last_sync_s,
            pending_broadcasts,
            pending_acks,
        }
    }

    pub async fn state_hash(&self) -> String {
        self.inner.lock().await.replica.state_hash()
    }

    /// Broadcast a state-request so peers resend their full state.
    pub async fn rescan_peers(&self) {
        let mut inner = self.inner.lock().await;
        self.broadcast_state_request(&mut inner).await;
    }

    /// Cancel timers, stop the receive loop, close the socket.
    ///
    /// Pending acks are deliberately lost; the post-init state-request on
    /// the next run re-learns state from peers.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.transport.close();
        let handles: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            let _ = handle.await;
        }
        info!(device_id = %self.device_id, "sync core stopped");
    }

    // -----------------------------------------------------------------------
    // Inbound pipeline
    // -----------------------------------------------------------------------

    async fn handle_datagram(&self, dgram: Datagram) {
        // 1. Parse; drop on error.
        let msg: GossipMessage = match serde_json::from_slice(&dgram.payload) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(from = %dgram.from, error = %e, "dropping unparseable datagram");
                return;
            }
        };

        // 2. Self-echo (our own broadcasts loop back).
        if msg.device_id() == self.device_id {
            return;
        }

        let sender = msg.device_id().to_owned();
        let from_ip = dgram.from.ip();
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().await;

        // 3-4. Duplicate suppression for ack-tracked messages.
        if let Some(message_id) = msg.message_id() {
            if !inner.seen.insert(message_id) {
                debug!(from = %sender, %message_id, "duplicate message dropped");
                return;
            }
        }

        // 5. Peer upsert; a newcomer triggers a state-request broadcast so
        // both sides pull into a shared view.
        let newly_known = inner.peers.observe_inbound(
            &sender,
            from_ip,
            now,
            msg.is_heartbeat(),
            msg.state_hash(),
        );
        if newly_known {
            info!(peer = %sender, ip = %from_ip, "peer discovered");
            self.persist_peer(&inner, &sender).await;
            self.broadcast_state_request(&mut inner).await;
        } else if msg.is_heartbeat() {
            self.persist_peer(&inner, &sender).await;
        }

        // 6. Dispatch by kind.
        match msg {
            GossipMessage::Delta(m) => self.on_delta(&mut inner, m, from_ip, now).await,
            GossipMessage::FullState(m) => self.on_full_state(&mut inner, m, now).await,
            GossipMessage::StateRequest(_) => {
                debug!(peer = %sender, "state requested");
                self.send_full_state_to_all(&mut inner).await;
            }
            GossipMessage::Ack(m) => {
                if inner.outbox.ack(m.ack_message_id, &m.device_id) {
                    debug!(peer = %sender, message_id = %m.ack_message_id, "ack received");
                }
            }
            GossipMessage::Heartbeat(_) => {} // fully handled by the upsert
            GossipMessage::StateHash(m) => self.on_state_hash(&mut inner, m, now).await,
        }
    }

    async fn on_delta(&self, inner: &mut Inner, m: DeltaMsg, from_ip: IpAddr, now: i64) {
        let new_events = inner.replica.merge_deltas(m.deltas);
        inner.last_sync_ms = Some(now);
        if !new_events.is_empty() {
            info!(peer = %m.device_id, count = new_events.len(), "delta merged");
            self.persist_events(inner, &new_events).await;
        }

        // Exactly one ack per received delta, duplicates already dropped.
        let ack = GossipMessage::Ack(AckMsg {
            device_id: self.device_id.clone(),
            sequence_num: next_seq(inner),
            ts_ms: now,
            ack_message_id: m.message_id,
        });
        if let Some(payload) = encode(&ack) {
            let dest = SocketAddr::new(from_ip, self.cfg.network.port);
            if let Err(e) = self.transport.send_unicast(&payload, dest).await {
                warn!(error = %e, %dest, "ack send failed");
            }
        }
    }

    async fn on_full_state(&self, inner: &mut Inner, m: FullStateMsg, now: i64) {
        let codes: Vec<String> = m.full_state.keys().cloned().collect();
        let new_events = inner.replica.merge_full_state(m.full_state);
        inner.last_sync_ms = Some(now);
        if !new_events.is_empty() {
            info!(peer = %m.device_id, count = new_events.len(), "full state merged");
            self.persist_events(inner, &new_events).await;
        }
        // Pass kinds may have been newly learned even without new scans.
        self.persist_pass_rows(inner, &codes).await;
    }

    async fn on_state_hash(&self, inner: &mut Inner, m: StateHashMsg, now: i64) {
        let local = inner.replica.state_hash();
        if m.state_hash == local {
            inner.peers.mark_synced(&m.device_id);
            inner.last_sync_ms = Some(now);
            self.persist_peer(inner, &m.device_id).await;
        } else {
            debug!(peer = %m.device_id, theirs = %m.state_hash, ours = %local, "state hash mismatch");
            inner.peers.mark_mismatch(&m.device_id);
            self.broadcast_state_request(inner).await;
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// ACK-tracked delta dissemination: unicast to every known peer with a
    /// pending entry each; with no peers yet, broadcast untracked.
    async fn disseminate_delta(&self, inner: &mut Inner, event: ScanRecord, now: i64) {
        let msg = GossipMessage::Delta(DeltaMsg {
            device_id: self.device_id.clone(),
            sequence_num: next_seq(inner),
            ts_ms: now,
            message_id: self.ids.next_id(),
            deltas: vec![event],
        });
        let Some(payload) = encode(&msg) else { return };
        let Some(message_id) = msg.message_id() else { return };

        let targets: Vec<(String, IpAddr)> = inner
            .peers
            .iter()
            .filter_map(|p| p.ip.map(|ip| (p.device_id.clone(), ip)))
            .collect();

        if targets.is_empty() {
            self.broadcast_or_enqueue(payload, now).await;
            return;
        }

        for (device_id, ip) in targets {
            inner
                .outbox
                .insert(message_id, &device_id, payload.clone(), ip, now);
            let dest = SocketAddr::new(ip, self.cfg.network.port);
            if let Err(e) = self.transport.send_unicast(&payload, dest).await {
                // The retry-ack timer re-sends; no queue entry needed.
                warn!(error = %e, peer = %device_id, "delta unicast failed");
            }
        }
    }

    /// Outbound policy for messages meant for "all peers": broadcast when
    /// nobody is known, otherwise unicast each known address; failed
    /// unicasts land on the persistent retry queue.
    async fn send_to_all_known(&self, inner: &mut Inner, payload: Vec<u8>, now: i64) {
        let targets = inner.peers.known_ips();
        if targets.is_empty() {
            self.broadcast_or_enqueue(payload, now).await;
            return;
        }
        for ip in targets {
            let dest = SocketAddr::new(ip, self.cfg.network.port);
            if let Err(e) = self.transport.send_unicast(&payload, dest).await {
                warn!(error = %e, %dest, "unicast failed; queueing for broadcast retry");
                self.enqueue_broadcast(&payload, now).await;
            }
        }
    }

    /// state-request always goes out as a broadcast.
    async fn broadcast_state_request(&self, inner: &mut Inner) {
        let now = self.clock.now_ms();
        let msg = GossipMessage::StateRequest(StateRequestMsg {
            device_id: self.device_id.clone(),
            sequence_num: next_seq(inner),
            ts_ms: now,
        });
        if let Some(payload) = encode(&msg) {
            self.broadcast_or_enqueue(payload, now).await;
        }
    }

    async fn send_full_state_to_all(&self, inner: &mut Inner) {
        let now = self.clock.now_ms();
        let msg = GossipMessage::FullState(FullStateMsg {
            device_id: self.device_id.clone(),
            sequence_num: next_seq(inner),
            ts_ms: now,
            full_state: inner.replica.to_full_state(),
        });
        if let Some(payload) = encode(&msg) {
            self.send_to_all_known(inner, payload, now).await;
        }
    }

    async fn broadcast_or_enqueue(&self, payload: Vec<u8>, now: i64) {
        if let Err(e) = self.transport.send_broadcast(&payload).await {
            warn!(error = %e, "broadcast failed; queueing");
            self.enqueue_broadcast(&payload, now).await;
        }
    }

    async fn enqueue_broadcast(&self, payload: &[u8], now: i64) {
        if let Err(e) = self.store.lock().await.enqueue_broadcast(payload, now) {
            error!(error = %e, "broadcast queue write failed");
        }
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    fn spawn_receive_loop(
        self: &Arc<Self>,
        mut inbound: mpsc::Receiver<Datagram>,
    ) -> JoinHandle<()> {
        let core = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    dgram = inbound.recv() => {
                        match dgram {
                            Some(dgram) => core.handle_datagram(dgram).await,
                            None => break, // transport gone
                        }
                    }
                }
            }
        })
    }

    /// One scheduler task for all five timers; a period of 0 disables the
    /// timer (its interval is parked on a day-long period and skipped).
    fn spawn_scheduler(self: &Arc<Self>) -> JoinHandle<()> {
        let core = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let timers = core.cfg.timers.clone();
            let mut heartbeat = park_or(timers.heartbeat_s);
            let mut retry_ack = park_or(timers.retry_ack_s);
            let mut state_hash = park_or(timers.state_hash_s);
            let mut full_sync = park_or(timers.full_sync_s);
            let mut retry_queue = park_or(timers.retry_queue_s);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = heartbeat.tick() => {
                        if timers.heartbeat_s != 0 {
                            core.heartbeat_tick().await;
                        }
                    }
                    _ = retry_ack.tick() => {
                        if timers.retry_ack_s != 0 {
                            core.retry_ack_tick().await;
                        }
                    }
                    _ = state_hash.tick() => {
                        if timers.state_hash_s != 0 {
                            core.state_hash_tick().await;
                        }
                    }
                    _ = full_sync.tick() => {
                        if timers.full_sync_s != 0 {
                            core.full_sync_tick().await;
                        }
                    }
                    _ = retry_queue.tick() => {
                        if timers.retry_queue_s != 0 {
                            core.retry_queue_tick().await;
                        }
                    }
                }
            }
        })
    }

    /// Heartbeat to every connected peer; broadcast while nobody is known
    /// (doubles as the discovery beacon).  Also sweeps liveness.
    async fn heartbeat_tick(&self) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().await;

        for device_id in inner.peers.sweep_liveness(now) {
            info!(peer = %device_id, "peer lost");
            self.persist_peer(&inner, &device_id).await;
        }

        let msg = GossipMessage::Heartbeat(HeartbeatMsg {
            device_id: self.device_id.clone(),
            sequence_num: next_seq(&mut inner),
            ts_ms: now,
            state_hash: inner.replica.state_hash(),
        });
        let Some(payload) = encode(&msg) else { return };

        if inner.peers.is_empty() {
            self.broadcast_or_enqueue(payload, now).await;
            return;
        }
        for ip in inner.peers.connected_ips(now) {
            let dest = SocketAddr::new(ip, self.cfg.network.port);
            if let Err(e) = self.transport.send_unicast(&payload, dest).await {
                warn!(error = %e, %dest, "heartbeat send failed");
            }
        }
    }

    async fn retry_ack_tick(&self) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().await;
        let (resends, dropped) = inner.outbox.sweep(now);
        if dropped > 0 {
            warn!(dropped, "unacked deltas abandoned after attempt cap");
        }
        for resend in resends {
            debug!(peer = %resend.device_id, message_id = %resend.message_id, "resending delta");
            let dest = SocketAddr::new(resend.dest, self.cfg.network.port);
            if let Err(e) = self.transport.send_unicast(&resend.payload, dest).await {
                warn!(error = %e, %dest, "delta resend failed");
            }
        }
    }

    async fn state_hash_tick(&self) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().await;
        let msg = GossipMessage::StateHash(StateHashMsg {
            device_id: self.device_id.clone(),
            sequence_num: next_seq(&mut inner),
            ts_ms: now,
            state_hash: inner.replica.state_hash(),
        });
        if let Some(payload) = encode(&msg) {
            self.send_to_all_known(&mut inner, payload, now).await;
        }
    }

    async fn full_sync_tick(&self) {
        let mut inner = self.inner.lock().await;
        self.send_full_state_to_all(&mut inner).await;
    }

    /// Drain the persistent retry queue: attempt each payload as a
    /// broadcast, delete on success, bump attempts on failure, abandon at
    /// the cap.
    async fn retry_queue_tick(&self) {
        let entries = {
            let store = self.store.lock().await;
            match store.next_broadcasts(BROADCAST_MAX_ATTEMPTS, BROADCAST_BATCH) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, "retry queue read failed");
                    return;
                }
            }
        };

        for entry in entries {
            let sent = self.transport.send_broadcast(&entry.payload).await;
            let mut store = self.store.lock().await;
            let result = match sent {
                Ok(()) => store.delete_broadcast(entry.id),
                Err(e) => {
                    debug!(error = %e, id = entry.id, "queued broadcast still failing");
                    store.bump_broadcast_attempts(entry.id).and_then(|attempts| {
                        if attempts >= BROADCAST_MAX_ATTEMPTS {
                            warn!(id = entry.id, "queued broadcast abandoned");
                            store.delete_broadcast(entry.id)
                        } else {
                            Ok(())
                        }
                    })
                }
            };
            if let Err(e) = result {
                warn!(error = %e, id = entry.id, "retry queue update failed");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Persistence (best-effort behind the in-memory source of truth)
    // -----------------------------------------------------------------------

    async fn persist_events(&self, inner: &Inner, events: &[ScanRecord]) {
        {
            let mut store = self.store.lock().await;
            if let Err(e) = store.append_scans_batch(events) {
                // The replica already advanced; full-state sync heals any
                // divergence a lost write leaves behind.
                warn!(error = %e, count = events.len(), "scan persist failed");
            }
        }
        let mut codes: Vec<String> = events.iter().map(|e| e.qr_code.clone()).collect();
        codes.sort();
        codes.dedup();
        self.persist_pass_rows(inner, &codes).await;
    }

    async fn persist_pass_rows(&self, inner: &Inner, codes: &[String]) {
        let mut store = self.store.lock().await;
        for code in codes {
            let Some(pass) = inner.replica.pass_entry(code) else {
                continue;
            };
            let row = PassRow {
                code: code.clone(),
                kind: match pass.kind {
                    PassKind::Infinite => "infinite".to_owned(),
                    PassKind::OneUse => "one-use".to_owned(),
                },
                day_flags: pass
                    .day_flags
                    .as_ref()
                    .and_then(|flags| serde_json::to_string(flags).ok()),
                count: pass.count as i64,
            };
            if let Err(e) = store.upsert_pass_type(&row) {
                warn!(error = %e, code = %code, "pass projection persist failed");
            }
        }
    }

    async fn persist_peer(&self, inner: &Inner, device_id: &str) {
        let Some(row) = inner.peers.get(device_id).map(PeerRecord::to_row) else {
            return;
        };
        if let Err(e) = self.store.lock().await.upsert_peer(&row) {
            warn!(error = %e, peer = %device_id, "peer persist failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn next_seq(inner: &mut Inner) -> u64 {
    inner.seq += 1;
    inner.seq
}

fn encode(msg: &GossipMessage) -> Option<Vec<u8>> {
    match serde_json::to_vec(msg) {
        Ok(payload) => Some(payload),
        Err(e) => {
            error!(error = %e, kind = msg.kind(), "message encode failed");
            None
        }
    }
}

fn park_or(period_s: u64) -> tokio::time::Interval {
    let period = Duration::from_secs(if period_s == 0 { 24 * 3600 } else { period_s });
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}
