//! In-memory datagram fabric.
//!
//! Nodes attach under a fake IP; every node shares the fleet port, exactly
//! like real stations.  Broadcasts fan out to every other node, unicasts
//! route by IP, and a programmable drop predicate plays the part of packet
//! loss and partitions.

use mesh_core::{Datagram, Transport};
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type DropFn = Box<dyn Fn(&[u8], IpAddr, IpAddr) -> bool + Send + Sync>;

struct HubInner {
    nodes: HashMap<IpAddr, mpsc::Sender<Datagram>>,
    drop_fn: Option<DropFn>,
    broadcast_enabled: bool,
}

/// The shared fabric.  Clone the `Arc` freely; each test owns one hub.
pub struct Hub {
    port: u16,
    inner: Mutex<HubInner>,
}

impl Hub {
    pub fn new(port: u16) -> Arc<Self> {
        Arc::new(Hub {
            port,
            inner: Mutex::new(HubInner {
                nodes: HashMap::new(),
                drop_fn: None,
                broadcast_enabled: true,
            }),
        })
    }

    /// Attach a node under `ip`; returns its transport and inbound channel.
    pub fn attach(self: &Arc<Self>, ip: IpAddr) -> (HubTransport, mpsc::Receiver<Datagram>) {
        let (tx, rx) = mpsc::channel(256);
        if let Ok(mut inner) = self.inner.lock() {
            inner.nodes.insert(ip, tx);
        }
        (
            HubTransport {
                hub: Arc::clone(self),
                addr: SocketAddr::new(ip, self.port),
            },
            rx,
        )
    }

    /// Drop every datagram for which the predicate returns true.
    /// Arguments: payload bytes, sender ip, recipient ip.
    pub fn set_drop_fn(
        self: &Arc<Self>,
        drop_fn: impl Fn(&[u8], IpAddr, IpAddr) -> bool + Send + Sync + 'static,
    ) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.drop_fn = Some(Box::new(drop_fn));
        }
    }

    pub fn clear_drop_fn(self: &Arc<Self>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.drop_fn = None;
        }
    }

    /// Simulate an environment that refuses SO_BROADCAST.
    pub fn set_broadcast_enabled(self: &Arc<Self>, enabled: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.broadcast_enabled = enabled;
        }
    }

    fn deliver(&self, payload: &[u8], from: IpAddr, to: IpAddr) {
        let Ok(inner) = self.inner.lock() else { return };
        if let Some(drop_fn) = &inner.drop_fn {
            if drop_fn(payload, from, to) {
                return;
            }
        }
        if let Some(tx) = inner.nodes.get(&to) {
            // A full channel loses the datagram, like a full socket buffer.
            let _ = tx.try_send(Datagram {
                payload: payload.to_vec(),
                from: SocketAddr::new(from, self.port),
            });
        }
    }
}

/// One node's handle on the fabric.
pub struct HubTransport {
    hub: Arc<Hub>,
    addr: SocketAddr,
}

impl HubTransport {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Transport for HubTransport {
    async fn send_broadcast(&self, payload: &[u8]) -> io::Result<()> {
        let targets: Vec<IpAddr> = {
            let inner = self
                .hub
                .inner
                .lock()
                .map_err(|_| io::Error::other("hub poisoned"))?;
            if !inner.broadcast_enabled {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "broadcast disabled",
                ));
            }
            inner.nodes.keys().copied().collect()
        };
        for to in targets {
            if to != self.addr.ip() {
                self.hub.deliver(payload, self.addr.ip(), to);
            }
        }
        Ok(())
    }

    async fn send_unicast(&self, payload: &[u8], dest: SocketAddr) -> io::Result<()> {
        // Sending to an absent node succeeds, as UDP does.
        self.hub.deliver(payload, self.addr.ip(), dest.ip());
        Ok(())
    }
}
