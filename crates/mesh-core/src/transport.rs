//! UDP datagram transport.
//!
//! One socket per station, bound on the well-known port, shared by all
//! outbound sends so replies land back on the fleet port.  Inbound
//! datagrams are pushed into an mpsc channel consumed by the engine's
//! receive loop.
//!
//! Broadcast: `SO_BROADCAST` is set after bind; when the environment
//! forbids it, broadcast sends fail and the engine falls back to per-peer
//! unicast plus the persistent retry queue.

use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One inbound datagram with its sender address.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub from: SocketAddr,
}

/// Datagram send surface.  The engine is generic over this so tests swap in
/// an in-memory fabric.
pub trait Transport: Send + Sync + 'static {
    fn send_broadcast(&self, payload: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
    fn send_unicast(
        &self,
        payload: &[u8],
        dest: SocketAddr,
    ) -> impl Future<Output = io::Result<()>> + Send;
    /// Stop any background receive machinery.  Default: nothing to stop.
    fn close(&self) {}
}

// ---------------------------------------------------------------------------
// UDP implementation
// ---------------------------------------------------------------------------

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    broadcast_dest: SocketAddr,
    recv_task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl UdpTransport {
    /// Bind on `0.0.0.0:port`, enable broadcast, and start the receive
    /// loop.  Returns the transport and the inbound channel.
    pub async fn bind(
        port: u16,
        broadcast_override: Option<IpAddr>,
    ) -> io::Result<(Self, mpsc::Receiver<Datagram>)> {
        let socket = bind_reusable_udp(port)?;

        if let Err(e) = socket.set_broadcast(true) {
            // Keep going: unicast still works and the engine degrades.
            warn!(error = %e, "SO_BROADCAST unavailable; broadcast sends will fail");
        }

        let broadcast_ip = broadcast_override.unwrap_or_else(infer_broadcast_addr);
        let broadcast_dest = SocketAddr::new(broadcast_ip, port);

        let socket = Arc::new(socket);
        let (tx, rx) = mpsc::channel(256);
        let recv_socket = Arc::clone(&socket);
        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                match recv_socket.recv_from(&mut buf).await {
                    Ok((len, from)) => {
                        let datagram = Datagram {
                            payload: buf[..len].to_vec(),
                            from,
                        };
                        if tx.send(datagram).await.is_err() {
                            break; // engine gone
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "udp recv error");
                    }
                }
            }
        });

        Ok((
            UdpTransport {
                socket,
                broadcast_dest,
                recv_task: std::sync::Mutex::new(Some(handle)),
            },
            rx,
        ))
    }

    pub fn broadcast_dest(&self) -> SocketAddr {
        self.broadcast_dest
    }
}

impl Transport for UdpTransport {
    async fn send_broadcast(&self, payload: &[u8]) -> io::Result<()> {
        self.socket.send_to(payload, self.broadcast_dest).await?;
        Ok(())
    }

    async fn send_unicast(&self, payload: &[u8], dest: SocketAddr) -> io::Result<()> {
        self.socket.send_to(payload, dest).await?;
        Ok(())
    }

    fn close(&self) {
        if let Ok(mut guard) = self.recv_task.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Socket setup
// ---------------------------------------------------------------------------

/// Bind a UDP socket with SO_REUSEADDR (and SO_REUSEPORT where available)
/// so a restarting station can rebind the fleet port immediately.
fn bind_reusable_udp(port: u16) -> io::Result<UdpSocket> {
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    if let Err(e) = socket.set_reuse_address(true) {
        warn!(error = %e, "SO_REUSEADDR failed (non-fatal)");
    }
    #[cfg(not(target_os = "windows"))]
    if let Err(e) = socket.set_reuse_port(true) {
        warn!(error = %e, "SO_REUSEPORT failed (non-fatal)");
    }

    socket.set_nonblocking(true)?;
    socket.bind(&socket2::SockAddr::from(addr))?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}

/// Subnet broadcast heuristic: probe the routing table for our local
/// address (a UDP connect sends nothing) and replace the last octet with
/// 255.  Falls back to the limited broadcast when no route or a non-v4
/// address comes back.
fn infer_broadcast_addr() -> IpAddr {
    let probe = || -> Option<Ipv4Addr> {
        let sock = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
        sock.connect("203.0.113.1:9").ok()?;
        match sock.local_addr().ok()?.ip() {
            IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
            _ => None,
        }
    };

    match probe() {
        Some(local) => {
            let [a, b, c, _] = local.octets();
            IpAddr::V4(Ipv4Addr::new(a, b, c, 255))
        }
        None => IpAddr::V4(Ipv4Addr::BROADCAST),
    }
}
