//! UdpScanner: the production [`Scanner`].  Listens for Tuya discovery
//! broadcasts on the LAN for one window and returns every device heard.
//!
//! # How Tuya discovery works (for beginners)
//!
//! Tuya devices do not answer a query; they *announce*.  Every few seconds an
//! idle device broadcasts a UDP datagram describing itself:
//!
//! | Port | Firmware        | Payload                                    |
//! |------|-----------------|--------------------------------------------|
//! | 6666 | protocol 3.1    | plaintext JSON in a 55AA frame             |
//! | 6667 | protocol 3.2–3.4| AES-ECB JSON in a 55AA frame               |
//! | 7000 | protocol 3.5    | AES-GCM JSON in a 6699 frame               |
//!
//! A scan binds all three ports, optionally broadcasts the 3.5 "who is
//! there" probe so newer devices answer right away, and collects datagrams
//! until the window closes.
//!
//! # Socket options
//!
//! The listeners are created with `socket2` so that `SO_REUSEADDR` can be set
//! before `bind`.  That lets other LAN tools listen on the same ports while
//! the broker runs.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::Utc;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use tuya_core::protocol::broadcast::PROBE_PORT;
use tuya_core::protocol::crypto::GCM_IV_LEN;
use tuya_core::{decode_broadcast, encode_discovery_request, FrameError, PresenceRecord};

use crate::application::{ScanError, Scanner};
use crate::domain::ScanSettings;

/// Large enough for any discovery datagram seen in the wild.
const RECV_BUFFER_LEN: usize = 4096;

/// Address used only to learn which local interface routes off-host.  No
/// packet is sent to it.
const ROUTE_PROBE_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 80);

#[derive(Debug, Error)]
enum ProbeError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("could not encode probe: {0}")]
    Frame(#[from] FrameError),
    #[error("no IPv4 address on the default route")]
    NoLocalAddress,
}

/// Listens on the discovery ports for one window per scan.
pub struct UdpScanner {
    bind_ip: Ipv4Addr,
    ports: Vec<u16>,
    probe: bool,
    probe_target: SocketAddr,
    probe_seq: AtomicU32,
}

impl UdpScanner {
    /// Builds a scanner for the configured ports, bound on all interfaces.
    pub fn new(settings: &ScanSettings) -> Self {
        Self {
            bind_ip: Ipv4Addr::UNSPECIFIED,
            ports: settings.ports.clone(),
            probe: settings.probe,
            probe_target: SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), PROBE_PORT),
            probe_seq: AtomicU32::new(0),
        }
    }

    /// Binds the listeners to one interface address instead of all of them.
    pub fn with_bind_ip(mut self, ip: Ipv4Addr) -> Self {
        self.bind_ip = ip;
        self
    }

    /// Sends the probe somewhere other than the LAN broadcast address.
    pub fn with_probe_target(mut self, target: SocketAddr) -> Self {
        self.probe_target = target;
        self
    }

    async fn send_probe(&self) -> Result<(), ProbeError> {
        let local_ip = match self.bind_ip {
            ip if ip.is_unspecified() => local_ipv4()?,
            ip => ip,
        };
        let seq = self.probe_seq.fetch_add(1, Ordering::Relaxed);
        let frame = encode_discovery_request(local_ip, seq, &probe_iv(seq))?;

        let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(self.bind_ip), 0)).await?;
        socket.set_broadcast(true)?;
        socket.send_to(&frame, self.probe_target).await?;
        debug!(target = %self.probe_target, %local_ip, "sent discovery probe");
        Ok(())
    }
}

#[async_trait]
impl Scanner for UdpScanner {
    async fn scan(&self, window: Duration) -> Result<Vec<PresenceRecord>, ScanError> {
        let mut listeners = Vec::with_capacity(self.ports.len());
        let mut bind_errors = Vec::new();
        for &port in &self.ports {
            match bind_listener(self.bind_ip, port) {
                Ok(socket) => listeners.push((port, socket)),
                Err(e) => {
                    warn!(port, error = %e, "could not bind discovery port");
                    bind_errors.push(format!("{port}: {e}"));
                }
            }
        }
        if listeners.is_empty() {
            return Err(ScanError::Bind(bind_errors.join("; ")));
        }

        if self.probe {
            if let Err(e) = self.send_probe().await {
                debug!(error = %e, "discovery probe not sent");
            }
        }

        let deadline = Instant::now() + window;
        let mut tasks = JoinSet::new();
        for (port, socket) in listeners {
            tasks.spawn(listen_until(socket, port, deadline));
        }

        let mut seen = Vec::new();
        let mut failures = Vec::new();
        let mut healthy = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(records)) => {
                    healthy += 1;
                    seen.extend(records);
                }
                Ok(Err((port, e))) => {
                    warn!(port, error = %e, "discovery listener failed");
                    failures.push(format!("{port}: {e}"));
                }
                Err(e) => {
                    warn!(error = %e, "discovery listener task aborted");
                    failures.push(e.to_string());
                }
            }
        }
        if healthy == 0 {
            return Err(ScanError::Io(failures.join("; ")));
        }

        info!(datagrams_decoded = seen.len(), "discovery window closed");
        Ok(seen)
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Creates a non-blocking UDP listener with `SO_REUSEADDR` and
/// `SO_BROADCAST` set, then hands it to Tokio.
fn bind_listener(ip: Ipv4Addr, port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::new(IpAddr::V4(ip), port).into())?;
    UdpSocket::from_std(socket.into())
}

async fn listen_until(
    socket: UdpSocket,
    port: u16,
    deadline: Instant,
) -> Result<Vec<PresenceRecord>, (u16, io::Error)> {
    let mut buf = vec![0u8; RECV_BUFFER_LEN];
    let mut records = Vec::new();

    loop {
        let received = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(result) => result,
        };

        let (len, from) = match received {
            Ok(pair) => pair,
            // Windows reports ICMP port-unreachable as a receive error.
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
            Err(e) => return Err((port, e)),
        };

        match decode_broadcast(&buf[..len], from.ip()) {
            Ok(broadcast) => {
                trace!(port, device = %broadcast.id, address = %broadcast.address, "device announced");
                records.push(broadcast.into_presence(Utc::now()));
            }
            Err(e) => debug!(port, %from, error = %e, "ignoring undecodable datagram"),
        }
    }

    Ok(records)
}

/// The IPv4 address of the interface that routes off-host.
fn local_ipv4() -> Result<Ipv4Addr, ProbeError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    socket.connect(&ROUTE_PROBE_ADDR.into())?;
    socket
        .local_addr()?
        .as_socket_ipv4()
        .map(|addr| *addr.ip())
        .ok_or(ProbeError::NoLocalAddress)
}

/// GCM IVs must not repeat under one key: wall-clock nanoseconds plus the
/// probe sequence number.
fn probe_iv(seq: u32) -> [u8; GCM_IV_LEN] {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let mut iv = [0u8; GCM_IV_LEN];
    iv[..8].copy_from_slice(&nanos.to_be_bytes());
    iv[8..].copy_from_slice(&seq.to_be_bytes());
    iv
}

// ── Tests ─────────────────────────────────────────────────────────────────────
