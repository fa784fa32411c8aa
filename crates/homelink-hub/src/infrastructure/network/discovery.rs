//! UDP broadcast-based device discovery.
//!
//! The hub binds a UDP socket on the protocol port (54321), enables
//! broadcast, and sends a 32-byte hello probe to the configured broadcast
//! or multicast address.  Devices answer with a zero-body packet whose
//! header identifies them:
//!
//! 1. `device_id` and `stamp` come straight from the header fields.
//! 2. The checksum field is either the device's secret token (revealed by
//!    unprovisioned devices) or an all-`0`/`f` sentinel meaning "found,
//!    but the secret stays private".
//!
//! Every inbound datagram runs through the header-only decode path; the
//! probe's own broadcast echo (sentinel stamp) and packets belonging to
//! exchanges with other controllers (non-empty body) are ignored.
//!
//! The receive loop runs as a blocking task on a dedicated thread to
//! avoid tying synchronous socket I/O to the Tokio runtime.  The service
//! sends exactly one probe at start; re-probing cadence is the caller's
//! policy, via [`DiscoveryHandle::probe`].

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use homelink_core::protocol::packet::{
    decode_header, is_token_sentinel, HELLO_PACKET, STAMP_SENTINEL,
};
use homelink_core::{DiscoveredAnnouncement, SecretToken};

/// Well-known protocol port devices listen on.
pub const DISCOVERY_PORT: u16 = 54321;

/// Default probe target: the limited broadcast address.
pub const DEFAULT_BROADCAST_ADDR: Ipv4Addr = Ipv4Addr::BROADCAST;

/// Error type for discovery service operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Socket options (broadcast, multicast membership) could not be set.
    #[error("failed to configure discovery socket: {0}")]
    SocketSetup(#[source] std::io::Error),
}

/// Typed outcome stream from the discovery listener.
#[derive(Debug)]
pub enum DiscoveryEvent {
    /// The socket is bound and the first probe has been sent.
    Started,
    /// One parsed device announcement.
    Announcement(DiscoveredAnnouncement),
    /// A socket-level error; listening continues.
    Error(std::io::Error),
    /// The listener thread has exited.
    Stopped,
}

/// Configuration for the discovery listener.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Port to bind and probe; devices are fixed on 54321.
    pub port: u16,
    /// Broadcast or multicast group address to probe.
    pub target_addr: Ipv4Addr,
    /// TTL applied when `target_addr` is a multicast group.
    pub multicast_ttl: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: DISCOVERY_PORT,
            target_addr: DEFAULT_BROADCAST_ADDR,
            multicast_ttl: 128,
        }
    }
}

/// Caller-facing handle: re-probe on whatever cadence the deployment
/// wants, and stop the listener.
pub struct DiscoveryHandle {
    socket: UdpSocket,
    target: SocketAddr,
    running: Arc<AtomicBool>,
}

impl DiscoveryHandle {
    /// Broadcasts one hello probe.
    ///
    /// # Errors
    ///
    /// Propagates the OS send error; the listener itself is unaffected.
    pub fn probe(&self) -> std::io::Result<()> {
        self.socket.send_to(&HELLO_PACKET, self.target).map(|_| ())
    }

    /// Asks the listener thread to exit.  Idempotent; the thread notices
    /// within one read-timeout tick and emits [`DiscoveryEvent::Stopped`].
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// Binds the discovery socket, spawns the listener thread, and sends the
/// initial probe.
///
/// Returns the control handle and the event receiver.
///
/// # Errors
///
/// Returns [`DiscoveryError::BindFailed`] if the socket cannot be bound
/// and [`DiscoveryError::SocketSetup`] if broadcast/multicast options are
/// rejected.
pub fn start_discovery(
    config: DiscoveryConfig,
) -> Result<(DiscoveryHandle, mpsc::Receiver<DiscoveryEvent>), DiscoveryError> {
    let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, config.port).into();
    let socket =
        UdpSocket::bind(addr).map_err(|source| DiscoveryError::BindFailed { addr, source })?;

    socket
        .set_broadcast(true)
        .map_err(DiscoveryError::SocketSetup)?;
    if config.target_addr.is_multicast() {
        socket
            .join_multicast_v4(&config.target_addr, &Ipv4Addr::UNSPECIFIED)
            .map_err(DiscoveryError::SocketSetup)?;
        socket
            .set_multicast_ttl_v4(config.multicast_ttl)
            .map_err(DiscoveryError::SocketSetup)?;
    }
    socket
        .set_read_timeout(Some(Duration::from_millis(500)))
        .map_err(DiscoveryError::SocketSetup)?;

    let running = Arc::new(AtomicBool::new(true));
    let target = SocketAddr::new(IpAddr::V4(config.target_addr), config.port);

    let handle = DiscoveryHandle {
        socket: socket.try_clone().map_err(DiscoveryError::SocketSetup)?,
        target,
        running: Arc::clone(&running),
    };

    let (tx, rx) = mpsc::channel(64);

    std::thread::Builder::new()
        .name("homelink-discovery".to_string())
        .spawn(move || {
            discovery_loop(socket, target, tx, running);
        })
        .expect("failed to spawn discovery thread");

    info!("discovery listening on UDP {addr}, probing {target}");
    Ok((handle, rx))
}

/// The main receive loop executed on the discovery thread.
fn discovery_loop(
    socket: UdpSocket,
    target: SocketAddr,
    tx: mpsc::Sender<DiscoveryEvent>,
    running: Arc<AtomicBool>,
) {
    if tx.blocking_send(DiscoveryEvent::Started).is_err() {
        return;
    }

    // One probe at start; repeats are the caller's cadence decision.
    if let Err(e) = socket.send_to(&HELLO_PACKET, target) {
        warn!("initial discovery probe failed: {e}");
        let _ = tx.blocking_send(DiscoveryEvent::Error(e));
    }

    let mut buf = vec![0u8; 4096];

    while running.load(Ordering::Relaxed) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                error!("discovery recv error: {e}");
                if tx.blocking_send(DiscoveryEvent::Error(e)).is_err() {
                    break;
                }
                continue;
            }
        };

        match parse_announcement(&buf[..len], src) {
            Some(announcement) => {
                debug!(
                    "announcement from {src}: device {} (secret {})",
                    announcement.device_id,
                    if announcement.has_known_secret() {
                        "known"
                    } else {
                        "unknown"
                    },
                );
                if tx
                    .blocking_send(DiscoveryEvent::Announcement(announcement))
                    .is_err()
                {
                    // Receiver dropped — the application is shutting down.
                    break;
                }
            }
            None => {
                debug!("ignoring {len}-byte datagram from {src}");
            }
        }
    }

    let _ = tx.blocking_send(DiscoveryEvent::Stopped);
    info!("discovery listener stopped");
}

/// Classifies one datagram; `None` for anything that is not a genuine
/// announcement (malformed, probe echo, mid-exchange traffic).
fn parse_announcement(datagram: &[u8], src: SocketAddr) -> Option<DiscoveredAnnouncement> {
    let header = decode_header(datagram).ok()?;

    // Genuine announcements carry a real stamp and no body.  Our own
    // probe echoes back with the sentinel stamp; command traffic between
    // another controller and the device has a body.
    if header.stamp == 0 || header.stamp == STAMP_SENTINEL || header.body_len != 0 {
        return None;
    }

    let token = if is_token_sentinel(&header.checksum) {
        None
    } else {
        Some(SecretToken::from_bytes(header.checksum))
    };

    Some(DiscoveredAnnouncement {
        host: src.ip(),
        port: src.port(),
        device_id: header.device_id,
        stamp: header.stamp,
        token,
    })
}

/// Returns `true` for OS timeout / would-block errors that just mean
/// "no datagram yet".
fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}
