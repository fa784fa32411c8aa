//! Unified one-socket-per-device transport.
//!
//! Every device session owns exactly one [`Transport`], which wraps either
//! a TCP stream or a UDP socket behind the same interface: `connect`,
//! `send`, `close`, plus a typed event stream for inbound frames.  Frames
//! are raw bytes — one per UDP datagram, TCP chunks as the OS delivers
//! them — and the packet codec upstairs is responsible for making sense
//! of them via the header's length field.
//!
//! State machine:
//!
//! ```text
//! Idle ──connect()──► Connecting ──► Open ──close()/EOF──► Closed
//!                         │                                   │
//!                         └── timeout/refused ──► Idle        └─ connect() starts fresh
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Poll interval and budget while waiting on an in-flight connect attempt.
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const CONNECT_POLL_BUDGET: u32 = 30;

/// Read buffer size for both socket kinds; comfortably above the largest
/// packet the 16-bit length field can describe.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Which underlying socket a transport drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Udp,
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Typed outcome stream delivered to the transport's owner.
#[derive(Debug)]
pub enum TransportEvent {
    /// The socket is open (bound for UDP, connected for TCP).
    Started,
    /// One inbound raw frame.
    Frame(Vec<u8>),
    /// A socket-level error after open; the transport stays usable.
    Error(std::io::Error),
    /// The socket is gone, by `close()` or because the OS closed it.
    Stopped,
}

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The TCP connect attempt did not complete in time.
    #[error("connect timeout to {addr}")]
    ConnectTimeout { addr: SocketAddr },

    /// The OS rejected the connect attempt.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The local UDP socket could not be bound.
    #[error("failed to bind local UDP socket: {0}")]
    Bind(#[source] std::io::Error),

    /// A write was not accepted by the OS.
    #[error("send to {addr} failed: {source}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The transport is closed and has no socket to write to.
    #[error("transport to {addr} is closed")]
    Closed { addr: SocketAddr },
}

enum Writer {
    Tcp(OwnedWriteHalf),
    Udp(Arc<UdpSocket>),
}

/// One TCP or UDP socket, owned by a single session task.
pub struct Transport {
    peer: SocketAddr,
    kind: TransportKind,
    connect_timeout: Duration,
    state: Arc<RwLock<TransportState>>,
    event_tx: mpsc::Sender<TransportEvent>,
    writer: Option<Writer>,
    reader_cancel: Option<CancellationToken>,
}

impl Transport {
    /// Creates an idle transport; no socket exists until `connect`.
    ///
    /// Inbound frames and lifecycle notifications are delivered through
    /// `event_tx` in arrival order.
    pub fn new(
        peer: SocketAddr,
        kind: TransportKind,
        connect_timeout: Duration,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Self {
        Self {
            peer,
            kind,
            connect_timeout,
            state: Arc::new(RwLock::new(TransportState::Idle)),
            event_tx,
            writer: None,
            reader_cancel: None,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn state(&self) -> TransportState {
        *self.state.read().expect("transport state lock poisoned")
    }

    fn set_state(&self, state: TransportState) {
        *self.state.write().expect("transport state lock poisoned") = state;
    }

    /// Brings the transport to `Open`.
    ///
    /// - `Open`: no-op.
    /// - `Connecting`: joins the in-flight attempt with a bounded poll
    ///   (30 × 100 ms) instead of opening a second socket.
    /// - `Idle`/`Closed`: opens a fresh socket.  UDP binds an ephemeral
    ///   local port and is open immediately; TCP dials with the connect
    ///   timeout and destroys the socket on failure.
    ///
    /// # Errors
    ///
    /// [`TransportError::ConnectTimeout`] on a timed-out dial or an
    /// exhausted wait budget, [`TransportError::Connect`]/
    /// [`TransportError::Bind`] for OS-level failures.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        match self.state() {
            TransportState::Open => return Ok(()),
            TransportState::Connecting => return self.await_connect().await,
            TransportState::Idle | TransportState::Closed => {}
        }

        self.set_state(TransportState::Connecting);
        let result = match self.kind {
            TransportKind::Udp => self.connect_udp().await,
            TransportKind::Tcp => self.connect_tcp().await,
        };

        match result {
            Ok(()) => {
                self.set_state(TransportState::Open);
                let _ = self.event_tx.send(TransportEvent::Started).await;
                Ok(())
            }
            Err(e) => {
                // Failed attempts leave no socket behind; the next
                // connect() starts from scratch.
                self.writer = None;
                self.set_state(TransportState::Idle);
                Err(e)
            }
        }
    }

    async fn await_connect(&self) -> Result<(), TransportError> {
        for _ in 0..CONNECT_POLL_BUDGET {
            tokio::time::sleep(CONNECT_POLL_INTERVAL).await;
            match self.state() {
                TransportState::Open => return Ok(()),
                TransportState::Connecting => continue,
                TransportState::Idle | TransportState::Closed => break,
            }
        }
        Err(TransportError::ConnectTimeout { addr: self.peer })
    }

    async fn connect_udp(&mut self) -> Result<(), TransportError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .map_err(TransportError::Bind)?;
        socket.connect(self.peer).await.map_err(|source| {
            TransportError::Connect {
                addr: self.peer,
                source,
            }
        })?;

        let socket = Arc::new(socket);
        self.spawn_udp_reader(Arc::clone(&socket));
        self.writer = Some(Writer::Udp(socket));
        Ok(())
    }

    async fn connect_tcp(&mut self) -> Result<(), TransportError> {
        let dial = TcpStream::connect(self.peer);
        let stream = match tokio::time::timeout(self.connect_timeout, dial).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(TransportError::Connect {
                    addr: self.peer,
                    source,
                })
            }
            Err(_) => return Err(TransportError::ConnectTimeout { addr: self.peer }),
        };

        let (read_half, write_half) = stream.into_split();
        self.spawn_tcp_reader(read_half);
        self.writer = Some(Writer::Tcp(write_half));
        Ok(())
    }

    fn spawn_tcp_reader(&mut self, mut read_half: OwnedReadHalf) {
        let cancel = CancellationToken::new();
        self.reader_cancel = Some(cancel.clone());
        let tx = self.event_tx.clone();
        let state = Arc::clone(&self.state);
        let peer = self.peer;

        tokio::spawn(async move {
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = read_half.read(&mut buf) => match result {
                        Ok(0) => {
                            // Peer closed the stream; this is the one case
                            // where the OS decides the transition for us.
                            debug!("tcp stream from {peer} reached EOF");
                            *state.write().expect("transport state lock poisoned") =
                                TransportState::Closed;
                            let _ = tx.send(TransportEvent::Stopped).await;
                            break;
                        }
                        Ok(n) => {
                            trace!("tcp frame of {n} bytes from {peer}");
                            if tx.send(TransportEvent::Frame(buf[..n].to_vec())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            // Surface the error but leave the state alone:
                            // whether to tear down is the owner's call.
                            let _ = tx.send(TransportEvent::Error(e)).await;
                            break;
                        }
                    },
                }
            }
        });
    }

    fn spawn_udp_reader(&mut self, socket: Arc<UdpSocket>) {
        let cancel = CancellationToken::new();
        self.reader_cancel = Some(cancel.clone());
        let tx = self.event_tx.clone();
        let peer = self.peer;

        tokio::spawn(async move {
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = socket.recv(&mut buf) => match result {
                        Ok(n) => {
                            trace!("udp datagram of {n} bytes from {peer}");
                            if tx.send(TransportEvent::Frame(buf[..n].to_vec())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            // Datagram sockets survive errors (e.g. an ICMP
                            // unreachable bounce); keep listening.
                            if tx.send(TransportEvent::Error(e)).await.is_err() {
                                break;
                            }
                        }
                    },
                }
            }
        });
    }

    /// Writes `bytes` as one frame, connecting first if necessary.
    ///
    /// # Errors
    ///
    /// Connect errors propagate from the implicit [`connect`](Self::connect);
    /// [`TransportError::Send`] wraps a rejected write.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.connect().await?;

        let addr = self.peer;
        match self.writer.as_mut() {
            Some(Writer::Tcp(write_half)) => write_half
                .write_all(bytes)
                .await
                .map_err(|source| TransportError::Send { addr, source }),
            Some(Writer::Udp(socket)) => socket
                .send(bytes)
                .await
                .map(|_| ())
                .map_err(|source| TransportError::Send { addr, source }),
            None => Err(TransportError::Closed { addr }),
        }
    }

    /// Tears the socket down unconditionally and transitions to `Closed`.
    ///
    /// Idempotent; the stop event fires once per open socket.
    pub async fn close(&mut self) {
        let had_socket = self.writer.is_some() || self.reader_cancel.is_some();

        if let Some(cancel) = self.reader_cancel.take() {
            cancel.cancel();
        }
        self.writer = None;

        let was_closed = self.state() == TransportState::Closed;
        self.set_state(TransportState::Closed);

        if had_socket && !was_closed {
            let _ = self.event_tx.send(TransportEvent::Stopped).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::Receiver;

    fn make_transport(
        peer: SocketAddr,
        kind: TransportKind,
        connect_timeout: Duration,
    ) -> (Transport, Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (Transport::new(peer, kind, connect_timeout, tx), rx)
    }

    async fn expect_started(rx: &mut Receiver<TransportEvent>) {
        match rx.recv().await {
            Some(TransportEvent::Started) => {}
            other => panic!("expected Started, got {other:?}"),
        }
    }

    // ── UDP ───────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_udp_connect_is_immediately_open() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (mut transport, mut rx) =
            make_transport(peer.local_addr().unwrap(), TransportKind::Udp, DEFAULT_CONNECT_TIMEOUT);

        assert_eq!(transport.state(), TransportState::Idle);
        transport.connect().await.expect("udp connect");
        assert_eq!(transport.state(), TransportState::Open);
        expect_started(&mut rx).await;
    }

    #[tokio::test]
    async fn test_udp_send_reaches_peer_and_reply_becomes_frame() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (mut transport, mut rx) =
            make_transport(peer.local_addr().unwrap(), TransportKind::Udp, DEFAULT_CONNECT_TIMEOUT);

        transport.send(b"probe").await.expect("send");
        expect_started(&mut rx).await;

        let mut buf = [0u8; 16];
        let (n, src) = peer.recv_from(&mut buf).await.expect("peer recv");
        assert_eq!(&buf[..n], b"probe");

        peer.send_to(b"reply", src).await.expect("peer reply");
        match rx.recv().await {
            Some(TransportEvent::Frame(frame)) => assert_eq!(frame, b"reply"),
            other => panic!("expected Frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_udp_delivers_one_frame_per_datagram() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (mut transport, mut rx) =
            make_transport(peer.local_addr().unwrap(), TransportKind::Udp, DEFAULT_CONNECT_TIMEOUT);

        transport.send(b"hi").await.unwrap();
        expect_started(&mut rx).await;
        let mut buf = [0u8; 4];
        let (_, src) = peer.recv_from(&mut buf).await.unwrap();

        peer.send_to(b"one", src).await.unwrap();
        peer.send_to(b"two", src).await.unwrap();

        let frames: Vec<Vec<u8>> = [rx.recv().await, rx.recv().await]
            .into_iter()
            .map(|ev| match ev {
                Some(TransportEvent::Frame(f)) => f,
                other => panic!("expected Frame, got {other:?}"),
            })
            .collect();
        assert_eq!(frames, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    // ── TCP ───────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_tcp_connect_and_send() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (mut transport, mut rx) =
            make_transport(listener.local_addr().unwrap(), TransportKind::Tcp, DEFAULT_CONNECT_TIMEOUT);

        transport.send(b"hello").await.expect("tcp send");
        expect_started(&mut rx).await;

        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 8];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn test_tcp_connect_refused_surfaces_error_and_returns_to_idle() {
        // Bind-then-drop to find a port with no listener.
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = probe.local_addr().unwrap();
        drop(probe);

        let (mut transport, _rx) = make_transport(dead, TransportKind::Tcp, DEFAULT_CONNECT_TIMEOUT);
        let result = transport.connect().await;
        assert!(
            matches!(
                result,
                Err(TransportError::Connect { .. }) | Err(TransportError::ConnectTimeout { .. })
            ),
            "dead port must fail the connect, got {result:?}"
        );
        assert_eq!(transport.state(), TransportState::Idle);
    }

    #[tokio::test]
    async fn test_tcp_peer_close_emits_stopped_and_closes_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (mut transport, mut rx) =
            make_transport(listener.local_addr().unwrap(), TransportKind::Tcp, DEFAULT_CONNECT_TIMEOUT);

        transport.connect().await.unwrap();
        expect_started(&mut rx).await;

        let (stream, _) = listener.accept().await.unwrap();
        drop(stream); // peer hangs up

        match rx.recv().await {
            Some(TransportEvent::Stopped) => {}
            other => panic!("expected Stopped after EOF, got {other:?}"),
        }
        assert_eq!(transport.state(), TransportState::Closed);
    }

    // ── close() ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_close_is_idempotent_and_stops_once() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (mut transport, mut rx) =
            make_transport(peer.local_addr().unwrap(), TransportKind::Udp, DEFAULT_CONNECT_TIMEOUT);

        transport.connect().await.unwrap();
        expect_started(&mut rx).await;

        transport.close().await;
        transport.close().await;
        assert_eq!(transport.state(), TransportState::Closed);

        match rx.recv().await {
            Some(TransportEvent::Stopped) => {}
            other => panic!("expected Stopped, got {other:?}"),
        }
        // The second close must not queue a second stop event.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_after_close_starts_fresh() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (mut transport, mut rx) =
            make_transport(peer.local_addr().unwrap(), TransportKind::Udp, DEFAULT_CONNECT_TIMEOUT);

        transport.connect().await.unwrap();
        expect_started(&mut rx).await;
        transport.close().await;
        match rx.recv().await {
            Some(TransportEvent::Stopped) => {}
            other => panic!("expected Stopped, got {other:?}"),
        }

        transport.send(b"again").await.expect("send after close reconnects");
        assert_eq!(transport.state(), TransportState::Open);
        expect_started(&mut rx).await;

        let mut buf = [0u8; 8];
        let (n, _) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"again");
    }

    #[tokio::test]
    async fn test_connect_while_open_is_a_noop() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (mut transport, mut rx) =
            make_transport(peer.local_addr().unwrap(), TransportKind::Udp, DEFAULT_CONNECT_TIMEOUT);

        transport.connect().await.unwrap();
        expect_started(&mut rx).await;
        transport.connect().await.expect("second connect resolves immediately");
        assert_eq!(transport.state(), TransportState::Open);
        // No second Started event.
        assert!(rx.try_recv().is_err());
    }
}
