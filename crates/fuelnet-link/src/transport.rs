//! # Reliable-Channel Client Transport
//!
//! TCP client speaking newline-delimited JSON records, with infinite
//! fixed-delay reconnection. Pumps use it toward their station and stations
//! use it toward the enterprise.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Reliable Channel States                              │
//! │                                                                         │
//! │  ┌────────────┐    spawn()      ┌────────────┐                         │
//! │  │Disconnected│ ──────────────► │ Connecting │ ◄────────────┐          │
//! │  └────────────┘                 └─────┬──────┘              │          │
//! │                                       │                     │          │
//! │                             success   │   refused / error   │          │
//! │                                 ┌─────┴─────┐               │          │
//! │                                 ▼           ▼               │          │
//! │                       ┌────────────┐  ┌────────────┐        │          │
//! │                       │ Connected  │  │  Backoff   │ ───────┘          │
//! │                       │ hello sent │  │ fixed 5 s  │  timer expired    │
//! │                       └─────┬──────┘  └────────────┘                   │
//! │                             │               ▲                           │
//! │                  EOF / read or write error  │                           │
//! │                             └───────────────┘                           │
//! │                                                                         │
//! │  RETRY POLICY: constant delay, no growth, no jitter, no attempt cap.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Sessions
//! Every successful connect opens a new numbered session. Writes may be
//! pinned to a session with [`TransportHandle::send_confirmed`]; a write
//! pinned to a session that has ended fails instead of leaking onto the next
//! connection before it has been (re)admitted.

use backoff::backoff::{Backoff, Constant};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{LinkError, LinkResult};
use crate::protocol::{Datagram, Record};

// =============================================================================
// Line Codec
// =============================================================================

/// Writes one record as a newline-terminated line and flushes it.
pub async fn write_record<W>(writer: &mut W, record: &Record) -> LinkResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let line = record.to_line()?;
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| LinkError::WriteFailed(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| LinkError::WriteFailed(e.to_string()))
}

// =============================================================================
// Transport State
// =============================================================================

/// Connection state of a client transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out the fixed retry delay.
    Backoff,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
            LinkState::Backoff => write!(f, "backoff"),
        }
    }
}

/// What the transport reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A connect attempt is starting.
    Connecting,
    /// Connected and the hello record was written.
    Connected { session: u64 },
    /// A well-formed record arrived.
    Record { session: u64, record: Record },
    /// The session ended (EOF, read/write failure or shutdown).
    Disconnected { session: u64 },
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Builds the periodic keepalive record.
pub type HeartbeatFn = Arc<dyn Fn() -> Record + Send + Sync>;

/// Configuration for a client transport.
#[derive(Clone)]
pub struct TransportConfig {
    /// `host:port` of the hub.
    pub addr: String,

    /// First record written on every new session.
    pub hello: Record,

    /// Keepalive record factory, called once per interval.
    pub heartbeat: HeartbeatFn,

    /// Keepalive period. The first one goes out one period after connect.
    pub heartbeat_interval: Duration,

    /// Fixed delay between connect attempts.
    pub reconnect_delay: Duration,

    pub connect_timeout: Duration,
}

// =============================================================================
// Transport Handle
// =============================================================================

struct Outgoing {
    /// Session the write is pinned to, if any.
    session: Option<u64>,
    record: Record,
    ack: Option<oneshot::Sender<LinkResult<()>>>,
}

impl Outgoing {
    fn complete(self, result: LinkResult<()>) {
        if let Some(ack) = self.ack {
            let _ = ack.send(result);
        }
    }
}

/// Handle for interacting with the transport from other components.
#[derive(Clone)]
pub struct TransportHandle {
    outgoing_tx: mpsc::Sender<Outgoing>,
    state: Arc<RwLock<LinkState>>,
    shutdown_tx: mpsc::Sender<()>,
}

impl TransportHandle {
    /// Queues a record for whatever session is current. Fire and forget.
    pub async fn send(&self, record: Record) -> LinkResult<()> {
        self.outgoing_tx
            .send(Outgoing {
                session: None,
                record,
                ack: None,
            })
            .await
            .map_err(|_| LinkError::ChannelError("Transport stopped".into()))
    }

    /// Writes a record on `session` and waits for the write result.
    ///
    /// Fails with [`LinkError::Disconnected`] if that session is no longer
    /// the live one.
    pub async fn send_confirmed(&self, session: u64, record: Record) -> LinkResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.outgoing_tx
            .send(Outgoing {
                session: Some(session),
                record,
                ack: Some(ack_tx),
            })
            .await
            .map_err(|_| LinkError::ChannelError("Transport stopped".into()))?;
        ack_rx.await?
    }

    pub async fn state(&self) -> LinkState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == LinkState::Connected
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> LinkResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| LinkError::ChannelError("Failed to send shutdown signal".into()))
    }
}

// =============================================================================
// Transport
// =============================================================================

enum SessionEnd {
    PeerClosed,
    Failed(LinkError),
    Shutdown,
}

/// Reliable-channel client with automatic reconnection.
///
/// ## Usage
/// ```rust,ignore
/// let (handle, mut events) = Transport::spawn(TransportConfig {
///     addr: "127.0.0.1:6000".into(),
///     hello: Record::registration(pump_id, grades),
///     heartbeat: Arc::new(move || Record::heartbeat(pump_id)),
///     heartbeat_interval: Duration::from_secs(30),
///     reconnect_delay: Duration::from_secs(5),
///     connect_timeout: Duration::from_secs(10),
/// });
///
/// while let Some(event) = events.recv().await {
///     // Connecting / Connected / Record / Disconnected
/// }
/// ```
pub struct Transport {
    config: TransportConfig,
    state: Arc<RwLock<LinkState>>,
    outgoing_rx: mpsc::Receiver<Outgoing>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Transport {
    /// Creates a new transport and spawns its background task.
    ///
    /// The event channel is unbounded: the transport must never stall on a
    /// consumer that is itself waiting on a confirmed write.
    pub fn spawn(
        config: TransportConfig,
    ) -> (TransportHandle, mpsc::UnboundedReceiver<TransportEvent>) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<Outgoing>(100);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let state = Arc::new(RwLock::new(LinkState::Disconnected));

        let transport = Transport {
            config,
            state: state.clone(),
            outgoing_rx,
            events_tx,
            shutdown_rx,
        };

        tokio::spawn(transport.run());

        let handle = TransportHandle {
            outgoing_tx,
            state,
            shutdown_tx,
        };

        (handle, events_rx)
    }

    /// Main transport loop.
    async fn run(mut self) {
        info!(addr = %self.config.addr, "Transport starting");

        let mut backoff = Constant::new(self.config.reconnect_delay);
        let mut session = 0u64;

        loop {
            *self.state.write().await = LinkState::Connecting;
            self.emit(TransportEvent::Connecting);

            let connect = connect_with_timeout(self.config.addr.clone(), self.config.connect_timeout);
            tokio::pin!(connect);

            let attempt = loop {
                tokio::select! {
                    result = &mut connect => break Some(result),
                    Some(req) = self.outgoing_rx.recv() => req.complete(Err(LinkError::Disconnected)),
                    _ = self.shutdown_rx.recv() => break None,
                }
            };

            match attempt {
                None => {
                    info!("Shutdown while connecting");
                    break;
                }
                Some(Ok(stream)) => {
                    session += 1;
                    info!(addr = %self.config.addr, session, "Connected");
                    *self.state.write().await = LinkState::Connected;
                    backoff.reset();

                    let end = self.connection_loop(stream, session).await;
                    self.emit(TransportEvent::Disconnected { session });

                    match end {
                        SessionEnd::Shutdown => break,
                        SessionEnd::PeerClosed => info!(session, "Peer closed the connection"),
                        SessionEnd::Failed(e) => warn!(session, %e, "Connection lost"),
                    }
                }
                Some(Err(e)) if e.is_retryable() => {
                    warn!(addr = %self.config.addr, %e, "Failed to connect");
                }
                Some(Err(e)) => {
                    error!(addr = %self.config.addr, %e, "Connect failed with a non-transient error");
                }
            }

            *self.state.write().await = LinkState::Backoff;

            // Constant never runs out; the fallback only keeps the match total.
            let delay = backoff.next_backoff().unwrap_or(self.config.reconnect_delay);
            debug!(?delay, "Waiting before reconnect");

            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            let shutdown = loop {
                tokio::select! {
                    _ = &mut sleep => break false,
                    Some(req) = self.outgoing_rx.recv() => req.complete(Err(LinkError::Disconnected)),
                    _ = self.shutdown_rx.recv() => break true,
                }
            };
            if shutdown {
                info!("Shutdown during backoff");
                break;
            }
        }

        *self.state.write().await = LinkState::Disconnected;
        info!("Transport stopped");
    }

    /// Drives one session until it ends.
    async fn connection_loop(&mut self, stream: TcpStream, session: u64) -> SessionEnd {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        if let Err(e) = write_record(&mut write_half, &self.config.hello).await {
            return SessionEnd::Failed(e);
        }
        debug!(msg_type = %self.config.hello.type_name(), session, "Sent hello");
        self.emit(TransportEvent::Connected { session });

        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(req) = self.outgoing_rx.recv() => {
                    if req.session.is_some_and(|s| s != session) {
                        req.complete(Err(LinkError::Disconnected));
                        continue;
                    }
                    debug!(msg_type = %req.record.type_name(), session, "Sending record");
                    match write_record(&mut write_half, &req.record).await {
                        Ok(()) => req.complete(Ok(())),
                        Err(e) => {
                            let reason = e.to_string();
                            req.complete(Err(e));
                            return SessionEnd::Failed(LinkError::WriteFailed(reason));
                        }
                    }
                }

                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            match Record::from_line(&line) {
                                Ok(record) => {
                                    debug!(msg_type = %record.type_name(), session, "Received record");
                                    self.emit(TransportEvent::Record { session, record });
                                }
                                Err(e) => warn!(%e, "Dropping malformed record"),
                            }
                        }
                        Ok(None) => return SessionEnd::PeerClosed,
                        Err(e) => return SessionEnd::Failed(LinkError::Io(e)),
                    }
                }

                _ = heartbeat.tick() => {
                    let record = (self.config.heartbeat)();
                    if let Err(e) = write_record(&mut write_half, &record).await {
                        return SessionEnd::Failed(e);
                    }
                    debug!(session, "Sent heartbeat");
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, closing connection");
                    let _ = write_half.shutdown().await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    fn emit(&self, event: TransportEvent) {
        if self.events_tx.send(event).is_err() {
            debug!("Transport event receiver dropped");
        }
    }
}

/// Connects with timeout.
async fn connect_with_timeout(addr: String, limit: Duration) -> LinkResult<TcpStream> {
    match timeout(limit, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => {
            let _ = stream.set_nodelay(true);
            Ok(stream)
        }
        Ok(Err(e)) => Err(LinkError::ConnectionFailed(e.to_string())),
        Err(_) => Err(LinkError::Timeout(limit.as_secs())),
    }
}

// =============================================================================
// Fast Channel (datagrams)
// =============================================================================

/// Best-effort datagram sender toward a station's telemetry port.
///
/// Send failures are logged and swallowed: a lost frame is never retried,
/// the next tick supersedes it.
pub struct FastChannel {
    socket: UdpSocket,
    target: SocketAddr,
}

impl FastChannel {
    /// Binds an ephemeral local socket able to reach `target`.
    pub async fn bind(target: &str) -> LinkResult<Self> {
        let target = tokio::net::lookup_host(target)
            .await?
            .next()
            .ok_or_else(|| LinkError::InvalidConfig(format!("Cannot resolve {}", target)))?;

        let local: SocketAddr = if target.is_ipv4() {
            ([0u8, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;

        Ok(FastChannel { socket, target })
    }

    /// Local port, announced to the hub via `register_fast_channel`.
    pub fn local_port(&self) -> LinkResult<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    pub async fn send(&self, datagram: &Datagram) {
        let bytes = match datagram.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(%e, "Failed to encode datagram");
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&bytes, self.target).await {
            debug!(%e, target = %self.target, "Datagram dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fuelnet_core::PumpId;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    fn test_config(addr: String) -> TransportConfig {
        TransportConfig {
            addr,
            hello: Record::registration(PumpId::new(1), vec!["grade93".into()]),
            heartbeat: Arc::new(|| Record::heartbeat(PumpId::new(1))),
            heartbeat_interval: Duration::from_millis(100),
            reconnect_delay: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_link_state_display() {
        assert_eq!(LinkState::Connected.to_string(), "connected");
        assert_eq!(LinkState::Backoff.to_string(), "backoff");
    }

    #[tokio::test]
    async fn test_write_record_is_one_line() {
        let mut buf: Vec<u8> = Vec::new();
        write_record(&mut buf, &Record::heartbeat(PumpId::new(4)))
            .await
            .unwrap();
        assert_eq!(buf.iter().filter(|b| **b == b'\n').count(), 1);
        assert_eq!(buf.last(), Some(&b'\n'));
    }

    #[tokio::test]
    async fn test_hello_then_heartbeats() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (handle, mut events) = Transport::spawn(test_config(addr));

        let (socket, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(socket).lines();

        let first = lines.next_line().await.unwrap().unwrap();
        assert!(matches!(Record::from_line(&first).unwrap(), Record::Registration(_)));

        let second = lines.next_line().await.unwrap().unwrap();
        assert!(matches!(Record::from_line(&second).unwrap(), Record::Heartbeat(_)));

        assert_eq!(events.recv().await, Some(TransportEvent::Connecting));
        assert_eq!(events.recv().await, Some(TransportEvent::Connected { session: 1 }));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_session_write_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (handle, mut events) = Transport::spawn(test_config(addr));
        let (_socket, _) = listener.accept().await.unwrap();

        while let Some(event) = events.recv().await {
            if matches!(event, TransportEvent::Connected { .. }) {
                break;
            }
        }

        let result = handle
            .send_confirmed(42, Record::heartbeat(PumpId::new(1)))
            .await;
        assert!(matches!(result, Err(LinkError::Disconnected)));

        assert!(handle
            .send_confirmed(1, Record::heartbeat(PumpId::new(1)))
            .await
            .is_ok());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnects_after_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (handle, mut events) = Transport::spawn(test_config(addr));

        let (first, _) = listener.accept().await.unwrap();
        drop(first);

        let (_second, _) = listener.accept().await.unwrap();

        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            let done = event == TransportEvent::Connected { session: 2 };
            seen.push(event);
            if done {
                break;
            }
        }
        assert!(seen.contains(&TransportEvent::Disconnected { session: 1 }));

        handle.shutdown().await.unwrap();
    }
}
