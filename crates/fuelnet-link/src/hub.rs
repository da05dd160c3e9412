//! # Station Hub
//!
//! The pump-facing server of a station: admission, liveness tracking,
//! telemetry intake, price broadcast and command dispatch.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Station Hub Architecture                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     StationServer task                          │   │
//! │  │                                                                 │   │
//! │  │  TCP accept ──▶ spawn handle_connection (one task per pump)     │   │
//! │  │  UDP recv   ──▶ fast_status → telemetry cache                   │   │
//! │  │                 register_fast_channel → registry.fast_addr      │   │
//! │  └───────────────────────────────┬─────────────────────────────────┘   │
//! │                                  │                                      │
//! │  ┌───────────────────────────────▼─────────────────────────────────┐   │
//! │  │                         StationHub                              │   │
//! │  │   Registry<PumpId> · PriceBook · Broadcaster · Dispatcher       │   │
//! │  │   RecordStore (external) · telemetry cache                      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Per-connection flow:                                                   │
//! │  ────────────────────                                                   │
//! │  1. wait ≤ 10 s for `registration`        (anything else: close)       │
//! │  2. unknown pump → `error NOT_REGISTERED` then close                   │
//! │  3. register (supersede) → `registration_confirmed { priceSet }`       │
//! │  4. read loop, 90 s per read; malformed records dropped                │
//! │  5. EOF / timeout → remove entry, store ← disconnected                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fuelnet_core::{CommandVerb, ConnectionState, PriceSet, PumpId};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::io::AsyncBufReadExt;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::broadcast::{BroadcastReport, Broadcaster};
use crate::config::Timings;
use crate::dispatch::CommandDispatcher;
use crate::error::{LinkError, LinkResult};
use crate::protocol::{Datagram, Record, StatusPayload, ERROR_NOT_REGISTERED};
use crate::registry::{ConnectionSummary, PeerConnection, Registry};
use crate::store::RecordStore;
use crate::transport::write_record;

/// Largest datagram accepted on the fast channel.
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

// =============================================================================
// Price Book
// =============================================================================

/// The node's current [`PriceSet`], always swapped wholesale.
pub struct PriceBook {
    current: RwLock<PriceSet>,
}

impl PriceBook {
    pub fn new(initial: PriceSet) -> Self {
        PriceBook {
            current: RwLock::new(initial),
        }
    }

    pub async fn current(&self) -> PriceSet {
        self.current.read().await.clone()
    }

    pub async fn replace(&self, next: PriceSet) {
        *self.current.write().await = next;
    }

    /// Lays `update` over the current table and swaps in the result.
    pub async fn merge(&self, update: &PriceSet) -> PriceSet {
        let mut current = self.current.write().await;
        let next = current.merged(update);
        *current = next.clone();
        next
    }
}

// =============================================================================
// Admission Helpers
// =============================================================================

/// Reads the first record of a session within `limit`.
pub(crate) async fn receive_first<R>(lines: &mut Lines<R>, limit: Duration) -> LinkResult<Record>
where
    R: AsyncBufRead + Unpin,
{
    match timeout(limit, lines.next_line()).await {
        Ok(Ok(Some(line))) => Record::from_line(&line),
        Ok(Ok(None)) => Err(LinkError::Disconnected),
        Ok(Err(e)) => Err(LinkError::Io(e)),
        Err(_) => Err(LinkError::RegistrationTimeout(limit.as_secs())),
    }
}

/// How a liveness loop ended.
#[derive(Debug)]
pub(crate) enum LoopEnd {
    PeerClosed,
    TimedOut,
    ReadFailed(std::io::Error),
    /// The hub closed this connection (superseded, evicted or shutdown).
    Closed,
}

/// Runs the read side of an admitted connection until it ends, passing
/// every well-formed record to `on_record`.
pub(crate) async fn liveness_loop<R, Id, F, Fut>(
    lines: &mut Lines<R>,
    conn: &PeerConnection<Id>,
    read_timeout: Duration,
    mut on_record: F,
) -> LoopEnd
where
    R: AsyncBufRead + Unpin,
    Id: std::fmt::Display,
    F: FnMut(Record) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    loop {
        tokio::select! {
            _ = conn.closed() => return LoopEnd::Closed,

            read = timeout(read_timeout, lines.next_line()) => {
                match read {
                    Err(_) => return LoopEnd::TimedOut,
                    Ok(Ok(None)) => return LoopEnd::PeerClosed,
                    Ok(Err(e)) => return LoopEnd::ReadFailed(e),
                    Ok(Ok(Some(line))) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match Record::from_line(&line) {
                            Ok(record) => on_record(record).await,
                            Err(e) => warn!(id = %conn.id, %e, "Dropping malformed record"),
                        }
                    }
                }
            }
        }
    }
}

// =============================================================================
// Station Hub
// =============================================================================

/// Shared state of a station and its administrative surface.
pub struct StationHub {
    registry: Arc<Registry<PumpId>>,
    prices: PriceBook,
    store: Arc<dyn RecordStore>,
    broadcaster: Broadcaster<PumpId>,
    dispatcher: CommandDispatcher,
    telemetry: RwLock<HashMap<PumpId, StatusPayload>>,
    /// Serializes price changes with their broadcast so pumps see updates
    /// in the order they were applied.
    publish: Mutex<()>,
    timings: Timings,
}

impl StationHub {
    pub fn new(initial_prices: PriceSet, store: Arc<dyn RecordStore>, timings: Timings) -> Self {
        let registry = Arc::new(Registry::with_write_timeout(timings.write_timeout));

        let evict_store = store.clone();
        let broadcaster = Broadcaster::new(registry.clone()).with_eviction_hook(Arc::new(
            move |pump_id: &PumpId| {
                if let Err(e) = evict_store.set_connection_state(*pump_id, ConnectionState::Disconnected) {
                    error!(pump_id = %pump_id, %e, "Failed to record disconnection");
                }
            },
        ));

        StationHub {
            dispatcher: CommandDispatcher::new(registry.clone()),
            registry,
            prices: PriceBook::new(initial_prices),
            store,
            broadcaster,
            telemetry: RwLock::new(HashMap::new()),
            publish: Mutex::new(()),
            timings,
        }
    }

    // =========================================================================
    // Administrative Surface
    // =========================================================================

    /// Replaces the price set wholesale and runs one broadcast pass.
    pub async fn trigger_price_broadcast(&self, prices: PriceSet) -> BroadcastReport {
        let _publish = self.publish.lock().await;
        self.prices.replace(prices.clone()).await;
        info!(grades = prices.len(), "Price set replaced");
        self.broadcaster.broadcast(&Record::price_update(prices)).await
    }

    /// Merges a (possibly partial) update and broadcasts the merged set.
    pub async fn apply_price_update(&self, update: &PriceSet) -> (PriceSet, BroadcastReport) {
        let _publish = self.publish.lock().await;
        let merged = self.prices.merge(update).await;
        info!(updated = update.len(), grades = merged.len(), "Price update merged");
        let report = self
            .broadcaster
            .broadcast(&Record::price_update(merged.clone()))
            .await;
        (merged, report)
    }

    /// Sends a command to one pump. `false` if it is offline or the write
    /// failed; nothing is queued either way.
    pub async fn dispatch_command(&self, pump_id: PumpId, verb: CommandVerb, reason: &str) -> bool {
        match self.dispatcher.send_command(pump_id, verb, reason).await {
            Ok(()) => true,
            Err(e) => {
                warn!(pump_id = %pump_id, verb = %verb, %e, "Command not delivered");
                false
            }
        }
    }

    pub async fn registry_snapshot(&self) -> Vec<ConnectionSummary<PumpId>> {
        let mut summaries = self.registry.summaries().await;
        summaries.sort_by_key(|s| s.id);
        summaries
    }

    pub async fn current_prices(&self) -> PriceSet {
        self.prices.current().await
    }

    /// Most recent telemetry seen for a pump on either channel.
    pub async fn latest_telemetry(&self, pump_id: PumpId) -> Option<StatusPayload> {
        self.telemetry.read().await.get(&pump_id).cloned()
    }

    pub async fn connected_count(&self) -> usize {
        self.registry.len().await
    }

    pub fn registry(&self) -> &Arc<Registry<PumpId>> {
        &self.registry
    }

    // =========================================================================
    // Connection Handling
    // =========================================================================

    /// Serves one pump connection from admission to teardown.
    ///
    /// Works on any byte stream so it can be driven by in-memory pipes.
    pub async fn handle_connection<S>(self: Arc<Self>, stream: S, peer: Option<SocketAddr>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();

        let registration = match receive_first(&mut lines, self.timings.registration_timeout).await {
            Ok(Record::Registration(payload)) => payload,
            Ok(other) => {
                warn!(?peer, msg_type = %other.type_name(), "Expected registration - closing connection");
                let _ = writer.shutdown().await;
                return;
            }
            Err(e) => {
                warn!(?peer, %e, "Registration failed - closing connection");
                let _ = writer.shutdown().await;
                return;
            }
        };
        let pump_id = registration.pump_id;

        if !self.store.pump_exists(pump_id) {
            warn!(pump_id = %pump_id, ?peer, "Unknown pump - rejecting registration");
            let reject = Record::error(
                ERROR_NOT_REGISTERED,
                &LinkError::UnregisteredPump(pump_id).to_string(),
            );
            let _ = write_record(&mut writer, &reject).await;
            let _ = writer.shutdown().await;
            return;
        }

        // Admission runs under the publish lock: the confirmation carries the
        // prices current at registration and is queued before the entry is
        // visible, so every later broadcast lands behind it.
        let (conn, confirmation) = {
            let _publish = self.publish.lock().await;
            if let Err(e) = self.store.set_connection_state(pump_id, ConnectionState::Connected) {
                error!(pump_id = %pump_id, %e, "Failed to record connection");
            }
            let prices = self.prices.current().await;
            self.registry
                .register_with_greeting(pump_id, peer, writer, Record::confirmed(pump_id, prices))
                .await
        };

        if let Err(e) = confirmation.wait().await {
            warn!(pump_id = %pump_id, %e, "Failed to send confirmation");
            if let Some(removed) = self.registry.remove_if_current(&pump_id, conn.conn_id).await {
                removed.close();
                if let Err(e) = self
                    .store
                    .set_connection_state(pump_id, ConnectionState::Disconnected)
                {
                    error!(pump_id = %pump_id, %e, "Failed to record disconnection");
                }
            }
            return;
        }

        info!(
            pump_id = %pump_id,
            ?peer,
            grades = ?registration.supported_grades,
            conn_id = conn.conn_id,
            "Pump registered"
        );
        let hub = self.clone();
        let end = liveness_loop(&mut lines, &conn, self.timings.read_timeout, |record| {
            let hub = hub.clone();
            async move { hub.handle_pump_record(pump_id, peer, record).await }
        })
        .await;

        match &end {
            LoopEnd::TimedOut => {
                let e = LinkError::HeartbeatTimeout(self.timings.read_timeout.as_secs());
                warn!(pump_id = %pump_id, %e, "Evicting silent pump");
            }
            LoopEnd::PeerClosed => info!(pump_id = %pump_id, "Pump closed the connection"),
            LoopEnd::ReadFailed(e) => warn!(pump_id = %pump_id, %e, "Read failed"),
            LoopEnd::Closed => debug!(pump_id = %pump_id, "Connection closed by hub"),
        }

        if let Some(removed) = self.registry.remove_if_current(&pump_id, conn.conn_id).await {
            removed.close();
            if let Err(e) = self
                .store
                .set_connection_state(pump_id, ConnectionState::Disconnected)
            {
                error!(pump_id = %pump_id, %e, "Failed to record disconnection");
            }
            info!(pump_id = %pump_id, "Pump disconnected");
        }
    }

    async fn handle_pump_record(&self, pump_id: PumpId, peer: Option<SocketAddr>, record: Record) {
        match record {
            Record::Heartbeat(hb) => {
                if hb.pump_id != pump_id {
                    warn!(pump_id = %pump_id, claimed = %hb.pump_id, "Heartbeat for another pump ignored");
                    return;
                }
                if let Some(conn) = self.registry.get(&pump_id).await {
                    self.registry.touch(&pump_id, conn.conn_id).await;
                }
                debug!(pump_id = %pump_id, "Heartbeat");
            }

            Record::Status(status) => {
                if status.pump_id != pump_id {
                    warn!(pump_id = %pump_id, claimed = %status.pump_id, "Status for another pump ignored");
                    return;
                }
                debug!(
                    pump_id = %pump_id,
                    state = %status.operation_state,
                    volume = status.volume,
                    amount = status.amount,
                    "Status snapshot"
                );
                self.cache_telemetry(status).await;
            }

            Record::TransactionCompleted(tx) => {
                if tx.pump_id != pump_id {
                    warn!(pump_id = %pump_id, claimed = %tx.pump_id, "Transaction for another pump ignored");
                    return;
                }
                info!(
                    pump_id = %pump_id,
                    transaction_id = %tx.transaction_id,
                    volume = tx.volume,
                    amount = tx.amount,
                    "Transaction completed"
                );
                if let Err(e) = self.store.record_transaction(&tx) {
                    error!(transaction_id = %tx.transaction_id, %e, "Failed to record transaction");
                }
            }

            Record::RegisterFastChannel(fast) => match peer {
                Some(peer) => {
                    let addr = SocketAddr::new(peer.ip(), fast.udp_port);
                    self.registry.set_fast_addr(&pump_id, addr).await;
                    debug!(pump_id = %pump_id, %addr, "Fast channel registered");
                }
                None => debug!(pump_id = %pump_id, "Fast channel announced without peer address"),
            },

            Record::Registration(_) => {
                warn!(pump_id = %pump_id, "Duplicate registration on live connection ignored");
            }

            other => {
                debug!(pump_id = %pump_id, msg_type = %other.type_name(), "Unexpected record from pump");
            }
        }
    }

    /// Keeps the newest frame per pump; reordered older frames are ignored.
    async fn cache_telemetry(&self, frame: StatusPayload) {
        let mut cache = self.telemetry.write().await;
        match cache.get(&frame.pump_id) {
            Some(existing) if existing.timestamp > frame.timestamp => {}
            _ => {
                cache.insert(frame.pump_id, frame);
            }
        }
    }

    /// Handles one fast-channel datagram. Malformed datagrams are dropped
    /// without a trace beyond a debug log.
    pub async fn handle_datagram(&self, bytes: &[u8], src: SocketAddr) {
        let datagram = match Datagram::from_bytes(bytes) {
            Ok(d) => d,
            Err(e) => {
                debug!(%src, %e, "Dropping malformed datagram");
                return;
            }
        };

        let pump_id = datagram.pump_id();
        if !self.store.pump_exists(pump_id) {
            debug!(pump_id = %pump_id, %src, "Datagram from unknown pump dropped");
            return;
        }

        match datagram {
            Datagram::FastStatus(frame) => self.cache_telemetry(frame).await,
            Datagram::RegisterFastChannel(_) => {
                if self.registry.set_fast_addr(&pump_id, src).await {
                    debug!(pump_id = %pump_id, %src, "Fast channel registered");
                }
            }
        }
    }

    /// Closes every connection, reporting each pump as disconnected.
    async fn close_all(&self) {
        for summary in self.registry.summaries().await {
            if let Err(e) = self
                .store
                .set_connection_state(summary.id, ConnectionState::Disconnected)
            {
                error!(pump_id = %summary.id, %e, "Failed to record disconnection");
            }
        }
        self.registry.clear().await;
    }
}

// =============================================================================
// Station Server
// =============================================================================

/// Socket configuration for a station hub.
#[derive(Debug, Clone)]
pub struct StationServerConfig {
    /// Reliable-channel bind address, e.g. `0.0.0.0:6000`.
    pub tcp_bind: String,
    /// Fast-channel bind address, e.g. `0.0.0.0:6001`.
    pub udp_bind: String,
}

/// Handle for controlling a running station hub.
#[derive(Clone)]
pub struct StationHandle {
    hub: Arc<StationHub>,
    tcp_addr: SocketAddr,
    udp_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
}

impl StationHandle {
    /// The administrative surface.
    pub fn hub(&self) -> &Arc<StationHub> {
        &self.hub
    }

    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    /// Stops accepting, closes every pump connection.
    pub async fn shutdown(&self) -> LinkResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| LinkError::ChannelError("Station shutdown channel closed".into()))
    }
}

pub struct StationServer;

impl StationServer {
    /// Binds both channels and starts serving.
    pub async fn start(config: StationServerConfig, hub: Arc<StationHub>) -> LinkResult<StationHandle> {
        let listener = TcpListener::bind(&config.tcp_bind).await?;
        let socket = UdpSocket::bind(&config.udp_bind).await?;
        let tcp_addr = listener.local_addr()?;
        let udp_addr = socket.local_addr()?;

        info!(tcp = %tcp_addr, udp = %udp_addr, "Station hub started");

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(Self::serve(hub.clone(), listener, socket, shutdown_rx));

        Ok(StationHandle {
            hub,
            tcp_addr,
            udp_addr,
            shutdown_tx,
        })
    }

    async fn serve(
        hub: Arc<StationHub>,
        listener: TcpListener,
        socket: UdpSocket,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "New pump connection");
                        let _ = stream.set_nodelay(true);
                        tokio::spawn(hub.clone().handle_connection(stream, Some(peer)));
                    }
                    Err(e) => error!(%e, "Accept failed"),
                },

                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, src)) => hub.handle_datagram(&buf[..len], src).await,
                    Err(e) => debug!(%e, "Datagram receive failed"),
                },

                _ = shutdown_rx.recv() => {
                    info!("Station hub shutting down");
                    break;
                }
            }
        }

        hub.close_all().await;
        info!("Station hub stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRecordStore;
    use tokio::io::{duplex, DuplexStream};

    fn fast_timings() -> Timings {
        Timings {
            heartbeat_interval: Duration::from_millis(100),
            read_timeout: Duration::from_millis(300),
            registration_timeout: Duration::from_millis(200),
            reconnect_delay: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_millis(500),
            dispense_tick: Duration::from_millis(20),
            snapshot_every_ticks: 5,
        }
    }

    fn hub_with(store: Arc<InMemoryRecordStore>) -> Arc<StationHub> {
        Arc::new(StationHub::new(
            PriceSet::from_pairs([("grade93", 1290), ("grade95", 1350)]),
            store,
            fast_timings(),
        ))
    }

    async fn send(stream: &mut DuplexStream, record: &Record) {
        write_record(stream, record).await.unwrap();
    }

    #[tokio::test]
    async fn test_price_book_merge_is_wholesale() {
        let book = PriceBook::new(PriceSet::from_pairs([("grade93", 1290), ("grade95", 1350)]));
        let before = book.current().await;
        let merged = book.merge(&PriceSet::from_pairs([("grade93", 1300)])).await;

        assert_eq!(before.get(&"grade93".into()), Some(1290));
        assert_eq!(merged, book.current().await);
        assert_eq!(merged.get(&"grade95".into()), Some(1350));
    }

    #[tokio::test]
    async fn test_known_pump_is_confirmed_with_prices() {
        let store = Arc::new(InMemoryRecordStore::with_pumps([PumpId::new(1)]));
        let hub = hub_with(store.clone());
        let (mut client, server) = duplex(4096);
        tokio::spawn(hub.clone().handle_connection(server, None));

        send(&mut client, &Record::registration(PumpId::new(1), vec!["grade93".into()])).await;

        let (read, _write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        match Record::from_line(&line).unwrap() {
            Record::RegistrationConfirmed(c) => {
                assert_eq!(c.pump_id, PumpId::new(1));
                assert_eq!(c.price_set, hub.current_prices().await);
            }
            other => panic!("Expected confirmation, got {}", other.type_name()),
        }

        assert_eq!(hub.connected_count().await, 1);
        assert_eq!(
            store.pump_history(),
            vec![(PumpId::new(1), ConnectionState::Connected)]
        );
    }

    #[tokio::test]
    async fn test_unknown_pump_rejected_once_then_closed() {
        let store = Arc::new(InMemoryRecordStore::with_pumps([PumpId::new(1)]));
        let hub = hub_with(store);
        let (mut client, server) = duplex(4096);
        let task = tokio::spawn(hub.clone().handle_connection(server, None));

        send(&mut client, &Record::registration(PumpId::new(42), vec![])).await;

        let (read, _write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        match Record::from_line(&line).unwrap() {
            Record::Error(e) => assert_eq!(e.code, ERROR_NOT_REGISTERED),
            other => panic!("Expected error, got {}", other.type_name()),
        }
        assert_eq!(lines.next_line().await.unwrap(), None);

        task.await.unwrap();
        assert!(hub.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_wrong_first_record_closes_silently() {
        let store = Arc::new(InMemoryRecordStore::with_pumps([PumpId::new(1)]));
        let hub = hub_with(store.clone());
        let (mut client, server) = duplex(4096);
        let task = tokio::spawn(hub.clone().handle_connection(server, None));

        send(&mut client, &Record::heartbeat(PumpId::new(1))).await;

        let (read, _write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();
        assert_eq!(lines.next_line().await.unwrap(), None);

        task.await.unwrap();
        assert!(hub.registry().is_empty().await);
        assert!(store.pump_history().is_empty());
    }

    #[tokio::test]
    async fn test_registration_timeout_closes_silently() {
        let store = Arc::new(InMemoryRecordStore::with_pumps([PumpId::new(1)]));
        let hub = hub_with(store);
        let (client, server) = duplex(4096);
        let task = tokio::spawn(hub.clone().handle_connection(server, None));

        let (read, _write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();
        assert_eq!(lines.next_line().await.unwrap(), None);

        task.await.unwrap();
        assert!(hub.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_record_keeps_connection() {
        let store = Arc::new(InMemoryRecordStore::with_pumps([PumpId::new(1)]));
        let hub = hub_with(store.clone());
        let (client, server) = duplex(4096);
        tokio::spawn(hub.clone().handle_connection(server, None));

        let (read, mut write) = tokio::io::split(client);
        write_record(&mut write, &Record::registration(PumpId::new(1), vec![]))
            .await
            .unwrap();
        let mut lines = BufReader::new(read).lines();
        lines.next_line().await.unwrap().unwrap();

        write.write_all(b"{\"type\":\"bogus\"}\n").await.unwrap();
        write.write_all(b"garbage\n").await.unwrap();

        let tx = crate::protocol::TransactionRecord {
            transaction_id: uuid::Uuid::new_v4(),
            pump_id: PumpId::new(1),
            grade: "grade93".into(),
            volume: 2,
            unit_price: 1290,
            amount: 2580,
            payment_method: fuelnet_core::PaymentMethod::Card,
            started_at: chrono::Utc::now(),
            ended_at: chrono::Utc::now(),
        };
        write_record(&mut write, &Record::TransactionCompleted(tx.clone()))
            .await
            .unwrap();

        // The transaction after the garbage still lands.
        for _ in 0..50 {
            if !store.transactions().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.transactions(), vec![tx]);
        assert!(hub.registry().contains(&PumpId::new(1)).await);
    }

    #[tokio::test]
    async fn test_silence_evicts_exactly_once() {
        let store = Arc::new(InMemoryRecordStore::with_pumps([PumpId::new(1)]));
        let hub = hub_with(store.clone());
        let (client, server) = duplex(4096);
        let task = tokio::spawn(hub.clone().handle_connection(server, None));

        let (read, mut write) = tokio::io::split(client);
        write_record(&mut write, &Record::registration(PumpId::new(1), vec![]))
            .await
            .unwrap();
        let mut lines = BufReader::new(read).lines();
        lines.next_line().await.unwrap().unwrap();

        // Say nothing for longer than the read timeout.
        task.await.unwrap();

        assert!(hub.registry().is_empty().await);
        assert_eq!(
            store.pump_history(),
            vec![
                (PumpId::new(1), ConnectionState::Connected),
                (PumpId::new(1), ConnectionState::Disconnected),
            ]
        );
    }

    /// Registers `pump_id` over a fresh pipe and reads the confirmation.
    async fn admit(
        hub: &Arc<StationHub>,
        pump_id: PumpId,
        capacity: usize,
    ) -> (
        Lines<BufReader<tokio::io::ReadHalf<DuplexStream>>>,
        tokio::io::WriteHalf<DuplexStream>,
        tokio::task::JoinHandle<()>,
    ) {
        let (client, server) = duplex(capacity);
        let task = tokio::spawn(hub.clone().handle_connection(server, None));
        let (read, mut write) = tokio::io::split(client);
        write_record(&mut write, &Record::registration(pump_id, vec![]))
            .await
            .unwrap();
        let mut lines = BufReader::new(read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert!(matches!(
            Record::from_line(&line).unwrap(),
            Record::RegistrationConfirmed(_)
        ));
        (lines, write, task)
    }

    #[tokio::test]
    async fn test_stalled_pump_cannot_wedge_broadcasts() {
        let store = Arc::new(InMemoryRecordStore::with_pumps([PumpId::new(1)]));
        let timings = Timings {
            write_timeout: Duration::from_millis(200),
            ..fast_timings()
        };
        let hub = Arc::new(StationHub::new(PriceSet::standard(), store.clone(), timings));

        // The pump stays connected but never reads again.
        let (_lines, _write, task) = admit(&hub, PumpId::new(1), 1024).await;

        let publisher = hub.clone();
        let broadcasts = tokio::spawn(async move {
            for n in 0..20u64 {
                publisher
                    .trigger_price_broadcast(PriceSet::from_pairs([("grade93", 1300 + n)]))
                    .await;
            }
        });
        timeout(Duration::from_secs(3), broadcasts)
            .await
            .expect("broadcasts stuck behind a stalled pump")
            .unwrap();
        timeout(Duration::from_secs(1), task)
            .await
            .expect("connection task did not finish")
            .unwrap();

        assert!(hub.registry().is_empty().await);
        assert_eq!(
            store.pump_history(),
            vec![
                (PumpId::new(1), ConnectionState::Connected),
                (PumpId::new(1), ConnectionState::Disconnected),
            ]
        );

        let report = timeout(
            Duration::from_secs(1),
            hub.trigger_price_broadcast(PriceSet::standard()),
        )
        .await
        .expect("broadcast after eviction stuck");
        assert_eq!(report.delivered, 0);
    }

    #[tokio::test]
    async fn test_second_registration_supersedes_first() {
        let store = Arc::new(InMemoryRecordStore::with_pumps([PumpId::new(1)]));
        let hub = hub_with(store.clone());

        let (mut old_lines, _old_write, old_task) = admit(&hub, PumpId::new(1), 4096).await;
        let (_new_lines, mut new_write, _new_task) = admit(&hub, PumpId::new(1), 4096).await;

        assert_eq!(hub.connected_count().await, 1);

        // The superseded pipe is closed by the hub and its task ends quietly.
        assert_eq!(old_lines.next_line().await.unwrap(), None);
        timeout(Duration::from_secs(1), old_task)
            .await
            .expect("superseded task did not finish")
            .unwrap();

        write_record(&mut new_write, &Record::heartbeat(PumpId::new(1)))
            .await
            .unwrap();
        assert_eq!(hub.connected_count().await, 1);
        assert_eq!(
            store.pump_history(),
            vec![
                (PumpId::new(1), ConnectionState::Connected),
                (PumpId::new(1), ConnectionState::Connected),
            ]
        );
    }

    #[tokio::test]
    async fn test_records_for_another_pump_are_ignored() {
        let store = Arc::new(InMemoryRecordStore::with_pumps([PumpId::new(1), PumpId::new(2)]));
        let hub = hub_with(store.clone());
        let (_lines, mut write, _task) = admit(&hub, PumpId::new(1), 4096).await;

        let status = |pump_id| StatusPayload {
            pump_id,
            operation_state: fuelnet_core::OperationState::Dispensing,
            volume: 3,
            amount: 3870,
            grade: "grade93".into(),
            timestamp: chrono::Utc::now(),
        };
        let foreign_tx = crate::protocol::TransactionRecord {
            transaction_id: uuid::Uuid::new_v4(),
            pump_id: PumpId::new(2),
            grade: "grade93".into(),
            volume: 2,
            unit_price: 1290,
            amount: 2580,
            payment_method: fuelnet_core::PaymentMethod::Cash,
            started_at: chrono::Utc::now(),
            ended_at: chrono::Utc::now(),
        };

        write_record(&mut write, &Record::Status(status(PumpId::new(2))))
            .await
            .unwrap();
        write_record(&mut write, &Record::TransactionCompleted(foreign_tx))
            .await
            .unwrap();
        // Records are handled in order, so once this one lands the
        // foreign ones have been seen.
        write_record(&mut write, &Record::Status(status(PumpId::new(1))))
            .await
            .unwrap();

        for _ in 0..50 {
            if hub.latest_telemetry(PumpId::new(1)).await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(hub.latest_telemetry(PumpId::new(1)).await.is_some());
        assert_eq!(hub.latest_telemetry(PumpId::new(2)).await, None);
        assert!(store.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_datagrams_fill_telemetry_cache() {
        let store = Arc::new(InMemoryRecordStore::with_pumps([PumpId::new(1)]));
        let hub = hub_with(store);
        let src: SocketAddr = "127.0.0.1:5555".parse().unwrap();

        let frame = StatusPayload {
            pump_id: PumpId::new(1),
            operation_state: fuelnet_core::OperationState::Dispensing,
            volume: 4,
            amount: 5160,
            grade: "grade93".into(),
            timestamp: chrono::Utc::now(),
        };
        let bytes = Datagram::FastStatus(frame.clone()).to_bytes().unwrap();

        hub.handle_datagram(b"not json", src).await;
        hub.handle_datagram(&bytes, src).await;

        assert_eq!(hub.latest_telemetry(PumpId::new(1)).await, Some(frame));
        assert_eq!(hub.latest_telemetry(PumpId::new(2)).await, None);
    }
}
