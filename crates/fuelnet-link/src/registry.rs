//! # Connection Registry
//!
//! Hub-side table of live peer connections. The station keys it by
//! [`PumpId`](fuelnet_core::PumpId), the enterprise by
//! [`StationId`](fuelnet_core::StationId).
//!
//! ## Entry Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  admission ok ──► register(id) ──► conn_id = N, state = connected       │
//! │                        │                                                │
//! │                        │ same id registers again                        │
//! │                        ▼                                                │
//! │               old entry (conn_id N) closed and replaced by N+1          │
//! │                                                                         │
//! │  EOF / read timeout on N+1 ──► remove_if_current(id, N+1)  → removed    │
//! │  late exit of task N       ──► remove_if_current(id, N)    → no-op      │
//! │  broadcast write failure   ──► remove_if_current(id, conn) → removed    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Write Path
//! ```text
//!  broadcast / dispatch / confirm
//!            │ try_send (never waits for room)
//!            ▼
//!   bounded queue (PEER_QUEUE_CAPACITY) ──► writer task ──► socket
//!            │                                  │
//!            │ full / closed → WriteFailed      │ ack per record
//!            ▼                                  ▼
//!        PendingWrite::wait ◄──── bounded by the write timeout
//! ```
//!
//! At most one live writer exists per identifier. Removal is keyed by the
//! connection generation so an exiting task can never evict its successor.
//! Closing a connection only flips a signal; it never waits on the socket.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fuelnet_core::ConnectionState;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::{LinkError, LinkResult};
use crate::protocol::Record;
use crate::transport::write_record;

/// Records that may wait for one peer's writer before sends start failing.
pub const PEER_QUEUE_CAPACITY: usize = 64;

/// Longest a single peer write may take when no timeout is configured.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Writer Task
// =============================================================================

struct Outbound {
    record: Record,
    ack: oneshot::Sender<LinkResult<()>>,
}

/// Drains one peer's queue onto its socket until closed or a write fails.
async fn write_loop<W>(
    mut writer: W,
    mut queue: mpsc::Receiver<Outbound>,
    mut closed: watch::Receiver<bool>,
) where
    W: AsyncWrite + Send + Unpin + 'static,
{
    loop {
        let next = tokio::select! {
            _ = closed.wait_for(|c| *c) => break,
            next = queue.recv() => next,
        };
        let Some(out) = next else { break };

        let result = tokio::select! {
            result = write_record(&mut writer, &out.record) => result,
            _ = closed.wait_for(|c| *c) => {
                let _ = out.ack.send(Err(LinkError::Disconnected));
                break;
            }
        };
        let failed = result.is_err();
        let _ = out.ack.send(result);
        if failed {
            break;
        }
    }

    drop(queue);
    let _ = writer.shutdown().await;
}

/// A queued write whose outcome has not been observed yet.
pub struct PendingWrite {
    ack: Result<oneshot::Receiver<LinkResult<()>>, LinkError>,
    limit: Duration,
}

impl PendingWrite {
    /// Waits for the writer task to report the outcome, at most the
    /// connection's write timeout.
    pub async fn wait(self) -> LinkResult<()> {
        let ack = self.ack?;
        match timeout(self.limit, ack).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LinkError::WriteFailed("peer writer stopped".into())),
            Err(_) => Err(LinkError::WriteFailed(format!(
                "write not completed within {} ms",
                self.limit.as_millis()
            ))),
        }
    }
}

// =============================================================================
// Peer Connection
// =============================================================================

/// One admitted peer.
#[derive(Clone)]
pub struct PeerConnection<Id> {
    pub id: Id,

    /// Connection generation, unique per registry.
    pub conn_id: u64,

    /// Reliable-channel peer address (absent for in-memory streams).
    pub peer_addr: Option<SocketAddr>,

    /// Last announced fast-channel address.
    pub fast_addr: Option<SocketAddr>,

    pub state: ConnectionState,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,

    outgoing: mpsc::Sender<Outbound>,
    closed: Arc<watch::Sender<bool>>,
    write_timeout: Duration,
}

impl<Id> PeerConnection<Id> {
    /// Queues one record for this peer without waiting for queue room.
    ///
    /// A full or closed queue fails the write immediately.
    pub fn enqueue(&self, record: Record) -> PendingWrite {
        let (ack_tx, ack_rx) = oneshot::channel();
        let ack = match self.outgoing.try_send(Outbound { record, ack: ack_tx }) {
            Ok(()) => Ok(ack_rx),
            Err(TrySendError::Full(_)) => Err(LinkError::WriteFailed("peer queue full".into())),
            Err(TrySendError::Closed(_)) => Err(LinkError::WriteFailed("peer writer closed".into())),
        };
        PendingWrite {
            ack,
            limit: self.write_timeout,
        }
    }

    /// Writes one record to this peer. Never retried.
    pub async fn send(&self, record: &Record) -> LinkResult<()> {
        self.enqueue(record.clone()).wait().await
    }

    /// Stops the writer task and tells the owning task to stop reading.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// Read-only view of an entry for the administrative surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary<Id> {
    pub id: Id,
    pub peer_addr: Option<SocketAddr>,
    pub fast_addr: Option<SocketAddr>,
    pub state: ConnectionState,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl<Id: Clone> From<&PeerConnection<Id>> for ConnectionSummary<Id> {
    fn from(conn: &PeerConnection<Id>) -> Self {
        ConnectionSummary {
            id: conn.id.clone(),
            peer_addr: conn.peer_addr,
            fast_addr: conn.fast_addr,
            state: conn.state,
            registered_at: conn.registered_at,
            last_heartbeat: conn.last_heartbeat,
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Identifier → live connection table.
pub struct Registry<Id> {
    entries: RwLock<HashMap<Id, PeerConnection<Id>>>,
    next_conn_id: AtomicU64,
    write_timeout: Duration,
}

impl<Id> Default for Registry<Id> {
    fn default() -> Self {
        Registry::with_write_timeout(DEFAULT_WRITE_TIMEOUT)
    }
}

impl<Id> Registry<Id> {
    /// A registry whose peers fail any write not finished within `limit`.
    pub fn with_write_timeout(limit: Duration) -> Self {
        Registry {
            entries: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            write_timeout: limit,
        }
    }
}

impl<Id> Registry<Id>
where
    Id: Eq + Hash + Clone + Display + Send + Sync,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a connected entry for `id`, superseding any previous one,
    /// and starts its writer task.
    ///
    /// Returns the new entry; the superseded one (if any) has already been
    /// closed.
    pub async fn register<W>(&self, id: Id, peer_addr: Option<SocketAddr>, writer: W) -> PeerConnection<Id>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.insert(id, peer_addr, writer, None).await.0
    }

    /// Like [`register`](Self::register), but `greeting` is queued before
    /// the entry becomes visible, so it is always the first record the
    /// peer sees.
    pub async fn register_with_greeting<W>(
        &self,
        id: Id,
        peer_addr: Option<SocketAddr>,
        writer: W,
        greeting: Record,
    ) -> (PeerConnection<Id>, PendingWrite)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (entry, pending) = self.insert(id, peer_addr, writer, Some(greeting)).await;
        let pending = pending.unwrap_or(PendingWrite {
            ack: Err(LinkError::WriteFailed("greeting not queued".into())),
            limit: self.write_timeout,
        });
        (entry, pending)
    }

    async fn insert<W>(
        &self,
        id: Id,
        peer_addr: Option<SocketAddr>,
        writer: W,
        greeting: Option<Record>,
    ) -> (PeerConnection<Id>, Option<PendingWrite>)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outgoing, queue) = mpsc::channel(PEER_QUEUE_CAPACITY);
        let (closed, closed_rx) = watch::channel(false);
        tokio::spawn(write_loop(writer, queue, closed_rx));

        let now = Utc::now();
        let entry = PeerConnection {
            id: id.clone(),
            conn_id: self.next_conn_id.fetch_add(1, Ordering::Relaxed),
            peer_addr,
            fast_addr: None,
            state: ConnectionState::Connected,
            registered_at: now,
            last_heartbeat: now,
            outgoing,
            closed: Arc::new(closed),
            write_timeout: self.write_timeout,
        };
        let pending = greeting.map(|record| entry.enqueue(record));

        let previous = {
            let mut entries = self.entries.write().await;
            entries.insert(id.clone(), entry.clone())
        };

        if let Some(old) = previous {
            info!(id = %id, old_conn = old.conn_id, new_conn = entry.conn_id, "Superseding previous connection");
            old.close();
        }

        (entry, pending)
    }

    /// Removes the entry for `id` only if it is still generation `conn_id`.
    pub async fn remove_if_current(&self, id: &Id, conn_id: u64) -> Option<PeerConnection<Id>> {
        let mut entries = self.entries.write().await;
        match entries.get(id) {
            Some(current) if current.conn_id == conn_id => {
                let mut removed = entries.remove(id)?;
                removed.state = ConnectionState::Disconnected;
                debug!(id = %id, conn_id, "Entry removed");
                Some(removed)
            }
            _ => None,
        }
    }

    /// Refreshes the heartbeat timestamp of generation `conn_id`.
    pub async fn touch(&self, id: &Id, conn_id: u64) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(id) {
            Some(entry) if entry.conn_id == conn_id => {
                entry.last_heartbeat = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Records the fast-channel address announced by `id`.
    pub async fn set_fast_addr(&self, id: &Id, addr: SocketAddr) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(id) {
            Some(entry) => {
                entry.fast_addr = Some(addr);
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, id: &Id) -> Option<PeerConnection<Id>> {
        self.entries.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &Id) -> bool {
        self.entries.read().await.contains_key(id)
    }

    /// A copy of every entry, safe to iterate while the table changes.
    pub async fn snapshot(&self) -> Vec<PeerConnection<Id>> {
        self.entries.read().await.values().cloned().collect()
    }

    pub async fn summaries(&self) -> Vec<ConnectionSummary<Id>> {
        self.entries
            .read()
            .await
            .values()
            .map(ConnectionSummary::from)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Closes and drops every entry.
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        for (_, conn) in entries.drain() {
            conn.close();
        }
    }
}
