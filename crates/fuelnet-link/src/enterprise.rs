//! # Enterprise Hub
//!
//! The top tier: accepts station sessions and pushes price changes to
//! every connected station.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Station ──station_registration{stationId}──► EnterpriseHub            │
//! │          ◄─station_confirmed{stationId, priceSet}──                     │
//! │          ──station_heartbeat (every 30 s)──►   read timeout 90 s        │
//! │                                                                         │
//! │  push_prices(update):                                                   │
//! │     enterprise set ← merge(update)                                      │
//! │     broadcast price_update{update} to every station (at most once)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use fuelnet_core::validation::validate_station_id;
use fuelnet_core::{ConnectionState, PriceSet, StationId};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::broadcast::{BroadcastReport, Broadcaster};
use crate::config::Timings;
use crate::error::{LinkError, LinkResult};
use crate::hub::{liveness_loop, receive_first, LoopEnd, PriceBook};
use crate::protocol::{Record, ERROR_STATION_NOT_REGISTERED};
use crate::registry::{ConnectionSummary, Registry};
use crate::store::StationDirectory;
use crate::transport::write_record;

// =============================================================================
// Enterprise Hub
// =============================================================================

/// Shared state of the enterprise node.
pub struct EnterpriseHub {
    registry: Arc<Registry<StationId>>,
    prices: PriceBook,
    directory: Arc<dyn StationDirectory>,
    broadcaster: Broadcaster<StationId>,
    publish: Mutex<()>,
    timings: Timings,
}

impl EnterpriseHub {
    pub fn new(prices: PriceSet, directory: Arc<dyn StationDirectory>, timings: Timings) -> Self {
        let registry = Arc::new(Registry::with_write_timeout(timings.write_timeout));

        let evict_directory = directory.clone();
        let broadcaster = Broadcaster::new(registry.clone()).with_eviction_hook(Arc::new(
            move |station_id: &StationId| {
                if let Err(e) =
                    evict_directory.set_station_state(station_id, ConnectionState::Disconnected)
                {
                    error!(station_id = %station_id, %e, "Failed to record disconnection");
                }
            },
        ));

        EnterpriseHub {
            registry,
            prices: PriceBook::new(prices),
            directory,
            broadcaster,
            publish: Mutex::new(()),
            timings,
        }
    }

    /// Merges `update` into the enterprise prices and pushes it to every
    /// connected station.
    pub async fn push_prices(&self, update: &PriceSet) -> (PriceSet, BroadcastReport) {
        let _publish = self.publish.lock().await;
        let merged = self.prices.merge(update).await;
        info!(updated = update.len(), grades = merged.len(), "Pushing prices to stations");
        let report = self
            .broadcaster
            .broadcast(&Record::price_update(update.clone()))
            .await;
        (merged, report)
    }

    pub async fn current_prices(&self) -> PriceSet {
        self.prices.current().await
    }

    pub async fn station_count(&self) -> usize {
        self.registry.len().await
    }

    pub async fn summaries(&self) -> Vec<ConnectionSummary<StationId>> {
        let mut summaries = self.registry.summaries().await;
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Serves one station session from admission to teardown.
    pub async fn handle_connection<S>(self: Arc<Self>, stream: S, peer: Option<SocketAddr>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();

        let station_id = match receive_first(&mut lines, self.timings.registration_timeout).await {
            Ok(Record::StationRegistration(payload)) => payload.station_id,
            Ok(other) => {
                warn!(?peer, msg_type = %other.type_name(), "Expected station registration - closing connection");
                let _ = writer.shutdown().await;
                return;
            }
            Err(e) => {
                warn!(?peer, %e, "Station registration failed - closing connection");
                let _ = writer.shutdown().await;
                return;
            }
        };

        if validate_station_id(station_id.as_str()).is_err() || !self.directory.station_exists(&station_id) {
            warn!(station_id = %station_id, ?peer, "Unknown station - rejecting registration");
            let reject = Record::error(
                ERROR_STATION_NOT_REGISTERED,
                &LinkError::UnregisteredStation(station_id.to_string()).to_string(),
            );
            let _ = write_record(&mut writer, &reject).await;
            let _ = writer.shutdown().await;
            return;
        }

        let (conn, confirmation) = {
            let _publish = self.publish.lock().await;
            if let Err(e) = self
                .directory
                .set_station_state(&station_id, ConnectionState::Connected)
            {
                error!(station_id = %station_id, %e, "Failed to record connection");
            }
            let prices = self.prices.current().await;
            let confirm = Record::station_confirmed(station_id.clone(), prices);
            self.registry
                .register_with_greeting(station_id.clone(), peer, writer, confirm)
                .await
        };
        if let Err(e) = confirmation.wait().await {
            warn!(station_id = %station_id, %e, "Failed to send confirmation");
            if let Some(removed) = self.registry.remove_if_current(&station_id, conn.conn_id).await {
                removed.close();
                let _ = self
                    .directory
                    .set_station_state(&station_id, ConnectionState::Disconnected);
            }
            return;
        }
        info!(station_id = %station_id, ?peer, conn_id = conn.conn_id, "Station registered");

        let registry = self.registry.clone();
        let end = liveness_loop(&mut lines, &conn, self.timings.read_timeout, |record| {
            let registry = registry.clone();
            let station_id = station_id.clone();
            let conn_id = conn.conn_id;
            async move {
                match record {
                    Record::StationHeartbeat(hb) if hb.station_id == station_id => {
                        registry.touch(&station_id, conn_id).await;
                        debug!(station_id = %station_id, "Station heartbeat");
                    }
                    other => {
                        debug!(station_id = %station_id, msg_type = %other.type_name(), "Unexpected record from station");
                    }
                }
            }
        })
        .await;

        match &end {
            LoopEnd::TimedOut => {
                let e = LinkError::HeartbeatTimeout(self.timings.read_timeout.as_secs());
                warn!(station_id = %station_id, %e, "Evicting silent station");
            }
            LoopEnd::PeerClosed => info!(station_id = %station_id, "Station closed the connection"),
            LoopEnd::ReadFailed(e) => warn!(station_id = %station_id, %e, "Read failed"),
            LoopEnd::Closed => debug!(station_id = %station_id, "Connection closed by hub"),
        }

        if let Some(removed) = self.registry.remove_if_current(&station_id, conn.conn_id).await {
            removed.close();
            if let Err(e) = self
                .directory
                .set_station_state(&station_id, ConnectionState::Disconnected)
            {
                error!(station_id = %station_id, %e, "Failed to record disconnection");
            }
            info!(station_id = %station_id, "Station disconnected");
        }
    }

    async fn close_all(&self) {
        for summary in self.registry.summaries().await {
            let _ = self
                .directory
                .set_station_state(&summary.id, ConnectionState::Disconnected);
        }
        self.registry.clear().await;
    }
}

// =============================================================================
// Enterprise Server
// =============================================================================

/// Handle for a running enterprise hub.
#[derive(Clone)]
pub struct EnterpriseHandle {
    hub: Arc<EnterpriseHub>,
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
}

impl EnterpriseHandle {
    pub fn hub(&self) -> &Arc<EnterpriseHub> {
        &self.hub
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn shutdown(&self) -> LinkResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| LinkError::ChannelError("Enterprise shutdown channel closed".into()))
    }
}

pub struct EnterpriseServer;

impl EnterpriseServer {
    pub async fn start(bind: &str, hub: Arc<EnterpriseHub>) -> LinkResult<EnterpriseHandle> {
        let listener = TcpListener::bind(bind).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Enterprise hub started");

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let serve_hub = hub.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "New station connection");
                            let _ = stream.set_nodelay(true);
                            tokio::spawn(serve_hub.clone().handle_connection(stream, Some(peer)));
                        }
                        Err(e) => error!(%e, "Accept failed"),
                    },
                    _ = shutdown_rx.recv() => {
                        info!("Enterprise hub shutting down");
                        break;
                    }
                }
            }
            serve_hub.close_all().await;
        });

        Ok(EnterpriseHandle {
            hub,
            local_addr,
            shutdown_tx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRecordStore;
    use std::time::Duration;
    use tokio::io::duplex;

    fn timings() -> Timings {
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

    fn hub(directory: InMemoryRecordStore) -> Arc<EnterpriseHub> {
        Arc::new(EnterpriseHub::new(
            PriceSet::from_pairs([("grade93", 1290), ("grade95", 1350)]),
            Arc::new(directory),
            timings(),
        ))
    }

    #[tokio::test]
    async fn test_station_confirmed_with_prices() {
        let hub = hub(InMemoryRecordStore::with_stations([StationId::from("north")]));
        let (client, server) = duplex(4096);
        tokio::spawn(hub.clone().handle_connection(server, None));

        let (read, mut write) = tokio::io::split(client);
        write_record(&mut write, &Record::station_registration("north".into()))
            .await
            .unwrap();

        let mut lines = BufReader::new(read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        match Record::from_line(&line).unwrap() {
            Record::StationConfirmed(c) => {
                assert_eq!(c.station_id, StationId::from("north"));
                assert_eq!(c.price_set, hub.current_prices().await);
            }
            other => panic!("Expected station_confirmed, got {}", other.type_name()),
        }
        assert_eq!(hub.station_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_station_rejected() {
        let hub = hub(InMemoryRecordStore::with_stations([StationId::from("north")]));
        let (client, server) = duplex(4096);
        let task = tokio::spawn(hub.clone().handle_connection(server, None));

        let (read, mut write) = tokio::io::split(client);
        write_record(&mut write, &Record::station_registration("south".into()))
            .await
            .unwrap();

        let mut lines = BufReader::new(read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        match Record::from_line(&line).unwrap() {
            Record::Error(e) => assert_eq!(e.code, ERROR_STATION_NOT_REGISTERED),
            other => panic!("Expected error, got {}", other.type_name()),
        }
        assert_eq!(lines.next_line().await.unwrap(), None);

        task.await.unwrap();
        assert_eq!(hub.station_count().await, 0);
    }

    #[tokio::test]
    async fn test_push_sends_update_and_merges() {
        let hub = hub(InMemoryRecordStore::with_stations(Vec::<StationId>::new()));
        let (client, server) = duplex(4096);
        tokio::spawn(hub.clone().handle_connection(server, None));

        let (read, mut write) = tokio::io::split(client);
        write_record(&mut write, &Record::station_registration("any-station".into()))
            .await
            .unwrap();
        let mut lines = BufReader::new(read).lines();
        lines.next_line().await.unwrap().unwrap();

        let update = PriceSet::from_pairs([("grade93", 1300)]);
        let (merged, report) = hub.push_prices(&update).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(merged.get(&"grade93".into()), Some(1300));
        assert_eq!(merged.get(&"grade95".into()), Some(1350));

        let line = lines.next_line().await.unwrap().unwrap();
        match Record::from_line(&line).unwrap() {
            Record::PriceUpdate(p) => assert_eq!(p.price_set, update),
            other => panic!("Expected price_update, got {}", other.type_name()),
        }
    }

    #[tokio::test]
    async fn test_stalled_station_is_evicted_without_blocking_pushes() {
        let directory = Arc::new(InMemoryRecordStore::with_stations([StationId::from("north")]));
        let timings = Timings {
            write_timeout: Duration::from_millis(200),
            ..timings()
        };
        let hub = Arc::new(EnterpriseHub::new(PriceSet::standard(), directory.clone(), timings));

        let (client, server) = duplex(1024);
        let task = tokio::spawn(hub.clone().handle_connection(server, None));
        let (read, mut write) = tokio::io::split(client);
        write_record(&mut write, &Record::station_registration("north".into()))
            .await
            .unwrap();
        let mut lines = BufReader::new(read).lines();
        lines.next_line().await.unwrap().unwrap();

        // The station stops reading; pushes must still complete.
        let publisher = hub.clone();
        let pushes = tokio::spawn(async move {
            for n in 0..20u64 {
                publisher
                    .push_prices(&PriceSet::from_pairs([("grade93", 1300 + n)]))
                    .await;
            }
        });
        tokio::time::timeout(Duration::from_secs(3), pushes)
            .await
            .expect("pushes stuck behind a stalled station")
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("connection task did not finish")
            .unwrap();

        assert_eq!(hub.station_count().await, 0);
        assert_eq!(
            directory.station_history(),
            vec![
                (StationId::from("north"), ConnectionState::Connected),
                (StationId::from("north"), ConnectionState::Disconnected),
            ]
        );
    }
}
