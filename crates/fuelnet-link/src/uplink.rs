//! # Enterprise Uplink
//!
//! The station's single client session toward the enterprise node. Price
//! pushes received on it are merged into the station's price set and
//! rebroadcast to the station's own pumps.
//!
//! ## Hierarchical Broadcast
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Enterprise ── price_update {grade93: 1300} ──┐                        │
//! │                                                 ▼                        │
//! │   Station    StationUplink ──► hub.apply_price_update()                 │
//! │                                   merge into NEW set, swap wholesale     │
//! │                                   {grade93: 1300, grade95: 1350}         │
//! │                                                 │                        │
//! │                                                 ▼                        │
//! │   Pumps      P1, P2, ... ◄── price_update {full merged set}             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! On every (re)connection the set embedded in `station_confirmed` is merged
//! and rebroadcast the same way, so pushes missed while offline are caught
//! up.

use std::sync::Arc;

use fuelnet_core::StationId;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Timings;
use crate::hub::StationHub;
use crate::protocol::Record;
use crate::transport::{LinkState, Transport, TransportConfig, TransportEvent, TransportHandle};

/// Handle for a running uplink.
#[derive(Clone)]
pub struct UplinkHandle {
    transport: TransportHandle,
}

impl UplinkHandle {
    pub async fn state(&self) -> LinkState {
        self.transport.state().await
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.is_connected().await
    }

    pub async fn shutdown(&self) {
        let _ = self.transport.shutdown().await;
    }
}

/// Bridge from the enterprise session into a [`StationHub`].
pub struct StationUplink {
    station_id: StationId,
    hub: Arc<StationHub>,
}

impl StationUplink {
    /// Connects to `enterprise_addr` and starts relaying price pushes.
    pub fn spawn(
        enterprise_addr: String,
        station_id: StationId,
        hub: Arc<StationHub>,
        timings: Timings,
    ) -> UplinkHandle {
        let heartbeat_id = station_id.clone();
        let (transport, events) = Transport::spawn(TransportConfig {
            addr: enterprise_addr,
            hello: Record::station_registration(station_id.clone()),
            heartbeat: Arc::new(move || Record::station_heartbeat(heartbeat_id.clone())),
            heartbeat_interval: timings.heartbeat_interval,
            reconnect_delay: timings.reconnect_delay,
            connect_timeout: timings.connect_timeout,
        });

        let uplink = StationUplink { station_id, hub };
        tokio::spawn(uplink.run(events));

        UplinkHandle { transport }
    }

    async fn run(self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connecting => debug!(station_id = %self.station_id, "Connecting to enterprise"),
                TransportEvent::Connected { session } => {
                    info!(station_id = %self.station_id, session, "Enterprise session open");
                }
                TransportEvent::Disconnected { session } => {
                    warn!(station_id = %self.station_id, session, "Enterprise session lost");
                }
                TransportEvent::Record { record, .. } => self.on_record(record).await,
            }
        }
        debug!(station_id = %self.station_id, "Uplink stopped");
    }

    async fn on_record(&self, record: Record) {
        match record {
            Record::StationConfirmed(confirmed) => {
                if confirmed.station_id != self.station_id {
                    warn!(expected = %self.station_id, got = %confirmed.station_id, "Confirmation for another station ignored");
                    return;
                }
                let (merged, report) = self.hub.apply_price_update(&confirmed.price_set).await;
                info!(
                    station_id = %self.station_id,
                    grades = merged.len(),
                    delivered = report.delivered,
                    failed = report.failed,
                    "Registered with enterprise, prices adopted"
                );
            }

            Record::PriceUpdate(update) => {
                let (merged, report) = self.hub.apply_price_update(&update.price_set).await;
                info!(
                    updated = update.price_set.len(),
                    grades = merged.len(),
                    delivered = report.delivered,
                    failed = report.failed,
                    "Enterprise price push relayed"
                );
            }

            Record::Error(e) => {
                warn!(station_id = %self.station_id, code = %e.code, message = %e.message, "Enterprise reported an error");
            }

            other => debug!(msg_type = %other.type_name(), "Unexpected record from enterprise"),
        }
    }
}
