//! # fuelnet-link: Real-Time Protocol for FuelNet
//!
//! This crate carries every socket, task and timer of the three-tier fuel
//! network: enterprise → station → pumps.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        FuelNet Topology                                 │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  ENTERPRISE   EnterpriseHub (TCP :7000)                          │  │
//! │  │               push_prices(update) → every station                │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ station_registration / price_update    │
//! │  ┌────────────────────────────▼─────────────────────────────────────┐  │
//! │  │  STATION      StationUplink ──► StationHub                       │  │
//! │  │               (client)          (TCP :6000, UDP :6001)           │  │
//! │  │                                 Registry · Broadcaster           │  │
//! │  │                                 Dispatcher · RecordStore         │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │          reliable: JSON lines │   fast: one JSON object per datagram   │
//! │  ┌────────────────────────────▼─────────────────────────────────────┐  │
//! │  │  PUMP         PumpClient (session machine, offline FIFO queue,   │  │
//! │  │               dispense meter, fast telemetry)                    │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  TIMERS: heartbeat 30 s · read timeout 90 s · registration 10 s ·       │
//! │          reconnect 5 s (fixed)                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Wire & plumbing
//! - [`protocol`] - Tagged record and datagram types
//! - [`transport`] - Reconnecting TCP client and the datagram sender
//! - [`config`] - Node configuration (TOML + environment)
//! - [`error`] - Link error types
//!
//! ### Hub side
//! - [`registry`] - Live connection table with supersession
//! - [`broadcast`] - Snapshot-then-evict fan-out
//! - [`dispatch`] - Unicast commands to pumps
//! - [`hub`] - Station hub: admission, liveness, telemetry, admin surface
//! - [`store`] - Record-store collaborator traits and an in-memory store
//! - [`enterprise`] - Enterprise hub
//!
//! ### Client side
//! - [`pump`] - Pump client state machine
//! - [`uplink`] - Station → enterprise bridge
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fuelnet_link::{StationHub, StationServer, StationServerConfig, InMemoryRecordStore};
//!
//! let store = Arc::new(InMemoryRecordStore::with_pumps([PumpId::new(1)]));
//! let hub = Arc::new(StationHub::new(PriceSet::standard(), store, Timings::default()));
//! let station = StationServer::start(
//!     StationServerConfig { tcp_bind: "0.0.0.0:6000".into(), udp_bind: "0.0.0.0:6001".into() },
//!     hub,
//! ).await?;
//!
//! let report = station.hub().trigger_price_broadcast(PriceSet::standard()).await;
//! println!("delivered {} / failed {}", report.delivered, report.failed);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;

pub mod broadcast;
pub mod dispatch;
pub mod enterprise;
pub mod hub;
pub mod registry;
pub mod store;

pub mod pump;
pub mod uplink;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{NodeConfig, NodeRole, Timings};
pub use error::{LinkError, LinkResult};
pub use protocol::{Datagram, Record};
pub use transport::{LinkState, Transport, TransportConfig, TransportEvent, TransportHandle};

pub use broadcast::{BroadcastReport, Broadcaster};
pub use dispatch::CommandDispatcher;
pub use enterprise::{EnterpriseHandle, EnterpriseHub, EnterpriseServer};
pub use hub::{PriceBook, StationHandle, StationHub, StationServer, StationServerConfig};
pub use registry::{ConnectionSummary, PeerConnection, PendingWrite, Registry};
pub use store::{InMemoryRecordStore, RecordStore, StationDirectory};

pub use pump::{PumpClient, PumpClientConfig, PumpHandle, PumpSnapshot, SessionState};
pub use uplink::{StationUplink, UplinkHandle};
