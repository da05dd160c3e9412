//! # Pump Client
//!
//! The pump-side state machine: one actor owning the reliable-channel
//! transport, the fast channel, the dispense meter and the offline queue.
//!
//! ## Session State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Disconnected ──► Connecting ──► AwaitingConfirmation ──► Active        │
//! │       ▲               │  refused: wait 5 s, retry         │             │
//! │       └───────────────┴───────────────────────────────────┘             │
//! │                          EOF / write failure                            │
//! │                                                                         │
//! │  Active carries an orthogonal operation state:                          │
//! │                                                                         │
//! │      available ──start──► dispensing ──pause──► paused                  │
//! │          ▲                  │   ▲                  │                    │
//! │          └──stop / e-stop───┘   └──────resume──────┘                    │
//! │          ▲                                         │                    │
//! │          └──────────────────e-stop─────────────────┘                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Offline Queue
//! ```text
//!   emit(record)
//!     │
//!     ├── Active AND queue empty ──► send on current session
//!     │                                 └── write failed ──► push_back
//!     └── otherwise ─────────────────► push_back
//!
//!   on confirmation:   front ──send_confirmed──► ok: pop_front, next
//!                                           └──► err: stop, keep the rest
//! ```
//! The queue lives for the life of the process only.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fuelnet_core::validation::ensure_grade_supported;
use fuelnet_core::{
    CommandVerb, CoreError, DispenseMeter, FuelGrade, OperationState, PaymentMethod, PriceSet,
    PumpId,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{PumpSettings, Timings};
use crate::error::{LinkError, LinkResult};
use crate::protocol::{
    CommandPayload, Datagram, FastChannelPayload, Record, StatusPayload, TransactionRecord,
};
use crate::transport::{
    FastChannel, Transport, TransportConfig, TransportEvent, TransportHandle,
};

// =============================================================================
// Configuration & Status
// =============================================================================

/// Everything a pump client needs to run.
#[derive(Debug, Clone)]
pub struct PumpClientConfig {
    pub pump_id: PumpId,
    /// Station reliable-channel address, `host:port`.
    pub station_tcp_addr: String,
    /// Station fast-channel address, `host:port`.
    pub station_udp_addr: String,
    pub grade: FuelGrade,
    pub supported_grades: Vec<FuelGrade>,
    pub units_per_tick: u64,
    pub timings: Timings,
}

impl PumpClientConfig {
    pub fn from_settings(settings: &PumpSettings, timings: Timings) -> Self {
        PumpClientConfig {
            pump_id: settings.id,
            station_tcp_addr: settings.station_tcp_address(),
            station_udp_addr: settings.station_udp_address(),
            grade: settings.grade.clone(),
            supported_grades: settings.supported_grades.clone(),
            units_per_tick: settings.units_per_tick,
            timings,
        }
    }
}

/// Session state toward the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingConfirmation,
    Active,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::AwaitingConfirmation => write!(f, "awaiting_confirmation"),
            SessionState::Active => write!(f, "active"),
        }
    }
}

/// Point-in-time view of a pump, for operators and tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PumpSnapshot {
    pub pump_id: PumpId,
    pub session: SessionState,
    pub operation_state: OperationState,
    pub grade: FuelGrade,
    pub unit_price: Option<u64>,
    pub volume: u64,
    pub amount: u64,
    pub price_set: PriceSet,
    /// Events waiting for the next confirmed session.
    pub queued: usize,
}

// =============================================================================
// Pump Handle
// =============================================================================

enum Control {
    StartDispensing(oneshot::Sender<LinkResult<()>>),
    StopDispensing(PaymentMethod, oneshot::Sender<LinkResult<TransactionRecord>>),
    SelectGrade(FuelGrade, oneshot::Sender<LinkResult<()>>),
    Snapshot(oneshot::Sender<PumpSnapshot>),
}

/// Local operator controls for a running pump.
#[derive(Clone)]
pub struct PumpHandle {
    control_tx: mpsc::Sender<Control>,
    shutdown_tx: mpsc::Sender<()>,
}

impl PumpHandle {
    /// available → dispensing. Zeroes the meter.
    pub async fn start_dispensing(&self) -> LinkResult<()> {
        let (tx, rx) = oneshot::channel();
        self.request(Control::StartDispensing(tx)).await?;
        rx.await?
    }

    /// Ends the dispense and emits its transaction record.
    pub async fn stop_dispensing(&self, payment: PaymentMethod) -> LinkResult<TransactionRecord> {
        let (tx, rx) = oneshot::channel();
        self.request(Control::StopDispensing(payment, tx)).await?;
        rx.await?
    }

    /// Switches the selected grade. Refused while a dispense is in progress.
    pub async fn select_grade(&self, grade: FuelGrade) -> LinkResult<()> {
        let (tx, rx) = oneshot::channel();
        self.request(Control::SelectGrade(grade, tx)).await?;
        rx.await?
    }

    pub async fn snapshot(&self) -> LinkResult<PumpSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.request(Control::Snapshot(tx)).await?;
        Ok(rx.await?)
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    async fn request(&self, control: Control) -> LinkResult<()> {
        self.control_tx
            .send(control)
            .await
            .map_err(|_| LinkError::ShuttingDown)
    }
}

// =============================================================================
// Offline Queue
// =============================================================================

/// Events waiting for an admitted session, oldest first.
#[derive(Debug, Default)]
struct OfflineQueue {
    records: VecDeque<Record>,
}

impl OfflineQueue {
    fn push(&mut self, record: Record) {
        self.records.push_back(record);
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sends records front to back, removing each only after `send`
    /// succeeds. The first failure stops the pass and leaves that record
    /// and everything behind it untouched.
    ///
    /// Returns the number of records sent.
    async fn drain_with<F, Fut>(&mut self, mut send: F) -> LinkResult<usize>
    where
        F: FnMut(Record) -> Fut,
        Fut: std::future::Future<Output = LinkResult<()>>,
    {
        let mut sent = 0;
        while let Some(record) = self.records.front().cloned() {
            send(record).await?;
            self.records.pop_front();
            sent += 1;
        }
        Ok(sent)
    }
}

// =============================================================================
// Pump Client
// =============================================================================

/// Pump-side protocol actor.
pub struct PumpClient {
    config: PumpClientConfig,
    transport: TransportHandle,
    fast: FastChannel,

    session: SessionState,
    /// Transport session the station has confirmed, if any.
    active_session: Option<u64>,

    operation: OperationState,
    grade: FuelGrade,
    prices: PriceSet,
    unit_price: Option<u64>,
    meter: DispenseMeter,
    started_at: Option<DateTime<Utc>>,
    ticker: Interval,

    queue: OfflineQueue,
}

impl PumpClient {
    /// Binds the fast channel, starts the transport and spawns the actor.
    pub async fn start(config: PumpClientConfig) -> LinkResult<PumpHandle> {
        ensure_grade_supported(&config.grade, &config.supported_grades)?;

        let fast = FastChannel::bind(&config.station_udp_addr).await?;

        let pump_id = config.pump_id;
        let (transport, events) = Transport::spawn(TransportConfig {
            addr: config.station_tcp_addr.clone(),
            hello: Record::registration(pump_id, config.supported_grades.clone()),
            heartbeat: Arc::new(move || Record::heartbeat(pump_id)),
            heartbeat_interval: config.timings.heartbeat_interval,
            reconnect_delay: config.timings.reconnect_delay,
            connect_timeout: config.timings.connect_timeout,
        });

        let (control_tx, control_rx) = mpsc::channel(32);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let client = PumpClient {
            grade: config.grade.clone(),
            meter: DispenseMeter::new(config.units_per_tick),
            ticker: dispense_ticker(config.timings.dispense_tick),
            config,
            transport,
            fast,
            session: SessionState::Disconnected,
            active_session: None,
            operation: OperationState::Available,
            prices: PriceSet::new(),
            unit_price: None,
            started_at: None,
            queue: OfflineQueue::default(),
        };

        info!(pump_id = %pump_id, grade = %client.grade, "Pump client starting");
        tokio::spawn(client.run(events, control_rx, shutdown_rx));

        Ok(PumpHandle {
            control_tx,
            shutdown_tx,
        })
    }

    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut control_rx: mpsc::Receiver<Control>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                Some(event) = events.recv() => self.on_transport_event(event).await,

                Some(control) = control_rx.recv() => self.on_control(control).await,

                _ = self.ticker.tick() => self.on_tick().await,

                _ = shutdown_rx.recv() => {
                    info!(pump_id = %self.config.pump_id, "Pump client shutting down");
                    break;
                }
            }
        }

        let _ = self.transport.shutdown().await;
        if !self.queue.is_empty() {
            warn!(dropped = self.queue.len(), "Discarding unsent events on shutdown");
        }
    }

    // =========================================================================
    // Transport Events
    // =========================================================================

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connecting => {
                self.session = SessionState::Connecting;
                self.active_session = None;
            }
            TransportEvent::Connected { session } => {
                debug!(pump_id = %self.config.pump_id, session, "Registration sent");
                self.session = SessionState::AwaitingConfirmation;
                self.active_session = None;
            }
            TransportEvent::Disconnected { session } => {
                info!(
                    pump_id = %self.config.pump_id,
                    session,
                    queued = self.queue.len(),
                    "Disconnected from station"
                );
                self.session = SessionState::Disconnected;
                self.active_session = None;
            }
            TransportEvent::Record { session, record } => self.on_record(session, record).await,
        }
    }

    async fn on_record(&mut self, session: u64, record: Record) {
        match record {
            Record::RegistrationConfirmed(confirmed) => {
                if confirmed.pump_id != self.config.pump_id {
                    warn!(expected = %self.config.pump_id, got = %confirmed.pump_id, "Confirmation for another pump ignored");
                    return;
                }
                info!(
                    pump_id = %self.config.pump_id,
                    session,
                    grades = confirmed.price_set.len(),
                    "Registration confirmed"
                );
                self.session = SessionState::Active;
                self.active_session = Some(session);
                self.apply_prices(confirmed.price_set);
                self.announce_fast_channel(session).await;
                self.drain_queue().await;
            }

            Record::PriceUpdate(update) => {
                info!(pump_id = %self.config.pump_id, grades = update.price_set.len(), "Price update received");
                self.apply_prices(update.price_set);
            }

            Record::Command(command) => self.on_command(command).await,

            Record::Error(e) => {
                warn!(pump_id = %self.config.pump_id, code = %e.code, message = %e.message, "Station reported an error");
            }

            other => {
                debug!(msg_type = %other.type_name(), "Unexpected record from station");
            }
        }
    }

    /// Replaces the price table and recomputes the active unit price.
    fn apply_prices(&mut self, prices: PriceSet) {
        self.prices = prices;
        match self.prices.get(&self.grade) {
            Some(price) => {
                if self.unit_price != Some(price) {
                    info!(grade = %self.grade, old = ?self.unit_price, new = price, "Unit price changed");
                }
                self.unit_price = Some(price);
                if self.operation != OperationState::Available {
                    self.meter.reprice(price);
                }
            }
            None => {
                warn!(grade = %self.grade, "No price for selected grade, keeping previous unit price");
            }
        }
    }

    async fn announce_fast_channel(&mut self, session: u64) {
        let port = match self.fast.local_port() {
            Ok(port) => port,
            Err(e) => {
                warn!(%e, "Fast channel has no local port");
                return;
            }
        };
        let pump_id = self.config.pump_id;
        self.fast
            .send(&Datagram::RegisterFastChannel(FastChannelPayload {
                pump_id,
                udp_port: port,
            }))
            .await;
        if let Err(e) = self
            .transport
            .send_confirmed(session, Record::register_fast_channel(pump_id, port))
            .await
        {
            debug!(%e, "Fast channel announcement not sent");
        }
    }

    /// Replays queued events in order, one confirmed write at a time.
    async fn drain_queue(&mut self) {
        let Some(session) = self.active_session else {
            return;
        };
        if self.queue.is_empty() {
            return;
        }

        let transport = &self.transport;
        match self
            .queue
            .drain_with(move |record| transport.send_confirmed(session, record))
            .await
        {
            Ok(replayed) => {
                info!(pump_id = %self.config.pump_id, replayed, "Offline queue drained");
            }
            Err(e) => warn!(%e, remaining = self.queue.len(), "Replay interrupted"),
        }
    }

    /// Sends an event now if possible, otherwise queues it.
    async fn emit(&mut self, record: Record) {
        if let Some(session) = self.active_session {
            if self.queue.is_empty() {
                match self.transport.send_confirmed(session, record.clone()).await {
                    Ok(()) => return,
                    Err(e) => debug!(%e, msg_type = %record.type_name(), "Send failed, queueing"),
                }
            }
        }
        self.queue.push(record);
        debug!(queued = self.queue.len(), "Event queued");
    }

    async fn on_command(&mut self, command: CommandPayload) {
        if command.pump_id != self.config.pump_id {
            warn!(expected = %self.config.pump_id, got = %command.pump_id, "Command for another pump ignored");
            return;
        }

        match self.operation.after_command(command.verb) {
            Some(next) => {
                info!(
                    pump_id = %self.config.pump_id,
                    verb = %command.verb,
                    reason = %command.reason,
                    from = %self.operation,
                    to = %next,
                    "Command applied"
                );
                if command.verb == CommandVerb::EmergencyStop {
                    self.meter.reset();
                    self.started_at = None;
                }
                if next.is_dispensing() {
                    self.ticker.reset();
                } else {
                    self.meter.reset_ticks();
                }
                self.operation = next;
            }
            None => {
                info!(verb = %command.verb, state = %self.operation, "Command has no effect in current state");
            }
        }

        self.emit_status().await;
    }

    // =========================================================================
    // Dispensing
    // =========================================================================

    async fn on_tick(&mut self) {
        if !self.operation.is_dispensing() {
            return;
        }
        let price = self.unit_price.unwrap_or_default();
        let reading = self.meter.tick(price);
        let frame = self.status_payload();

        self.fast.send(&Datagram::FastStatus(frame.clone())).await;

        if self.meter.snapshot_due(self.config.timings.snapshot_every_ticks) {
            debug!(tick = reading.tick, volume = reading.volume, "Reconciliation snapshot");
            self.emit(Record::Status(frame)).await;
        }
    }

    fn status_payload(&self) -> StatusPayload {
        StatusPayload {
            pump_id: self.config.pump_id,
            operation_state: self.operation,
            volume: self.meter.volume(),
            amount: self.meter.amount(),
            grade: self.grade.clone(),
            timestamp: Utc::now(),
        }
    }

    async fn emit_status(&mut self) {
        let status = self.status_payload();
        self.emit(Record::Status(status)).await;
    }

    // =========================================================================
    // Local Controls
    // =========================================================================

    async fn on_control(&mut self, control: Control) {
        match control {
            Control::StartDispensing(reply) => {
                let result = self.start_dispensing().await;
                let _ = reply.send(result);
            }
            Control::StopDispensing(payment, reply) => {
                let result = self.stop_dispensing(payment).await;
                let _ = reply.send(result);
            }
            Control::SelectGrade(grade, reply) => {
                let result = self.select_grade(grade).await;
                let _ = reply.send(result);
            }
            Control::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn start_dispensing(&mut self) -> LinkResult<()> {
        if self.operation != OperationState::Available {
            return Err(CoreError::InvalidTransition {
                action: "start dispensing",
                state: self.operation,
            }
            .into());
        }
        let price = self
            .unit_price
            .ok_or_else(|| CoreError::MissingPrice(self.grade.clone()))?;

        self.meter.reset();
        self.started_at = Some(Utc::now());
        self.operation = OperationState::Dispensing;
        self.ticker.reset();
        info!(pump_id = %self.config.pump_id, grade = %self.grade, unit_price = price, "Dispensing started");

        self.emit_status().await;
        Ok(())
    }

    async fn stop_dispensing(&mut self, payment: PaymentMethod) -> LinkResult<TransactionRecord> {
        if self.operation == OperationState::Available {
            return Err(CoreError::InvalidTransition {
                action: "stop dispensing",
                state: self.operation,
            }
            .into());
        }

        let ended_at = Utc::now();
        let transaction = TransactionRecord {
            transaction_id: Uuid::new_v4(),
            pump_id: self.config.pump_id,
            grade: self.grade.clone(),
            volume: self.meter.volume(),
            unit_price: self.unit_price.unwrap_or_default(),
            amount: self.meter.amount(),
            payment_method: payment,
            started_at: self.started_at.unwrap_or(ended_at),
            ended_at,
        };
        info!(
            pump_id = %self.config.pump_id,
            transaction_id = %transaction.transaction_id,
            volume = transaction.volume,
            amount = transaction.amount,
            payment = %payment,
            "Dispensing stopped"
        );

        self.operation = OperationState::Available;
        self.meter.reset();
        self.started_at = None;

        self.emit(Record::TransactionCompleted(transaction.clone())).await;
        self.emit_status().await;
        Ok(transaction)
    }

    async fn select_grade(&mut self, grade: FuelGrade) -> LinkResult<()> {
        if self.operation != OperationState::Available {
            return Err(CoreError::InvalidTransition {
                action: "change grade",
                state: self.operation,
            }
            .into());
        }
        ensure_grade_supported(&grade, &self.config.supported_grades)?;

        self.unit_price = self.prices.get(&grade);
        info!(pump_id = %self.config.pump_id, grade = %grade, unit_price = ?self.unit_price, "Grade selected");
        self.grade = grade;

        self.emit_status().await;
        Ok(())
    }

    fn snapshot(&self) -> PumpSnapshot {
        PumpSnapshot {
            pump_id: self.config.pump_id,
            session: self.session,
            operation_state: self.operation,
            grade: self.grade.clone(),
            unit_price: self.unit_price,
            volume: self.meter.volume(),
            amount: self.meter.amount(),
            price_set: self.prices.clone(),
            queued: self.queue.len(),
        }
    }
}

fn dispense_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
