//! # Record Store Collaborators
//!
//! The durable store of pump metadata, transactions and connection history
//! lives outside this crate. The hubs only need the narrow contract below.
//!
//! ```text
//! ┌──────────────┐   pump_exists(id)            ┌─────────────────────┐
//! │  HubServer   │ ───────────────────────────► │                     │
//! │              │   record_transaction(tx)     │    RecordStore      │
//! │              │ ───────────────────────────► │  (database, file,   │
//! │              │   set_connection_state(..)   │   in-memory, ...)   │
//! │              │ ───────────────────────────► │                     │
//! └──────────────┘                              └─────────────────────┘
//! ```
//!
//! Calls are synchronous and expected to be quick; an implementation backed
//! by slow storage should hand work off to its own task.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use fuelnet_core::{ConnectionState, PumpId, StationId};
use tracing::debug;

use crate::error::{LinkError, LinkResult};
use crate::protocol::TransactionRecord;

// =============================================================================
// Collaborator Traits
// =============================================================================

/// What a station hub needs from the record store.
pub trait RecordStore: Send + Sync {
    /// Whether the pump is known (admission check).
    fn pump_exists(&self, id: PumpId) -> bool;

    /// Persists a completed transaction.
    fn record_transaction(&self, tx: &TransactionRecord) -> LinkResult<()>;

    /// Records a liveness change for a pump.
    fn set_connection_state(&self, id: PumpId, state: ConnectionState) -> LinkResult<()>;
}

/// What the enterprise hub needs to admit stations.
pub trait StationDirectory: Send + Sync {
    fn station_exists(&self, id: &StationId) -> bool;

    fn set_station_state(&self, id: &StationId, state: ConnectionState) -> LinkResult<()>;
}

// =============================================================================
// In-Memory Store
// =============================================================================

#[derive(Default)]
struct MemoryState {
    pumps: HashSet<PumpId>,
    transactions: Vec<TransactionRecord>,
    pump_history: Vec<(PumpId, ConnectionState)>,
    stations: HashSet<StationId>,
    open_directory: bool,
    station_history: Vec<(StationId, ConnectionState)>,
}

/// Process-local store used by the node binary and the tests.
///
/// Transactions are deduplicated by `transaction_id`, so replays after a
/// reconnect are harmless.
#[derive(Default)]
pub struct InMemoryRecordStore {
    state: RwLock<MemoryState>,
}

impl InMemoryRecordStore {
    /// A store that knows the given pumps.
    pub fn with_pumps(pumps: impl IntoIterator<Item = PumpId>) -> Self {
        let store = Self::default();
        if let Ok(mut s) = store.state.write() {
            s.pumps.extend(pumps);
        }
        store
    }

    /// A directory that knows the given stations. Empty admits every station.
    pub fn with_stations(stations: impl IntoIterator<Item = StationId>) -> Self {
        let store = Self::default();
        if let Ok(mut s) = store.state.write() {
            s.stations.extend(stations);
            s.open_directory = s.stations.is_empty();
        }
        store
    }

    pub fn add_pump(&self, id: PumpId) {
        if let Ok(mut s) = self.state.write() {
            s.pumps.insert(id);
        }
    }

    /// Every transaction recorded so far, in arrival order.
    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.state
            .read()
            .map(|s| s.transactions.clone())
            .unwrap_or_default()
    }

    /// Every pump liveness change reported so far, in order.
    pub fn pump_history(&self) -> Vec<(PumpId, ConnectionState)> {
        self.state
            .read()
            .map(|s| s.pump_history.clone())
            .unwrap_or_default()
    }

    /// Every station liveness change reported so far, in order.
    pub fn station_history(&self) -> Vec<(StationId, ConnectionState)> {
        self.state
            .read()
            .map(|s| s.station_history.clone())
            .unwrap_or_default()
    }

    /// Last reported liveness per pump.
    pub fn pump_states(&self) -> HashMap<PumpId, ConnectionState> {
        self.pump_history().into_iter().collect()
    }
}

fn poisoned() -> LinkError {
    LinkError::StoreFailed("in-memory store lock poisoned".into())
}

impl RecordStore for InMemoryRecordStore {
    fn pump_exists(&self, id: PumpId) -> bool {
        self.state
            .read()
            .map(|s| s.pumps.contains(&id))
            .unwrap_or(false)
    }

    fn record_transaction(&self, tx: &TransactionRecord) -> LinkResult<()> {
        let mut s = self.state.write().map_err(|_| poisoned())?;
        if s
            .transactions
            .iter()
            .any(|t| t.transaction_id == tx.transaction_id)
        {
            debug!(transaction_id = %tx.transaction_id, "Duplicate transaction ignored");
            return Ok(());
        }
        s.transactions.push(tx.clone());
        Ok(())
    }

    fn set_connection_state(&self, id: PumpId, state: ConnectionState) -> LinkResult<()> {
        let mut s = self.state.write().map_err(|_| poisoned())?;
        s.pump_history.push((id, state));
        Ok(())
    }
}

impl StationDirectory for InMemoryRecordStore {
    fn station_exists(&self, id: &StationId) -> bool {
        self.state
            .read()
            .map(|s| s.open_directory || s.stations.contains(id))
            .unwrap_or(false)
    }

    fn set_station_state(&self, id: &StationId, state: ConnectionState) -> LinkResult<()> {
        let mut s = self.state.write().map_err(|_| poisoned())?;
        s.station_history.push((id.clone(), state));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fuelnet_core::PaymentMethod;
    use uuid::Uuid;

    fn sample_tx(id: Uuid) -> TransactionRecord {
        TransactionRecord {
            transaction_id: id,
            pump_id: PumpId::new(1),
            grade: "grade93".into(),
            volume: 10,
            unit_price: 1290,
            amount: 12900,
            payment_method: PaymentMethod::Cash,
            started_at: Utc::now(),
            ended_at: Utc::now(),
        }
    }

    #[test]
    fn test_pump_exists() {
        let store = InMemoryRecordStore::with_pumps([PumpId::new(1), PumpId::new(2)]);
        assert!(store.pump_exists(PumpId::new(1)));
        assert!(!store.pump_exists(PumpId::new(99)));

        store.add_pump(PumpId::new(99));
        assert!(store.pump_exists(PumpId::new(99)));
    }

    #[test]
    fn test_transactions_deduplicated() {
        let store = InMemoryRecordStore::default();
        let id = Uuid::new_v4();
        store.record_transaction(&sample_tx(id)).unwrap();
        store.record_transaction(&sample_tx(id)).unwrap();
        store.record_transaction(&sample_tx(Uuid::new_v4())).unwrap();
        assert_eq!(store.transactions().len(), 2);
    }

    #[test]
    fn test_station_directory() {
        let open = InMemoryRecordStore::with_stations(Vec::<StationId>::new());
        assert!(open.station_exists(&StationId::from("anything")));

        let closed = InMemoryRecordStore::with_stations([StationId::from("station-001")]);
        assert!(closed.station_exists(&StationId::from("station-001")));
        assert!(!closed.station_exists(&StationId::from("station-002")));

        // The default store knows no stations at all.
        assert!(!InMemoryRecordStore::default().station_exists(&StationId::from("x")));
    }

    #[test]
    fn test_connection_history() {
        let store = InMemoryRecordStore::default();
        store
            .set_connection_state(PumpId::new(1), ConnectionState::Connected)
            .unwrap();
        store
            .set_connection_state(PumpId::new(1), ConnectionState::Disconnected)
            .unwrap();
        assert_eq!(store.pump_history().len(), 2);
        assert_eq!(
            store.pump_states().get(&PumpId::new(1)),
            Some(&ConnectionState::Disconnected)
        );
    }
}
