//! # Wire Records
//!
//! Record types for both channels between the tiers.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      FuelNet Wire Records                               │
//! │                                                                         │
//! │  ADMISSION (reliable, pump → station)                                  │
//! │  ────────────────────────────────────                                  │
//! │  PUMP      ───► registration { pumpId, supportedGrades }               │
//! │  STATION   ◄─── registration_confirmed { pumpId, priceSet }            │
//! │  STATION   ◄─── error { code: NOT_REGISTERED, message }  (then close)  │
//! │                                                                         │
//! │  LIVENESS / TELEMETRY BACKBONE (reliable, pump → station)              │
//! │  ────────────────────────────────────────────────────                  │
//! │  PUMP      ───► heartbeat { pumpId, timestamp }          every 30 s    │
//! │  PUMP      ───► status { pumpId, operationState, volume, ... }         │
//! │  PUMP      ───► transaction_completed { transactionId, ... }           │
//! │  PUMP      ───► register_fast_channel { pumpId, udpPort }              │
//! │                                                                         │
//! │  CONTROL (reliable, station → pump)                                    │
//! │  ──────────────────────────────────                                    │
//! │  STATION   ───► price_update { priceSet, timestamp }     broadcast     │
//! │  STATION   ───► command { pumpId, verb, reason, ... }    unicast       │
//! │                                                                         │
//! │  UPLINK (reliable, station ↔ enterprise)                               │
//! │  ───────────────────────────────────────                               │
//! │  STATION   ───► station_registration { stationId }                     │
//! │  ENTERPRISE◄─── station_confirmed { stationId, priceSet }              │
//! │  STATION   ───► station_heartbeat { stationId, timestamp }             │
//! │  ENTERPRISE───► price_update { priceSet, timestamp }     (partial ok)  │
//! │                                                                         │
//! │  FAST CHANNEL (datagrams, pump → station, never answered)              │
//! │  ────────────────────────────────────────────────────────              │
//! │  PUMP      ───► fast_status { pumpId, operationState, volume, ... }    │
//! │  PUMP      ───► register_fast_channel { pumpId, udpPort }              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Every record is one adjacently tagged JSON object:
//! ```json
//! { "type": "heartbeat", "payload": { "pumpId": 1, "timestamp": "..." } }
//! ```
//! Reliable-channel records are newline terminated; each datagram carries
//! exactly one unterminated record. Payload fields are camelCase and unknown
//! fields are rejected, so a sender cannot silently rely on defaults.

use chrono::{DateTime, Utc};
use fuelnet_core::{
    CommandVerb, FuelGrade, OperationState, PaymentMethod, PriceSet, PumpId, StationId,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LinkError, LinkResult};

/// Error code sent to a pump the record store does not know.
pub const ERROR_NOT_REGISTERED: &str = "NOT_REGISTERED";

/// Error code sent to a station the enterprise does not know.
pub const ERROR_STATION_NOT_REGISTERED: &str = "STATION_NOT_REGISTERED";

// =============================================================================
// Reliable-Channel Records (Tagged Union)
// =============================================================================

/// Every record kind carried on the reliable channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Record {
    // =========================================================================
    // Pump ↔ Station
    // =========================================================================
    /// First record of every pump session.
    Registration(RegistrationPayload),

    /// Admission granted; carries the station's current prices.
    RegistrationConfirmed(ConfirmationPayload),

    /// Admission refused or other peer-visible failure.
    Error(ErrorPayload),

    Heartbeat(HeartbeatPayload),

    /// Reliable reconciliation snapshot of a pump's state.
    Status(StatusPayload),

    TransactionCompleted(TransactionRecord),

    /// Price table push. From the enterprise it may be partial.
    PriceUpdate(PriceUpdatePayload),

    Command(CommandPayload),

    /// Announces the pump's datagram port.
    RegisterFastChannel(FastChannelPayload),

    // =========================================================================
    // Station ↔ Enterprise
    // =========================================================================
    StationRegistration(StationRegistrationPayload),

    StationConfirmed(StationConfirmedPayload),

    StationHeartbeat(StationHeartbeatPayload),
}

// =============================================================================
// Pump Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegistrationPayload {
    pub pump_id: PumpId,
    pub supported_grades: Vec<FuelGrade>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfirmationPayload {
    pub pump_id: PumpId,
    pub price_set: PriceSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HeartbeatPayload {
    pub pump_id: PumpId,
    pub timestamp: DateTime<Utc>,
}

/// A pump's operation state and meter at one instant.
///
/// Shared by the reliable `status` record and the `fast_status` datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StatusPayload {
    pub pump_id: PumpId,
    pub operation_state: OperationState,
    pub volume: u64,
    pub amount: u64,
    pub grade: FuelGrade,
    pub timestamp: DateTime<Utc>,
}

/// A finished dispense.
///
/// `transaction_id` is generated by the pump when the dispense ends, so the
/// record store can drop duplicates produced by offline replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransactionRecord {
    pub transaction_id: Uuid,
    pub pump_id: PumpId,
    pub grade: FuelGrade,
    pub volume: u64,
    pub unit_price: u64,
    pub amount: u64,
    pub payment_method: PaymentMethod,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PriceUpdatePayload {
    pub price_set: PriceSet,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CommandPayload {
    pub pump_id: PumpId,
    pub verb: CommandVerb,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FastChannelPayload {
    pub pump_id: PumpId,
    pub udp_port: u16,
}

// =============================================================================
// Station Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StationRegistrationPayload {
    pub station_id: StationId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StationConfirmedPayload {
    pub station_id: StationId,
    pub price_set: PriceSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StationHeartbeatPayload {
    pub station_id: StationId,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Fast-Channel Datagrams
// =============================================================================

/// Every record kind carried on the unreliable channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Datagram {
    FastStatus(StatusPayload),
    RegisterFastChannel(FastChannelPayload),
}

impl Datagram {
    pub fn type_name(&self) -> &'static str {
        match self {
            Datagram::FastStatus(_) => "fast_status",
            Datagram::RegisterFastChannel(_) => "register_fast_channel",
        }
    }

    pub fn pump_id(&self) -> PumpId {
        match self {
            Datagram::FastStatus(p) => p.pump_id,
            Datagram::RegisterFastChannel(p) => p.pump_id,
        }
    }

    /// Encodes one datagram body.
    pub fn to_bytes(&self) -> LinkResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| LinkError::SerializationFailed(e.to_string()))
    }

    /// Decodes one datagram body.
    pub fn from_bytes(bytes: &[u8]) -> LinkResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| LinkError::MalformedFrame(e.to_string()))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

impl Record {
    /// Returns the wire kind (for logging).
    pub fn type_name(&self) -> &'static str {
        match self {
            Record::Registration(_) => "registration",
            Record::RegistrationConfirmed(_) => "registration_confirmed",
            Record::Error(_) => "error",
            Record::Heartbeat(_) => "heartbeat",
            Record::Status(_) => "status",
            Record::TransactionCompleted(_) => "transaction_completed",
            Record::PriceUpdate(_) => "price_update",
            Record::Command(_) => "command",
            Record::RegisterFastChannel(_) => "register_fast_channel",
            Record::StationRegistration(_) => "station_registration",
            Record::StationConfirmed(_) => "station_confirmed",
            Record::StationHeartbeat(_) => "station_heartbeat",
        }
    }

    /// Creates a registration record.
    pub fn registration(pump_id: PumpId, supported_grades: Vec<FuelGrade>) -> Self {
        Record::Registration(RegistrationPayload {
            pump_id,
            supported_grades,
        })
    }

    /// Creates a confirmation record embedding the given prices.
    pub fn confirmed(pump_id: PumpId, price_set: PriceSet) -> Self {
        Record::RegistrationConfirmed(ConfirmationPayload { pump_id, price_set })
    }

    /// Creates an error record.
    pub fn error(code: &str, message: &str) -> Self {
        Record::Error(ErrorPayload {
            code: code.to_string(),
            message: message.to_string(),
        })
    }

    /// Creates a heartbeat stamped now.
    pub fn heartbeat(pump_id: PumpId) -> Self {
        Record::Heartbeat(HeartbeatPayload {
            pump_id,
            timestamp: Utc::now(),
        })
    }

    /// Creates a price update stamped now.
    pub fn price_update(price_set: PriceSet) -> Self {
        Record::PriceUpdate(PriceUpdatePayload {
            price_set,
            timestamp: Utc::now(),
        })
    }

    /// Creates a command stamped now.
    pub fn command(pump_id: PumpId, verb: CommandVerb, reason: &str) -> Self {
        Record::Command(CommandPayload {
            pump_id,
            verb,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn register_fast_channel(pump_id: PumpId, udp_port: u16) -> Self {
        Record::RegisterFastChannel(FastChannelPayload { pump_id, udp_port })
    }

    pub fn station_registration(station_id: StationId) -> Self {
        Record::StationRegistration(StationRegistrationPayload { station_id })
    }

    pub fn station_confirmed(station_id: StationId, price_set: PriceSet) -> Self {
        Record::StationConfirmed(StationConfirmedPayload {
            station_id,
            price_set,
        })
    }

    pub fn station_heartbeat(station_id: StationId) -> Self {
        Record::StationHeartbeat(StationHeartbeatPayload {
            station_id,
            timestamp: Utc::now(),
        })
    }

    /// Serializes to a JSON string (no terminator).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serializes to one newline-terminated line.
    pub fn to_line(&self) -> LinkResult<String> {
        let mut line = self
            .to_json()
            .map_err(|e| LinkError::SerializationFailed(e.to_string()))?;
        line.push('\n');
        Ok(line)
    }

    /// Decodes one line read from the reliable channel.
    pub fn from_line(line: &str) -> LinkResult<Self> {
        Self::from_json(line.trim_end()).map_err(|e| LinkError::MalformedFrame(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serialization() {
        let reg = Record::registration(PumpId::new(1), vec!["grade93".into(), "diesel".into()]);
        let json = reg.to_json().unwrap();
        assert!(json.contains("\"type\":\"registration\""));
        assert!(json.contains("\"pumpId\":1"));
        assert!(json.contains("\"supportedGrades\":[\"grade93\",\"diesel\"]"));

        match Record::from_json(&json).unwrap() {
            Record::Registration(payload) => assert_eq!(payload.pump_id, PumpId::new(1)),
            other => panic!("Expected registration, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_confirmation_embeds_prices() {
        let record = Record::confirmed(PumpId::new(3), PriceSet::standard());
        let json = record.to_json().unwrap();
        assert!(json.contains("\"type\":\"registration_confirmed\""));
        assert!(json.contains("\"priceSet\":{"));
        assert!(json.contains("\"grade93\":1290"));
    }

    #[test]
    fn test_line_framing() {
        let line = Record::heartbeat(PumpId::new(2)).to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert!(matches!(Record::from_line(&line).unwrap(), Record::Heartbeat(_)));
    }

    #[test]
    fn test_unknown_field_is_malformed() {
        let line = r#"{"type":"heartbeat","payload":{"pumpId":1,"timestamp":"2024-01-01T00:00:00Z","extra":true}}"#;
        assert!(matches!(
            Record::from_line(line),
            Err(LinkError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let line = r#"{"type":"registration","payload":{"pumpId":1}}"#;
        assert!(matches!(
            Record::from_line(line),
            Err(LinkError::MalformedFrame(_))
        ));
        assert!(matches!(
            Record::from_line("not json at all"),
            Err(LinkError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_command_verb_on_wire() {
        let json = Record::command(PumpId::new(5), CommandVerb::EmergencyStop, "spill")
            .to_json()
            .unwrap();
        assert!(json.contains("\"verb\":\"emergency_stop\""));
        assert!(json.contains("\"reason\":\"spill\""));
    }

    #[test]
    fn test_datagram_roundtrip() {
        let frame = Datagram::FastStatus(StatusPayload {
            pump_id: PumpId::new(1),
            operation_state: OperationState::Dispensing,
            volume: 3,
            amount: 4050,
            grade: "grade95".into(),
            timestamp: Utc::now(),
        });
        let bytes = frame.to_bytes().unwrap();
        assert!(!bytes.contains(&b'\n'));
        assert_eq!(Datagram::from_bytes(&bytes).unwrap(), frame);
        assert!(Datagram::from_bytes(b"{}").is_err());
    }
}
