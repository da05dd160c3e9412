//! # Domain Types
//!
//! Core domain types shared by every tier of the fuel network.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   Identity      │   │ OperationState  │   │  CommandVerb    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  PumpId (u32)   │   │  Available      │   │  Pause          │       │
//! │  │  StationId      │   │  Dispensing     │   │  Resume         │       │
//! │  │  FuelGrade      │   │  Paused         │   │  EmergencyStop  │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐                              │
//! │  │ PaymentMethod   │   │ConnectionState  │                              │
//! │  │  ─────────────  │   │  ─────────────  │                              │
//! │  │  Cash           │   │  Connected      │                              │
//! │  │  Card           │   │  Disconnected   │                              │
//! │  │  Fleet          │   └─────────────────┘                              │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Operation State Machine
//! ```text
//!                 start                    pause
//!   ┌───────────┐ ─────► ┌────────────┐ ─────────► ┌────────┐
//!   │ Available │        │ Dispensing │            │ Paused │
//!   └───────────┘ ◄───── └────────────┘ ◄───────── └────────┘
//!        ▲         stop                    resume       │
//!        │                                              │
//!        └──────────── emergency_stop (from any) ───────┘
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// Externally assigned pump identifier, unique within a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PumpId(u32);

impl PumpId {
    #[inline]
    pub const fn new(id: u32) -> Self {
        PumpId(id)
    }

    #[inline]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

impl From<u32> for PumpId {
    fn from(id: u32) -> Self {
        PumpId(id)
    }
}

impl fmt::Display for PumpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PumpId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(PumpId)
    }
}

/// Station identifier as known to the enterprise node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(String);

impl StationId {
    pub fn new(id: impl Into<String>) -> Self {
        StationId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StationId {
    fn from(id: &str) -> Self {
        StationId(id.to_string())
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Fuel Grade
// =============================================================================

/// A fuel grade key, e.g. `grade93` or `diesel`.
///
/// Grades are opaque keys into a [`PriceSet`](crate::prices::PriceSet); the
/// network does not interpret them beyond equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FuelGrade(String);

impl FuelGrade {
    pub fn new(key: impl Into<String>) -> Self {
        FuelGrade(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FuelGrade {
    fn from(key: &str) -> Self {
        FuelGrade(key.to_string())
    }
}

impl From<String> for FuelGrade {
    fn from(key: String) -> Self {
        FuelGrade(key)
    }
}

impl fmt::Display for FuelGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The grades a pump supports when none are configured.
pub fn default_grades() -> Vec<FuelGrade> {
    crate::DEFAULT_GRADES
        .iter()
        .map(|g| FuelGrade::from(*g))
        .collect()
}

// =============================================================================
// Operation State
// =============================================================================

/// What the pump is physically doing right now.
///
/// Orthogonal to the connection session: a pump keeps dispensing while its
/// uplink is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Idle, ready for a new dispense.
    #[default]
    Available,
    /// Fuel is flowing; the meter advances every tick.
    Dispensing,
    /// Dispense suspended by an operator command; the meter holds.
    Paused,
}

impl OperationState {
    /// Applies a control verb, returning the resulting state.
    ///
    /// `None` means the verb does not apply in this state and the pump
    /// ignores it:
    /// - `pause` only from `Dispensing`
    /// - `resume` only from `Paused`
    /// - `emergency_stop` from anywhere, always landing in `Available`
    pub fn after_command(self, verb: CommandVerb) -> Option<OperationState> {
        match (self, verb) {
            (OperationState::Dispensing, CommandVerb::Pause) => Some(OperationState::Paused),
            (OperationState::Paused, CommandVerb::Resume) => Some(OperationState::Dispensing),
            (_, CommandVerb::EmergencyStop) => Some(OperationState::Available),
            _ => None,
        }
    }

    /// Whether the dispense meter advances in this state.
    #[inline]
    pub const fn is_dispensing(&self) -> bool {
        matches!(self, OperationState::Dispensing)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationState::Available => "available",
            OperationState::Dispensing => "dispensing",
            OperationState::Paused => "paused",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Command Verb
// =============================================================================

/// Control verbs the station can send to a single pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandVerb {
    Pause,
    Resume,
    EmergencyStop,
}

impl CommandVerb {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CommandVerb::Pause => "pause",
            CommandVerb::Resume => "resume",
            CommandVerb::EmergencyStop => "emergency_stop",
        }
    }
}

impl fmt::Display for CommandVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandVerb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pause" => Ok(CommandVerb::Pause),
            "resume" => Ok(CommandVerb::Resume),
            "emergency_stop" | "emergency-stop" | "stop" => Ok(CommandVerb::EmergencyStop),
            _ => Err(format!(
                "Invalid command verb: {}. Use 'pause', 'resume', or 'emergency_stop'",
                s
            )),
        }
    }
}

// =============================================================================
// Payment Method
// =============================================================================

/// How a completed dispense was paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Cash,
    Card,
    /// Fleet account billed to a company.
    Fleet,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Fleet => "fleet",
        })
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "fleet" => Ok(PaymentMethod::Fleet),
            _ => Err(format!("Invalid payment method: {}", s)),
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Liveness of a peer as reported to the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_only_from_dispensing() {
        assert_eq!(
            OperationState::Dispensing.after_command(CommandVerb::Pause),
            Some(OperationState::Paused)
        );
        assert_eq!(OperationState::Available.after_command(CommandVerb::Pause), None);
        assert_eq!(OperationState::Paused.after_command(CommandVerb::Pause), None);
    }

    #[test]
    fn test_resume_only_from_paused() {
        assert_eq!(
            OperationState::Paused.after_command(CommandVerb::Resume),
            Some(OperationState::Dispensing)
        );
        assert_eq!(OperationState::Available.after_command(CommandVerb::Resume), None);
        assert_eq!(OperationState::Dispensing.after_command(CommandVerb::Resume), None);
    }

    #[test]
    fn test_emergency_stop_from_anywhere() {
        for state in [
            OperationState::Available,
            OperationState::Dispensing,
            OperationState::Paused,
        ] {
            assert_eq!(
                state.after_command(CommandVerb::EmergencyStop),
                Some(OperationState::Available)
            );
        }
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&CommandVerb::EmergencyStop).unwrap(),
            "\"emergency_stop\""
        );
        assert_eq!(
            serde_json::to_string(&OperationState::Dispensing).unwrap(),
            "\"dispensing\""
        );
        assert_eq!(serde_json::to_string(&PumpId::new(7)).unwrap(), "7");
        assert_eq!(
            serde_json::to_string(&FuelGrade::from("diesel")).unwrap(),
            "\"diesel\""
        );
    }

    #[test]
    fn test_verb_from_str() {
        assert_eq!("PAUSE".parse::<CommandVerb>().unwrap(), CommandVerb::Pause);
        assert_eq!(
            "emergency-stop".parse::<CommandVerb>().unwrap(),
            CommandVerb::EmergencyStop
        );
        assert!("explode".parse::<CommandVerb>().is_err());
    }
}
