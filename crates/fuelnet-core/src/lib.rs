//! # fuelnet-core: Pure Domain Logic for FuelNet
//!
//! This crate holds the domain vocabulary shared by every tier of the fuel
//! network (enterprise, station, pump) as pure types and functions with zero
//! I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        FuelNet Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 apps/fuelnet-node (bootstrap)                   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │            fuelnet-link (sockets, tasks, timers)                │   │
//! │  │    Hub · Broadcaster · Dispatcher · PumpClient · Uplink         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ fuelnet-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  prices   │  │   meter   │  │ validation│  │   │
//! │  │   │  PumpId   │  │ PriceSet  │  │ Dispense  │  │   rules   │  │   │
//! │  │   │ Operation │  │  merge    │  │  Meter    │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO SOCKETS • NO TIMERS • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Identifiers, fuel grades, operation states, command verbs
//! - [`prices`] - The per-grade `PriceSet` table (integer prices only)
//! - [`meter`] - Dispense metering (volume × unit price, truncating)
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation rules
//!
//! ## Example Usage
//!
//! ```rust
//! use fuelnet_core::prices::PriceSet;
//! use fuelnet_core::types::FuelGrade;
//!
//! let current = PriceSet::from_pairs([("grade93", 1290), ("grade95", 1350)]);
//! let update = PriceSet::from_pairs([("grade93", 1300)]);
//!
//! // Partial updates produce a NEW table; the old one is never mutated.
//! let merged = current.merged(&update);
//! assert_eq!(merged.get(&FuelGrade::from("grade93")), Some(1300));
//! assert_eq!(merged.get(&FuelGrade::from("grade95")), Some(1350));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod meter;
pub mod prices;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use meter::{DispenseMeter, MeterReading};
pub use prices::PriceSet;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Fuel grades every pump supports unless configured otherwise.
pub const DEFAULT_GRADES: [&str; 4] = ["grade93", "grade95", "grade97", "diesel"];

/// Maximum length of a station identifier.
pub const MAX_STATION_ID_LEN: usize = 64;
