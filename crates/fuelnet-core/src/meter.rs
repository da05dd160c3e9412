//! # Dispense Meter
//!
//! Accumulates volume and amount while a pump is dispensing.
//!
//! ## Tick Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  t=0  start()      volume 0   amount 0                                  │
//! │  t=1  tick(1350)   volume 1   amount 1350       ── fast frame           │
//! │  t=2  tick(1350)   volume 2   amount 2700       ── fast frame           │
//! │  ...                                                                    │
//! │  t=5  tick(1350)   volume 5   amount 6750       ── fast frame           │
//! │                                                 ── reliable snapshot    │
//! │                                                    (tick % 5 == 0)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The amount is always recomputed from the full volume and the CURRENT unit
//! price, so a price change mid-dispense reprices the whole dispense on the
//! next tick. Volume only ever grows between resets.

use serde::{Deserialize, Serialize};

/// Amount owed for `volume` units at `unit_price`.
///
/// Integer arithmetic; saturates instead of wrapping on absurd inputs.
#[inline]
pub fn amount_for(volume: u64, unit_price: u64) -> u64 {
    volume.saturating_mul(unit_price)
}

/// Point-in-time meter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MeterReading {
    pub volume: u64,
    pub amount: u64,
    /// Ticks since the last reset.
    pub tick: u64,
}

/// Volume/amount accumulator for one pump.
#[derive(Debug, Clone)]
pub struct DispenseMeter {
    volume: u64,
    amount: u64,
    ticks: u64,
    units_per_tick: u64,
}

impl DispenseMeter {
    /// A zeroed meter adding `units_per_tick` units on every tick.
    pub fn new(units_per_tick: u64) -> Self {
        DispenseMeter {
            volume: 0,
            amount: 0,
            ticks: 0,
            units_per_tick,
        }
    }

    /// Advances one tick at the given unit price.
    pub fn tick(&mut self, unit_price: u64) -> MeterReading {
        self.ticks += 1;
        self.volume = self.volume.saturating_add(self.units_per_tick);
        self.amount = amount_for(self.volume, unit_price);
        self.reading()
    }

    /// Recomputes the amount after a price change without adding volume.
    pub fn reprice(&mut self, unit_price: u64) {
        self.amount = amount_for(self.volume, unit_price);
    }

    /// Zeroes volume, amount and the tick counter.
    pub fn reset(&mut self) {
        self.volume = 0;
        self.amount = 0;
        self.ticks = 0;
    }

    /// Restarts only the tick counter (used when dispensing pauses).
    pub fn reset_ticks(&mut self) {
        self.ticks = 0;
    }

    /// Whether the current tick is due for a reliable reconciliation
    /// snapshot, given a cadence of one snapshot every `every` ticks.
    pub fn snapshot_due(&self, every: u64) -> bool {
        every > 0 && self.ticks > 0 && self.ticks % every == 0
    }

    pub fn reading(&self) -> MeterReading {
        MeterReading {
            volume: self.volume,
            amount: self.amount,
            tick: self.ticks,
        }
    }

    pub fn volume(&self) -> u64 {
        self.volume
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }
}

impl Default for DispenseMeter {
    fn default() -> Self {
        DispenseMeter::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_ticks_at_1350() {
        let mut meter = DispenseMeter::default();
        let mut last = MeterReading::default();
        for _ in 0..5 {
            let reading = meter.tick(1350);
            assert!(reading.volume > last.volume);
            last = reading;
        }
        assert_eq!(last.volume, 5);
        assert_eq!(last.amount, 6750);
        assert!(meter.snapshot_due(5));
    }

    #[test]
    fn test_snapshot_cadence() {
        let mut meter = DispenseMeter::default();
        let due: Vec<bool> = (0..10)
            .map(|_| {
                meter.tick(100);
                meter.snapshot_due(5)
            })
            .collect();
        assert_eq!(
            due,
            vec![false, false, false, false, true, false, false, false, false, true]
        );
    }

    #[test]
    fn test_reprice_uses_full_volume() {
        let mut meter = DispenseMeter::default();
        meter.tick(1290);
        meter.tick(1290);
        meter.reprice(1300);
        assert_eq!(meter.amount(), 2600);
        assert_eq!(meter.volume(), 2);
    }

    #[test]
    fn test_reset() {
        let mut meter = DispenseMeter::new(2);
        meter.tick(10);
        assert_eq!(meter.volume(), 2);
        meter.reset();
        assert_eq!(meter.reading(), MeterReading::default());
        assert!(!meter.snapshot_due(5));
    }
}
