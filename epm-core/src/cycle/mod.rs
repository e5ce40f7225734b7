//! Charge step data shared by firmware and host targets.
//!
//! The controller walks these definitions one charger step at a time. Turning
//! the magnet on is a single strong positive pulse repeated a caller-chosen
//! number of times; turning it off walks a decaying, alternating-polarity
//! table so the core is left without residual field. Everything in this module
//! is `no_std` friendly and fixed at build time.

use core::fmt;

pub mod turn_off;
pub mod turn_on;

pub use turn_off::{CYCLE_TABLE, CYCLE_TABLE_LEN, OFF_FROM_OFF_SKIP};
pub use turn_on::{TURN_ON_STEP, TURN_ON_VOLTAGE};

/// Direction of the current pushed through the coil when a pulse fires.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Polarity {
    Positive,
    Negative,
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Polarity::Positive => "positive",
            Polarity::Negative => "negative",
        })
    }
}

/// Capacitor target voltage in whole volts.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Volts(u16);

impl Volts {
    #[must_use]
    pub const fn new(volts: u16) -> Self {
        Self(volts)
    }

    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Volts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}V", self.0)
    }
}

/// One capacitor charge followed by a pulse of the given polarity.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChargeStep {
    pub target: Volts,
    pub polarity: Polarity,
}

impl ChargeStep {
    pub const fn new(target: Volts, polarity: Polarity) -> Self {
        Self { target, polarity }
    }

    /// Shorthand for a positive step at `volts`.
    pub const fn positive(volts: u16) -> Self {
        Self::new(Volts::new(volts), Polarity::Positive)
    }

    /// Shorthand for a negative step at `volts`.
    pub const fn negative(volts: u16) -> Self {
        Self::new(Volts::new(volts), Polarity::Negative)
    }
}

/// Ordered steps walked by a turn-off sequence.
pub type CycleTable = [ChargeStep];

/// Returns `true` when voltages never increase from one entry to the next.
pub fn is_non_increasing(table: &CycleTable) -> bool {
    table
        .windows(2)
        .all(|pair| pair[1].target <= pair[0].target)
}
