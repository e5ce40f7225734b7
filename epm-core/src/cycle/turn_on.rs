//! Magnetizing step repeated by the turn-on sequence.

use super::{ChargeStep, Polarity, Volts};

/// Capacitor voltage used for every turn-on pulse.
pub const TURN_ON_VOLTAGE: Volts = Volts::new(450);

/// Single full-strength positive step.
pub const TURN_ON_STEP: ChargeStep = ChargeStep::new(TURN_ON_VOLTAGE, Polarity::Positive);
