//! Board model for the EPM driver stage.
//!
//! The flyback charger is gated by one enable line; its capacitor and supply
//! rails are read back through ADC1 dividers and its controller raises an
//! active-low fault line on overcurrent. Four thyristor gates steer the
//! capacitor into the coil: CTRL1/CTRL4 for a positive pulse, CTRL2/CTRL3 for
//! a negative one. The conversions and fault classification below are shared
//! with host tests; the peripheral drivers only build for the target.

use core::time::Duration;

use epm_core::charger::{ChargeStatus, ChargerFlags};
use epm_core::cycle::Volts;
use epm_core::hardpoint::HardpointId;

#[cfg(target_os = "none")]
mod charger;
#[cfg(target_os = "none")]
mod pulse;

#[cfg(target_os = "none")]
pub use charger::BoardCharger;
#[cfg(target_os = "none")]
pub use pulse::BridgePulseDriver;

/// Width of a thyristor gate pulse.
pub const GATE_PULSE: Duration = Duration::from_micros(5);
/// Settling time for the thyristors after a pulse before the next charge.
pub const THYRISTOR_TURN_OFF: Duration = Duration::from_millis(5);
/// Longest a single charge may take.
pub const CHARGE_TIMEOUT: Duration = Duration::from_millis(400);
/// Highest charge target the capacitor bank is rated for.
pub const MAX_TARGET: Volts = Volts::new(475);
/// Capacitor voltage that trips the overvoltage fault.
pub const CAPACITOR_LIMIT_VOLTS: u32 = 500;
/// Supply window (inclusive) in millivolts.
pub const SUPPLY_MIN_MV: u32 = 4_500;
pub const SUPPLY_MAX_MV: u32 = 6_500;

const ADC_FULL_SCALE: u32 = 4_095;
const VREF_MV: u32 = 3_300;
/// Capacitor sense divider ratio.
const CAPACITOR_DIVIDER: u32 = 201;
/// Supply sense divider ratio.
const SUPPLY_DIVIDER: u32 = 3;

/// Converts a capacitor sense reading to volts.
pub fn capacitor_volts(raw: u16) -> u32 {
    u32::from(raw) * VREF_MV * CAPACITOR_DIVIDER / ADC_FULL_SCALE / 1_000
}

/// Converts a supply sense reading to millivolts.
pub fn supply_millivolts(raw: u16) -> u32 {
    u32::from(raw) * VREF_MV * SUPPLY_DIVIDER / ADC_FULL_SCALE
}

/// One sample of the charger's sense lines.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChargeReading {
    pub capacitor_volts: u32,
    pub supply_mv: u32,
    pub overcurrent: bool,
    pub elapsed: Duration,
}

/// Classifies a reading against the session target.
///
/// Faults win over completion so a capacitor that overshoots is reported.
pub fn assess(target: Volts, reading: &ChargeReading) -> (ChargeStatus, ChargerFlags) {
    let mut flags = ChargerFlags::empty();
    if reading.supply_mv < SUPPLY_MIN_MV {
        flags |= ChargerFlags::SUPPLY_UNDERVOLTAGE;
    }
    if reading.supply_mv > SUPPLY_MAX_MV {
        flags |= ChargerFlags::SUPPLY_OVERVOLTAGE;
    }
    if reading.overcurrent {
        flags |= ChargerFlags::OVERCURRENT;
    }
    if reading.capacitor_volts > CAPACITOR_LIMIT_VOLTS {
        flags |= ChargerFlags::OVERVOLTAGE;
    }

    let reached = reading.capacitor_volts >= u32::from(target.as_u16());
    if !reached && reading.elapsed > CHARGE_TIMEOUT {
        flags |= ChargerFlags::TIMEOUT;
    }

    let status = if !flags.is_empty() {
        ChargeStatus::Error
    } else if reached {
        ChargeStatus::Done
    } else {
        ChargeStatus::InProgress
    };
    (status, flags)
}

/// Flags a target the bank cannot hold.
pub fn check_target(target: Volts) -> ChargerFlags {
    if target > MAX_TARGET {
        ChargerFlags::TARGET_OUT_OF_RANGE
    } else {
        ChargerFlags::empty()
    }
}

/// Decodes the DIP switch; a closed switch pulls its line low.
pub fn dip_switch_id(lines_low: [bool; 4]) -> HardpointId {
    lines_low
        .iter()
        .enumerate()
        .filter(|(_, low)| **low)
        .fold(0, |id, (bit, _)| id | (1 << bit))
}

/// Status LED level: a 3-blink flash after an accepted command, then the
/// magnet state.
pub fn led_level(since_flash: Option<Duration>, magnet_on: bool) -> bool {
    const BLINK: Duration = Duration::from_millis(30);
    const BLINKS: u32 = 3;

    match since_flash {
        Some(elapsed) if elapsed < BLINK * (BLINKS * 2) => {
            (elapsed.as_millis() / BLINK.as_millis()) % 2 == 0
        }
        _ => magnet_on,
    }
}
