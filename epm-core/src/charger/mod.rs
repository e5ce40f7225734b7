//! Capacitor charger contract consumed by the magnet controller.
//!
//! The charger circuit itself lives outside this crate. Firmware and host
//! targets implement [`Charger`] for their hardware or simulation; the
//! controller only ever holds one session handle at a time and hands it back
//! through [`Charger::discard`] as soon as the session finishes.

use bitflags::bitflags;

use crate::cycle::Volts;

bitflags! {
    /// Fault bits reported by a charger session.
    ///
    /// The controller copies these verbatim into the low byte of its status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChargerFlags: u8 {
        /// Capacitor did not reach the target voltage in time.
        const TIMEOUT              = 0x01;
        /// Capacitor voltage exceeded the safe ceiling.
        const OVERVOLTAGE          = 0x02;
        /// Input supply dropped below the charger's operating range.
        const SUPPLY_UNDERVOLTAGE  = 0x04;
        /// Input supply rose above the charger's operating range.
        const SUPPLY_OVERVOLTAGE   = 0x08;
        /// Switching current limit tripped.
        const OVERCURRENT          = 0x10;
        /// Requested target lies outside what the circuit can produce.
        const TARGET_OUT_OF_RANGE  = 0x20;
    }
}

/// Result of polling an active charger session.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChargeStatus {
    InProgress,
    Done,
    Error,
}

impl ChargeStatus {
    /// Returns `true` once the session has finished, successfully or not.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, ChargeStatus::Done | ChargeStatus::Error)
    }
}

/// Abstraction over the physical capacitor charger.
///
/// Every method must return promptly: the controller calls [`Charger::poll`]
/// once per control-loop tick while other duties share the same loop.
pub trait Charger {
    /// Handle describing one charge towards a target voltage.
    type Session;

    /// Begins charging towards `target` without waiting for it to complete.
    fn start(&mut self, target: Volts) -> Self::Session;

    /// Advances the session and reports where it stands.
    fn poll(&mut self, session: &mut Self::Session) -> ChargeStatus;

    /// Fault bits for the session, valid after any call to [`Charger::poll`].
    fn error_flags(&self, session: &Self::Session) -> ChargerFlags;

    /// Releases a finished session so the circuit can idle.
    fn discard(&mut self, session: Self::Session) {
        let _ = session;
    }
}

/// Charger that completes every session on the first poll.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopCharger;

impl NoopCharger {
    /// Creates a new no-op charger.
    pub const fn new() -> Self {
        Self
    }
}

impl Charger for NoopCharger {
    type Session = Volts;

    fn start(&mut self, target: Volts) -> Self::Session {
        target
    }

    fn poll(&mut self, _: &mut Self::Session) -> ChargeStatus {
        ChargeStatus::Done
    }

    fn error_flags(&self, _: &Self::Session) -> ChargerFlags {
        ChargerFlags::empty()
    }
}
