//! Simulated hardware behind the emulator console.

use std::ops::Add;
use std::time::Duration;

use epm_core::charger::{ChargeStatus, Charger, ChargerFlags};
use epm_core::controller::PulseDriver;
use epm_core::cycle::{Polarity, Volts};
use epm_core::telemetry::TelemetryInstant;

/// Polls a session may take before it is failed with [`ChargerFlags::TIMEOUT`].
pub const CHARGE_TIMEOUT_POLLS: u32 = 500;

/// Virtual monotonic time in microseconds since the session started.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualInstant(u64);

impl VirtualInstant {
    pub const fn as_micros(self) -> u64 {
        self.0
    }
}

impl Add<Duration> for VirtualInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + rhs.as_micros() as u64)
    }
}

impl TelemetryInstant for VirtualInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

/// Pulse driver that keeps the virtual clock and remembers fired pulses.
#[derive(Debug, Default)]
pub struct HostPulseDriver {
    now: VirtualInstant,
    fired: Vec<Polarity>,
}

impl HostPulseDriver {
    pub fn advance(&mut self, by: Duration) {
        self.now = self.now + by;
    }

    pub fn fired(&self) -> &[Polarity] {
        &self.fired
    }
}

impl PulseDriver for HostPulseDriver {
    type Instant = VirtualInstant;

    fn fire(&mut self, polarity: Polarity) {
        self.fired.push(polarity);
    }

    fn now(&self) -> Self::Instant {
        self.now
    }
}

/// Charge in flight on the simulated capacitor.
#[derive(Debug)]
pub struct SimSession {
    target: Volts,
    voltage: u32,
    polls: u32,
    flags: ChargerFlags,
}

impl SimSession {
    pub fn voltage(&self) -> u32 {
        self.voltage
    }
}

/// Capacitor charger that ramps a fixed number of volts per poll.
#[derive(Debug)]
pub struct SimulatedCharger {
    volts_per_poll: u32,
    pending_fault: Option<ChargerFlags>,
    sessions_started: usize,
}

impl SimulatedCharger {
    pub fn new(volts_per_poll: u32) -> Self {
        Self {
            volts_per_poll: volts_per_poll.max(1),
            pending_fault: None,
            sessions_started: 0,
        }
    }

    /// Fails the next session on its first poll.
    pub fn inject_fault(&mut self, flags: ChargerFlags) {
        self.pending_fault = Some(flags);
    }

    pub fn clear_fault(&mut self) {
        self.pending_fault = None;
    }

    pub fn pending_fault(&self) -> Option<ChargerFlags> {
        self.pending_fault
    }

    pub fn sessions_started(&self) -> usize {
        self.sessions_started
    }
}

impl Charger for SimulatedCharger {
    type Session = SimSession;

    fn start(&mut self, target: Volts) -> Self::Session {
        self.sessions_started += 1;
        SimSession {
            target,
            voltage: 0,
            polls: 0,
            flags: self.pending_fault.take().unwrap_or_default(),
        }
    }

    fn poll(&mut self, session: &mut Self::Session) -> ChargeStatus {
        if !session.flags.is_empty() {
            return ChargeStatus::Error;
        }

        session.polls += 1;
        let target = u32::from(session.target.as_u16());
        session.voltage = (session.voltage + self.volts_per_poll).min(target);

        if session.voltage >= target {
            ChargeStatus::Done
        } else if session.polls >= CHARGE_TIMEOUT_POLLS {
            session.flags = ChargerFlags::TIMEOUT;
            ChargeStatus::Error
        } else {
            ChargeStatus::InProgress
        }
    }

    fn error_flags(&self, session: &Self::Session) -> ChargerFlags {
        session.flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_completes_after_ramp() {
        let mut charger = SimulatedCharger::new(100);
        let mut session = charger.start(Volts::new(250));

        assert_eq!(charger.poll(&mut session), ChargeStatus::InProgress);
        assert_eq!(charger.poll(&mut session), ChargeStatus::InProgress);
        assert_eq!(charger.poll(&mut session), ChargeStatus::Done);
        assert_eq!(session.voltage(), 250);
        assert!(charger.error_flags(&session).is_empty());
    }

    #[test]
    fn injected_fault_hits_only_the_next_session() {
        let mut charger = SimulatedCharger::new(500);
        charger.inject_fault(ChargerFlags::OVERCURRENT);

        let mut failing = charger.start(Volts::new(10));
        assert_eq!(charger.poll(&mut failing), ChargeStatus::Error);
        assert_eq!(charger.error_flags(&failing), ChargerFlags::OVERCURRENT);
        assert!(charger.pending_fault().is_none());

        let mut healthy = charger.start(Volts::new(10));
        assert_eq!(charger.poll(&mut healthy), ChargeStatus::Done);
        assert_eq!(charger.sessions_started(), 2);
    }

    #[test]
    fn slow_charge_times_out() {
        let mut charger = SimulatedCharger::new(1);
        let mut session = charger.start(Volts::new(10_000));

        let mut status = ChargeStatus::InProgress;
        for _ in 0..CHARGE_TIMEOUT_POLLS {
            status = charger.poll(&mut session);
        }
        assert_eq!(status, ChargeStatus::Error);
        assert_eq!(charger.error_flags(&session), ChargerFlags::TIMEOUT);
    }

    #[test]
    fn clock_advances_in_virtual_time() {
        let mut driver = HostPulseDriver::default();
        driver.advance(Duration::from_millis(3));
        driver.fire(Polarity::Negative);

        assert_eq!(driver.now().as_micros(), 3_000);
        assert_eq!(driver.fired(), &[Polarity::Negative]);
    }
}
