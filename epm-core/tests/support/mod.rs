//! Test doubles shared by the controller integration tests.

#![allow(dead_code)]

use core::ops::Add;
use core::time::Duration;

use epm_core::charger::{ChargeStatus, Charger, ChargerFlags};
use epm_core::controller::{MagnetController, PulseDriver};
use epm_core::cycle::{Polarity, Volts};
use heapless::{Deque, Vec as HeaplessVec};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MockInstant(u64);

impl MockInstant {
    pub fn millis(value: u64) -> Self {
        Self(value * 1_000)
    }
}

impl Add<Duration> for MockInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + rhs.as_micros() as u64)
    }
}

/// Charger that replays scripted poll results and then reports `Done`.
pub struct ScriptedCharger {
    script: Deque<(ChargeStatus, ChargerFlags), 64>,
    started: HeaplessVec<Volts, 64>,
    discarded: usize,
    active: bool,
}

#[derive(Debug)]
pub struct SessionHandle {
    flags: ChargerFlags,
}

impl ScriptedCharger {
    pub fn new() -> Self {
        Self {
            script: Deque::new(),
            started: HeaplessVec::new(),
            discarded: 0,
            active: false,
        }
    }

    pub fn push(&mut self, status: ChargeStatus) {
        self.push_with_flags(status, ChargerFlags::empty());
    }

    pub fn push_with_flags(&mut self, status: ChargeStatus, flags: ChargerFlags) {
        self.script
            .push_back((status, flags))
            .expect("script capacity exceeded");
    }

    pub fn started(&self) -> &[Volts] {
        &self.started
    }

    pub fn discarded(&self) -> usize {
        self.discarded
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Charger for ScriptedCharger {
    type Session = SessionHandle;

    fn start(&mut self, target: Volts) -> Self::Session {
        assert!(!self.active, "started a session while another was live");
        self.active = true;
        self.started.push(target).expect("too many sessions");
        SessionHandle {
            flags: ChargerFlags::empty(),
        }
    }

    fn poll(&mut self, session: &mut Self::Session) -> ChargeStatus {
        let (status, flags) = self
            .script
            .pop_front()
            .unwrap_or((ChargeStatus::Done, ChargerFlags::empty()));
        session.flags = flags;
        status
    }

    fn error_flags(&self, session: &Self::Session) -> ChargerFlags {
        session.flags
    }

    fn discard(&mut self, _session: Self::Session) {
        assert!(self.active, "discarded a session that was not live");
        self.active = false;
        self.discarded += 1;
    }
}

/// Pulse driver recording every fired polarity against a settable clock.
pub struct RecordingDriver {
    pub now: MockInstant,
    pulses: HeaplessVec<Polarity, 128>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self {
            now: MockInstant::millis(0),
            pulses: HeaplessVec::new(),
        }
    }

    pub fn pulses(&self) -> &[Polarity] {
        &self.pulses
    }
}

impl PulseDriver for RecordingDriver {
    type Instant = MockInstant;

    fn fire(&mut self, polarity: Polarity) {
        self.pulses.push(polarity).expect("too many pulses");
    }

    fn now(&self) -> Self::Instant {
        self.now
    }
}

pub type TestController = MagnetController<ScriptedCharger, RecordingDriver>;

pub fn controller() -> TestController {
    MagnetController::new(ScriptedCharger::new(), RecordingDriver::new())
}

pub fn set_time(controller: &mut TestController, millis: u64) {
    controller.driver_mut().now = MockInstant::millis(millis);
}

/// Polls until the controller goes idle, returning the number of polls.
pub fn run_to_idle(controller: &mut TestController) -> usize {
    let mut polls = 0;
    while !controller.progress().is_idle() {
        controller.poll();
        polls += 1;
        assert!(polls < 1_000, "sequence did not finish");
    }
    polls
}

/// Turns the magnet on with the minimum repetitions and finishes the sequence.
pub fn magnetized_controller() -> TestController {
    let mut controller = controller();
    assert!(controller.turn_on(2).is_accepted());
    run_to_idle(&mut controller);
    assert!(controller.is_turned_on());
    controller
}
