//! Magnet control state machine shared by firmware and host targets.
//!
//! [`MagnetController`] turns `turn_on`/`turn_off` requests into a resumable
//! sequence of charger steps. Each call to [`MagnetController::poll`] advances
//! the active sequence by at most one charger poll, so a slow capacitor charge
//! never holds up the rest of the control loop. Faults and ignored commands
//! are never raised to the caller; they show up through [`Health`],
//! [`StatusFlags`], and the returned outcome values.

use core::{fmt, ops::Add, time::Duration};

use bitflags::bitflags;

use crate::charger::{ChargeStatus, Charger, ChargerFlags};
use crate::cycle::{
    CYCLE_TABLE, ChargeStep, CycleTable, OFF_FROM_OFF_SKIP, is_non_increasing, Polarity, TURN_ON_STEP,
};

/// Lowest repetition count a turn-on request is raised to.
pub const DEFAULT_MIN_TURN_ON_CYCLES: u16 = 2;
/// Highest repetition count a turn-on request is lowered to.
pub const DEFAULT_MAX_CYCLES: u16 = 10;
/// Minimum spacing between accepted commands before a repeat is honoured.
pub const MIN_COMMAND_INTERVAL: Duration = Duration::from_millis(2_500);

/// Coarse fault severity surfaced to the supervisory layer.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub enum Health {
    #[default]
    Ok,
    Warning,
    Error,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Health::Ok => "ok",
            Health::Warning => "warning",
            Health::Error => "error",
        })
    }
}

bitflags! {
    /// Status bits published alongside the on/off state.
    ///
    /// The low byte mirrors [`ChargerFlags`] from the most recent session poll.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusFlags: u16 {
        /// A turn-on sequence is in progress.
        const TURNING_ON  = 0x0100;
        /// A turn-off sequence is in progress.
        const TURNING_OFF = 0x0200;
    }
}

impl StatusFlags {
    /// Lifts charger fault bits into the status word.
    #[must_use]
    pub const fn from_charger(flags: ChargerFlags) -> Self {
        Self::from_bits_retain(flags.bits() as u16)
    }

    /// Extracts the charger fault bits.
    #[must_use]
    pub const fn charger(self) -> ChargerFlags {
        ChargerFlags::from_bits_retain((self.bits() & 0x00FF) as u8)
    }
}

/// Which way an active sequence is moving the magnet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    TurnOn,
    TurnOff,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::TurnOn => "turn-on",
            Direction::TurnOff => "turn-off",
        })
    }
}

/// Progress of the active sequence.
///
/// `TurningOn` counts down remaining repetitions. `TurningOff` counts down the
/// table entries left to execute, so the current index is
/// `table_len - remaining`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SequenceProgress {
    #[default]
    Idle,
    TurningOn { remaining: u16 },
    TurningOff { remaining: u16 },
}

impl SequenceProgress {
    /// Returns `true` when no sequence is active.
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, SequenceProgress::Idle)
    }

    /// Returns the direction of the active sequence, if any.
    #[must_use]
    pub const fn direction(self) -> Option<Direction> {
        match self {
            SequenceProgress::Idle => None,
            SequenceProgress::TurningOn { .. } => Some(Direction::TurnOn),
            SequenceProgress::TurningOff { .. } => Some(Direction::TurnOff),
        }
    }

    /// Signed step counter: positive while turning on, negative while turning off.
    #[must_use]
    pub const fn remaining_steps(self) -> i32 {
        match self {
            SequenceProgress::Idle => 0,
            SequenceProgress::TurningOn { remaining } => remaining as i32,
            SequenceProgress::TurningOff { remaining } => -(remaining as i32),
        }
    }

    /// Rebuilds progress from a signed step counter.
    #[must_use]
    pub fn from_remaining_steps(steps: i32) -> Option<Self> {
        let magnitude = u16::try_from(steps.unsigned_abs()).ok()?;
        Some(match steps.signum() {
            0 => SequenceProgress::Idle,
            1 => SequenceProgress::TurningOn {
                remaining: magnitude,
            },
            _ => SequenceProgress::TurningOff {
                remaining: magnitude,
            },
        })
    }

    /// Status bits describing the active sequence.
    #[must_use]
    pub const fn status_flags(self) -> StatusFlags {
        match self {
            SequenceProgress::Idle => StatusFlags::empty(),
            SequenceProgress::TurningOn { .. } => StatusFlags::TURNING_ON,
            SequenceProgress::TurningOff { .. } => StatusFlags::TURNING_OFF,
        }
    }

    fn advanced(self) -> Self {
        match self {
            SequenceProgress::TurningOn { remaining } | SequenceProgress::TurningOff { remaining }
                if remaining <= 1 =>
            {
                SequenceProgress::Idle
            }
            SequenceProgress::TurningOn { remaining } => SequenceProgress::TurningOn {
                remaining: remaining - 1,
            },
            SequenceProgress::TurningOff { remaining } => SequenceProgress::TurningOff {
                remaining: remaining - 1,
            },
            SequenceProgress::Idle => SequenceProgress::Idle,
        }
    }
}

/// Errors reported when a [`ControllerConfig`] is inconsistent.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControllerError {
    /// Turn-on repetitions must be at least one.
    ZeroMinimumCycles,
    /// Minimum repetitions exceed the maximum.
    InvertedCycleRange { min: u16, max: u16 },
    /// Turn-off table must hold more entries than the off-from-off skip.
    CycleTableTooShort { len: usize },
    /// Turn-off table length must fit the step counter.
    CycleTableTooLong { len: usize },
    /// Turn-off voltages must never rise along the ramp.
    RisingCycleTable,
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ZeroMinimumCycles => f.write_str("minimum turn-on cycles must be >= 1"),
            ControllerError::InvertedCycleRange { min, max } => {
                write!(f, "minimum turn-on cycles {min} exceed maximum {max}")
            }
            ControllerError::CycleTableTooShort { len } => write!(
                f,
                "cycle table has {len} entries, needs more than {OFF_FROM_OFF_SKIP}"
            ),
            ControllerError::CycleTableTooLong { len } => {
                write!(f, "cycle table has {len} entries, limit is {}", u16::MAX)
            }
            ControllerError::RisingCycleTable => f.write_str("cycle table voltages rise"),
        }
    }
}

/// Tuning applied by a [`MagnetController`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ControllerConfig {
    pub min_turn_on_cycles: u16,
    pub max_cycles: u16,
    pub min_command_interval: Duration,
    pub turn_on_step: ChargeStep,
    pub cycle_table: &'static CycleTable,
}

impl ControllerConfig {
    /// Checks the configuration for values the controller cannot honour.
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.min_turn_on_cycles == 0 {
            return Err(ControllerError::ZeroMinimumCycles);
        }
        if self.min_turn_on_cycles > self.max_cycles {
            return Err(ControllerError::InvertedCycleRange {
                min: self.min_turn_on_cycles,
                max: self.max_cycles,
            });
        }

        let len = self.cycle_table.len();
        if len <= OFF_FROM_OFF_SKIP {
            return Err(ControllerError::CycleTableTooShort { len });
        }
        if u16::try_from(len).is_err() {
            return Err(ControllerError::CycleTableTooLong { len });
        }
        if !is_non_increasing(self.cycle_table) {
            return Err(ControllerError::RisingCycleTable);
        }

        Ok(())
    }

    /// Clamps a requested repetition count, reporting whether it changed.
    #[must_use]
    pub fn clamp_repetitions(&self, requested: u16) -> (u16, bool) {
        let clamped = requested.clamp(self.min_turn_on_cycles, self.max_cycles);
        (clamped, clamped != requested)
    }

    fn table_len(&self) -> u16 {
        u16::try_from(self.cycle_table.len()).unwrap_or(u16::MAX)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            min_turn_on_cycles: DEFAULT_MIN_TURN_ON_CYCLES,
            max_cycles: DEFAULT_MAX_CYCLES,
            min_command_interval: MIN_COMMAND_INTERVAL,
            turn_on_step: TURN_ON_STEP,
            cycle_table: &CYCLE_TABLE,
        }
    }
}

/// Tracks the last accepted command so repeats can be throttled.
#[derive(Clone, Debug)]
pub struct CommandDebounce<Instant> {
    last_accepted: Option<(Instant, Direction)>,
    interval: Duration,
}

impl<Instant> CommandDebounce<Instant>
where
    Instant: Copy + Ord + Add<Duration, Output = Instant>,
{
    /// Creates a tracker that has never accepted a command.
    pub const fn new(interval: Duration) -> Self {
        Self {
            last_accepted: None,
            interval,
        }
    }

    /// Returns `true` once `interval` has elapsed since the last accepted command.
    pub fn is_settled(&self, now: Instant) -> bool {
        match self.last_accepted {
            Some((accepted, _)) => now >= accepted + self.interval,
            None => true,
        }
    }

    /// Like [`Self::is_settled`], but only a prior command in `direction` holds it back.
    pub fn is_settled_after(&self, direction: Direction, now: Instant) -> bool {
        match self.last_accepted {
            Some((accepted, last)) if last == direction => now >= accepted + self.interval,
            _ => true,
        }
    }

    /// Records an accepted command.
    pub fn record(&mut self, direction: Direction, now: Instant) {
        self.last_accepted = Some((now, direction));
    }
}

/// Abstraction over the coil pulse switches.
pub trait PulseDriver {
    /// Monotonic timestamp type supplied by the platform clock.
    type Instant: Copy + Ord + Add<Duration, Output = Self::Instant>;

    /// Discharges the charged capacitor through the coil with `polarity`.
    fn fire(&mut self, polarity: Polarity);

    /// Reads the monotonic clock.
    fn now(&self) -> Self::Instant;
}

/// Pulse driver that fires nothing and keeps time as an offset from boot.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopPulseDriver {
    elapsed: Duration,
    fired: u32,
}

impl NoopPulseDriver {
    /// Creates a new no-op pulse driver at time zero.
    pub const fn new() -> Self {
        Self {
            elapsed: Duration::ZERO,
            fired: 0,
        }
    }

    /// Moves the clock forward.
    pub fn advance(&mut self, by: Duration) {
        self.elapsed += by;
    }

    /// Number of pulses requested so far.
    pub const fn fired(&self) -> u32 {
        self.fired
    }
}

impl PulseDriver for NoopPulseDriver {
    type Instant = Duration;

    fn fire(&mut self, _: Polarity) {
        self.fired = self.fired.saturating_add(1);
    }

    fn now(&self) -> Self::Instant {
        self.elapsed
    }
}

/// What happened to a `turn_on`/`turn_off` request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandDisposition {
    /// A new sequence was started.
    Accepted {
        progress: SequenceProgress,
        clamped: bool,
    },
    /// Another sequence is still running.
    IgnoredBusy,
    /// The command arrived inside the debounce window.
    IgnoredRateLimited,
}

impl CommandDisposition {
    /// Returns `true` when the command started a sequence.
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, CommandDisposition::Accepted { .. })
    }
}

/// Step the controller was working on during a poll.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StepContext {
    pub direction: Direction,
    pub step: ChargeStep,
    /// Turn-off table index; `None` for turn-on steps.
    pub table_index: Option<usize>,
}

/// Result of a single [`MagnetController::poll`] call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PollOutcome {
    /// No sequence is active.
    Idle,
    /// The capacitor is still charging.
    Charging(StepContext),
    /// A pulse was committed to the coil.
    Pulsed {
        context: StepContext,
        sequence_complete: bool,
    },
    /// The charger failed and the sequence was abandoned.
    Aborted {
        context: StepContext,
        flags: ChargerFlags,
    },
}

/// Electro-permanent magnet sequencer.
pub struct MagnetController<C: Charger, D: PulseDriver> {
    config: ControllerConfig,
    charger: C,
    driver: D,
    progress: SequenceProgress,
    session: Option<C::Session>,
    magnet_on: bool,
    health: Health,
    charger_flags: ChargerFlags,
    debounce: CommandDebounce<D::Instant>,
}

impl<C: Charger, D: PulseDriver> MagnetController<C, D> {
    /// Creates an idle controller with the default tuning.
    pub fn new(charger: C, driver: D) -> Self {
        let config = ControllerConfig::default();
        Self {
            config,
            charger,
            driver,
            progress: SequenceProgress::Idle,
            session: None,
            magnet_on: false,
            health: Health::Ok,
            charger_flags: ChargerFlags::empty(),
            debounce: CommandDebounce::new(config.min_command_interval),
        }
    }

    /// Creates an idle controller with custom tuning.
    pub fn with_config(
        charger: C,
        driver: D,
        config: ControllerConfig,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        let mut controller = Self::new(charger, driver);
        controller.config = config;
        controller.debounce = CommandDebounce::new(config.min_command_interval);
        Ok(controller)
    }

    /// Requests `repetitions` turn-on pulses (clamped to the configured range).
    pub fn turn_on(&mut self, repetitions: u16) -> CommandDisposition {
        if !self.progress.is_idle() {
            return CommandDisposition::IgnoredBusy;
        }

        let now = self.driver.now();
        if self.magnet_on && !self.debounce.is_settled(now) {
            return CommandDisposition::IgnoredRateLimited;
        }

        let (remaining, clamped) = self.config.clamp_repetitions(repetitions);
        self.progress = SequenceProgress::TurningOn { remaining };
        self.debounce.record(Direction::TurnOn, now);

        CommandDisposition::Accepted {
            progress: self.progress,
            clamped,
        }
    }

    /// Requests the demagnetizing ramp.
    pub fn turn_off(&mut self) -> CommandDisposition {
        if !self.progress.is_idle() {
            return CommandDisposition::IgnoredBusy;
        }

        let now = self.driver.now();
        // While off, only a repeated off is throttled.
        let settled = if self.magnet_on {
            self.debounce.is_settled(now)
        } else {
            self.debounce.is_settled_after(Direction::TurnOff, now)
        };
        if !settled {
            return CommandDisposition::IgnoredRateLimited;
        }

        let mut remaining = self.config.table_len();
        if !self.magnet_on {
            // Already off: only the low-voltage tail is needed.
            remaining -= OFF_FROM_OFF_SKIP as u16;
        }
        self.progress = SequenceProgress::TurningOff { remaining };
        self.debounce.record(Direction::TurnOff, now);

        CommandDisposition::Accepted {
            progress: self.progress,
            clamped: false,
        }
    }

    /// Advances the active sequence by at most one charger step.
    pub fn poll(&mut self) -> PollOutcome {
        let Some(context) = self.current_step() else {
            return PollOutcome::Idle;
        };

        let charger = &mut self.charger;
        let session = self
            .session
            .get_or_insert_with(|| charger.start(context.step.target));
        let status = charger.poll(session);
        self.charger_flags = charger.error_flags(session);

        match status {
            ChargeStatus::InProgress => PollOutcome::Charging(context),
            ChargeStatus::Done => {
                self.driver.fire(context.step.polarity);
                match context.step.polarity {
                    Polarity::Positive if context.direction == Direction::TurnOn => {
                        self.magnet_on = true;
                    }
                    Polarity::Negative => self.magnet_on = false,
                    Polarity::Positive => {}
                }
                self.release_session();
                self.progress = self.progress.advanced();
                self.health = Health::Ok;

                PollOutcome::Pulsed {
                    context,
                    sequence_complete: self.progress.is_idle(),
                }
            }
            ChargeStatus::Error => {
                let flags = self.charger_flags;
                self.release_session();
                self.progress = SequenceProgress::Idle;
                self.health = Health::Error;

                PollOutcome::Aborted { context, flags }
            }
        }
    }

    /// Returns `true` when the last committed pulse left the magnet on.
    pub fn is_turned_on(&self) -> bool {
        self.magnet_on
    }

    /// Returns the health derived from the most recent charger result.
    pub fn health(&self) -> Health {
        self.health
    }

    /// Charger fault bits combined with the active-sequence bits.
    pub fn status_flags(&self) -> StatusFlags {
        StatusFlags::from_charger(self.charger_flags) | self.progress.status_flags()
    }

    /// Returns the active sequence progress.
    pub fn progress(&self) -> SequenceProgress {
        self.progress
    }

    /// Signed step counter (see [`SequenceProgress::remaining_steps`]).
    pub fn remaining_steps(&self) -> i32 {
        self.progress.remaining_steps()
    }

    /// Returns `true` while a charger session is held.
    pub fn has_active_session(&self) -> bool {
        self.session.is_some()
    }

    /// Returns the active tuning.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Returns the step the next poll will charge for, if a sequence is active.
    pub fn current_step(&self) -> Option<StepContext> {
        match self.progress {
            SequenceProgress::Idle => None,
            SequenceProgress::TurningOn { .. } => Some(StepContext {
                direction: Direction::TurnOn,
                step: self.config.turn_on_step,
                table_index: None,
            }),
            SequenceProgress::TurningOff { remaining } => {
                let index = self.config.cycle_table.len() - usize::from(remaining);
                Some(StepContext {
                    direction: Direction::TurnOff,
                    step: self.config.cycle_table[index],
                    table_index: Some(index),
                })
            }
        }
    }

    /// Returns the pulse driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Returns a mutable handle to the pulse driver.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Returns the charger.
    pub fn charger(&self) -> &C {
        &self.charger
    }

    /// Returns a mutable handle to the charger.
    pub fn charger_mut(&mut self) -> &mut C {
        &mut self.charger
    }

    fn release_session(&mut self) {
        if let Some(session) = self.session.take() {
            self.charger.discard(session);
        }
    }
}
