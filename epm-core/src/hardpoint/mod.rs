//! Command sources and status reporting around the magnet controller.
//!
//! The magnet can be driven from three places: a remote hardpoint command
//! addressed by id, an RC pulse-width input, and a local push button. Each
//! source is reduced to a [`MagnetCommand`] here so the firmware loop and the
//! emulator apply them the same way. The other half of the module builds the
//! periodic status reports that go back out.

use core::{fmt, ops::Add, ops::RangeInclusive, time::Duration};

use crate::charger::Charger;
use crate::controller::{
    CommandDisposition, Direction, Health, MagnetController, PulseDriver, StatusFlags,
};
use crate::telemetry::TelemetryInstant;

/// Address of this hardpoint on the remote command bus.
pub type HardpointId = u8;

/// Pulse widths that request the magnet off (microseconds, inclusive).
pub const PWM_OFF_BAND_US: RangeInclusive<u16> = 1_000..=1_250;
/// Pulse widths that request the magnet on (microseconds, inclusive).
pub const PWM_ON_BAND_US: RangeInclusive<u16> = 1_750..=2_000;

/// Interval between status publications.
pub const STATUS_PERIOD: Duration = Duration::from_millis(500);

/// Where a command came from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandSource {
    Remote,
    Pwm,
    Button,
    Console,
}

impl fmt::Display for CommandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommandSource::Remote => "remote",
            CommandSource::Pwm => "pwm",
            CommandSource::Button => "button",
            CommandSource::Console => "console",
        })
    }
}

/// Request to move the magnet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MagnetCommand {
    TurnOn(u16),
    TurnOff,
}

impl MagnetCommand {
    /// Maps a remote hardpoint command word: zero releases, anything else engages.
    #[must_use]
    pub const fn from_hardpoint_word(command: u16) -> Self {
        match command {
            0 => MagnetCommand::TurnOff,
            repetitions => MagnetCommand::TurnOn(repetitions),
        }
    }

    #[must_use]
    pub const fn direction(self) -> Direction {
        match self {
            MagnetCommand::TurnOn(_) => Direction::TurnOn,
            MagnetCommand::TurnOff => Direction::TurnOff,
        }
    }

    /// Hands the command to the controller.
    pub fn apply<C, D>(self, controller: &mut MagnetController<C, D>) -> CommandDisposition
    where
        C: Charger,
        D: PulseDriver,
    {
        match self {
            MagnetCommand::TurnOn(repetitions) => controller.turn_on(repetitions),
            MagnetCommand::TurnOff => controller.turn_off(),
        }
    }
}

impl fmt::Display for MagnetCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MagnetCommand::TurnOn(repetitions) => write!(f, "on x{repetitions}"),
            MagnetCommand::TurnOff => f.write_str("off"),
        }
    }
}

/// Command received over the remote bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HardpointCommand {
    pub hardpoint_id: HardpointId,
    pub command: u16,
}

/// Filters remote commands down to the ones addressed to this hardpoint.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HardpointRouter {
    local_id: HardpointId,
}

impl HardpointRouter {
    #[must_use]
    pub const fn new(local_id: HardpointId) -> Self {
        Self { local_id }
    }

    #[must_use]
    pub const fn local_id(&self) -> HardpointId {
        self.local_id
    }

    /// Returns the magnet command for `message`, or `None` when it targets another hardpoint.
    #[must_use]
    pub const fn route(&self, message: HardpointCommand) -> Option<MagnetCommand> {
        if message.hardpoint_id != self.local_id {
            return None;
        }
        Some(MagnetCommand::from_hardpoint_word(message.command))
    }
}

/// Hardpoint id read from the board once and reused afterwards.
#[derive(Copy, Clone, Debug, Default)]
pub struct CachedHardpointId {
    cached: Option<HardpointId>,
}

impl CachedHardpointId {
    #[must_use]
    pub const fn new() -> Self {
        Self { cached: None }
    }

    /// Returns the cached id, calling `read` only the first time.
    pub fn get_or_read(&mut self, read: impl FnOnce() -> HardpointId) -> HardpointId {
        *self.cached.get_or_insert_with(read)
    }
}

/// Band an RC pulse width falls into.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PwmBand {
    Off,
    Neutral,
    On,
}

impl PwmBand {
    #[must_use]
    pub fn classify(width_us: u16) -> Self {
        if PWM_OFF_BAND_US.contains(&width_us) {
            PwmBand::Off
        } else if PWM_ON_BAND_US.contains(&width_us) {
            PwmBand::On
        } else {
            PwmBand::Neutral
        }
    }
}

/// Command requested by the RC input.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PwmRequest {
    pub command: MagnetCommand,
    /// `true` when this command was already offered and not yet accepted.
    pub retry: bool,
}

/// Edge detector over RC pulse widths.
///
/// The first width only arms the detector. Moving into the on or off band
/// raises a request that is offered on every following width until
/// [`PwmInput::accepted`] is called, the stick goes neutral, or it changes band.
#[derive(Copy, Clone, Debug)]
pub struct PwmInput {
    last: Option<PwmBand>,
    pending: Option<MagnetCommand>,
    offered: bool,
    on_repetitions: u16,
}

impl PwmInput {
    #[must_use]
    pub const fn new(on_repetitions: u16) -> Self {
        Self {
            last: None,
            pending: None,
            offered: false,
            on_repetitions,
        }
    }

    /// Feeds one measured pulse width.
    pub fn update(&mut self, width_us: u16) -> Option<PwmRequest> {
        let band = PwmBand::classify(width_us);
        let previous = self.last.replace(band);

        match previous {
            None => return None,
            Some(previous) if previous != band => {
                self.offered = false;
                self.pending = match band {
                    PwmBand::On => Some(MagnetCommand::TurnOn(self.on_repetitions)),
                    PwmBand::Off => Some(MagnetCommand::TurnOff),
                    PwmBand::Neutral => None,
                };
            }
            Some(_) => {}
        }

        let command = self.pending?;
        let retry = core::mem::replace(&mut self.offered, true);
        Some(PwmRequest { command, retry })
    }

    /// Drops the pending request once the controller has taken it.
    pub fn accepted(&mut self) {
        self.pending = None;
        self.offered = false;
    }
}

/// Push button that toggles the magnet.
#[derive(Copy, Clone, Debug)]
pub struct ButtonToggle {
    on_repetitions: u16,
}

impl ButtonToggle {
    #[must_use]
    pub const fn new(on_repetitions: u16) -> Self {
        Self { on_repetitions }
    }

    /// Command for a press given the current magnet state.
    #[must_use]
    pub const fn press(&self, magnet_on: bool) -> MagnetCommand {
        if magnet_on {
            MagnetCommand::TurnOff
        } else {
            MagnetCommand::TurnOn(self.on_repetitions)
        }
    }
}

/// Hardpoint status message.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HardpointStatus {
    pub hardpoint_id: HardpointId,
    /// `1` while the magnet is on, `0` otherwise.
    pub status: u16,
    pub flags: StatusFlags,
}

impl HardpointStatus {
    pub fn capture<C, D>(hardpoint_id: HardpointId, controller: &MagnetController<C, D>) -> Self
    where
        C: Charger,
        D: PulseDriver,
    {
        Self {
            hardpoint_id,
            status: u16::from(controller.is_turned_on()),
            flags: controller.status_flags(),
        }
    }
}

/// Node health message.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NodeHealthReport {
    pub health: Health,
    pub uptime_sec: u32,
}

/// Everything published on one status tick.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StatusReport {
    pub hardpoint: HardpointStatus,
    pub node: NodeHealthReport,
}

/// Emits a [`StatusReport`] once per period.
pub struct StatusPublisher<Instant> {
    booted_at: Instant,
    next_due: Instant,
    period: Duration,
}

impl<Instant> StatusPublisher<Instant>
where
    Instant: TelemetryInstant + Ord + Add<Duration, Output = Instant>,
{
    /// Creates a publisher whose first report is due one period after `booted_at`.
    pub fn new(booted_at: Instant, period: Duration) -> Self {
        Self {
            booted_at,
            next_due: booted_at + period,
            period,
        }
    }

    /// Builds a report when the period has elapsed, otherwise returns `None`.
    ///
    /// Missed periods are not replayed; the next deadline is one period past `now`.
    pub fn poll<C, D>(
        &mut self,
        now: Instant,
        hardpoint_id: HardpointId,
        controller: &MagnetController<C, D>,
    ) -> Option<StatusReport>
    where
        C: Charger,
        D: PulseDriver,
    {
        if now < self.next_due {
            return None;
        }
        self.next_due = now + self.period;

        let uptime = now.saturating_duration_since(self.booted_at);
        Some(StatusReport {
            hardpoint: HardpointStatus::capture(hardpoint_id, controller),
            node: NodeHealthReport {
                health: controller.health(),
                uptime_sec: u32::try_from(uptime.as_secs()).unwrap_or(u32::MAX),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charger::NoopCharger;
    use crate::controller::{NoopPulseDriver, PollOutcome};

    fn controller() -> MagnetController<NoopCharger, NoopPulseDriver> {
        MagnetController::new(NoopCharger::new(), NoopPulseDriver::new())
    }

    #[test]
    fn hardpoint_word_zero_releases() {
        assert_eq!(MagnetCommand::from_hardpoint_word(0), MagnetCommand::TurnOff);
        assert_eq!(
            MagnetCommand::from_hardpoint_word(7),
            MagnetCommand::TurnOn(7)
        );
    }

    #[test]
    fn router_ignores_other_hardpoints() {
        let router = HardpointRouter::new(3);
        let foreign = HardpointCommand {
            hardpoint_id: 4,
            command: 1,
        };
        let local = HardpointCommand {
            hardpoint_id: 3,
            command: 0,
        };

        assert_eq!(router.route(foreign), None);
        assert_eq!(router.route(local), Some(MagnetCommand::TurnOff));
    }

    #[test]
    fn hardpoint_id_is_read_once() {
        let mut reads = 0;
        let mut id = CachedHardpointId::new();

        for _ in 0..3 {
            let value = id.get_or_read(|| {
                reads += 1;
                9
            });
            assert_eq!(value, 9);
        }
        assert_eq!(reads, 1);
    }

    #[test]
    fn pwm_bands_cover_the_documented_edges() {
        assert_eq!(PwmBand::classify(999), PwmBand::Neutral);
        assert_eq!(PwmBand::classify(1_000), PwmBand::Off);
        assert_eq!(PwmBand::classify(1_250), PwmBand::Off);
        assert_eq!(PwmBand::classify(1_500), PwmBand::Neutral);
        assert_eq!(PwmBand::classify(1_750), PwmBand::On);
        assert_eq!(PwmBand::classify(2_000), PwmBand::On);
        assert_eq!(PwmBand::classify(2_001), PwmBand::Neutral);
    }

    fn request(command: MagnetCommand, retry: bool) -> Option<PwmRequest> {
        Some(PwmRequest { command, retry })
    }

    #[test]
    fn pwm_emits_on_band_changes() {
        let mut input = PwmInput::new(2);

        assert_eq!(input.update(1_100), None, "first reading only arms");
        assert_eq!(input.update(1_120), None);
        assert_eq!(
            input.update(1_900),
            request(MagnetCommand::TurnOn(2), false)
        );
        input.accepted();
        assert_eq!(input.update(1_950), None);
        assert_eq!(input.update(1_500), None);
        assert_eq!(input.update(1_200), request(MagnetCommand::TurnOff, false));
    }

    #[test]
    fn pwm_request_repeats_until_accepted() {
        let mut input = PwmInput::new(2);
        input.update(1_100);

        assert_eq!(
            input.update(1_900),
            request(MagnetCommand::TurnOn(2), false)
        );
        assert_eq!(input.update(1_900), request(MagnetCommand::TurnOn(2), true));
        assert_eq!(input.update(1_880), request(MagnetCommand::TurnOn(2), true));

        input.accepted();
        assert_eq!(input.update(1_900), None);
    }

    #[test]
    fn pwm_request_is_dropped_when_the_stick_moves() {
        let mut input = PwmInput::new(2);
        input.update(1_100);
        input.update(1_900);

        assert_eq!(input.update(1_500), None, "neutral cancels the request");
        assert_eq!(input.update(1_500), None);
        assert_eq!(input.update(1_150), request(MagnetCommand::TurnOff, false));
    }

    #[test]
    fn button_toggles_against_magnet_state() {
        let button = ButtonToggle::new(2);
        assert_eq!(button.press(false), MagnetCommand::TurnOn(2));
        assert_eq!(button.press(true), MagnetCommand::TurnOff);
    }

    #[test]
    fn publisher_reports_once_per_period() {
        let mut controller = controller();
        let mut publisher = StatusPublisher::new(Duration::ZERO, STATUS_PERIOD);

        assert!(
            publisher
                .poll(Duration::from_millis(499), 5, &controller)
                .is_none()
        );

        assert!(MagnetCommand::TurnOn(2).apply(&mut controller).is_accepted());
        while controller.poll() != PollOutcome::Idle {}

        let report = publisher
            .poll(Duration::from_millis(2_500), 5, &controller)
            .expect("report should be due");
        assert_eq!(report.hardpoint.hardpoint_id, 5);
        assert_eq!(report.hardpoint.status, 1);
        assert!(report.hardpoint.flags.is_empty());
        assert_eq!(report.node.health, Health::Ok);
        assert_eq!(report.node.uptime_sec, 2);

        assert!(
            publisher
                .poll(Duration::from_millis(2_999), 5, &controller)
                .is_none()
        );
        assert!(
            publisher
                .poll(Duration::from_millis(3_000), 5, &controller)
                .is_some()
        );
    }
}
