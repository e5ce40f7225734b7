//! Magnet event history shared by firmware and host targets.
//!
//! Records what the controller did (accepted and ignored commands, committed
//! pulses, finished sequences, charger faults) into a fixed-size ring so the
//! console `history` command can replay recent activity.

use core::{convert::TryFrom, fmt, time::Duration};

use heapless::HistoryBuf;

use crate::charger::ChargerFlags;
use crate::controller::{CommandDisposition, Direction, PollOutcome, StepContext};
use crate::cycle::{ChargeStep, Polarity};

/// Monotonic identifier assigned to each telemetry record.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Discriminated telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    CommandAccepted(Direction),
    CommandIgnored(Direction),
    PulseFired(Polarity),
    SequenceComplete(Direction),
    ChargerFault(Direction),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::CommandAccepted(direction) => {
                write!(f, "command-accepted {direction}")
            }
            TelemetryEventKind::CommandIgnored(direction) => {
                write!(f, "command-ignored {direction}")
            }
            TelemetryEventKind::PulseFired(polarity) => write!(f, "pulse-fired {polarity}"),
            TelemetryEventKind::SequenceComplete(direction) => {
                write!(f, "sequence-complete {direction}")
            }
            TelemetryEventKind::ChargerFault(direction) => write!(f, "charger-fault {direction}"),
        }
    }
}

/// Why a command did not start a sequence.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IgnoreReason {
    Busy,
    RateLimited,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IgnoreReason::Busy => "busy",
            IgnoreReason::RateLimited => "rate-limited",
        })
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    Command(CommandTelemetry),
    Pulse(PulseTelemetry),
    Sequence(SequenceTelemetry),
    Fault(ChargerFlags),
}

/// Command disposition payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CommandTelemetry {
    /// Signed step counter the command started with; zero when ignored.
    pub steps: i32,
    pub clamped: bool,
    pub ignored: Option<IgnoreReason>,
}

/// Committed pulse payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PulseTelemetry {
    pub step: ChargeStep,
    pub table_index: Option<u8>,
    pub elapsed_since_previous: Option<Duration>,
}

/// Sequence completion summary.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SequenceTelemetry {
    pub duration: Option<Duration>,
    pub pulses: u8,
}

/// Trait implemented by monotonic instant wrappers used for telemetry tracking.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

impl TelemetryInstant for Duration {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.saturating_sub(earlier)
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records controller activity into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    last_pulse_at: Option<TInstant>,
    sequence_started_at: Option<TInstant>,
    pulses_in_sequence: usize,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            last_pulse_at: None,
            sequence_started_at: None,
            pulses_in_sequence: 0,
            next_event_id: 0,
        }
    }

    /// Returns up to `count` of the newest records, oldest first.
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &TelemetryRecord<TInstant>> {
        let skip = self.ring.len().saturating_sub(count);
        self.ring.oldest_ordered().skip(skip)
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records the result of a `turn_on`/`turn_off` request.
    pub fn record_command(
        &mut self,
        direction: Direction,
        disposition: CommandDisposition,
        timestamp: TInstant,
    ) -> EventId {
        let (event, details) = match disposition {
            CommandDisposition::Accepted { progress, clamped } => {
                self.sequence_started_at = Some(timestamp);
                self.pulses_in_sequence = 0;
                (
                    TelemetryEventKind::CommandAccepted(direction),
                    CommandTelemetry {
                        steps: progress.remaining_steps(),
                        clamped,
                        ignored: None,
                    },
                )
            }
            CommandDisposition::IgnoredBusy | CommandDisposition::IgnoredRateLimited => (
                TelemetryEventKind::CommandIgnored(direction),
                CommandTelemetry {
                    steps: 0,
                    clamped: false,
                    ignored: Some(if disposition == CommandDisposition::IgnoredBusy {
                        IgnoreReason::Busy
                    } else {
                        IgnoreReason::RateLimited
                    }),
                },
            ),
        };

        self.record(event, TelemetryPayload::Command(details), timestamp)
    }

    /// Records the interesting parts of a poll result.
    ///
    /// Charging and idle polls leave no trace. A final pulse records both the
    /// pulse and the sequence completion; the id of the last record is returned.
    pub fn record_poll(&mut self, outcome: &PollOutcome, timestamp: TInstant) -> Option<EventId> {
        match *outcome {
            PollOutcome::Idle | PollOutcome::Charging(_) => None,
            PollOutcome::Pulsed {
                context,
                sequence_complete,
            } => {
                let pulse_id = self.record_pulse(context, timestamp);
                if !sequence_complete {
                    return Some(pulse_id);
                }
                Some(self.record_sequence_completion(context.direction, timestamp))
            }
            PollOutcome::Aborted { context, flags } => {
                self.sequence_started_at = None;
                Some(self.record(
                    TelemetryEventKind::ChargerFault(context.direction),
                    TelemetryPayload::Fault(flags),
                    timestamp,
                ))
            }
        }
    }

    fn record_pulse(&mut self, context: StepContext, timestamp: TInstant) -> EventId {
        let elapsed = self
            .last_pulse_at
            .map(|previous| timestamp.saturating_duration_since(previous));
        self.last_pulse_at = Some(timestamp);
        self.pulses_in_sequence = self.pulses_in_sequence.saturating_add(1);

        let payload = TelemetryPayload::Pulse(PulseTelemetry {
            step: context.step,
            table_index: context.table_index.map(truncate_count),
            elapsed_since_previous: elapsed,
        });
        self.record(
            TelemetryEventKind::PulseFired(context.step.polarity),
            payload,
            timestamp,
        )
    }

    fn record_sequence_completion(&mut self, direction: Direction, timestamp: TInstant) -> EventId {
        let duration = self
            .sequence_started_at
            .take()
            .map(|start| timestamp.saturating_duration_since(start));
        let payload = TelemetryPayload::Sequence(SequenceTelemetry {
            duration,
            pulses: truncate_count(self.pulses_in_sequence),
        });
        self.pulses_in_sequence = 0;

        self.record(
            TelemetryEventKind::SequenceComplete(direction),
            payload,
            timestamp,
        )
    }

    fn record(
        &mut self,
        event: TelemetryEventKind,
        details: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details,
        });

        id
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_count(count: usize) -> u8 {
    u8::try_from(count).unwrap_or(u8::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::SequenceProgress;

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
    struct MicrosInstant(u64);

    impl TelemetryInstant for MicrosInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_micros(self.0.saturating_sub(earlier.0))
        }
    }

    fn latest<const N: usize>(
        recorder: &TelemetryRecorder<MicrosInstant, N>,
    ) -> &TelemetryRecord<MicrosInstant> {
        recorder.recent(1).next().expect("recorder is empty")
    }

    fn turn_off_context(index: usize, step: ChargeStep) -> StepContext {
        StepContext {
            direction: Direction::TurnOff,
            step,
            table_index: Some(index),
        }
    }

    #[test]
    fn ignored_commands_carry_reason() {
        let mut recorder = TelemetryRecorder::<MicrosInstant>::new();
        recorder.record_command(
            Direction::TurnOff,
            CommandDisposition::IgnoredRateLimited,
            MicrosInstant(10),
        );

        let record = *latest(&recorder);
        assert_eq!(
            record.event,
            TelemetryEventKind::CommandIgnored(Direction::TurnOff)
        );
        match record.details {
            TelemetryPayload::Command(details) => {
                assert_eq!(details.ignored, Some(IgnoreReason::RateLimited));
                assert_eq!(details.steps, 0);
            }
            _ => panic!("expected command payload"),
        }
    }

    #[test]
    fn sequence_completion_summarises_pulses() {
        let mut recorder = TelemetryRecorder::<MicrosInstant>::new();
        recorder.record_command(
            Direction::TurnOff,
            CommandDisposition::Accepted {
                progress: SequenceProgress::TurningOff { remaining: 2 },
                clamped: false,
            },
            MicrosInstant(100),
        );

        let first = PollOutcome::Pulsed {
            context: turn_off_context(40, ChargeStep::positive(10)),
            sequence_complete: false,
        };
        let last = PollOutcome::Pulsed {
            context: turn_off_context(41, ChargeStep::negative(10)),
            sequence_complete: true,
        };

        assert_eq!(recorder.record_poll(&first, MicrosInstant(400)), Some(1));
        assert_eq!(recorder.record_poll(&last, MicrosInstant(900)), Some(3));
        assert_eq!(recorder.len(), 4);

        let pulse = *recorder.recent(2).next().unwrap();
        match pulse.details {
            TelemetryPayload::Pulse(details) => {
                assert_eq!(details.table_index, Some(41));
                let elapsed = details.elapsed_since_previous.expect("missing elapsed");
                assert_eq!(elapsed.as_micros(), 500);
            }
            _ => panic!("expected pulse payload"),
        }

        let summary = *latest(&recorder);
        match summary.details {
            TelemetryPayload::Sequence(details) => {
                assert_eq!(details.pulses, 2);
                assert_eq!(details.duration, Some(Duration::from_micros(800)));
            }
            _ => panic!("expected sequence payload"),
        }
    }

    #[test]
    fn charging_polls_leave_no_record() {
        let mut recorder = TelemetryRecorder::<MicrosInstant>::new();
        let outcome = PollOutcome::Charging(turn_off_context(3, ChargeStep::negative(180)));

        assert_eq!(recorder.record_poll(&outcome, MicrosInstant(5)), None);
        assert_eq!(recorder.record_poll(&PollOutcome::Idle, MicrosInstant(6)), None);
        assert!(recorder.is_empty());
    }

    #[test]
    fn aborted_sequence_records_fault_flags() {
        let mut recorder = TelemetryRecorder::<MicrosInstant>::new();
        let outcome = PollOutcome::Aborted {
            context: turn_off_context(0, ChargeStep::negative(450)),
            flags: ChargerFlags::TIMEOUT,
        };

        recorder.record_poll(&outcome, MicrosInstant(50));
        let record = *latest(&recorder);
        assert_eq!(
            record.event,
            TelemetryEventKind::ChargerFault(Direction::TurnOff)
        );
        assert_eq!(
            record.details,
            TelemetryPayload::Fault(ChargerFlags::TIMEOUT)
        );
    }

    #[test]
    fn ring_keeps_only_the_newest_records() {
        let mut recorder = TelemetryRecorder::<MicrosInstant, 4>::new();
        for tick in 0..6 {
            recorder.record_command(
                Direction::TurnOn,
                CommandDisposition::IgnoredBusy,
                MicrosInstant(tick),
            );
        }

        assert_eq!(recorder.len(), 4);
        let ids: heapless::Vec<EventId, 4> = recorder.recent(8).map(|record| record.id).collect();
        assert_eq!(ids.as_slice(), &[2, 3, 4, 5]);

        let newest: heapless::Vec<EventId, 4> =
            recorder.recent(2).map(|record| record.id).collect();
        assert_eq!(newest.as_slice(), &[4, 5]);
    }
}
