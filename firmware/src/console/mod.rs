//! Serial console framing and replies.
//!
//! Bytes from the UART are assembled into lines, executed by the control loop
//! and answered with the same vocabulary the emulator prints.

use core::fmt::{self, Write};

use epm_core::controller::CommandDisposition;
use epm_core::repl::commands::{CommandError, CommandOutcome, write_help};
use epm_core::repl::status::{StatusFormatter, write_history};
use epm_core::telemetry::{TelemetryInstant, TelemetryRecorder};
use heapless::String;

/// Longest accepted console line.
pub const LINE_CAPACITY: usize = 64;
/// Largest reply, sized for the help listing.
pub const REPLY_CAPACITY: usize = 1024;

pub type ConsoleLine = String<LINE_CAPACITY>;
pub type ConsoleReply = String<REPLY_CAPACITY>;

/// Result of feeding one byte to a [`LineAssembler`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Assembled {
    Line(ConsoleLine),
    /// The line outgrew [`LINE_CAPACITY`] and was dropped.
    Overflow,
}

/// Collects printable bytes until a line terminator.
#[derive(Default)]
pub struct LineAssembler {
    line: ConsoleLine,
    overflowed: bool,
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self {
            line: String::new(),
            overflowed: false,
        }
    }

    pub fn push(&mut self, byte: u8) -> Option<Assembled> {
        match byte {
            b'\r' | b'\n' => self.finish(),
            0x08 | 0x7f => {
                self.line.pop();
                None
            }
            0x20..=0x7e => {
                if self.line.push(char::from(byte)).is_err() {
                    self.overflowed = true;
                }
                None
            }
            _ => None,
        }
    }

    fn finish(&mut self) -> Option<Assembled> {
        let line = core::mem::take(&mut self.line);
        if core::mem::take(&mut self.overflowed) {
            return Some(Assembled::Overflow);
        }
        if line.trim().is_empty() {
            None
        } else {
            Some(Assembled::Line(line))
        }
    }
}

/// Renders a command outcome as one or more `\n`-separated lines.
///
/// `history` reads from `telemetry`, aged against `now`.
pub fn render<W, I>(
    writer: &mut W,
    outcome: &CommandOutcome,
    telemetry: &TelemetryRecorder<I>,
    now: I,
) -> fmt::Result
where
    W: Write,
    I: TelemetryInstant,
{
    match *outcome {
        CommandOutcome::Magnet {
            source,
            command,
            disposition,
        } => match disposition {
            CommandDisposition::Accepted { progress, clamped } => write!(
                writer,
                "OK {source} {command} steps={}{}",
                progress.remaining_steps(),
                if clamped { " (clamped)" } else { "" }
            ),
            CommandDisposition::IgnoredBusy => write!(writer, "IGNORED {source} {command} busy"),
            CommandDisposition::IgnoredRateLimited => {
                write!(writer, "IGNORED {source} {command} rate-limited")
            }
        },
        CommandOutcome::NotAddressed { hardpoint_id } => {
            write!(writer, "IGNORED remote hardpoint={hardpoint_id}")
        }
        CommandOutcome::NoChange => writer.write_str("OK no change"),
        CommandOutcome::Status(ref snapshot) => {
            let formatter = StatusFormatter::new(snapshot);
            formatter.write_magnet_line(writer)?;
            writer.write_char('\n')?;
            formatter.write_flags_line(writer)?;
            writer.write_char('\n')?;
            formatter.write_step_line(writer)
        }
        CommandOutcome::History(count) => write_history(writer, telemetry, count, now),
        CommandOutcome::Wait(_) => writer.write_str("ERR wait is only available in the emulator"),
        CommandOutcome::Fault(_) => {
            writer.write_str("ERR fault injection is only available in the emulator")
        }
        CommandOutcome::Help(topic) => write_help(writer, topic),
    }
}

pub fn render_error<W: Write>(writer: &mut W, error: &CommandError<'_>) -> fmt::Result {
    match error {
        CommandError::Parse(parse) => write!(writer, "ERR syntax {parse}"),
        CommandError::UnknownTopic(_) => write!(writer, "ERR {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epm_core::charger::NoopCharger;
    use epm_core::controller::{MagnetController, NoopPulseDriver};
    use epm_core::repl::commands::CommandExecutor;

    use core::time::Duration;

    fn render_plain(reply: &mut ConsoleReply, outcome: &CommandOutcome) {
        render(reply, outcome, &TelemetryRecorder::<Duration>::new(), Duration::ZERO).unwrap();
    }

    fn feed(assembler: &mut LineAssembler, bytes: &[u8]) -> Option<Assembled> {
        let mut last = None;
        for &byte in bytes {
            if let Some(event) = assembler.push(byte) {
                last = Some(event);
            }
        }
        last
    }

    #[test]
    fn assembles_lines_and_handles_backspace() {
        let mut assembler = LineAssembler::new();
        let event = feed(&mut assembler, b"onx\x08 3\r\n");
        match event {
            Some(Assembled::Line(line)) => assert_eq!(line.as_str(), "on 3"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(feed(&mut assembler, b"\r\n"), None);
    }

    #[test]
    fn overlong_lines_are_dropped() {
        let mut assembler = LineAssembler::new();
        let long = [b'a'; LINE_CAPACITY + 4];
        assert_eq!(feed(&mut assembler, &long), None);
        assert_eq!(assembler.push(b'\n'), Some(Assembled::Overflow));

        match feed(&mut assembler, b"off\n") {
            Some(Assembled::Line(line)) => assert_eq!(line.as_str(), "off"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn renders_outcomes_in_console_vocabulary() {
        let mut executor = CommandExecutor::new(2, 2);
        let mut controller = MagnetController::new(NoopCharger::new(), NoopPulseDriver::new());
        let mut reply = ConsoleReply::new();

        let outcome = executor.execute("on 12", &mut controller).unwrap();
        render_plain(&mut reply, &outcome);
        assert_eq!(reply.as_str(), "OK console on x12 steps=10 (clamped)");

        reply.clear();
        let outcome = executor.execute("hardpoint 9 0", &mut controller).unwrap();
        render_plain(&mut reply, &outcome);
        assert_eq!(reply.as_str(), "IGNORED remote hardpoint=9");

        reply.clear();
        let outcome = executor.execute("status", &mut controller).unwrap();
        render_plain(&mut reply, &outcome);
        assert_eq!(reply.lines().count(), 3);
        assert!(reply.starts_with("magnet hardpoint=2 on=false"));
    }

    #[test]
    fn help_fits_in_a_reply() {
        let mut reply = ConsoleReply::new();
        render_plain(&mut reply, &CommandOutcome::Help(None));
        assert!(reply.starts_with("commands:"));
    }

    #[test]
    fn history_fits_in_a_reply() {
        use epm_core::controller::Direction;
        use epm_core::repl::catalog::HISTORY_MAX;

        let mut telemetry = TelemetryRecorder::<Duration>::new();
        for tick in 0..u64::from(HISTORY_MAX) {
            telemetry.record_command(
                Direction::TurnOff,
                CommandDisposition::IgnoredRateLimited,
                Duration::from_secs(tick * 1_000_000),
            );
        }

        let mut reply = ConsoleReply::new();
        let outcome = CommandOutcome::History(usize::from(HISTORY_MAX));
        render(&mut reply, &outcome, &telemetry, Duration::from_secs(u64::from(u32::MAX)))
            .expect("history should fit");
        assert_eq!(reply.lines().count(), usize::from(HISTORY_MAX));
    }

    #[test]
    fn renders_errors() {
        let mut executor = CommandExecutor::new(1, 2);
        let mut controller = MagnetController::new(NoopCharger::new(), NoopPulseDriver::new());
        let mut reply = ConsoleReply::new();

        let error = executor.execute("help bogus", &mut controller).unwrap_err();
        render_error(&mut reply, &error).unwrap();
        assert_eq!(reply.as_str(), "ERR no help for `bogus`");
    }
}
