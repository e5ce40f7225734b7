//! Console command dispatcher.
//!
//! Parsed commands that move the magnet go through the same
//! [`MagnetCommand`] path as the remote bus, the PWM input and the button, so
//! the console exercises exactly what the firmware does. Commands that depend
//! on the host (`wait`, `fault`, `help`) are handed back to the front-end as
//! outcomes.

use core::fmt;
use core::time::Duration;

use crate::charger::Charger;
use crate::controller::{CommandDisposition, MagnetController, PulseDriver};
use crate::hardpoint::{
    ButtonToggle, CommandSource, HardpointCommand, HardpointId, HardpointRouter, MagnetCommand,
    PwmInput,
};

use super::catalog::{self, CommandSpec};
use super::grammar::{self, Command, FaultCommand};
use super::status::StatusSnapshot;

/// Events listed by a bare `history`.
pub const DEFAULT_HISTORY_LEN: usize = 8;

/// Command execution successes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    /// A magnet command reached the controller.
    Magnet {
        source: CommandSource,
        command: MagnetCommand,
        disposition: CommandDisposition,
    },
    /// A remote command addressed another hardpoint.
    NotAddressed { hardpoint_id: HardpointId },
    /// Input produced no new command, or a repeated one was still turned away.
    NoChange,
    Status(StatusSnapshot),
    /// Number of recent telemetry events to show.
    History(usize),
    Wait(Duration),
    Fault(FaultCommand),
    /// `None` lists every command.
    Help(Option<&'static CommandSpec>),
}

/// Errors surfaced while executing a command.
#[derive(Debug, PartialEq, Eq)]
pub enum CommandError<'a> {
    Parse(grammar::ParseError<'a>),
    UnknownTopic(&'a str),
}

impl<'a> From<grammar::ParseError<'a>> for CommandError<'a> {
    fn from(error: grammar::ParseError<'a>) -> Self {
        Self::Parse(error)
    }
}

impl fmt::Display for CommandError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Parse(error) => error.fmt(f),
            CommandError::UnknownTopic(topic) => write!(f, "no help for `{topic}`"),
        }
    }
}

/// Routes console lines and local inputs into a [`MagnetController`].
#[derive(Copy, Clone, Debug)]
pub struct CommandExecutor {
    router: HardpointRouter,
    pwm: PwmInput,
    button: ButtonToggle,
    on_repetitions: u16,
}

impl CommandExecutor {
    /// Creates an executor for `hardpoint_id`.
    ///
    /// `on_repetitions` is used by inputs that carry no count (PWM, button, bare `on`).
    #[must_use]
    pub const fn new(hardpoint_id: HardpointId, on_repetitions: u16) -> Self {
        Self {
            router: HardpointRouter::new(hardpoint_id),
            pwm: PwmInput::new(on_repetitions),
            button: ButtonToggle::new(on_repetitions),
            on_repetitions,
        }
    }

    #[must_use]
    pub const fn hardpoint_id(&self) -> HardpointId {
        self.router.local_id()
    }

    /// Parses and executes a console line.
    pub fn execute<'a, C, D>(
        &mut self,
        line: &'a str,
        controller: &mut MagnetController<C, D>,
    ) -> Result<CommandOutcome, CommandError<'a>>
    where
        C: Charger,
        D: PulseDriver,
    {
        let command = grammar::parse(line)?;
        self.dispatch(command, controller)
    }

    fn dispatch<'a, C, D>(
        &mut self,
        command: Command<'a>,
        controller: &mut MagnetController<C, D>,
    ) -> Result<CommandOutcome, CommandError<'a>>
    where
        C: Charger,
        D: PulseDriver,
    {
        let outcome = match command {
            Command::On(on) => deliver(
                CommandSource::Console,
                MagnetCommand::TurnOn(on.repetitions.unwrap_or(self.on_repetitions)),
                controller,
            ),
            Command::Off => deliver(CommandSource::Console, MagnetCommand::TurnOff, controller),
            Command::Hardpoint(message) => self.remote(message, controller),
            Command::Pwm(width_us) => self.pwm_width(width_us, controller),
            Command::Button => self.button_press(controller),
            Command::Status => {
                CommandOutcome::Status(StatusSnapshot::capture(self.hardpoint_id(), controller))
            }
            Command::History(count) => {
                CommandOutcome::History(count.map_or(DEFAULT_HISTORY_LEN, usize::from))
            }
            Command::Wait(duration) => CommandOutcome::Wait(duration),
            Command::Fault(fault) => CommandOutcome::Fault(fault),
            Command::Help(help) => match help.topic {
                None => CommandOutcome::Help(None),
                Some(topic) => match catalog::find(topic) {
                    Some(spec) => CommandOutcome::Help(Some(spec)),
                    None => return Err(CommandError::UnknownTopic(topic)),
                },
            },
        };

        Ok(outcome)
    }

    /// Handles a command received over the remote bus.
    pub fn remote<C, D>(
        &mut self,
        message: HardpointCommand,
        controller: &mut MagnetController<C, D>,
    ) -> CommandOutcome
    where
        C: Charger,
        D: PulseDriver,
    {
        match self.router.route(message) {
            Some(command) => deliver(CommandSource::Remote, command, controller),
            None => CommandOutcome::NotAddressed {
                hardpoint_id: message.hardpoint_id,
            },
        }
    }

    /// Feeds one measured RC pulse width.
    ///
    /// A band change the controller turns away is offered again with each
    /// following width; those repeats report [`CommandOutcome::NoChange`]
    /// until one is accepted.
    pub fn pwm_width<C, D>(
        &mut self,
        width_us: u16,
        controller: &mut MagnetController<C, D>,
    ) -> CommandOutcome
    where
        C: Charger,
        D: PulseDriver,
    {
        let Some(request) = self.pwm.update(width_us) else {
            return CommandOutcome::NoChange;
        };

        let outcome = deliver(CommandSource::Pwm, request.command, controller);
        match outcome {
            CommandOutcome::Magnet { disposition, .. } if disposition.is_accepted() => {
                self.pwm.accepted();
                outcome
            }
            _ if request.retry => CommandOutcome::NoChange,
            _ => outcome,
        }
    }

    pub fn button_press<C, D>(&mut self, controller: &mut MagnetController<C, D>) -> CommandOutcome
    where
        C: Charger,
        D: PulseDriver,
    {
        let command = self.button.press(controller.is_turned_on());
        deliver(CommandSource::Button, command, controller)
    }
}

/// Applies `command` and reports what the controller did with it.
pub fn deliver<C, D>(
    source: CommandSource,
    command: MagnetCommand,
    controller: &mut MagnetController<C, D>,
) -> CommandOutcome
where
    C: Charger,
    D: PulseDriver,
{
    CommandOutcome::Magnet {
        source,
        command,
        disposition: command.apply(controller),
    }
}

/// Writes the help listing, or the usage of one command.
pub fn write_help<W: fmt::Write>(writer: &mut W, topic: Option<&CommandSpec>) -> fmt::Result {
    match topic {
        Some(spec) => write!(writer, "{}\n  {}", spec.usage, spec.summary),
        None => {
            writer.write_str("commands:")?;
            for spec in catalog::commands() {
                write!(writer, "\n  {:<28} {}", spec.usage, spec.summary)?;
            }
            Ok(())
        }
    }
}
