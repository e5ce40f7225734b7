use std::fmt::{self, Write as _};
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use epm_core::controller::{
    CommandDisposition, Health, MagnetController, PollOutcome, PulseDriver, StepContext,
};
use epm_core::hardpoint::{STATUS_PERIOD, StatusPublisher, StatusReport};
use epm_core::repl::commands::{CommandError, CommandExecutor, CommandOutcome, write_help};
use epm_core::repl::grammar::FaultCommand;
use epm_core::repl::status::{
    StatusFormatter, StatusSnapshot, write_charger_flags, write_history,
};
use epm_core::telemetry::TelemetryRecorder;

use crate::sim::{HostPulseDriver, SimulatedCharger, VirtualInstant};

/// Virtual time that passes between two controller polls.
pub const TICK: Duration = Duration::from_millis(1);

/// Default capacitor ramp in volts per poll.
pub const DEFAULT_CHARGE_RATE: u32 = 25;

/// Emulator start-up options.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub transcript: Option<PathBuf>,
    pub charge_rate: u32,
    pub hardpoint_id: u8,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            transcript: None,
            charge_rate: DEFAULT_CHARGE_RATE,
            hardpoint_id: 1,
        }
    }
}

/// How a response line should be highlighted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Tone {
    Plain,
    Good,
    Warn,
    Bad,
}

impl From<Health> for Tone {
    fn from(health: Health) -> Self {
        match health {
            Health::Ok => Tone::Good,
            Health::Warning => Tone::Warn,
            Health::Error => Tone::Bad,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Response {
    pub tone: Tone,
    pub text: String,
}

impl Response {
    fn plain(text: impl Into<String>) -> Self {
        Self::toned(Tone::Plain, text)
    }

    fn toned(tone: Tone, text: impl Into<String>) -> Self {
        Self {
            tone,
            text: text.into(),
        }
    }
}

type SimController = MagnetController<SimulatedCharger, HostPulseDriver>;

pub struct Session {
    controller: SimController,
    executor: CommandExecutor,
    telemetry: TelemetryRecorder<VirtualInstant>,
    publisher: StatusPublisher<VirtualInstant>,
    transcript: Option<TranscriptLogger>,
}

impl Session {
    pub fn new(options: &SessionOptions) -> io::Result<Self> {
        let transcript = options
            .transcript
            .as_deref()
            .map(TranscriptLogger::new)
            .transpose()?;

        let controller = MagnetController::new(
            SimulatedCharger::new(options.charge_rate),
            HostPulseDriver::default(),
        );
        let on_repetitions = controller.config().min_turn_on_cycles;
        let publisher = StatusPublisher::new(controller.driver().now(), STATUS_PERIOD);

        Ok(Self {
            controller,
            executor: CommandExecutor::new(options.hardpoint_id, on_repetitions),
            telemetry: TelemetryRecorder::new(),
            publisher,
            transcript,
        })
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<Response>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        self.log(TranscriptRole::Host, trimmed)?;

        let responses = match self.executor.execute(trimmed, &mut self.controller) {
            Ok(outcome) => self.render_outcome(outcome).map_err(io::Error::other)?,
            Err(CommandError::Parse(err)) => {
                vec![Response::toned(Tone::Bad, format!("ERR syntax {err}"))]
            }
            Err(err @ CommandError::UnknownTopic(_)) => {
                vec![Response::toned(Tone::Bad, format!("ERR {err}"))]
            }
        };

        for response in &responses {
            self.log(TranscriptRole::Emulator, &response.text)?;
        }
        Ok(responses)
    }

    pub fn controller(&self) -> &SimController {
        &self.controller
    }

    pub fn telemetry(&self) -> &TelemetryRecorder<VirtualInstant> {
        &self.telemetry
    }

    fn now(&self) -> VirtualInstant {
        self.controller.driver().now()
    }

    fn render_outcome(&mut self, outcome: CommandOutcome) -> Result<Vec<Response>, fmt::Error> {
        let responses = match outcome {
            CommandOutcome::Magnet {
                source,
                command,
                disposition,
            } => {
                self.telemetry
                    .record_command(command.direction(), disposition, self.now());
                let response = match disposition {
                    CommandDisposition::Accepted { progress, clamped } => Response::toned(
                        Tone::Good,
                        format!(
                            "OK {source} {command} steps={}{}",
                            progress.remaining_steps(),
                            if clamped { " (clamped)" } else { "" }
                        ),
                    ),
                    CommandDisposition::IgnoredBusy => Response::toned(
                        Tone::Warn,
                        format!("IGNORED {source} {command} busy"),
                    ),
                    CommandDisposition::IgnoredRateLimited => Response::toned(
                        Tone::Warn,
                        format!("IGNORED {source} {command} rate-limited"),
                    ),
                };
                vec![response]
            }
            CommandOutcome::NotAddressed { hardpoint_id } => vec![Response::toned(
                Tone::Warn,
                format!(
                    "IGNORED remote hardpoint={hardpoint_id} local={}",
                    self.executor.hardpoint_id()
                ),
            )],
            CommandOutcome::NoChange => vec![Response::plain("OK no change")],
            CommandOutcome::Status(snapshot) => self.render_status(&snapshot)?,
            CommandOutcome::Wait(duration) => self.advance(duration)?,
            CommandOutcome::Fault(FaultCommand::Inject(flags)) => {
                self.controller.charger_mut().inject_fault(flags);
                let mut text = String::from("OK next charge fails with ");
                write_charger_flags(&mut text, flags)?;
                vec![Response::toned(Tone::Warn, text)]
            }
            CommandOutcome::Fault(FaultCommand::Clear) => {
                self.controller.charger_mut().clear_fault();
                vec![Response::plain("OK fault cleared")]
            }
            CommandOutcome::Help(topic) => {
                let mut text = String::new();
                write_help(&mut text, topic)?;
                text.lines().map(Response::plain).collect()
            }
            CommandOutcome::History(count) => {
                let mut text = String::new();
                write_history(&mut text, &self.telemetry, count, self.now())?;
                text.lines().map(Response::plain).collect()
            }
        };
        Ok(responses)
    }

    fn render_status(&self, snapshot: &StatusSnapshot) -> Result<Vec<Response>, fmt::Error> {
        let formatter = StatusFormatter::new(snapshot);
        let mut magnet = String::new();
        let mut flags = String::new();
        let mut step = String::new();
        formatter.write_magnet_line(&mut magnet)?;
        formatter.write_flags_line(&mut flags)?;
        formatter.write_step_line(&mut step)?;

        Ok(vec![
            Response::toned(snapshot.health.into(), magnet),
            Response::plain(flags),
            Response::plain(step),
            Response::plain(format!(
                "telemetry events={} pulses={} sessions={}",
                self.telemetry.len(),
                self.controller.driver().fired().len(),
                self.controller.charger().sessions_started(),
            )),
        ])
    }

    /// Advances virtual time, polling once per tick.
    fn advance(&mut self, duration: Duration) -> Result<Vec<Response>, fmt::Error> {
        let ticks = duration.as_millis() / TICK.as_millis();
        let mut responses = Vec::new();

        for _ in 0..ticks {
            self.controller.driver_mut().advance(TICK);
            let outcome = self.controller.poll();
            let now = self.now();

            if self.telemetry.record_poll(&outcome, now).is_some() {
                responses.extend(describe_poll(&outcome, now, self.controller.is_turned_on())?);
            }

            let hardpoint_id = self.executor.hardpoint_id();
            if let Some(report) = self.publisher.poll(now, hardpoint_id, &self.controller) {
                responses.push(describe_report(&report));
            }
        }

        responses.push(Response::plain(format!(
            "OK waited {}ms",
            duration.as_millis()
        )));
        Ok(responses)
    }

    fn log(&mut self, role: TranscriptRole, line: &str) -> io::Result<()> {
        let now = self.now();
        match self.transcript.as_mut() {
            Some(transcript) => transcript.append_line(now, role, line),
            None => Ok(()),
        }
    }
}

fn describe_poll(
    outcome: &PollOutcome,
    now: VirtualInstant,
    magnet_on: bool,
) -> Result<Vec<Response>, fmt::Error> {
    let stamp = now.as_micros() / 1_000;
    let responses = match *outcome {
        PollOutcome::Idle | PollOutcome::Charging(_) => Vec::new(),
        PollOutcome::Pulsed {
            context,
            sequence_complete,
        } => {
            let mut responses = vec![Response::plain(format!(
                "[+{stamp}ms] pulse {}",
                describe_step(&context)?
            ))];
            if sequence_complete {
                responses.push(Response::toned(
                    Tone::Good,
                    format!(
                        "[+{stamp}ms] {} complete magnet={}",
                        context.direction,
                        if magnet_on { "on" } else { "off" }
                    ),
                ));
            }
            responses
        }
        PollOutcome::Aborted { context, flags } => {
            let mut text = format!("[+{stamp}ms] FAULT {} aborted flags=", context.direction);
            write_charger_flags(&mut text, flags)?;
            vec![Response::toned(Tone::Bad, text)]
        }
    };
    Ok(responses)
}

fn describe_step(context: &StepContext) -> Result<String, fmt::Error> {
    let mut text = context.direction.to_string();
    if let Some(index) = context.table_index {
        write!(text, " #{index}")?;
    }
    write!(text, " {} {}", context.step.target, context.step.polarity)?;
    Ok(text)
}

fn describe_report(report: &StatusReport) -> Response {
    Response::toned(
        report.node.health.into(),
        format!(
            "STATUS hardpoint={} status={} flags=0x{:04x} health={} uptime={}s",
            report.hardpoint.hardpoint_id,
            report.hardpoint.status,
            report.hardpoint.flags.bits(),
            report.node.health,
            report.node.uptime_sec,
        ),
    )
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        logger.write_header()?;
        Ok(logger)
    }

    fn write_header(&mut self) -> io::Result<()> {
        writeln!(self.writer, "# EPM emulator transcript")?;
        writeln!(
            self.writer,
            "# Timestamps are virtual milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        now: VirtualInstant,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            now.as_micros() / 1_000,
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epm_core::cycle::{CYCLE_TABLE_LEN, OFF_FROM_OFF_SKIP, Polarity};
    use epm_core::telemetry::TelemetryEventKind;

    fn session() -> Session {
        Session::new(&SessionOptions::default()).expect("session should start")
    }

    fn texts(responses: &[Response]) -> Vec<&str> {
        responses.iter().map(|response| response.text.as_str()).collect()
    }

    #[test]
    fn on_then_wait_magnetizes() {
        let mut session = session();

        let accepted = session.handle_command("on").unwrap();
        assert_eq!(texts(&accepted), ["OK console on x2 steps=2"]);

        let waited = session.handle_command("wait 100ms").unwrap();
        assert!(
            texts(&waited)
                .iter()
                .any(|line| line.ends_with("turn-on complete magnet=on"))
        );
        assert!(session.controller().is_turned_on());
        assert_eq!(session.controller().driver().fired(), &[Polarity::Positive; 2]);
    }

    #[test]
    fn off_from_off_runs_the_shortened_ramp() {
        let mut session = session();
        session.handle_command("off").unwrap();
        session.handle_command("wait 2s").unwrap();

        assert_eq!(
            session.controller().driver().fired().len(),
            CYCLE_TABLE_LEN - OFF_FROM_OFF_SKIP
        );
        assert!(!session.controller().is_turned_on());
    }

    #[test]
    fn injected_fault_aborts_and_reports() {
        let mut session = session();
        session.handle_command("fault overcurrent").unwrap();
        session.handle_command("on 3").unwrap();

        let waited = session.handle_command("wait 5ms").unwrap();
        let fault = waited
            .iter()
            .find(|response| response.text.contains("FAULT"))
            .expect("fault should be reported");
        assert_eq!(fault.tone, Tone::Bad);
        assert!(fault.text.ends_with("flags=overcurrent"));

        assert_eq!(session.controller().health(), Health::Error);
        let latest = session.telemetry().recent(1).next().expect("fault recorded");
        assert!(matches!(latest.event, TelemetryEventKind::ChargerFault(_)));
    }

    #[test]
    fn history_lists_the_latest_events() {
        let mut session = session();
        let empty = session.handle_command("history").unwrap();
        assert_eq!(texts(&empty), ["history empty"]);

        session.handle_command("on").unwrap();
        session.handle_command("wait 100ms").unwrap();

        let history = session.handle_command("history 3").unwrap();
        let lines = texts(&history);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("#1 "));
        assert!(lines[0].contains("pulse-fired positive 450V"));
        assert!(lines[2].starts_with("#3 "));
        assert!(lines[2].contains("sequence-complete turn-on pulses=2"));
    }

    #[test]
    fn pwm_off_turned_away_while_busy_lands_later() {
        let mut session = session();
        session.handle_command("pwm 1100").unwrap();
        let accepted = session.handle_command("pwm 1900").unwrap();
        assert_eq!(texts(&accepted), ["OK pwm on x2 steps=2"]);
        let busy = session.handle_command("pwm 1100").unwrap();
        assert_eq!(texts(&busy), ["IGNORED pwm off busy"]);

        session.handle_command("wait 100ms").unwrap();
        let early = session.handle_command("pwm 1100").unwrap();
        assert_eq!(texts(&early), ["OK no change"]);

        session.handle_command("wait 2500ms").unwrap();
        let retried = session.handle_command("pwm 1100").unwrap();
        assert!(retried[0].text.starts_with("OK pwm off steps="));
    }

    #[test]
    fn status_is_published_every_half_second() {
        let mut session = session();
        let waited = session.handle_command("wait 1200ms").unwrap();
        let reports = waited
            .iter()
            .filter(|response| response.text.starts_with("STATUS"))
            .count();
        assert_eq!(reports, 2);
    }

    #[test]
    fn busy_commands_are_reported_as_ignored() {
        let mut session = session();
        session.handle_command("on").unwrap();
        let second = session.handle_command("off").unwrap();
        assert_eq!(texts(&second), ["IGNORED console off busy"]);
        assert_eq!(second[0].tone, Tone::Warn);
    }

    #[test]
    fn syntax_errors_are_reported() {
        let mut session = session();
        let responses = session.handle_command("pwm fast").unwrap();
        assert!(responses[0].text.starts_with("ERR syntax"));
    }

    #[test]
    fn help_lists_commands() {
        let mut session = session();
        let responses = session.handle_command("help").unwrap();
        assert_eq!(responses[0].text, "commands:");
        assert!(responses.len() > 5);
    }

    #[test]
    fn transcript_records_both_sides() {
        let path = std::env::temp_dir().join(format!("epm-transcript-{}.log", std::process::id()));
        let options = SessionOptions {
            transcript: Some(path.clone()),
            ..SessionOptions::default()
        };
        let mut session = Session::new(&options).unwrap();
        session.handle_command("status").unwrap();
        drop(session);

        let contents = fs::read_to_string(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert!(contents.contains("HOST> status"));
        assert!(contents.contains("EMU < magnet hardpoint=1"));
    }
}
