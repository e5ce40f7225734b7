//! Firmware control loop.
//!
//! Owns the [`MagnetController`] and everything that feeds it. Local inputs and
//! console lines (which also carry remote hardpoint commands) arrive as
//! [`ControlEvent`]s; [`ControlLoop::tick`] polls the controller, records
//! telemetry and publishes periodic status.

use core::ops::Add;
use core::time::Duration;

use epm_core::charger::Charger;
use epm_core::controller::{MagnetController, PollOutcome, PulseDriver};
use epm_core::hardpoint::{HardpointId, STATUS_PERIOD, StatusPublisher};
use epm_core::repl::commands::{CommandExecutor, CommandOutcome};
use epm_core::telemetry::{TelemetryInstant, TelemetryRecorder};

use crate::console::{self, ConsoleLine, ConsoleReply};
use crate::hw;
use crate::telemetry;

/// Input delivered to the control loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    Button,
    PwmWidth(u16),
    Console(ConsoleLine),
}

pub struct ControlLoop<C, D>
where
    C: Charger,
    D: PulseDriver,
    D::Instant: TelemetryInstant,
{
    controller: MagnetController<C, D>,
    executor: CommandExecutor,
    telemetry: TelemetryRecorder<D::Instant>,
    publisher: StatusPublisher<D::Instant>,
    flash_started: Option<D::Instant>,
}

impl<C, D> ControlLoop<C, D>
where
    C: Charger,
    D: PulseDriver,
    D::Instant: TelemetryInstant + Add<Duration, Output = D::Instant>,
{
    pub fn new(controller: MagnetController<C, D>, hardpoint_id: HardpointId) -> Self {
        let on_repetitions = controller.config().min_turn_on_cycles;
        let booted_at = controller.driver().now();
        Self {
            controller,
            executor: CommandExecutor::new(hardpoint_id, on_repetitions),
            telemetry: TelemetryRecorder::new(),
            publisher: StatusPublisher::new(booted_at, STATUS_PERIOD),
            flash_started: None,
        }
    }

    /// Applies one input. Console lines write their answer into `reply`.
    pub fn handle(&mut self, event: ControlEvent, reply: &mut ConsoleReply) {
        match event {
            ControlEvent::Button => {
                let outcome = self.executor.button_press(&mut self.controller);
                self.note(&outcome);
            }
            ControlEvent::PwmWidth(width_us) => {
                let outcome = self.executor.pwm_width(width_us, &mut self.controller);
                self.note(&outcome);
            }
            ControlEvent::Console(line) => {
                reply.clear();
                let rendered = match self.executor.execute(&line, &mut self.controller) {
                    Ok(outcome) => {
                        self.note(&outcome);
                        let now = self.controller.driver().now();
                        console::render(reply, &outcome, &self.telemetry, now)
                    }
                    Err(error) => console::render_error(reply, &error),
                };
                if rendered.is_err() {
                    reply.clear();
                    let _ = reply.push_str("ERR reply too long");
                }
            }
        }
    }

    /// Polls the controller once.
    pub fn tick(&mut self) -> PollOutcome {
        let outcome = self.controller.poll();
        let now = self.controller.driver().now();

        if self.telemetry.record_poll(&outcome, now).is_some() {
            telemetry::log_poll(&outcome, self.controller.is_turned_on(), now);
            if let PollOutcome::Aborted { flags, .. } = outcome {
                telemetry::log_charger_flags(flags);
            }
        }

        let hardpoint_id = self.executor.hardpoint_id();
        if let Some(report) = self.publisher.poll(now, hardpoint_id, &self.controller) {
            telemetry::log_status(&report);
        }

        outcome
    }

    /// Level the status LED should show now.
    pub fn led_level(&self) -> bool {
        let now = self.controller.driver().now();
        let since_flash = self
            .flash_started
            .map(|started| now.saturating_duration_since(started));
        hw::led_level(since_flash, self.controller.is_turned_on())
    }

    pub fn controller(&self) -> &MagnetController<C, D> {
        &self.controller
    }

    pub fn telemetry(&self) -> &TelemetryRecorder<D::Instant> {
        &self.telemetry
    }

    fn note(&mut self, outcome: &CommandOutcome) {
        let now = self.controller.driver().now();
        match *outcome {
            CommandOutcome::Magnet {
                source,
                command,
                disposition,
            } => {
                self.telemetry
                    .record_command(command.direction(), disposition, now);
                telemetry::log_command(source, command, disposition);
                if disposition.is_accepted() {
                    self.flash_started = Some(now);
                }
            }
            CommandOutcome::NotAddressed { hardpoint_id } => {
                telemetry::log_not_addressed(hardpoint_id);
            }
            _ => {}
        }
    }
}
