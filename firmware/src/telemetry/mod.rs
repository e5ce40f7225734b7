//! Operational logging for the control loop.
//!
//! Each helper flattens a core outcome into plain labels and numbers, then
//! hands them to an `emit_*` function that logs through defmt on the target and
//! `println!` on host builds.

use epm_core::charger::ChargerFlags;
use epm_core::controller::{CommandDisposition, Direction, Health, PollOutcome, StepContext};
use epm_core::cycle::Polarity;
use epm_core::hardpoint::{CommandSource, MagnetCommand, StatusReport};

use crate::instant::FirmwareInstant;

/// Logs a command reaching the controller.
pub fn log_command(source: CommandSource, command: MagnetCommand, disposition: CommandDisposition) {
    let repetitions = match command {
        MagnetCommand::TurnOn(repetitions) => repetitions,
        MagnetCommand::TurnOff => 0,
    };
    let direction = direction_label(command.direction());
    let source = source_label(source);

    match disposition {
        CommandDisposition::Accepted { progress, clamped } => emit_command_accepted(
            source,
            direction,
            repetitions,
            progress.remaining_steps(),
            clamped,
        ),
        CommandDisposition::IgnoredBusy => emit_command_ignored(source, direction, "busy"),
        CommandDisposition::IgnoredRateLimited => {
            emit_command_ignored(source, direction, "rate-limited");
        }
    }
}

/// Logs pulses, sequence completion and charger faults. Idle and charging
/// polls are silent.
pub fn log_poll(outcome: &PollOutcome, magnet_on: bool, timestamp: FirmwareInstant) {
    let timestamp_us = timestamp.as_micros();
    match *outcome {
        PollOutcome::Idle | PollOutcome::Charging(_) => {}
        PollOutcome::Pulsed {
            context,
            sequence_complete,
        } => {
            emit_pulse(
                direction_label(context.direction),
                table_index(&context),
                context.step.target.as_u16(),
                polarity_label(context.step.polarity),
                timestamp_us,
            );
            if sequence_complete {
                emit_sequence_complete(direction_label(context.direction), magnet_on, timestamp_us);
            }
        }
        PollOutcome::Aborted { context, flags } => emit_charger_fault(
            direction_label(context.direction),
            context.step.target.as_u16(),
            flags.bits(),
            timestamp_us,
        ),
    }
}

/// Logs a periodic status report.
pub fn log_status(report: &StatusReport) {
    emit_status(
        report.hardpoint.hardpoint_id,
        report.hardpoint.status,
        report.hardpoint.flags.bits(),
        health_label(report.node.health),
        report.node.uptime_sec,
    );
}

#[cfg(target_os = "none")]
pub fn log_boot(hardpoint_id: u8) {
    defmt::info!("epm: boot hardpoint={}", hardpoint_id);
}

#[cfg(not(target_os = "none"))]
pub fn log_boot(hardpoint_id: u8) {
    println!("epm: boot hardpoint={hardpoint_id}");
}

#[cfg(target_os = "none")]
pub fn log_not_addressed(hardpoint_id: u8) {
    defmt::debug!("epm: remote command for hardpoint {} ignored", hardpoint_id);
}

#[cfg(not(target_os = "none"))]
pub fn log_not_addressed(hardpoint_id: u8) {
    println!("epm: remote command for hardpoint {hardpoint_id} ignored");
}

/// Logs the charger flags decoded into names, one line per flag.
pub fn log_charger_flags(flags: ChargerFlags) {
    for (name, _) in flags.iter_names() {
        emit_flag(name);
    }
}

fn table_index(context: &StepContext) -> i32 {
    context
        .table_index
        .and_then(|index| i32::try_from(index).ok())
        .unwrap_or(-1)
}

const fn source_label(source: CommandSource) -> &'static str {
    match source {
        CommandSource::Remote => "remote",
        CommandSource::Pwm => "pwm",
        CommandSource::Button => "button",
        CommandSource::Console => "console",
    }
}

const fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::TurnOn => "turn-on",
        Direction::TurnOff => "turn-off",
    }
}

const fn polarity_label(polarity: Polarity) -> &'static str {
    match polarity {
        Polarity::Positive => "+",
        Polarity::Negative => "-",
    }
}

const fn health_label(health: Health) -> &'static str {
    match health {
        Health::Ok => "ok",
        Health::Warning => "warning",
        Health::Error => "error",
    }
}

#[cfg(target_os = "none")]
fn emit_command_accepted(
    source: &'static str,
    direction: &'static str,
    repetitions: u16,
    steps: i32,
    clamped: bool,
) {
    if clamped {
        defmt::warn!(
            "epm: {} {} x{} clamped steps={}",
            source,
            direction,
            repetitions,
            steps
        );
    } else {
        defmt::info!("epm: {} {} steps={}", source, direction, steps);
    }
}

#[cfg(not(target_os = "none"))]
fn emit_command_accepted(
    source: &'static str,
    direction: &'static str,
    repetitions: u16,
    steps: i32,
    clamped: bool,
) {
    if clamped {
        println!("epm: {source} {direction} x{repetitions} clamped steps={steps}");
    } else {
        println!("epm: {source} {direction} steps={steps}");
    }
}

#[cfg(target_os = "none")]
fn emit_command_ignored(source: &'static str, direction: &'static str, reason: &'static str) {
    defmt::info!("epm: {} {} ignored ({})", source, direction, reason);
}

#[cfg(not(target_os = "none"))]
fn emit_command_ignored(source: &'static str, direction: &'static str, reason: &'static str) {
    println!("epm: {source} {direction} ignored ({reason})");
}

#[cfg(target_os = "none")]
fn emit_pulse(
    direction: &'static str,
    index: i32,
    volts: u16,
    polarity: &'static str,
    timestamp_us: u64,
) {
    defmt::info!(
        "epm: pulse {} #{} {}V{} t={}us",
        direction,
        index,
        volts,
        polarity,
        timestamp_us
    );
}

#[cfg(not(target_os = "none"))]
fn emit_pulse(
    direction: &'static str,
    index: i32,
    volts: u16,
    polarity: &'static str,
    timestamp_us: u64,
) {
    println!("epm: pulse {direction} #{index} {volts}V{polarity} t={timestamp_us}us");
}

#[cfg(target_os = "none")]
fn emit_sequence_complete(direction: &'static str, magnet_on: bool, timestamp_us: u64) {
    defmt::info!(
        "epm: {} complete magnet_on={} t={}us",
        direction,
        magnet_on,
        timestamp_us
    );
}

#[cfg(not(target_os = "none"))]
fn emit_sequence_complete(direction: &'static str, magnet_on: bool, timestamp_us: u64) {
    println!("epm: {direction} complete magnet_on={magnet_on} t={timestamp_us}us");
}

#[cfg(target_os = "none")]
fn emit_charger_fault(direction: &'static str, volts: u16, flags: u8, timestamp_us: u64) {
    defmt::error!(
        "epm: charger fault during {} at {}V flags={=u8:#04x} t={}us",
        direction,
        volts,
        flags,
        timestamp_us
    );
}

#[cfg(not(target_os = "none"))]
fn emit_charger_fault(direction: &'static str, volts: u16, flags: u8, timestamp_us: u64) {
    println!("epm: charger fault during {direction} at {volts}V flags={flags:#04x} t={timestamp_us}us");
}

#[cfg(target_os = "none")]
fn emit_flag(name: &str) {
    defmt::error!("epm:   {}", name);
}

#[cfg(not(target_os = "none"))]
fn emit_flag(name: &str) {
    println!("epm:   {name}");
}

#[cfg(target_os = "none")]
fn emit_status(hardpoint_id: u8, status: u16, flags: u16, health: &'static str, uptime_sec: u32) {
    defmt::debug!(
        "status: hardpoint={} status={} flags={=u16:#06x} health={} uptime={}s",
        hardpoint_id,
        status,
        flags,
        health,
        uptime_sec
    );
}

#[cfg(not(target_os = "none"))]
fn emit_status(hardpoint_id: u8, status: u16, flags: u16, health: &'static str, uptime_sec: u32) {
    println!(
        "status: hardpoint={hardpoint_id} status={status} flags={flags:#06x} health={health} uptime={uptime_sec}s"
    );
}
