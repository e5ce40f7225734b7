//! Shared status surface for the console.
//!
//! [`StatusSnapshot`] captures what the `status` command reports and
//! [`StatusFormatter`] keeps the textual rendering identical across
//! front-ends. [`write_history`] does the same for the `history` command.

use core::fmt;

use crate::charger::{Charger, ChargerFlags};
use crate::controller::{MagnetController, PulseDriver, StatusFlags, StepContext};
use crate::controller::{Health, SequenceProgress};
use crate::hardpoint::HardpointId;
use crate::telemetry::{
    CommandTelemetry, TelemetryInstant, TelemetryPayload, TelemetryRecord, TelemetryRecorder,
};

/// Point-in-time view of the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub hardpoint_id: HardpointId,
    pub magnet_on: bool,
    pub health: Health,
    pub flags: StatusFlags,
    pub progress: SequenceProgress,
    pub step: Option<StepContext>,
    pub charging: bool,
}

impl StatusSnapshot {
    /// Samples `controller`.
    pub fn capture<C, D>(hardpoint_id: HardpointId, controller: &MagnetController<C, D>) -> Self
    where
        C: Charger,
        D: PulseDriver,
    {
        Self {
            hardpoint_id,
            magnet_on: controller.is_turned_on(),
            health: controller.health(),
            flags: controller.status_flags(),
            progress: controller.progress(),
            step: controller.current_step(),
            charging: controller.has_active_session(),
        }
    }
}

/// Helper that renders a [`StatusSnapshot`] into human-readable lines.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    snapshot: &'a StatusSnapshot,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(snapshot: &'a StatusSnapshot) -> Self {
        Self { snapshot }
    }

    /// Writes the state line (e.g. `magnet hardpoint=3 on=true health=ok steps=0`).
    pub fn write_magnet_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(
            writer,
            "magnet hardpoint={} on={} health={} steps={}",
            self.snapshot.hardpoint_id,
            self.snapshot.magnet_on,
            self.snapshot.health,
            self.snapshot.progress.remaining_steps(),
        )
    }

    /// Writes the flag line (e.g. `flags 0x0201 turning-off timeout`).
    pub fn write_flags_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let flags = self.snapshot.flags;
        write!(writer, "flags 0x{:04x}", flags.bits())?;

        if flags.contains(StatusFlags::TURNING_ON) {
            writer.write_str(" turning-on")?;
        }
        if flags.contains(StatusFlags::TURNING_OFF) {
            writer.write_str(" turning-off")?;
        }
        for (name, _) in flags.charger().iter_names() {
            writer.write_char(' ')?;
            write_flag_name(writer, name)?;
        }

        Ok(())
    }

    /// Writes the step line (e.g. `step turn-off #3 180V negative charging`).
    pub fn write_step_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let Some(context) = self.snapshot.step else {
            return writer.write_str("step idle");
        };

        write!(writer, "step {}", context.direction)?;
        if let Some(index) = context.table_index {
            write!(writer, " #{index}")?;
        }
        write!(
            writer,
            " {} {}{}",
            context.step.target,
            context.step.polarity,
            if self.snapshot.charging {
                " charging"
            } else {
                ""
            }
        )
    }
}

/// Writes the newest `count` telemetry records, one per line, oldest first.
///
/// Ages are relative to `now` (e.g. `#7 -12ms pulse-fired negative 180V step=3 gap=5ms`).
pub fn write_history<W, I, const N: usize>(
    writer: &mut W,
    recorder: &TelemetryRecorder<I, N>,
    count: usize,
    now: I,
) -> fmt::Result
where
    W: fmt::Write,
    I: TelemetryInstant,
{
    if recorder.is_empty() || count == 0 {
        return writer.write_str("history empty");
    }

    for (position, record) in recorder.recent(count).enumerate() {
        if position > 0 {
            writer.write_char('\n')?;
        }
        write_record(writer, record, now)?;
    }
    Ok(())
}

fn write_record<W, I>(writer: &mut W, record: &TelemetryRecord<I>, now: I) -> fmt::Result
where
    W: fmt::Write,
    I: TelemetryInstant,
{
    let age = now.saturating_duration_since(record.timestamp);
    write!(writer, "#{} -{}ms {}", record.id, age.as_millis(), record.event)?;

    match record.details {
        TelemetryPayload::Command(CommandTelemetry {
            steps,
            clamped,
            ignored,
        }) => match ignored {
            Some(reason) => write!(writer, " {reason}"),
            None => write!(
                writer,
                " steps={steps}{}",
                if clamped { " clamped" } else { "" }
            ),
        },
        TelemetryPayload::Pulse(pulse) => {
            write!(writer, " {}", pulse.step.target)?;
            if let Some(index) = pulse.table_index {
                write!(writer, " step={index}")?;
            }
            match pulse.elapsed_since_previous {
                Some(gap) => write!(writer, " gap={}ms", gap.as_millis()),
                None => Ok(()),
            }
        }
        TelemetryPayload::Sequence(summary) => {
            write!(writer, " pulses={}", summary.pulses)?;
            match summary.duration {
                Some(took) => write!(writer, " took={}ms", took.as_millis()),
                None => Ok(()),
            }
        }
        TelemetryPayload::Fault(flags) => {
            writer.write_str(" flags=")?;
            write_charger_flags(writer, flags)
        }
    }
}

/// Writes a flag constant name as a lowercase, dash-separated word.
pub fn write_flag_name<W: fmt::Write>(writer: &mut W, name: &str) -> fmt::Result {
    for ch in name.chars() {
        writer.write_char(if ch == '_' {
            '-'
        } else {
            ch.to_ascii_lowercase()
        })?;
    }
    Ok(())
}

/// Writes every charger flag name separated by spaces, or `none`.
pub fn write_charger_flags<W: fmt::Write>(writer: &mut W, flags: ChargerFlags) -> fmt::Result {
    if flags.is_empty() {
        return writer.write_str("none");
    }

    for (position, (name, _)) in flags.iter_names().enumerate() {
        if position > 0 {
            writer.write_char(' ')?;
        }
        write_flag_name(writer, name)?;
    }
    Ok(())
}
