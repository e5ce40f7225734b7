//! Monotonic instant shared by the control loop, telemetry and status publisher.

use core::ops::Add;
use core::time::Duration;

use embassy_time::{Duration as EmbassyDuration, Instant};
use epm_core::telemetry::TelemetryInstant;

/// Embassy instant with `core::time::Duration` arithmetic.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    pub const fn from_micros(micros: u64) -> Self {
        Self(Instant::from_micros(micros))
    }

    #[cfg(target_os = "none")]
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub fn as_micros(self) -> u64 {
        self.0.as_micros()
    }

    pub fn into_embassy(self) -> Instant {
        self.0
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(instant: Instant) -> Self {
        Self(instant)
    }
}

impl Add<Duration> for FirmwareInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(
            self.0
                .checked_add(to_embassy(rhs))
                .unwrap_or(Instant::MAX),
        )
    }
}

impl TelemetryInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_duration_since(earlier.0).as_micros())
    }
}

/// Converts a core duration, saturating at the embassy tick range.
pub fn to_embassy(duration: Duration) -> EmbassyDuration {
    let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    EmbassyDuration::from_micros(micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_core_durations() {
        let start = FirmwareInstant::from_micros(1_000);
        let later = start + Duration::from_millis(2);
        assert_eq!(later.as_micros(), 3_000);
        assert_eq!(
            later.saturating_duration_since(start),
            Duration::from_millis(2)
        );
        assert_eq!(start.saturating_duration_since(later), Duration::ZERO);
    }

    #[test]
    fn addition_saturates() {
        let start = FirmwareInstant::from(Instant::MAX);
        assert_eq!(start + Duration::from_secs(1), start);
    }
}
