//! Demagnetizing ramp walked by the turn-off sequence.
//!
//! Two full-voltage negative pulses reverse the core, then each following
//! step drops roughly ten percent and flips polarity so the residual field
//! decays instead of overshooting. The tail holds at the charger's floor
//! voltage to mop up what is left.

use super::ChargeStep;

/// Number of entries in [`CYCLE_TABLE`].
pub const CYCLE_TABLE_LEN: usize = 42;

/// Leading entries skipped when turning off a magnet that is already off.
///
/// Tuned on hardware; re-validate against the actuator before changing it.
pub const OFF_FROM_OFF_SKIP: usize = 3;

/// Voltage ramp applied when de-energizing the magnet.
pub const CYCLE_TABLE: [ChargeStep; CYCLE_TABLE_LEN] = [
    ChargeStep::negative(450),
    ChargeStep::negative(450),
    ChargeStep::positive(300),
    ChargeStep::negative(180),
    ChargeStep::positive(162),
    ChargeStep::negative(146),
    ChargeStep::positive(131),
    ChargeStep::negative(118),
    ChargeStep::positive(106),
    ChargeStep::negative(96),
    ChargeStep::positive(86),
    ChargeStep::negative(77),
    ChargeStep::positive(70),
    ChargeStep::negative(63),
    ChargeStep::positive(56),
    ChargeStep::negative(51),
    ChargeStep::positive(46),
    ChargeStep::negative(41),
    ChargeStep::positive(37),
    ChargeStep::negative(33),
    ChargeStep::positive(30),
    ChargeStep::negative(27),
    ChargeStep::positive(24),
    ChargeStep::negative(22),
    ChargeStep::positive(20),
    ChargeStep::negative(18),
    ChargeStep::positive(16),
    ChargeStep::negative(14),
    ChargeStep::positive(13),
    ChargeStep::negative(12),
    ChargeStep::positive(11),
    // Floor of the charger; hold here for the rest of the ramp.
    ChargeStep::negative(10),
    ChargeStep::positive(10),
    ChargeStep::negative(10),
    ChargeStep::positive(10),
    ChargeStep::negative(10),
    ChargeStep::positive(10),
    ChargeStep::negative(10),
    ChargeStep::positive(10),
    ChargeStep::negative(10),
    ChargeStep::positive(10),
    ChargeStep::negative(10),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::{Polarity, is_non_increasing};

    #[test]
    fn table_never_rises() {
        assert!(is_non_increasing(&CYCLE_TABLE));
    }

    #[test]
    fn polarity_alternates_from_second_entry() {
        assert_eq!(CYCLE_TABLE[1].polarity, Polarity::Negative);
        for pair in CYCLE_TABLE[1..].windows(2) {
            assert_ne!(pair[1].polarity, pair[0].polarity);
        }
    }

    #[test]
    fn ramp_ends_negative_on_a_plateau() {
        let last = CYCLE_TABLE[CYCLE_TABLE_LEN - 1];
        assert_eq!(last.polarity, Polarity::Negative);

        let floor = last.target;
        let plateau = CYCLE_TABLE
            .iter()
            .rev()
            .take_while(|step| step.target == floor)
            .count();
        assert!(plateau > 1, "expected several entries at the floor voltage");
        assert!(CYCLE_TABLE.iter().all(|step| step.target >= floor));
    }

    #[test]
    fn skipped_head_holds_the_highest_voltages() {
        let head_min = CYCLE_TABLE[..OFF_FROM_OFF_SKIP]
            .iter()
            .map(|step| step.target)
            .min()
            .expect("slice is not empty");
        let tail_max = CYCLE_TABLE[OFF_FROM_OFF_SKIP..]
            .iter()
            .map(|step| step.target)
            .max()
            .expect("slice is not empty");

        assert!(head_min > tail_max);
    }
}
