mod support;

use epm_core::charger::ChargeStatus;
use epm_core::controller::{CommandDisposition, Health, PollOutcome, StatusFlags};
use epm_core::cycle::{CYCLE_TABLE, CYCLE_TABLE_LEN, OFF_FROM_OFF_SKIP, Polarity, Volts};
use heapless::Vec as HeaplessVec;

use support::{controller, magnetized_controller, run_to_idle, set_time};

fn targets(steps: &[epm_core::cycle::ChargeStep]) -> HeaplessVec<Volts, 64> {
    steps.iter().map(|step| step.target).collect()
}

fn polarities(steps: &[epm_core::cycle::ChargeStep]) -> HeaplessVec<Polarity, 64> {
    steps.iter().map(|step| step.polarity).collect()
}

#[test]
fn turn_off_from_on_walks_the_whole_table() {
    let mut controller = magnetized_controller();
    let pulses_before = controller.driver().pulses().len();
    let sessions_before = controller.charger().started().len();
    set_time(&mut controller, 3_000);

    assert!(controller.turn_off().is_accepted());
    assert_eq!(controller.remaining_steps(), -(CYCLE_TABLE_LEN as i32));

    assert_eq!(run_to_idle(&mut controller), CYCLE_TABLE_LEN);

    let started = &controller.charger().started()[sessions_before..];
    assert_eq!(started, targets(&CYCLE_TABLE).as_slice());
    let fired = &controller.driver().pulses()[pulses_before..];
    assert_eq!(fired, polarities(&CYCLE_TABLE).as_slice());

    assert_eq!(fired.last(), Some(&Polarity::Negative));
    assert!(!controller.is_turned_on());
    assert_eq!(controller.remaining_steps(), 0);
    assert_eq!(controller.health(), Health::Ok);
}

#[test]
fn turn_off_from_off_skips_the_high_voltage_head() {
    let mut controller = controller();

    assert!(controller.turn_off().is_accepted());
    assert_eq!(
        controller.remaining_steps(),
        -((CYCLE_TABLE_LEN - OFF_FROM_OFF_SKIP) as i32)
    );

    assert_eq!(
        run_to_idle(&mut controller),
        CYCLE_TABLE_LEN - OFF_FROM_OFF_SKIP
    );
    assert_eq!(
        controller.charger().started(),
        targets(&CYCLE_TABLE[OFF_FROM_OFF_SKIP..]).as_slice()
    );
    assert!(!controller.is_turned_on());
}

#[test]
fn magnet_reads_on_until_a_negative_pulse_lands() {
    let mut controller = magnetized_controller();
    set_time(&mut controller, 5_000);
    controller.charger_mut().push(ChargeStatus::InProgress);
    controller.turn_off();

    assert!(matches!(controller.poll(), PollOutcome::Charging(_)));
    assert!(controller.is_turned_on());

    match controller.poll() {
        PollOutcome::Pulsed { context, .. } => {
            assert_eq!(context.table_index, Some(0));
            assert_eq!(context.step.polarity, Polarity::Negative);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!controller.is_turned_on());
}

#[test]
fn turn_off_right_after_turn_on_is_rate_limited() {
    let mut controller = magnetized_controller();

    set_time(&mut controller, 1_000);
    assert_eq!(controller.turn_off(), CommandDisposition::IgnoredRateLimited);
    assert!(controller.is_turned_on());

    set_time(&mut controller, 2_500);
    assert!(controller.turn_off().is_accepted());
}

#[test]
fn repeated_turn_off_while_off_is_rate_limited() {
    let mut controller = controller();
    controller.turn_off();
    run_to_idle(&mut controller);

    set_time(&mut controller, 100);
    assert_eq!(controller.turn_off(), CommandDisposition::IgnoredRateLimited);

    set_time(&mut controller, 2_600);
    assert!(controller.turn_off().is_accepted());
}

#[test]
fn turning_off_flag_clears_when_idle() {
    let mut controller = controller();
    controller.turn_off();
    assert_eq!(controller.status_flags(), StatusFlags::TURNING_OFF);

    run_to_idle(&mut controller);
    assert_eq!(controller.status_flags(), StatusFlags::empty());
    assert_eq!(
        controller.charger().discarded(),
        controller.charger().started().len()
    );
}
