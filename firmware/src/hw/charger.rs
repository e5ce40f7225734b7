use embassy_stm32::adc::{Adc, AnyAdcChannel, SampleTime};
use embassy_stm32::gpio::{Input, Output};
use embassy_stm32::peripherals::ADC1;
use embassy_time::Instant;
use epm_core::charger::{ChargeStatus, Charger, ChargerFlags};
use epm_core::cycle::Volts;

use super::{ChargeReading, assess, capacitor_volts, check_target, supply_millivolts};

/// Charge in flight on the capacitor bank.
pub struct ChargeSession {
    target: Volts,
    started_at: Instant,
    flags: ChargerFlags,
}

/// Flyback charger behind an enable line, sensed through ADC1.
pub struct BoardCharger<'d> {
    adc: Adc<'d, ADC1>,
    capacitor: AnyAdcChannel<ADC1>,
    supply: AnyAdcChannel<ADC1>,
    fault: Input<'d>,
    enable: Output<'d>,
}

impl<'d> BoardCharger<'d> {
    pub fn new(
        mut adc: Adc<'d, ADC1>,
        capacitor: AnyAdcChannel<ADC1>,
        supply: AnyAdcChannel<ADC1>,
        fault: Input<'d>,
        mut enable: Output<'d>,
    ) -> Self {
        adc.set_sample_time(SampleTime::CYCLES39_5);
        enable.set_low();
        Self {
            adc,
            capacitor,
            supply,
            fault,
            enable,
        }
    }

    fn sample(&mut self, started_at: Instant) -> ChargeReading {
        let capacitor = self.adc.blocking_read(&mut self.capacitor);
        let supply = self.adc.blocking_read(&mut self.supply);
        ChargeReading {
            capacitor_volts: capacitor_volts(capacitor),
            supply_mv: supply_millivolts(supply),
            overcurrent: self.fault.is_low(),
            elapsed: core::time::Duration::from_micros(
                Instant::now().saturating_duration_since(started_at).as_micros(),
            ),
        }
    }
}

impl Charger for BoardCharger<'_> {
    type Session = ChargeSession;

    fn start(&mut self, target: Volts) -> Self::Session {
        let flags = check_target(target);
        if flags.is_empty() {
            self.enable.set_high();
        }
        ChargeSession {
            target,
            started_at: Instant::now(),
            flags,
        }
    }

    fn poll(&mut self, session: &mut Self::Session) -> ChargeStatus {
        if !session.flags.is_empty() {
            return ChargeStatus::Error;
        }

        let reading = self.sample(session.started_at);
        let (status, flags) = assess(session.target, &reading);
        session.flags = flags;
        if status.is_finished() {
            self.enable.set_low();
        }
        status
    }

    fn error_flags(&self, session: &Self::Session) -> ChargerFlags {
        session.flags
    }

    fn discard(&mut self, _session: Self::Session) {
        self.enable.set_low();
    }
}
