use embassy_stm32::gpio::Output;
use embassy_time::block_for;
use epm_core::controller::PulseDriver;
use epm_core::cycle::Polarity;

use super::GATE_PULSE;
use crate::instant::{FirmwareInstant, to_embassy};

/// Thyristor bridge: CTRL1/CTRL4 fire positive, CTRL2/CTRL3 fire negative.
pub struct BridgePulseDriver<'d> {
    ctrl1: Output<'d>,
    ctrl2: Output<'d>,
    ctrl3: Output<'d>,
    ctrl4: Output<'d>,
}

impl<'d> BridgePulseDriver<'d> {
    pub fn new(
        ctrl1: Output<'d>,
        ctrl2: Output<'d>,
        ctrl3: Output<'d>,
        ctrl4: Output<'d>,
    ) -> Self {
        let mut driver = Self {
            ctrl1,
            ctrl2,
            ctrl3,
            ctrl4,
        };
        driver.release_all();
        driver
    }

    fn release_all(&mut self) {
        self.ctrl1.set_low();
        self.ctrl2.set_low();
        self.ctrl3.set_low();
        self.ctrl4.set_low();
    }
}

impl PulseDriver for BridgePulseDriver<'_> {
    type Instant = FirmwareInstant;

    fn fire(&mut self, polarity: Polarity) {
        let Self {
            ctrl1,
            ctrl2,
            ctrl3,
            ctrl4,
        } = &mut *self;
        let (high_side, low_side) = match polarity {
            Polarity::Positive => (ctrl1, ctrl4),
            Polarity::Negative => (ctrl2, ctrl3),
        };

        high_side.set_high();
        low_side.set_high();
        block_for(to_embassy(GATE_PULSE));
        self.release_all();
    }

    fn now(&self) -> Self::Instant {
        FirmwareInstant::now()
    }
}
