use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::{Adc, AdcChannel};
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
use embassy_stm32::wdg::IndependentWatchdog;
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::channel::Channel;
use epm_core::controller::MagnetController;
use epm_core::hardpoint::CachedHardpointId;

use crate::console::ConsoleReply;
use crate::control::{ControlEvent, ControlLoop};
use crate::hw::{self, BoardCharger, BridgePulseDriver};
use crate::telemetry;

mod console_task;
mod input_task;
mod magnet_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// Depth of the queue feeding the control loop.
pub const EVENT_QUEUE_DEPTH: usize = 8;
/// Watchdog period; the control loop pets it every tick.
const WATCHDOG_TIMEOUT_US: u32 = 500_000;

pub type EventQueue = Channel<ThreadModeRawMutex, ControlEvent, EVENT_QUEUE_DEPTH>;
pub type ReplyQueue = Channel<ThreadModeRawMutex, ConsoleReply, 1>;
pub type FirmwareLoop = ControlLoop<BoardCharger<'static>, BridgePulseDriver<'static>>;

pub(super) static EVENT_QUEUE: EventQueue = Channel::new();
pub(super) static REPLY_QUEUE: ReplyQueue = Channel::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let p = hal::init(config);

    // Lit until the control loop takes over.
    let status_led = Output::new(p.PA5, Level::High, Speed::Low);

    let mut watchdog = IndependentWatchdog::new(p.IWDG, WATCHDOG_TIMEOUT_US);
    watchdog.unleash();

    let dip_switch = [
        Input::new(p.PB4, Pull::Up),
        Input::new(p.PB5, Pull::Up),
        Input::new(p.PB6, Pull::Up),
        Input::new(p.PB7, Pull::Up),
    ];
    let mut hardpoint = CachedHardpointId::new();
    let hardpoint_id =
        hardpoint.get_or_read(|| hw::dip_switch_id(dip_switch.each_ref().map(Input::is_low)));
    telemetry::log_boot(hardpoint_id);

    let charger = BoardCharger::new(
        Adc::new(p.ADC1),
        p.PA0.degrade_adc(),
        p.PA1.degrade_adc(),
        Input::new(p.PA6, Pull::Up),
        Output::new(p.PA7, Level::Low, Speed::Low),
    );
    let pulse_driver = BridgePulseDriver::new(
        Output::new(p.PB0, Level::Low, Speed::VeryHigh),
        Output::new(p.PB1, Level::Low, Speed::VeryHigh),
        Output::new(p.PB2, Level::Low, Speed::VeryHigh),
        Output::new(p.PB3, Level::Low, Speed::VeryHigh),
    );
    let control = ControlLoop::new(MagnetController::new(charger, pulse_driver), hardpoint_id);

    spawner
        .spawn(magnet_task::run(control, watchdog, status_led))
        .expect("failed to spawn magnet task");

    spawner
        .spawn(input_task::button(ExtiInput::new(p.PC13, p.EXTI13, Pull::Up)))
        .expect("failed to spawn button task");

    spawner
        .spawn(input_task::pwm(ExtiInput::new(p.PA15, p.EXTI15, Pull::Down)))
        .expect("failed to spawn PWM task");

    spawner
        .spawn(console_task::run(p.USART2, p.PA2, p.PA3))
        .expect("failed to spawn console task");

    core::future::pending::<()>().await;
}
