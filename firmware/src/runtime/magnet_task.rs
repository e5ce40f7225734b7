use embassy_stm32::gpio::Output;
use embassy_stm32::peripherals::IWDG;
use embassy_stm32::wdg::IndependentWatchdog;
use embassy_time::{Duration, Ticker, Timer};
use epm_core::controller::PollOutcome;

use super::{EVENT_QUEUE, FirmwareLoop, REPLY_QUEUE};
use crate::console::ConsoleReply;
use crate::control::ControlEvent;
use crate::hw;
use crate::instant::to_embassy;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

#[embassy_executor::task]
pub async fn run(
    mut control: FirmwareLoop,
    mut watchdog: IndependentWatchdog<'static, IWDG>,
    mut status_led: Output<'static>,
) -> ! {
    let events = EVENT_QUEUE.receiver();
    let replies = REPLY_QUEUE.sender();
    let mut reply = ConsoleReply::new();
    let mut ticker = Ticker::every(POLL_INTERVAL);

    loop {
        watchdog.pet();

        while let Ok(event) = events.try_receive() {
            let from_console = matches!(event, ControlEvent::Console(_));
            control.handle(event, &mut reply);
            if from_console && replies.try_send(core::mem::take(&mut reply)).is_err() {
                defmt::warn!("console: reply dropped");
            }
        }

        if let PollOutcome::Pulsed { .. } = control.tick() {
            Timer::after(to_embassy(hw::THYRISTOR_TURN_OFF)).await;
        }

        status_led.set_level(control.led_level().into());
        ticker.next().await;
    }
}
