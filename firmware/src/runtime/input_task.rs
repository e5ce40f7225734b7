use embassy_futures::select::{Either, select};
use embassy_stm32::exti::ExtiInput;
use embassy_time::{Duration, Instant, Timer};

use super::EVENT_QUEUE;
use crate::control::ControlEvent;

const BUTTON_DEBOUNCE: Duration = Duration::from_millis(30);
/// An RC receiver repeats every 20 ms; silence this long means no signal.
const PWM_SIGNAL_TIMEOUT: Duration = Duration::from_millis(100);

#[embassy_executor::task]
pub async fn button(mut pin: ExtiInput<'static>) -> ! {
    let events = EVENT_QUEUE.sender();

    loop {
        pin.wait_for_falling_edge().await;
        Timer::after(BUTTON_DEBOUNCE).await;
        if pin.is_low() {
            events.send(ControlEvent::Button).await;
            pin.wait_for_high().await;
        }
    }
}

#[embassy_executor::task]
pub async fn pwm(mut pin: ExtiInput<'static>) -> ! {
    let events = EVENT_QUEUE.sender();

    loop {
        match select(measure_pulse(&mut pin), Timer::after(PWM_SIGNAL_TIMEOUT)).await {
            Either::First(width_us) => {
                if events.try_send(ControlEvent::PwmWidth(width_us)).is_err() {
                    defmt::trace!("pwm: event queue full, width={}us dropped", width_us);
                }
            }
            Either::Second(()) => {}
        }
    }
}

async fn measure_pulse(pin: &mut ExtiInput<'static>) -> u16 {
    pin.wait_for_rising_edge().await;
    let start = Instant::now();
    pin.wait_for_falling_edge().await;
    u16::try_from(start.elapsed().as_micros()).unwrap_or(u16::MAX)
}
