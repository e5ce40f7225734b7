use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::usart::{
    BufferedUart, BufferedUartTx, Config as UartConfig, DataBits, Parity, StopBits,
};
use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};

use super::{EVENT_QUEUE, REPLY_QUEUE};
use crate::console::{Assembled, LineAssembler};
use crate::control::ControlEvent;

const CONSOLE_BAUD: u32 = 115_200;
const UART_TX_BUFFER_SIZE: usize = 256;
const UART_RX_BUFFER_SIZE: usize = 64;
const BANNER: &str = "EPM controller ready. Type `help` for commands.";

static mut UART_TX_BUFFER: [u8; UART_TX_BUFFER_SIZE] = [0; UART_TX_BUFFER_SIZE];
static mut UART_RX_BUFFER: [u8; UART_RX_BUFFER_SIZE] = [0; UART_RX_BUFFER_SIZE];

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART2_LPUART2 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART2>;
});

#[embassy_executor::task]
pub async fn run(
    usart: Peri<'static, hal::peripherals::USART2>,
    tx_pin: Peri<'static, hal::peripherals::PA2>,
    rx_pin: Peri<'static, hal::peripherals::PA3>,
) -> ! {
    let mut config = UartConfig::default();
    config.baudrate = CONSOLE_BAUD;
    config.data_bits = DataBits::DataBits8;
    config.stop_bits = StopBits::STOP1;
    config.parity = Parity::ParityNone;

    let uart = unsafe {
        BufferedUart::new(
            usart,
            rx_pin,
            tx_pin,
            &mut UART_TX_BUFFER,
            &mut UART_RX_BUFFER,
            UartIrqs,
            config,
        )
        .expect("failed to initialize console UART")
    };
    let (mut tx, mut rx) = uart.split();

    let events = EVENT_QUEUE.sender();
    let replies = REPLY_QUEUE.receiver();
    let mut assembler = LineAssembler::new();
    let mut chunk = [0u8; 16];

    write_reply(&mut tx, BANNER).await;

    loop {
        let count = match rx.read(&mut chunk).await {
            Ok(count) => count,
            Err(_) => {
                defmt::warn!("console: UART read error");
                Timer::after(Duration::from_millis(5)).await;
                continue;
            }
        };

        for &byte in &chunk[..count] {
            match assembler.push(byte) {
                Some(Assembled::Line(line)) => {
                    events.send(ControlEvent::Console(line)).await;
                    let reply = replies.receive().await;
                    write_reply(&mut tx, &reply).await;
                }
                Some(Assembled::Overflow) => write_reply(&mut tx, "ERR line too long").await,
                None => {}
            }
        }
    }
}

async fn write_reply(tx: &mut BufferedUartTx<'static>, reply: &str) {
    for line in reply.split('\n') {
        let written = match tx.write_all(line.as_bytes()).await {
            Ok(()) => tx.write_all(b"\r\n").await,
            Err(err) => Err(err),
        };
        if written.is_err() {
            defmt::warn!("console: UART write error");
            return;
        }
    }
}
