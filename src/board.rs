//! Controller board: clock tree and pin assignment.
//!
//! | Function        | Pin / peripheral          |
//! |-----------------|---------------------------|
//! | PAS A / B       | PB6 / PB7 (EXTI6 / EXTI7) |
//! | Torque sensor   | PC0 (ADC1_IN10)           |
//! | VESC UART       | UART4 TX=PA0 RX=PA1       |
//! | Front light     | PB1                       |
//! | Battery warning | PB2                       |
//! | Heartbeat LED   | PC13 (active low)         |
//! | USB FS          | PA12 / PA11               |

use embassy_stm32::adc::Adc;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{AnyPin, Input, Level, Output, Pin, Pull, Speed};
use embassy_stm32::peripherals::{ADC1, PA11, PA12, PC0, USB_OTG_FS};
use embassy_stm32::rcc::*;
use embassy_stm32::time::Hertz;
use embassy_stm32::usart::{Config as UsartConfig, Uart};
use embassy_stm32::{bind_interrupts, peripherals, Config};
use embassy_time::Delay;

use crate::hw::VescSerial;

const VESC_BAUDRATE: u32 = 115_200;

bind_interrupts!(struct Irqs {
    UART4 => embassy_stm32::usart::InterruptHandler<peripherals::UART4>;
});

pub struct Usb {
    pub otg: USB_OTG_FS,
    pub dp: PA12,
    pub dm: PA11,
}

/// Everything the firmware drives, configured and ready.
pub struct Board {
    pub pas_a: ExtiInput<'static, AnyPin>,
    pub pas_b: ExtiInput<'static, AnyPin>,
    pub torque_adc: Adc<'static, ADC1>,
    pub torque_pin: PC0,
    pub vesc: VescSerial,
    pub light: Output<'static, AnyPin>,
    pub battery_led: Output<'static, AnyPin>,
    pub heartbeat: Output<'static, AnyPin>,
    pub usb: Usb,
}

/// 8 MHz crystal -> 168 MHz SYSCLK, 48 MHz for the USB core.
fn clocks() -> Config {
    let mut config = Config::default();
    config.rcc.hse = Some(Hse {
        freq: Hertz(8_000_000),
        mode: HseMode::Oscillator,
    });
    config.rcc.pll_src = PllSource::HSE;
    config.rcc.pll = Some(Pll {
        prediv: PllPreDiv::DIV4,
        mul: PllMul::MUL168,
        divp: Some(PllPDiv::DIV2),
        divq: Some(PllQDiv::DIV7),
        divr: None,
    });
    config.rcc.sys = Sysclk::PLL1_P;
    config.rcc.ahb_pre = AHBPrescaler::DIV1;
    config.rcc.apb1_pre = APBPrescaler::DIV4;
    config.rcc.apb2_pre = APBPrescaler::DIV2;
    config
}

impl Board {
    pub fn init() -> Self {
        let p = embassy_stm32::init(clocks());

        let mut vesc_config = UsartConfig::default();
        vesc_config.baudrate = VESC_BAUDRATE;
        let vesc = Uart::new(p.UART4, p.PA1, p.PA0, Irqs, p.DMA1_CH4, p.DMA1_CH2, vesc_config).unwrap();

        Self {
            pas_a: ExtiInput::new(Input::new(p.PB6.degrade(), Pull::Up), p.EXTI6.degrade()),
            pas_b: ExtiInput::new(Input::new(p.PB7.degrade(), Pull::Up), p.EXTI7.degrade()),
            torque_adc: Adc::new(p.ADC1, &mut Delay),
            torque_pin: p.PC0,
            vesc,
            light: Output::new(p.PB1.degrade(), Level::Low, Speed::Low),
            battery_led: Output::new(p.PB2.degrade(), Level::Low, Speed::Low),
            heartbeat: Output::new(p.PC13.degrade(), Level::High, Speed::Low),
            usb: Usb {
                otg: p.USB_OTG_FS,
                dp: p.PA12,
                dm: p.PA11,
            },
        }
    }
}
