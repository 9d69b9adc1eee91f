//! Board-side implementations of the controller's hardware seams.

use embassy_futures::select::{select, Either};
use embassy_stm32::adc::Adc;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::AnyPin;
use embassy_stm32::peripherals::{ADC1, DMA1_CH2, DMA1_CH4, PC0, UART4};
use embassy_stm32::usart::Uart;
use embassy_time::{Instant, Timer};

use pedal_assist::config::LINK_QUERY_TIMEOUT;
use pedal_assist::drivers::pas::{phase_of, EdgeLatch};
use pedal_assist::drivers::source::{CycleSimulation, Sample, SampleProvider, SensorSource, SweepSimulation};
use pedal_assist::drivers::torque::TorqueSource;
use pedal_assist::drivers::vesc::{self, LinkError, MotorLink, MotorValues, PacketParser, MAX_FRAME};

// ── Torque sensor (PC0 / ADC1_IN10) ───────────────────────────────────────────

pub struct AdcTorque {
    adc: Adc<'static, ADC1>,
    pin: PC0,
}

impl AdcTorque {
    pub fn new(adc: Adc<'static, ADC1>, pin: PC0) -> Self {
        Self { adc, pin }
    }
}

impl TorqueSource for AdcTorque {
    fn read_raw(&mut self) -> u16 {
        self.adc.read(&mut self.pin)
    }
}

// ── Sensing input selection ───────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Sensors,
    Sweep,
    Cycle,
}

/// Whatever feeds the sensing loop on this build.
pub enum Input {
    Sensors(SensorSource<AdcTorque>),
    Sweep(SweepSimulation),
    Cycle(CycleSimulation),
}

impl Input {
    pub fn new(mode: InputMode, torque: AdcTorque) -> Self {
        match mode {
            InputMode::Sensors => Self::Sensors(SensorSource::new(torque)),
            InputMode::Sweep => Self::Sweep(SweepSimulation::new()),
            InputMode::Cycle => Self::Cycle(CycleSimulation::new()),
        }
    }
}

impl SampleProvider for Input {
    fn sample(&mut self, now: Instant) -> Sample {
        match self {
            Self::Sensors(s) => s.sample(now),
            Self::Sweep(s) => s.sample(now),
            Self::Cycle(s) => s.sample(now),
        }
    }
}

// ── PAS quadrature pins ───────────────────────────────────────────────────────

/// Waits for an edge on either PAS channel and hands it to the latch.
pub async fn pas_edges(mut a: ExtiInput<'static, AnyPin>, mut b: ExtiInput<'static, AnyPin>, latch: &EdgeLatch) -> ! {
    loop {
        let _ = select(a.wait_for_any_edge(), b.wait_for_any_edge()).await;
        let levels = phase_of(a.is_high(), b.is_high());
        latch.on_edge(Instant::now().as_micros() as u32, levels);
    }
}

// ── VESC over UART4 (TX=PA0, RX=PA1) ──────────────────────────────────────────

pub type VescSerial = Uart<'static, UART4, DMA1_CH4, DMA1_CH2>;

pub struct VescUart {
    uart: VescSerial,
    parser: PacketParser,
    rx: [u8; MAX_FRAME],
}

impl VescUart {
    pub fn new(uart: VescSerial) -> Self {
        Self {
            uart,
            parser: PacketParser::new(),
            rx: [0; MAX_FRAME],
        }
    }
}

impl MotorLink for VescUart {
    async fn query_values(&mut self) -> Result<MotorValues, LinkError> {
        let mut frame = [0u8; 16];
        let len = vesc::get_values_request(&mut frame);
        self.parser.reset();
        self.uart.write(&frame[..len]).await.map_err(|_| LinkError::Io)?;

        // the reply can arrive in more than one idle-separated burst
        loop {
            let n = match select(self.uart.read_until_idle(&mut self.rx), Timer::after(LINK_QUERY_TIMEOUT)).await {
                Either::First(Ok(n)) => n,
                Either::First(Err(_)) => return Err(LinkError::Io),
                Either::Second(_) => return Err(LinkError::Timeout),
            };
            if let Some(payload) = self.parser.push_bytes(&self.rx[..n])? {
                return vesc::parse_values(&payload);
            }
        }
    }

    async fn send_current(&mut self, amps: f32) -> Result<(), LinkError> {
        let mut frame = [0u8; 16];
        let len = vesc::set_current_request(amps, &mut frame);
        self.uart.write(&frame[..len]).await.map_err(|_| LinkError::Io)
    }
}
