#![no_std]
#![no_main]

mod board;
mod hw;
mod usb;

use defmt::{info, warn};
use embassy_executor::{InterruptExecutor, Spawner};
use embassy_futures::select::{select, Either};
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{AnyPin, Level, Output};
use embassy_stm32::interrupt;
use embassy_stm32::interrupt::{InterruptExt, Priority};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Ticker, Timer};
use {defmt_rtt as _, panic_probe as _};

use pedal_assist::config::{
    AssistProfileTable, ControllerConfig, COMM_HZ, CONSUMER_READ_TIMEOUT, SENSING_HZ, TELEMETRY_HZ,
};
use pedal_assist::control::mode::MODE_CONTROL;
use pedal_assist::drivers::pas::EdgeLatch;
use pedal_assist::events::EVENTS;
use pedal_assist::state::SHARED;
use pedal_assist::tasks::comm::CommLoop;
use pedal_assist::tasks::sensing::SensingLoop;
use pedal_assist::tasks::telemetry::{event_line, execute, sensor_line, telemetry_line, Line, LineAssembler};

use crate::board::Board;
use crate::hw::{AdcTorque, Input, InputMode, VescUart};
use crate::usb::{UsbRx, UsbTx};

/// Bench builds switch this to a simulation.
const INPUT_MODE: InputMode = InputMode::Sensors;
const USB_STATUS_ENABLED: bool = true;

// ── Edge hand-off (EXTI → sensing) ────────────────────────────────────────────
static PAS_EDGES: EdgeLatch = EdgeLatch::new();

// ── High-priority executor: sensing preempts everything else ─────────────────
static EXECUTOR_HIGH: InterruptExecutor = InterruptExecutor::new();

#[interrupt]
unsafe fn UART5() {
    EXECUTOR_HIGH.on_interrupt()
}

// ── Sensing task (100 Hz) ─────────────────────────────────────────────────────
#[embassy_executor::task]
async fn sensing_task(mut sensing: SensingLoop<Input>, mut light: Output<'static, AnyPin>) {
    let mut ticker = Ticker::every(Duration::from_hz(SENSING_HZ));
    loop {
        ticker.next().await;
        let (sensor, _) = sensing.run_once(&PAS_EDGES, &SHARED, &MODE_CONTROL, Instant::now()).await;
        light.set_level(Level::from(sensor.light_on));
    }
}

#[embassy_executor::task]
async fn pas_task(a: ExtiInput<'static, AnyPin>, b: ExtiInput<'static, AnyPin>) {
    hw::pas_edges(a, b, &PAS_EDGES).await
}

// ── Communication task (20 Hz) ────────────────────────────────────────────────
#[embassy_executor::task]
async fn comm_task(mut comm: CommLoop<VescUart>, mut battery_led: Output<'static, AnyPin>) {
    let mut ticker = Ticker::every(Duration::from_hz(COMM_HZ));
    loop {
        ticker.next().await;
        comm.run_once(&SHARED, Instant::now()).await;
        battery_led.set_level(Level::from(comm.battery_led()));
    }
}

// ── USB status lines (2 Hz) and command replies ──────────────────────────────
static REPLIES: Channel<CriticalSectionRawMutex, Line, 2> = Channel::new();

#[embassy_executor::task]
async fn status_task(mut tx: UsbTx, profiles: AssistProfileTable) {
    let mut ticker = Ticker::every(Duration::from_hz(TELEMETRY_HZ));
    loop {
        let reply = match select(ticker.next(), REPLIES.receive()).await {
            Either::First(()) => None,
            Either::Second(line) => Some(line),
        };

        if !USB_STATUS_ENABLED || !tx.dtr() {
            // nobody listening: keep the queue from filling with old events
            while EVENTS.try_receive().is_ok() {}
            continue;
        }
        if let Some(line) = reply {
            usb::write_line(&mut tx, line.as_bytes()).await;
            continue;
        }

        while let Ok(event) = EVENTS.try_receive() {
            usb::write_line(&mut tx, event_line(&event).as_bytes()).await;
        }
        if let Some(sensor) = SHARED.sensor.read(CONSUMER_READ_TIMEOUT).await {
            usb::write_line(&mut tx, sensor_line(&sensor, &profiles).as_bytes()).await;
        }
        if let Some(t) = SHARED.telemetry.read(CONSUMER_READ_TIMEOUT).await {
            usb::write_line(&mut tx, telemetry_line(&t).as_bytes()).await;
        }
    }
}

#[embassy_executor::task]
async fn command_task(mut rx: UsbRx, profiles: AssistProfileTable) {
    let mut lines = LineAssembler::new();
    let mut buf = [0u8; usb::PACKET_SIZE];
    loop {
        rx.wait_connection().await;
        while let Ok(n) = rx.read_packet(&mut buf).await {
            for &b in &buf[..n] {
                if let Some(cmd) = lines.push(b) {
                    let _ = REPLIES.try_send(execute(cmd, &MODE_CONTROL, &profiles));
                }
            }
        }
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // 1. Board init: clocks, pins, VESC UART (see board.rs for the pin map)
    let Board {
        pas_a,
        pas_b,
        torque_adc,
        torque_pin,
        vesc,
        light,
        battery_led,
        heartbeat: mut led,
        usb: usb_port,
    } = Board::init();
    let config = ControllerConfig::default();
    let profiles = AssistProfileTable::builtin();
    info!("pedal assist controller, {} assist modes", profiles.len());

    // 2. USB CDC-ACM: status out, mode commands in
    let (usb_dev, usb_serial) = usb::init(usb_port);
    spawner.spawn(usb::usb_task(usb_dev)).unwrap();
    let (usb_tx, usb_rx) = usb_serial.split();

    let torque = AdcTorque::new(torque_adc, torque_pin);

    // 3. Sensing and edge capture on the interrupt executor
    if INPUT_MODE != InputMode::Sensors {
        warn!("simulated pedal input, sensors ignored");
    }
    interrupt::UART5.set_priority(Priority::P6);
    let high = EXECUTOR_HIGH.start(interrupt::UART5);
    high.spawn(pas_task(pas_a, pas_b)).unwrap();
    high.spawn(sensing_task(
        SensingLoop::new(Input::new(INPUT_MODE, torque), config, profiles),
        light,
    )).unwrap();

    // 4. Motor-controller link and companion on the thread executor
    spawner.spawn(comm_task(CommLoop::new(VescUart::new(vesc), &config), battery_led)).unwrap();

    spawner.spawn(status_task(usb_tx, profiles)).unwrap();
    spawner.spawn(command_task(usb_rx, profiles)).unwrap();

    // 5. Main task: LED heartbeat @ 1 Hz
    loop {
        led.toggle();
        Timer::after(Duration::from_millis(500)).await;
    }
}
