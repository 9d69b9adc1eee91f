//! Sensing cycle (100 Hz): pedal inputs -> assist -> safety -> motor command.

use embassy_time::{Duration, Instant};

use crate::config::{
    AssistProfileTable, ControllerConfig, LINK_FAILSAFE_MS, SENSING_READ_TIMEOUT, SENSING_WRITE_TIMEOUT,
};
use crate::control::assist::{AssistCalculator, AssistInputs};
use crate::control::mode::{ModeControl, ModeSelector};
use crate::control::safety::{MotorSafetyGate, SafetyInputs};
use crate::drivers::pas::{EdgeLatch, PasDecoder, PhaseInput};
use crate::drivers::source::SampleProvider;
use crate::drivers::torque::TorqueProcessor;
use crate::events::{log_event, Event};
use crate::state::{MotorCommand, SensorSnapshot, SharedState, TelemetrySnapshot};

/// Owns every sensing-side component. One instance per sensing task.
pub struct SensingLoop<P> {
    provider: P,
    decoder: PasDecoder,
    torque: TorqueProcessor,
    assist: AssistCalculator,
    safety: MotorSafetyGate,
    mode: ModeSelector,
    // last telemetry copy and when it was taken
    telemetry: TelemetrySnapshot,
    telemetry_seen: Option<Instant>,
    stale_reported: bool,
}

impl<P: SampleProvider> SensingLoop<P> {
    pub fn new(provider: P, config: ControllerConfig, profiles: AssistProfileTable) -> Self {
        Self {
            provider,
            decoder: PasDecoder::new(),
            torque: TorqueProcessor::default(),
            assist: AssistCalculator::new(config, profiles),
            safety: MotorSafetyGate::new(profiles.len()),
            mode: ModeSelector::new(profiles),
            telemetry: TelemetrySnapshot::ZERO,
            telemetry_seen: None,
            stale_reported: false,
        }
    }

    /// One cycle without any locking. `telemetry` is `None` when the shared
    /// record could not be read this cycle.
    pub fn step(
        &mut self,
        edge_us: Option<u32>,
        pins: &impl PhaseInput,
        telemetry: Option<TelemetrySnapshot>,
        mode_request: Option<u8>,
        now: Instant,
    ) -> (SensorSnapshot, MotorCommand) {
        // ── A. External requests & telemetry copy ─────────────────────────────
        if let Some(mode) = mode_request {
            if self.mode.apply(mode).is_err() {
                warn!("mode request rejected: {}", mode);
            }
        }
        if let Some(t) = telemetry {
            self.telemetry = t;
            self.telemetry_seen = Some(now);
        }

        // ── B. Pedal inputs ───────────────────────────────────────────────────
        let sample = self.provider.sample(now);
        match sample.cadence_rpm {
            Some(rpm) => self.decoder.inject_cadence(rpm, now),
            None => {
                if let Some(step) = self.decoder.decode(edge_us, pins, now) {
                    if let Some(wrap) = step.wrap {
                        log_event(&Event::PositionWrapped { from: wrap.from, to: wrap.to });
                    }
                }
                self.decoder.watchdog(now);
            }
        }
        let torque = self.torque.process(sample.torque);

        // ── C. Mode gesture ───────────────────────────────────────────────────
        if let Some(event) = self.mode.evaluate(self.decoder.position()) {
            log_event(&event);
        }
        let mode = self.mode.mode();

        // ── D. Assist ─────────────────────────────────────────────────────────
        let tel = self.telemetry;
        let assist = self.assist.compute(
            mode as usize,
            &AssistInputs {
                torque_nm: torque.torque_nm,
                cadence_rps: self.decoder.cadence_rps(),
                speed_kmh: tel.speed_kmh,
                telemetry_valid: tel.valid && !tel.link_failsafe,
                motor_rpm: tel.motor_rpm,
                battery_voltage: tel.battery_voltage,
            },
        );

        // ── E. Safety ─────────────────────────────────────────────────────────
        let (decision, event) = self.safety.evaluate(
            &SafetyInputs {
                last_pedal_activity: self.decoder.last_activity(),
                torque_nm: torque.torque_nm,
                torque_in_deadband: torque.in_deadband,
                cadence_rpm: self.decoder.cadence_rpm(),
                mode: mode as usize,
                direction: self.decoder.direction(),
                telemetry_age: tel.age(now),
                speed_kmh: tel.measured_speed_kmh,
                target_current_a: assist.target_current_a,
            },
            now,
        );
        if let Some(event) = event {
            log_event(&event);
        }

        let mut enabled = decision.enabled;
        if tel.link_failsafe || self.telemetry_stale(now) {
            enabled = false;
        }

        let sensor = SensorSnapshot {
            cadence_rpm: self.decoder.cadence_rpm(),
            cadence_rps: self.decoder.cadence_rps(),
            torque_nm: torque.torque_nm,
            torque_raw: torque.raw,
            human_power_w: assist.human_power_w,
            assist_factor: assist.assist_factor,
            assist_power_w: assist.assist_power_w,
            target_current_a: decision.target_current_a,
            mode,
            light_on: self.mode.light_on(),
            direction: self.decoder.direction(),
            position: self.decoder.position(),
            motor_enabled: enabled,
            timestamp: now,
        };
        let command = MotorCommand {
            enabled,
            target_current_a: decision.target_current_a,
            timestamp: now,
        };
        (sensor, command)
    }

    /// No telemetry copy for longer than the link fail-safe window.
    fn telemetry_stale(&mut self, now: Instant) -> bool {
        let stale = match self.telemetry_seen {
            Some(seen) => now
                .checked_duration_since(seen)
                .is_some_and(|d| d > Duration::from_millis(LINK_FAILSAFE_MS)),
            None => now.as_millis() > LINK_FAILSAFE_MS,
        };
        if stale && !self.stale_reported {
            log_event(&Event::LinkFailsafe);
        }
        self.stale_reported = stale;
        stale
    }

    /// Full cycle against the shared records. Every lock wait is bounded;
    /// a missed read reuses the previous copy, a missed write is dropped.
    pub async fn run_once(
        &mut self,
        latch: &EdgeLatch,
        shared: &SharedState,
        modes: &ModeControl,
        now: Instant,
    ) -> (SensorSnapshot, MotorCommand) {
        let telemetry = shared.telemetry.read(SENSING_READ_TIMEOUT).await;
        let edge = latch.take();
        let (sensor, command) = self.step(edge, latch, telemetry, modes.take_request(), now);

        if !shared.sensor.write(sensor, SENSING_WRITE_TIMEOUT).await {
            trace!("sensor snapshot write skipped");
        }
        if !shared.command.write(command, SENSING_WRITE_TIMEOUT).await {
            trace!("motor command write skipped");
        }
        (sensor, command)
    }

    pub fn decoder(&self) -> &PasDecoder {
        &self.decoder
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;

    use embassy_futures::block_on;

    use super::*;
    use crate::config::{CurrentStrategy, POSITION_GUARD};
    use crate::drivers::pas::tests::{Pins, BACKWARD, FORWARD};
    use crate::drivers::pas::Direction;
    use crate::drivers::source::Sample;
    use crate::drivers::torque::TorqueInput;

    /// Fixed torque from the ADC path; cadence left to the decoder.
    struct Adc(u16);

    impl SampleProvider for Adc {
        fn sample(&mut self, _now: Instant) -> Sample {
            Sample {
                cadence_rpm: None,
                torque: TorqueInput::Raw(self.0),
            }
        }
    }

    /// Injected cadence and torque.
    struct Bench(f32, f32);

    impl SampleProvider for Bench {
        fn sample(&mut self, _now: Instant) -> Sample {
            Sample {
                cadence_rpm: Some(self.0),
                torque: TorqueInput::Calibrated(self.1),
            }
        }
    }

    fn fresh_telemetry(now: Instant, speed_kmh: f32) -> TelemetrySnapshot {
        TelemetrySnapshot {
            speed_kmh,
            measured_speed_kmh: speed_kmh,
            valid: true,
            battery_voltage: 48.0,
            last_update: Some(now),
            ..TelemetrySnapshot::ZERO
        }
    }

    fn battery_config() -> ControllerConfig {
        ControllerConfig {
            strategy: CurrentStrategy::BatteryVoltage,
            ..ControllerConfig::default()
        }
    }

    #[test]
    fn injected_riding_enables_motor() {
        let mut s = SensingLoop::new(Bench(90.0, 20.0), battery_config(), AssistProfileTable::builtin());
        let pins = Pins(Cell::new(0));
        let now = Instant::from_millis(1_000);
        let (sensor, cmd) = s.step(None, &pins, Some(fresh_telemetry(now, 0.0)), None, now);

        assert!(cmd.enabled, "{:?}", sensor);
        assert_eq!(sensor.direction, Direction::Forward);
        assert!((sensor.human_power_w - 188.5).abs() < 0.1);
        // Linear profile, factor 1
        assert!((cmd.target_current_a - 188.5 / 48.0).abs() < 0.01);
    }

    #[test]
    fn no_telemetry_keeps_motor_off() {
        let mut s = SensingLoop::new(Bench(90.0, 20.0), battery_config(), AssistProfileTable::builtin());
        let pins = Pins(Cell::new(0));
        let now = Instant::from_millis(1_000);
        let (_, cmd) = s.step(None, &pins, Some(TelemetrySnapshot::ZERO), None, now);
        assert!(!cmd.enabled);
        assert_eq!(cmd.current_a(), 0.0);
    }

    #[test]
    fn overspeed_zeroes_the_command() {
        let mut s = SensingLoop::new(Bench(90.0, 20.0), battery_config(), AssistProfileTable::builtin());
        let pins = Pins(Cell::new(0));
        let now = Instant::from_millis(1_000);
        let (sensor, cmd) = s.step(None, &pins, Some(fresh_telemetry(now, 46.0)), None, now);
        assert!(!cmd.enabled);
        assert_eq!(cmd.target_current_a, 0.0);
        assert_eq!(sensor.target_current_a, 0.0);
    }

    #[test]
    fn implausibly_high_speed_still_trips_the_cutoff() {
        use core::f32::consts::PI;

        use crate::config::{MOTOR_GEAR_RATIO, MOTOR_POLE_PAIRS, WHEEL_DIAMETER_M};
        use crate::control::link::telemetry_from_values;
        use crate::drivers::vesc::MotorValues;

        let mut s = SensingLoop::new(Bench(90.0, 20.0), battery_config(), AssistProfileTable::builtin());
        let pins = Pins(Cell::new(0));
        let now = Instant::from_millis(1_000);
        let erpm = 55.0 / (PI * WHEEL_DIAMETER_M * 0.06) * MOTOR_GEAR_RATIO * MOTOR_POLE_PAIRS;
        let values = MotorValues {
            erpm,
            input_voltage: 48.0,
            ..MotorValues::default()
        };
        let tel = telemetry_from_values(&values, now);
        assert!(!tel.valid);

        let (sensor, cmd) = s.step(None, &pins, Some(tel), Some(2), now);
        assert!(!cmd.enabled);
        assert_eq!(cmd.target_current_a, 0.0);
        assert_eq!(sensor.target_current_a, 0.0);
    }

    #[test]
    fn link_failsafe_flag_disables() {
        let mut s = SensingLoop::new(Bench(90.0, 20.0), battery_config(), AssistProfileTable::builtin());
        let pins = Pins(Cell::new(0));
        let now = Instant::from_millis(1_000);
        let tel = TelemetrySnapshot {
            link_failsafe: true,
            ..fresh_telemetry(now, 10.0)
        };
        let (_, cmd) = s.step(None, &pins, Some(tel), None, now);
        assert!(!cmd.enabled);
    }

    #[test]
    fn unreadable_telemetry_eventually_disables() {
        let mut s = SensingLoop::new(Bench(90.0, 20.0), battery_config(), AssistProfileTable::builtin());
        let pins = Pins(Cell::new(0));
        let t0 = Instant::from_millis(1_000);
        s.step(None, &pins, Some(fresh_telemetry(t0, 10.0)), None, t0);

        // lock never free again; the copy goes stale
        let later = t0 + Duration::from_millis(LINK_FAILSAFE_MS + 10);
        let (_, cmd) = s.step(None, &pins, None, None, later);
        assert!(!cmd.enabled);
    }

    #[test]
    fn external_mode_request_applies_with_light() {
        let mut s = SensingLoop::new(Bench(0.0, 0.0), battery_config(), AssistProfileTable::builtin());
        let pins = Pins(Cell::new(0));
        let now = Instant::from_millis(1_000);
        let (sensor, _) = s.step(None, &pins, None, Some(2), now);
        assert_eq!(sensor.mode, 2);
        assert!(!sensor.light_on);
        let (sensor, _) = s.step(None, &pins, None, Some(9), now);
        assert_eq!(sensor.mode, 2);
    }

    #[test]
    fn reverse_gesture_through_decoder_switches_mode() {
        let mut s = SensingLoop::new(Adc(2880), battery_config(), AssistProfileTable::builtin());
        let pins = Pins(Cell::new(0));
        let mut t = 1_000_000u32;
        for &phase in BACKWARD.iter().take(3) {
            pins.0.set(phase);
            t += 30_000;
            s.step(Some(t), &pins, None, None, Instant::from_micros(t as u64));
        }
        assert_eq!(s.decoder().position(), -3);
        let (sensor, _) = s.step(None, &pins, None, None, Instant::from_micros(t as u64 + 10_000));
        assert_eq!(sensor.mode, 1);
    }

    #[test]
    fn wrap_keeps_gesture_latched() {
        let mut s = SensingLoop::new(Adc(2880), battery_config(), AssistProfileTable::builtin());
        s.decoder = PasDecoder::new().with_position(i32::MIN + POSITION_GUARD + 5);
        let pins = Pins(Cell::new(0));
        let mut t = 1_000_000u32;
        let mut step = |s: &mut SensingLoop<Adc>, phase: u8| {
            pins.0.set(phase);
            t += 30_000;
            s.step(Some(t), &pins, None, None, Instant::from_micros(t as u64)).0
        };

        let first = step(&mut s, BACKWARD[0]);
        assert_eq!(first.mode, 1);
        for &phase in BACKWARD[1..].iter().chain(BACKWARD.iter()) {
            step(&mut s, phase);
        }
        // crossed the guard band and wrapped into the small window
        assert!(s.decoder().position() > -10_000);
        assert!(s.decoder().position() <= -3);
        let after = step(&mut s, BACKWARD[0]);
        assert_eq!(after.mode, 1);
    }

    #[test]
    fn forward_pedalling_with_adc_torque_enables() {
        let mut s = SensingLoop::new(Adc(2880 + 192), battery_config(), AssistProfileTable::builtin());
        let pins = Pins(Cell::new(0));
        let mut t = 1_000_000u32;
        let mut last = None;
        for i in 0..8 {
            pins.0.set(FORWARD[i % 4]);
            t += 20_833;
            let now = Instant::from_micros(t as u64);
            last = Some(s.step(Some(t), &pins, Some(fresh_telemetry(now, 12.0)), None, now));
        }
        let (sensor, cmd) = last.unwrap();
        assert!((sensor.torque_nm - 20.0).abs() < 0.01);
        assert!((sensor.cadence_rpm - 90.0).abs() < 0.5);
        assert!(cmd.enabled);
    }

    #[test]
    fn run_once_moves_data_through_shared_records() {
        let shared = SharedState::new();
        let modes = ModeControl::new(AssistProfileTable::builtin());
        let latch = EdgeLatch::new();
        let mut s = SensingLoop::new(Bench(90.0, 20.0), battery_config(), AssistProfileTable::builtin());
        let now = Instant::from_millis(2_000);

        assert!(shared.telemetry.try_write(fresh_telemetry(now, 5.0)));
        assert_eq!(modes.set_mode(1), Ok(1));

        block_on(async {
            let (sensor, cmd) = s.run_once(&latch, &shared, &modes, now).await;
            assert_eq!(sensor.mode, 1);
            assert_eq!(shared.sensor.try_read(), Some(sensor));
            assert_eq!(shared.command.try_read(), Some(cmd));
            assert!(cmd.enabled);
        });
    }
}
