//! Motor-controller link supervision and unit conversion.

use core::f32::consts::PI;

use embassy_time::{Duration, Instant};
use micromath::F32Ext;

use crate::config::{COMMAND_DEADBAND_A, LINK_FAILSAFE_MS, MAX_PLAUSIBLE_SPEED_KMH, MOTOR_GEAR_RATIO, MOTOR_POLE_PAIRS, WHEEL_DIAMETER_M};
use crate::drivers::vesc::MotorValues;
use crate::events::Event;
use crate::state::TelemetrySnapshot;

pub fn motor_rpm_from_erpm(erpm: f32) -> f32 {
    erpm / MOTOR_POLE_PAIRS
}

/// eRPM -> motor rpm -> wheel rpm -> km/h
pub fn speed_kmh_from_erpm(erpm: f32) -> f32 {
    let wheel_rpm = motor_rpm_from_erpm(erpm) / MOTOR_GEAR_RATIO;
    wheel_rpm * PI * WHEEL_DIAMETER_M * 0.06
}

/// Build a snapshot from a successful query. Battery fields are left to
/// the caller. Implausible speeds read as 0 and mark the data invalid;
/// `measured_speed_kmh` keeps the converted value either way.
pub fn telemetry_from_values(v: &MotorValues, now: Instant) -> TelemetrySnapshot {
    let speed = speed_kmh_from_erpm(v.erpm);
    let plausible = (0.0..=MAX_PLAUSIBLE_SPEED_KMH).contains(&speed);
    TelemetrySnapshot {
        speed_kmh: if plausible { speed } else { 0.0 },
        measured_speed_kmh: speed,
        valid: plausible,
        actual_current_a: v.avg_motor_current_a,
        battery_voltage: v.input_voltage,
        erpm: v.erpm,
        motor_rpm: motor_rpm_from_erpm(v.erpm),
        duty_cycle_pct: v.duty_cycle * 100.0,
        temp_mosfet_c: v.temp_mosfet_c,
        temp_motor_c: v.temp_motor_c,
        amp_hours: v.amp_hours,
        watt_hours: v.watt_hours,
        last_update: Some(now),
        ..TelemetrySnapshot::ZERO
    }
}

/// Tracks query outcomes and trips the fail-safe after a long outage.
pub struct LinkSupervisor {
    lost_since: Option<Instant>,
    failsafe: bool,
}

impl LinkSupervisor {
    pub const fn new() -> Self {
        Self {
            lost_since: None,
            failsafe: false,
        }
    }

    pub fn on_success(&mut self) -> Option<Event> {
        let was_lost = self.lost_since.take().is_some();
        self.failsafe = false;
        was_lost.then_some(Event::TelemetryRestored)
    }

    pub fn on_failure(&mut self, now: Instant) -> Option<Event> {
        let Some(since) = self.lost_since else {
            self.lost_since = Some(now);
            return Some(Event::TelemetryLost);
        };
        let outage = now.checked_duration_since(since).unwrap_or(Duration::from_ticks(0));
        if !self.failsafe && outage > Duration::from_millis(LINK_FAILSAFE_MS) {
            self.failsafe = true;
            return Some(Event::LinkFailsafe);
        }
        None
    }

    pub fn failsafe(&self) -> bool {
        self.failsafe
    }
}

impl Default for LinkSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Suppresses repeats of the same current command. Zero always goes out.
pub struct CommandThrottle {
    last_sent: Option<f32>,
}

impl CommandThrottle {
    pub const fn new() -> Self {
        Self { last_sent: None }
    }

    pub fn should_send(&self, amps: f32) -> bool {
        amps == 0.0 || self.last_sent.map_or(true, |last| (amps - last).abs() > COMMAND_DEADBAND_A)
    }

    pub fn mark_sent(&mut self, amps: f32) {
        self.last_sent = Some(amps);
    }
}

impl Default for CommandThrottle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Instant {
        Instant::from_millis(v)
    }

    #[test]
    fn erpm_to_speed() {
        // 25 km/h -> 184.2 wheel rpm -> 2616 motor rpm -> 20929 erpm
        let erpm = 25.0 / (PI * WHEEL_DIAMETER_M * 0.06) * MOTOR_GEAR_RATIO * MOTOR_POLE_PAIRS;
        assert!((speed_kmh_from_erpm(erpm) - 25.0).abs() < 1e-3);
        assert_eq!(motor_rpm_from_erpm(800.0), 100.0);
    }

    #[test]
    fn implausible_speed_invalidates_snapshot() {
        let v = MotorValues {
            erpm: 60_000.0,
            input_voltage: 50.0,
            ..MotorValues::default()
        };
        let t = telemetry_from_values(&v, ms(5));
        assert!(!t.valid);
        assert_eq!(t.speed_kmh, 0.0);
        assert!(t.measured_speed_kmh > MAX_PLAUSIBLE_SPEED_KMH);
        assert_eq!(t.last_update, Some(ms(5)));

        let t = telemetry_from_values(&MotorValues { erpm: -2_000.0, ..v }, ms(5));
        assert!(!t.valid);
    }

    #[test]
    fn snapshot_carries_extended_fields() {
        let v = MotorValues {
            erpm: 8_000.0,
            duty_cycle: 0.25,
            temp_mosfet_c: 35.0,
            avg_motor_current_a: 4.2,
            ..MotorValues::default()
        };
        let t = telemetry_from_values(&v, ms(0));
        assert!(t.valid);
        assert_eq!(t.motor_rpm, 1_000.0);
        assert_eq!(t.duty_cycle_pct, 25.0);
        assert_eq!(t.temp_mosfet_c, 35.0);
        assert_eq!(t.actual_current_a, 4.2);
    }

    #[test]
    fn supervisor_reports_loss_failsafe_and_recovery() {
        let mut s = LinkSupervisor::new();
        assert_eq!(s.on_success(), None);
        assert_eq!(s.on_failure(ms(1_000)), Some(Event::TelemetryLost));
        assert_eq!(s.on_failure(ms(3_000)), None);
        assert_eq!(s.on_failure(ms(6_000)), None);
        assert!(!s.failsafe());
        assert_eq!(s.on_failure(ms(6_001)), Some(Event::LinkFailsafe));
        assert!(s.failsafe());
        assert_eq!(s.on_failure(ms(9_000)), None);
        assert_eq!(s.on_success(), Some(Event::TelemetryRestored));
        assert!(!s.failsafe());
    }

    #[test]
    fn throttle_dedups_small_changes_but_always_sends_zero() {
        let mut t = CommandThrottle::new();
        assert!(t.should_send(2.0));
        t.mark_sent(2.0);
        assert!(!t.should_send(2.05));
        assert!(t.should_send(2.2));
        assert!(t.should_send(0.0));
        t.mark_sent(0.0);
        assert!(t.should_send(0.0));
    }
}
