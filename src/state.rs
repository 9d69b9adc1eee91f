//! Records shared between the sensing and communication tasks.
//!
//! Each record sits behind its own lock and is copied in and out whole.
//! Every access waits at most a bounded time; when the wait runs out the
//! caller skips that access for the cycle instead of missing its deadline.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{with_timeout, Duration, Instant};

use crate::drivers::pas::Direction;

// ── Data types ────────────────────────────────────────────────────────────────

/// Written by the sensing task every cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorSnapshot {
    pub cadence_rpm: f32,
    pub cadence_rps: f32,
    pub torque_nm: f32,
    pub torque_raw: u16,
    pub human_power_w: f32,
    pub assist_factor: f32,
    pub assist_power_w: f32,
    pub target_current_a: f32,
    pub mode: u8,
    pub light_on: bool,
    pub direction: Direction,
    pub position: i32,
    pub motor_enabled: bool,
    pub timestamp: Instant,
}

impl SensorSnapshot {
    pub const ZERO: Self = Self {
        cadence_rpm: 0.0,
        cadence_rps: 0.0,
        torque_nm: 0.0,
        torque_raw: 0,
        human_power_w: 0.0,
        assist_factor: 0.0,
        assist_power_w: 0.0,
        target_current_a: 0.0,
        mode: 0,
        light_on: false,
        direction: Direction::Stopped,
        position: 0,
        motor_enabled: false,
        timestamp: Instant::from_ticks(0),
    };
}

/// Written by the communication task after every motor-controller query.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TelemetrySnapshot {
    /// Plausible road speed, 0 when the reading was rejected
    pub speed_kmh: f32,
    /// Speed as converted from eRPM, never rewritten. The overspeed
    /// cutoff reads this one.
    pub measured_speed_kmh: f32,
    /// Last query succeeded and its speed was plausible
    pub valid: bool,
    pub actual_current_a: f32,
    pub battery_voltage: f32,
    pub battery_percentage: f32,
    pub battery_low: bool,
    pub battery_critical: bool,
    pub erpm: f32,
    pub motor_rpm: f32,
    pub duty_cycle_pct: f32,
    pub temp_mosfet_c: f32,
    pub temp_motor_c: f32,
    pub amp_hours: f32,
    pub watt_hours: f32,
    /// Controller unreachable long enough that the motor must stay off
    pub link_failsafe: bool,
    /// Time of the last successful query
    pub last_update: Option<Instant>,
}

impl TelemetrySnapshot {
    pub const ZERO: Self = Self {
        speed_kmh: 0.0,
        measured_speed_kmh: 0.0,
        valid: false,
        actual_current_a: 0.0,
        battery_voltage: 0.0,
        battery_percentage: 0.0,
        battery_low: false,
        battery_critical: false,
        erpm: 0.0,
        motor_rpm: 0.0,
        duty_cycle_pct: 0.0,
        temp_mosfet_c: 0.0,
        temp_motor_c: 0.0,
        amp_hours: 0.0,
        watt_hours: 0.0,
        link_failsafe: false,
        last_update: None,
    };

    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.last_update.map(|t| now.checked_duration_since(t).unwrap_or(Duration::from_ticks(0)))
    }
}

/// Sensing -> communication: what to ask of the motor.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorCommand {
    pub enabled: bool,
    pub target_current_a: f32,
    pub timestamp: Instant,
}

impl MotorCommand {
    pub const ZERO: Self = Self {
        enabled: false,
        target_current_a: 0.0,
        timestamp: Instant::from_ticks(0),
    };

    /// Current to put on the wire.
    pub fn current_a(&self) -> f32 {
        if self.enabled {
            self.target_current_a
        } else {
            0.0
        }
    }
}

// ── Cells ─────────────────────────────────────────────────────────────────────

pub struct SharedCell<T> {
    inner: Mutex<CriticalSectionRawMutex, T>,
}

impl<T: Copy> SharedCell<T> {
    pub const fn new(value: T) -> Self {
        Self { inner: Mutex::new(value) }
    }

    /// Copy out, or `None` if the lock was not free within `timeout`.
    pub async fn read(&self, timeout: Duration) -> Option<T> {
        with_timeout(timeout, self.inner.lock()).await.ok().map(|guard| *guard)
    }

    /// Overwrite whole; `false` if the lock was not free within `timeout`.
    pub async fn write(&self, value: T, timeout: Duration) -> bool {
        match with_timeout(timeout, self.inner.lock()).await {
            Ok(mut guard) => {
                *guard = value;
                true
            }
            Err(_) => false,
        }
    }

    pub fn try_read(&self) -> Option<T> {
        self.inner.try_lock().ok().map(|guard| *guard)
    }

    pub fn try_write(&self, value: T) -> bool {
        match self.inner.try_lock() {
            Ok(mut guard) => {
                *guard = value;
                true
            }
            Err(_) => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Mutex<CriticalSectionRawMutex, T> {
        &self.inner
    }
}

pub struct SharedState {
    pub sensor: SharedCell<SensorSnapshot>,
    pub telemetry: SharedCell<TelemetrySnapshot>,
    pub command: SharedCell<MotorCommand>,
}

impl SharedState {
    pub const fn new() -> Self {
        Self {
            sensor: SharedCell::new(SensorSnapshot::ZERO),
            telemetry: SharedCell::new(TelemetrySnapshot::ZERO),
            command: SharedCell::new(MotorCommand::ZERO),
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

pub static SHARED: SharedState = SharedState::new();

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;

    use super::*;

    #[test]
    fn starts_zeroed() {
        let state = SharedState::new();
        assert_eq!(state.sensor.try_read(), Some(SensorSnapshot::ZERO));
        assert_eq!(state.command.try_read(), Some(MotorCommand::ZERO));
        assert_eq!(state.telemetry.try_read().map(|t| t.valid), Some(false));
    }

    #[test]
    fn write_then_read_copies_whole_record() {
        let state = SharedState::new();
        let cmd = MotorCommand {
            enabled: true,
            target_current_a: 3.5,
            timestamp: Instant::from_millis(10),
        };
        block_on(async {
            assert!(state.command.write(cmd, Duration::from_millis(10)).await);
            assert_eq!(state.command.read(Duration::from_millis(10)).await, Some(cmd));
        });
    }

    #[test]
    fn held_lock_times_out_and_skips() {
        let state = SharedState::new();
        block_on(async {
            let _held = state.command.inner().lock().await;
            assert_eq!(state.command.read(Duration::from_millis(5)).await, None);
            assert!(!state.command.write(MotorCommand::ZERO, Duration::from_millis(5)).await);
            assert!(!state.command.try_write(MotorCommand::ZERO));
            // other records are unaffected
            assert!(state.sensor.try_read().is_some());
        });
    }

    #[test]
    fn disabled_command_sends_zero() {
        let cmd = MotorCommand {
            enabled: false,
            target_current_a: 5.0,
            timestamp: Instant::from_millis(0),
        };
        assert_eq!(cmd.current_a(), 0.0);
        assert_eq!(MotorCommand { enabled: true, ..cmd }.current_a(), 5.0);
    }

    #[test]
    fn telemetry_age_from_last_update() {
        let t = TelemetrySnapshot {
            last_update: Some(Instant::from_millis(100)),
            ..TelemetrySnapshot::ZERO
        };
        assert_eq!(t.age(Instant::from_millis(350)), Some(Duration::from_millis(250)));
        assert_eq!(TelemetrySnapshot::ZERO.age(Instant::from_millis(350)), None);
    }
}
