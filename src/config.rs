//! Controller constants, tunables and the assist profile table.

use embassy_time::Duration;

// ── Task timing ───────────────────────────────────────────────────────────────

/// Sensing loop: 100 Hz
pub const SENSING_HZ: u64 = 100;
/// Communication loop: 20 Hz
pub const COMM_HZ: u64 = 20;
/// Telemetry consumer (USB status lines): 2 Hz
pub const TELEMETRY_HZ: u64 = 2;

/// Bounded waits on the shared records. On expiry the cycle skips the access.
pub const SENSING_READ_TIMEOUT: Duration = Duration::from_millis(5);
pub const SENSING_WRITE_TIMEOUT: Duration = Duration::from_millis(10);
pub const COMM_WRITE_TIMEOUT: Duration = Duration::from_millis(20);
pub const COMM_COMMAND_TIMEOUT: Duration = Duration::from_millis(10);
pub const CONSUMER_READ_TIMEOUT: Duration = Duration::from_millis(5);

/// Max time a motor-controller query may take inside one comm cycle
pub const LINK_QUERY_TIMEOUT: Duration = Duration::from_millis(40);

// ── PAS sensor ────────────────────────────────────────────────────────────────

/// Magnet pulses per crank revolution on each channel
pub const PAS_PULSES_PER_REV: u32 = 8;
/// Quadrature steps per crank revolution (4 edges per pulse)
pub const PAS_STEPS_PER_REV: u32 = PAS_PULSES_PER_REV * 4;
/// Edges closer than this to the previous accepted edge are bounces
pub const PAS_DEBOUNCE_US: u32 = 1_500;
/// No edge for this long: pedals are stopped
pub const PEDAL_TIMEOUT_MS: u64 = 1_000;
/// No edge for this long: cadence starts decaying
pub const CADENCE_DECAY_AFTER_MS: u64 = PEDAL_TIMEOUT_MS / 2;
/// Per-cycle geometric decay applied while waiting for the next edge
pub const CADENCE_DECAY: f32 = 0.95;
/// Step interval window (exclusive) used for cadence estimation
pub const STEP_INTERVAL_MIN_US: u32 = 5_000;
pub const STEP_INTERVAL_MAX_US: u32 = 3_000_000;
/// Plausible cadence range
pub const CADENCE_MIN_RPM: f32 = 3.0;
pub const CADENCE_MAX_RPM: f32 = 200.0;
/// Cadence filter weights (normal / rapid change) and the change threshold
pub const CADENCE_ALPHA: f32 = 0.4;
pub const CADENCE_ALPHA_FAST: f32 = 0.6;
pub const CADENCE_FAST_CHANGE: f32 = 0.2;
/// Position counter guard band and wrap window
pub const POSITION_GUARD: i32 = 1_000;
pub const POSITION_WRAP: i32 = 10_000;
/// Reverse quadrature steps that select the next mode
pub const MODE_SWITCH_STEPS: i32 = 3;

// ── Torque sensor (12-bit ADC) ────────────────────────────────────────────────

pub const TORQUE_STANDSTILL: u16 = 2880;
pub const TORQUE_MAX_FORWARD: u16 = 4095;
pub const TORQUE_MAX_BACKWARD: u16 = 0;
pub const TORQUE_MAX_NM: f32 = 300.0;
/// Deviation from center (ADC counts) below which torque reads as zero
pub const TORQUE_THRESHOLD: u16 = 30;

// ── Motor & drivetrain (Q100C hub motor) ──────────────────────────────────────

pub const VOLTAGE_BATTERY_NOMINAL: f32 = 48.0;
pub const MAX_MOTOR_POWER_W: f32 = 350.0;
pub const MAX_MOTOR_CURRENT_A: f32 = 8.0;
pub const MIN_MOTOR_CURRENT_A: f32 = 0.1;
pub const MAX_HUMAN_POWER_W: f32 = 500.0;
pub const MAX_ASSIST_FACTOR: f32 = 4.0;
/// Torque constant at the motor shaft, measured on the bench (Nm/A)
pub const MOTOR_KT_NM_PER_A: f32 = 0.18;
/// Below this motor speed the torque-based formula is ill-conditioned
pub const MOTOR_RPM_TORQUE_STRATEGY_MIN: f32 = 10.0;
pub const MOTOR_POLE_PAIRS: f32 = 8.0;
pub const MOTOR_GEAR_RATIO: f32 = 14.2;
pub const WHEEL_DIAMETER_M: f32 = 0.72;
/// Readings above this speed are discarded as implausible
pub const MAX_PLAUSIBLE_SPEED_KMH: f32 = 50.0;

// ── Safety ────────────────────────────────────────────────────────────────────

pub const EMERGENCY_SPEED_KMH: f32 = 45.0;
pub const CADENCE_FAULT_RPM: f32 = 250.0;
pub const MIN_TORQUE_NM: f32 = 0.2;
pub const MIN_CADENCE_RPM: f32 = 2.0;
pub const TELEMETRY_FRESH_MS: u64 = 1_000;
pub const LINK_FAILSAFE_MS: u64 = 5_000;
/// Commands closer than this to the last sent value are not re-sent
pub const COMMAND_DEADBAND_A: f32 = 0.1;

// ── Battery ───────────────────────────────────────────────────────────────────

pub const BATTERY_LOW_PERCENT: f32 = 20.0;
pub const BATTERY_CRITICAL_PERCENT: f32 = 10.0;
pub const BATTERY_CRITICAL_VOLTAGE: f32 = 40.8;
pub const BATTERY_FULL_VOLTAGE: f32 = 54.6;
pub const BATTERY_BLINK_MS: u64 = 500;
pub const BATTERY_FAST_BLINK_MS: u64 = 200;

// ── Runtime tunables ──────────────────────────────────────────────────────────

/// How the assist power is turned into a motor current.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CurrentStrategy {
    /// I = P / U_battery. Ignores motor speed.
    BatteryVoltage,
    /// I = P / (Kt * omega_motor), falling back to `BatteryVoltage` near standstill.
    MotorTorque,
}

#[derive(Clone, Copy, Debug)]
pub struct ControllerConfig {
    pub strategy: CurrentStrategy,
    pub max_motor_power_w: f32,
    pub max_motor_current_a: f32,
    pub min_motor_current_a: f32,
    pub motor_kt: f32,
    pub nominal_battery_voltage: f32,
    pub battery_low_percent: f32,
    pub battery_critical_percent: f32,
    pub battery_critical_voltage: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            strategy: CurrentStrategy::MotorTorque,
            max_motor_power_w: MAX_MOTOR_POWER_W,
            max_motor_current_a: MAX_MOTOR_CURRENT_A,
            min_motor_current_a: MIN_MOTOR_CURRENT_A,
            motor_kt: MOTOR_KT_NM_PER_A,
            nominal_battery_voltage: VOLTAGE_BATTERY_NOMINAL,
            battery_low_percent: BATTERY_LOW_PERCENT,
            battery_critical_percent: BATTERY_CRITICAL_PERCENT,
            battery_critical_voltage: BATTERY_CRITICAL_VOLTAGE,
        }
    }
}

// ── Assist profiles ───────────────────────────────────────────────────────────

pub const NUM_SPEED_POINTS: usize = 6;

/// Interpolation knots shared by every profile (km/h, strictly increasing)
pub const SPEED_POINTS_KMH: [f32; NUM_SPEED_POINTS] = [0.0, 5.0, 10.0, 15.0, 20.0, 30.0];

/// A named assist curve: one factor per speed knot.
#[derive(Debug)]
pub struct AssistProfile {
    pub name: &'static str,
    pub description: &'static str,
    pub has_light: bool,
    pub factors: [f32; NUM_SPEED_POINTS],
}

pub static PROFILES: [AssistProfile; 4] = [
    AssistProfile {
        name: "Linear",
        description: "Constant assist at every speed",
        has_light: true,
        factors: [1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
    },
    AssistProfile {
        name: "Touring Eco",
        description: "Touring curve reduced for range",
        has_light: true,
        factors: [1.8, 1.2, 1.0, 0.8, 0.7, 0.5],
    },
    AssistProfile {
        name: "Touring",
        description: "Strong start, gentle slope to 30 km/h",
        has_light: false,
        factors: [2.9, 2.15, 1.75, 1.4, 1.2, 0.8],
    },
    AssistProfile {
        name: "Urban",
        description: "Full power off the line for stop-and-go traffic",
        has_light: false,
        factors: [2.9, 1.5, 0.75, 1.0, 1.2, 0.9],
    },
];

/// Read-only view over a set of profiles sharing [`SPEED_POINTS_KMH`].
#[derive(Clone, Copy)]
pub struct AssistProfileTable {
    profiles: &'static [AssistProfile],
}

impl AssistProfileTable {
    /// `profiles` must not be empty.
    pub const fn new(profiles: &'static [AssistProfile]) -> Self {
        assert!(!profiles.is_empty());
        Self { profiles }
    }

    pub const fn builtin() -> Self {
        Self::new(&PROFILES)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn get(&self, mode: usize) -> Option<&'static AssistProfile> {
        self.profiles.get(mode)
    }

    pub fn name(&self, mode: usize) -> &'static str {
        self.get(mode).map_or("?", |p| p.name)
    }

    pub fn speed_points(&self) -> &'static [f32; NUM_SPEED_POINTS] {
        &SPEED_POINTS_KMH
    }

    pub fn iter(&self) -> core::slice::Iter<'static, AssistProfile> {
        self.profiles.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_knots_strictly_increase() {
        for pair in SPEED_POINTS_KMH.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn builtin_profiles_stay_within_factor_limits() {
        let table = AssistProfileTable::builtin();
        assert_eq!(table.len(), 4);
        for profile in table.iter() {
            for &f in profile.factors.iter() {
                assert!((0.0..=MAX_ASSIST_FACTOR).contains(&f), "{}", profile.name);
            }
        }
        assert_eq!(table.name(0), "Linear");
        assert_eq!(table.name(9), "?");
    }

    #[test]
    fn torque_strategy_is_the_default() {
        assert_eq!(ControllerConfig::default().strategy, CurrentStrategy::MotorTorque);
    }
}
