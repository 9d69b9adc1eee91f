//! Rider power -> assist power -> motor current.

use core::f32::consts::PI;

use crate::config::{
    AssistProfileTable, ControllerConfig, CurrentStrategy, MAX_ASSIST_FACTOR, MAX_HUMAN_POWER_W,
    MOTOR_RPM_TORQUE_STRATEGY_MIN, NUM_SPEED_POINTS,
};

/// Everything the calculator reads in one cycle.
#[derive(Clone, Copy, Debug, Default)]
pub struct AssistInputs {
    pub torque_nm: f32,
    pub cadence_rps: f32,
    pub speed_kmh: f32,
    pub telemetry_valid: bool,
    pub motor_rpm: f32,
    /// Measured pack voltage, 0 if unknown
    pub battery_voltage: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AssistResult {
    pub human_power_w: f32,
    pub assist_factor: f32,
    pub assist_power_w: f32,
    pub target_current_a: f32,
}

/// P = M * omega, capped at what a rider can plausibly sustain.
pub fn human_power(torque_nm: f32, cadence_rps: f32) -> f32 {
    (torque_nm * cadence_rps * 2.0 * PI).min(MAX_HUMAN_POWER_W)
}

pub struct AssistCalculator {
    config: ControllerConfig,
    profiles: AssistProfileTable,
}

impl AssistCalculator {
    pub fn new(config: ControllerConfig, profiles: AssistProfileTable) -> Self {
        Self { config, profiles }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Speed-dependent factor for `mode`. Without valid telemetry the speed is
    /// unknown and the standstill knot is used. Unknown modes get no assist.
    pub fn assist_factor(&self, mode: usize, speed_kmh: f32, telemetry_valid: bool) -> f32 {
        let Some(profile) = self.profiles.get(mode) else {
            return 0.0;
        };
        let knots = self.profiles.speed_points();
        let factors = &profile.factors;
        let last = knots.len() - 1;

        let factor = if !telemetry_valid || speed_kmh <= knots[0] {
            factors[0]
        } else if speed_kmh >= knots[last] {
            factors[last]
        } else {
            Self::interpolate(knots, factors, speed_kmh)
        };
        factor.clamp(0.0, MAX_ASSIST_FACTOR)
    }

    fn interpolate(knots: &[f32; NUM_SPEED_POINTS], factors: &[f32; NUM_SPEED_POINTS], speed_kmh: f32) -> f32 {
        let last = knots.len() - 1;
        let mut i = 0;
        // lands on the knot itself when speed sits exactly on one
        while i < last - 1 && speed_kmh >= knots[i + 1] {
            i += 1;
        }
        let (s_lo, s_hi) = (knots[i], knots[i + 1]);
        let (f_lo, f_hi) = (factors[i], factors[i + 1]);
        f_lo + (speed_kmh - s_lo) / (s_hi - s_lo) * (f_hi - f_lo)
    }

    /// Motor current for a requested assist power.
    ///
    /// With [`CurrentStrategy::MotorTorque`] the current follows the motor's
    /// torque constant, so mechanical power stays constant across speeds.
    /// Near standstill that formula blows up, and the battery-voltage
    /// formula is used instead.
    pub fn target_current(&self, assist_power_w: f32, motor_rpm: f32, battery_voltage: f32) -> f32 {
        if assist_power_w <= 0.0 {
            return 0.0;
        }

        let voltage = if battery_voltage > 0.0 {
            battery_voltage
        } else {
            self.config.nominal_battery_voltage
        };

        let current = match self.config.strategy {
            CurrentStrategy::MotorTorque if motor_rpm > MOTOR_RPM_TORQUE_STRATEGY_MIN && self.config.motor_kt > 0.0 => {
                let omega = 2.0 * PI * motor_rpm / 60.0;
                assist_power_w / (self.config.motor_kt * omega)
            }
            _ if voltage > 0.0 => assist_power_w / voltage,
            _ => 0.0,
        };

        let current = current.clamp(0.0, self.config.max_motor_current_a);
        if current > 0.0 && current < self.config.min_motor_current_a {
            self.config.min_motor_current_a
        } else {
            current
        }
    }

    pub fn compute(&self, mode: usize, inputs: &AssistInputs) -> AssistResult {
        let human_power_w = human_power(inputs.torque_nm, inputs.cadence_rps);
        let assist_factor = self.assist_factor(mode, inputs.speed_kmh, inputs.telemetry_valid);
        let assist_power_w = (assist_factor * human_power_w).min(self.config.max_motor_power_w);
        let battery_voltage = if inputs.telemetry_valid { inputs.battery_voltage } else { 0.0 };
        let target_current_a = self.target_current(assist_power_w, inputs.motor_rpm, battery_voltage);

        AssistResult {
            human_power_w,
            assist_factor,
            assist_power_w,
            target_current_a,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AssistProfile, NUM_SPEED_POINTS, PROFILES, SPEED_POINTS_KMH};

    fn approx(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() <= tol
    }

    fn calc(strategy: CurrentStrategy) -> AssistCalculator {
        let config = ControllerConfig {
            strategy,
            ..ControllerConfig::default()
        };
        AssistCalculator::new(config, AssistProfileTable::builtin())
    }

    #[test]
    fn human_power_example() {
        // 20 Nm at 90 rpm
        assert!(approx(human_power(20.0, 1.5), 188.5, 0.05));
        assert_eq!(human_power(300.0, 3.0), MAX_HUMAN_POWER_W);
    }

    #[test]
    fn factor_equals_knot_value_at_every_knot() {
        let c = calc(CurrentStrategy::MotorTorque);
        for (mode, profile) in PROFILES.iter().enumerate() {
            for k in 0..NUM_SPEED_POINTS {
                assert_eq!(c.assist_factor(mode, SPEED_POINTS_KMH[k], true), profile.factors[k]);
            }
        }
    }

    #[test]
    fn factor_interpolates_linearly_between_knots() {
        let c = calc(CurrentStrategy::MotorTorque);
        // Touring: 15 km/h -> 1.4, 20 km/h -> 1.2
        let f = c.assist_factor(2, 17.5, true);
        assert!(approx(f, 1.3, 1e-5), "{}", f);
        // Urban: 5 -> 1.5, 10 -> 0.75, at 6 km/h
        let f = c.assist_factor(3, 6.0, true);
        assert!(approx(f, 1.5 + 0.2 * (0.75 - 1.5), 1e-5), "{}", f);
        // Touring: 20 -> 1.2, 30 -> 0.8, at 25 km/h
        let f = c.assist_factor(2, 25.0, true);
        assert!(approx(f, 1.0, 1e-5), "{}", f);
    }

    #[test]
    fn factor_clamps_outside_knot_range() {
        let c = calc(CurrentStrategy::MotorTorque);
        assert_eq!(c.assist_factor(2, -3.0, true), 2.9);
        assert_eq!(c.assist_factor(2, 42.0, true), 0.8);
    }

    #[test]
    fn invalid_telemetry_uses_standstill_knot() {
        let c = calc(CurrentStrategy::MotorTorque);
        assert_eq!(c.assist_factor(2, 25.0, false), 2.9);
    }

    #[test]
    fn unknown_mode_gives_no_assist() {
        let c = calc(CurrentStrategy::MotorTorque);
        assert_eq!(c.assist_factor(7, 10.0, true), 0.0);
    }

    #[test]
    fn interpolated_factor_is_clamped() {
        static WILD: [AssistProfile; 1] = [AssistProfile {
            name: "wild",
            description: "",
            has_light: false,
            factors: [9.0, 9.0, 9.0, 9.0, 9.0, 9.0],
        }];
        let c = AssistCalculator::new(ControllerConfig::default(), AssistProfileTable::new(&WILD));
        assert_eq!(c.assist_factor(0, 12.0, true), MAX_ASSIST_FACTOR);
        // standstill and top knots, and the no-telemetry fallback
        assert_eq!(c.assist_factor(0, 0.0, true), MAX_ASSIST_FACTOR);
        assert_eq!(c.assist_factor(0, 40.0, true), MAX_ASSIST_FACTOR);
        assert_eq!(c.assist_factor(0, 12.0, false), MAX_ASSIST_FACTOR);

        static NEGATIVE: [AssistProfile; 1] = [AssistProfile {
            name: "negative",
            description: "",
            has_light: false,
            factors: [-1.0, 1.0, 1.0, 1.0, 1.0, -1.0],
        }];
        let c = AssistCalculator::new(ControllerConfig::default(), AssistProfileTable::new(&NEGATIVE));
        assert_eq!(c.assist_factor(0, 0.0, true), 0.0);
        assert_eq!(c.assist_factor(0, 35.0, true), 0.0);
    }

    #[test]
    fn battery_strategy_example() {
        let c = calc(CurrentStrategy::BatteryVoltage);
        let i = c.target_current(188.5, 2_000.0, 0.0);
        assert!(approx(i, 3.927, 0.01), "{}", i);
    }

    #[test]
    fn battery_strategy_prefers_measured_voltage() {
        let c = calc(CurrentStrategy::BatteryVoltage);
        let i = c.target_current(100.0, 0.0, 50.0);
        assert!(approx(i, 2.0, 1e-4));
    }

    #[test]
    fn torque_strategy_uses_motor_speed() {
        let c = calc(CurrentStrategy::MotorTorque);
        // ~25 km/h on the hub: 2616 motor rpm
        let i = c.target_current(350.0, 2_616.0, 48.0);
        let expected = 350.0 / (0.18 * 2.0 * PI * 2_616.0 / 60.0);
        assert!(approx(i, expected, 1e-3), "{}", i);
        assert!(i > 6.5 && i < 7.5);
    }

    #[test]
    fn torque_strategy_falls_back_near_standstill() {
        let c = calc(CurrentStrategy::MotorTorque);
        let i = c.target_current(96.0, 5.0, 0.0);
        assert!(approx(i, 2.0, 1e-4));
    }

    #[test]
    fn current_is_clamped_and_floored() {
        let c = calc(CurrentStrategy::BatteryVoltage);
        assert_eq!(c.target_current(1_000.0, 0.0, 48.0), 8.0);
        assert_eq!(c.target_current(1.0, 0.0, 48.0), 0.1);
        assert_eq!(c.target_current(0.0, 0.0, 48.0), 0.0);
        assert_eq!(c.target_current(-5.0, 0.0, 48.0), 0.0);
    }

    #[test]
    fn compute_caps_assist_power() {
        let c = calc(CurrentStrategy::BatteryVoltage);
        let r = c.compute(
            2,
            &AssistInputs {
                torque_nm: 40.0,
                cadence_rps: 1.5,
                speed_kmh: 0.0,
                telemetry_valid: true,
                motor_rpm: 0.0,
                battery_voltage: 50.0,
            },
        );
        assert!(approx(r.human_power_w, 377.0, 0.1));
        assert_eq!(r.assist_factor, 2.9);
        assert_eq!(r.assist_power_w, 350.0);
        assert!(approx(r.target_current_a, 7.0, 1e-4));
    }

    #[test]
    fn compute_ignores_voltage_from_invalid_telemetry() {
        let c = calc(CurrentStrategy::BatteryVoltage);
        let r = c.compute(
            0,
            &AssistInputs {
                torque_nm: 20.0,
                cadence_rps: 1.5,
                speed_kmh: 12.0,
                telemetry_valid: false,
                motor_rpm: 0.0,
                battery_voltage: 30.0,
            },
        );
        assert!(approx(r.target_current_a, r.assist_power_w / 48.0, 1e-4));
    }
}
