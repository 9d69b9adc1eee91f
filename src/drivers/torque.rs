//! Crank torque sensor.
//!
//! The sensor idles around a calibrated standstill code and swings away from
//! it under load. Only the distance from center counts: forward and backward
//! pressure read the same. No smoothing is applied on purpose; the scaled
//! value is used as-is.

use crate::config::{TORQUE_MAX_BACKWARD, TORQUE_MAX_FORWARD, TORQUE_MAX_NM, TORQUE_STANDSTILL, TORQUE_THRESHOLD};

/// Blocking access to the raw 12-bit torque code (ADC on the board).
pub trait TorqueSource {
    fn read_raw(&mut self) -> u16;
}

/// What the sensing cycle feeds into [`TorqueProcessor::process`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TorqueInput {
    /// ADC code
    Raw(u16),
    /// Already calibrated torque (Nm), e.g. from a simulated source
    Calibrated(f32),
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TorqueSample {
    pub raw: u16,
    pub torque_nm: f32,
    /// Raw code lies inside the calibration dead-band around center
    pub in_deadband: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct TorqueProcessor {
    center: u16,
    threshold: u16,
    max_deviation: u16,
    max_nm: f32,
}

impl TorqueProcessor {
    pub const fn new(center: u16, max_backward: u16, max_forward: u16, threshold: u16, max_nm: f32) -> Self {
        let below = center.saturating_sub(max_backward);
        let above = max_forward.saturating_sub(center);
        Self {
            center,
            threshold,
            max_deviation: if below > above { below } else { above },
            max_nm,
        }
    }

    pub fn deviation(&self, raw: u16) -> u16 {
        raw.abs_diff(self.center)
    }

    pub fn process(&self, input: TorqueInput) -> TorqueSample {
        match input {
            TorqueInput::Raw(raw) => self.from_raw(raw),
            TorqueInput::Calibrated(nm) => self.from_calibrated(nm),
        }
    }

    fn from_raw(&self, raw: u16) -> TorqueSample {
        let deviation = self.deviation(raw);
        let in_deadband = deviation < self.threshold;
        let torque_nm = if in_deadband || self.max_deviation == 0 {
            0.0
        } else {
            (deviation as f32 / self.max_deviation as f32 * self.max_nm).clamp(0.0, self.max_nm)
        };
        TorqueSample { raw, torque_nm, in_deadband }
    }

    /// Calibrated values pass through; a matching raw code is synthesized so
    /// downstream consumers see a consistent sample.
    fn from_calibrated(&self, nm: f32) -> TorqueSample {
        let torque_nm = nm.clamp(0.0, self.max_nm);
        let raw = if torque_nm > 0.0 && self.max_nm > 0.0 {
            let offset = (torque_nm / self.max_nm * self.max_deviation as f32) as u32;
            (self.center as u32 + offset).min(u16::MAX as u32) as u16
        } else {
            self.center
        };
        TorqueSample {
            raw,
            torque_nm,
            in_deadband: self.deviation(raw) < self.threshold,
        }
    }
}

impl Default for TorqueProcessor {
    fn default() -> Self {
        Self::new(
            TORQUE_STANDSTILL,
            TORQUE_MAX_BACKWARD,
            TORQUE_MAX_FORWARD,
            TORQUE_THRESHOLD,
            TORQUE_MAX_NM,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn center_reads_zero() {
        let p = TorqueProcessor::default();
        let s = p.process(TorqueInput::Raw(TORQUE_STANDSTILL));
        assert_eq!(s.torque_nm, 0.0);
        assert!(s.in_deadband);
    }

    #[test]
    fn below_threshold_reads_zero() {
        let p = TorqueProcessor::default();
        let s = p.process(TorqueInput::Raw(TORQUE_STANDSTILL + TORQUE_THRESHOLD - 1));
        assert_eq!(s.torque_nm, 0.0);
        assert!(s.in_deadband);
        let s = p.process(TorqueInput::Raw(TORQUE_STANDSTILL + TORQUE_THRESHOLD));
        assert!(s.torque_nm > 0.0);
        assert!(!s.in_deadband);
    }

    #[test]
    fn scales_against_the_larger_half_range() {
        let p = TorqueProcessor::default();
        // max(2880 - 0, 4095 - 2880) = 2880 counts for full scale
        let s = p.process(TorqueInput::Raw(TORQUE_STANDSTILL - 1440));
        assert!(approx(s.torque_nm, 150.0), "{}", s.torque_nm);
        let s = p.process(TorqueInput::Raw(0));
        assert!(approx(s.torque_nm, TORQUE_MAX_NM));
    }

    #[test]
    fn equal_and_opposite_deviations_read_the_same() {
        let p = TorqueProcessor::default();
        for dev in [30u16, 100, 500, 1000, 1215] {
            let up = p.process(TorqueInput::Raw(TORQUE_STANDSTILL + dev)).torque_nm;
            let down = p.process(TorqueInput::Raw(TORQUE_STANDSTILL - dev)).torque_nm;
            assert!(approx(up, down), "dev {}", dev);
        }
    }

    #[test]
    fn calibrated_input_passes_through_with_synthetic_raw() {
        let p = TorqueProcessor::default();
        let s = p.process(TorqueInput::Calibrated(20.0));
        assert_eq!(s.torque_nm, 20.0);
        assert_eq!(s.raw, TORQUE_STANDSTILL + 192);
        assert!(!s.in_deadband);

        let s = p.process(TorqueInput::Calibrated(-5.0));
        assert_eq!(s.torque_nm, 0.0);
        assert_eq!(s.raw, TORQUE_STANDSTILL);
        assert!(s.in_deadband);
    }
}
