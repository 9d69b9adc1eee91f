//! Pluggable pedal input providers.
//!
//! The sensing cycle asks a [`SampleProvider`] for torque (and optionally
//! cadence) once per cycle. On the bike that is [`SensorSource`] reading the
//! ADC while cadence comes from the PAS decoder; on the bench a simulation
//! supplies both and the decoder is bypassed.

use embassy_time::{Duration, Instant};
use micromath::F32Ext;

use crate::drivers::torque::{TorqueInput, TorqueSource};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    /// `Some` replaces the decoded cadence for this cycle
    pub cadence_rpm: Option<f32>,
    pub torque: TorqueInput,
}

pub trait SampleProvider {
    fn sample(&mut self, now: Instant) -> Sample;
}

// ── Real sensors ──────────────────────────────────────────────────────────────

pub struct SensorSource<T> {
    torque: T,
}

impl<T: TorqueSource> SensorSource<T> {
    pub fn new(torque: T) -> Self {
        Self { torque }
    }
}

impl<T: TorqueSource> SampleProvider for SensorSource<T> {
    fn sample(&mut self, _now: Instant) -> Sample {
        Sample {
            cadence_rpm: None,
            torque: TorqueInput::Raw(self.torque.read_raw()),
        }
    }
}

// ── Sweep: every (cadence, torque) pair, held for a fixed time ────────────────

pub const SWEEP_CADENCES_RPM: [f32; 8] = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0];
pub const SWEEP_TORQUES_NM: [f32; 8] = [5.0, 10.0, 15.0, 20.0, 25.0, 30.0, 35.0, 40.0];
pub const SWEEP_HOLD: Duration = Duration::from_secs(5);

/// Walks torque fastest, cadence slowest; outputs zero once every pair ran.
pub struct SweepSimulation {
    start: Option<Instant>,
    step: usize,
}

impl SweepSimulation {
    pub const fn new() -> Self {
        Self { start: None, step: 0 }
    }

    pub const fn total_steps() -> usize {
        SWEEP_CADENCES_RPM.len() * SWEEP_TORQUES_NM.len()
    }

    pub fn is_complete(&self) -> bool {
        self.step >= Self::total_steps()
    }
}

impl Default for SweepSimulation {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleProvider for SweepSimulation {
    fn sample(&mut self, now: Instant) -> Sample {
        let start = *self.start.get_or_insert(now);
        let elapsed = now.checked_duration_since(start).unwrap_or(Duration::from_ticks(0));
        let step = (elapsed.as_millis() / SWEEP_HOLD.as_millis()) as usize;

        if step != self.step {
            self.step = step;
            if self.is_complete() {
                info!("sweep complete");
            } else {
                debug!("sweep step {}/{}", step + 1, Self::total_steps());
            }
        }

        if self.is_complete() {
            return Sample {
                cadence_rpm: Some(0.0),
                torque: TorqueInput::Calibrated(0.0),
            };
        }

        let torques = SWEEP_TORQUES_NM.len();
        Sample {
            cadence_rpm: Some(SWEEP_CADENCES_RPM[step / torques]),
            torque: TorqueInput::Calibrated(SWEEP_TORQUES_NM[step % torques]),
        }
    }
}

// ── Cycle: ramp up / hold / ramp down / idle ──────────────────────────────────

pub const CYCLE_PERIOD: Duration = Duration::from_secs(20);
pub const CYCLE_MAX_CADENCE_RPM: f32 = 80.0;
pub const CYCLE_MAX_TORQUE_NM: f32 = 40.0;

pub struct CycleSimulation {
    start: Option<Instant>,
}

impl CycleSimulation {
    pub const fn new() -> Self {
        Self { start: None }
    }

    /// Cadence and torque at position `t` in [0, 1) of the cycle.
    pub fn at(t: f32) -> (f32, f32) {
        let (cadence, torque) = if t < 0.25 {
            let ramp = t / 0.25;
            (ramp * CYCLE_MAX_CADENCE_RPM, ramp * CYCLE_MAX_TORQUE_NM)
        } else if t < 0.5 {
            // small wobble around the peak
            let c = CYCLE_MAX_CADENCE_RPM * (1.0 + ((t - 0.25) * 40.0).sin() * 0.1);
            let q = CYCLE_MAX_TORQUE_NM * (1.0 + ((t - 0.25) * 30.0).cos() * 0.15);
            (c, q)
        } else if t < 0.75 {
            let ramp = 1.0 - (t - 0.5) / 0.25;
            (ramp * CYCLE_MAX_CADENCE_RPM, ramp * CYCLE_MAX_TORQUE_NM)
        } else {
            let c = 2.0 + ((t - 0.75) * 20.0).sin() * 0.5;
            let q = 1.0 + ((t - 0.75) * 15.0).cos() * 0.3;
            (c, q)
        };
        (
            cadence.clamp(0.0, CYCLE_MAX_CADENCE_RPM),
            torque.clamp(0.0, CYCLE_MAX_TORQUE_NM),
        )
    }
}

impl Default for CycleSimulation {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleProvider for CycleSimulation {
    fn sample(&mut self, now: Instant) -> Sample {
        let start = *self.start.get_or_insert(now);
        let elapsed = now.checked_duration_since(start).unwrap_or(Duration::from_ticks(0));
        let period_ms = CYCLE_PERIOD.as_millis();
        let t = (elapsed.as_millis() % period_ms) as f32 / period_ms as f32;
        let (cadence, torque) = Self::at(t);
        Sample {
            cadence_rpm: Some(cadence),
            torque: TorqueInput::Calibrated(torque),
        }
    }
}
