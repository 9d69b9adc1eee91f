//! Pedal assist sensor.
//!
//! The edge handler runs in interrupt priority and only touches atomics:
//! it debounces, stamps the edge time and raises a flag ([`EdgeLatch`]).
//! All interpretation (quadrature direction, position, cadence) happens in
//! [`PasDecoder::decode`], called once per sensing cycle.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use embassy_time::{Duration, Instant};

use crate::config::{
    CADENCE_ALPHA, CADENCE_ALPHA_FAST, CADENCE_DECAY, CADENCE_DECAY_AFTER_MS, CADENCE_FAST_CHANGE,
    CADENCE_MAX_RPM, CADENCE_MIN_RPM, PAS_DEBOUNCE_US, PAS_STEPS_PER_REV, PEDAL_TIMEOUT_MS,
    POSITION_GUARD, POSITION_WRAP, STEP_INTERVAL_MAX_US, STEP_INTERVAL_MIN_US,
};
use crate::drivers::filter::AdaptiveLowPass;

/// Step direction by `[old phase][new phase]`, phase = `(A << 1) | B`.
/// Forward runs 00 -> 01 -> 11 -> 10 -> 00; diagonal jumps are invalid (0).
const QUADRATURE_TABLE: [[i8; 4]; 4] = [
    [0, 1, -1, 0],
    [-1, 0, 0, 1],
    [1, 0, 0, -1],
    [0, -1, 1, 0],
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Forward,
    Backward,
    #[default]
    Stopped,
}

impl Direction {
    fn from_step(step: i8) -> Self {
        match step {
            s if s > 0 => Self::Forward,
            s if s < 0 => Self::Backward,
            _ => Self::Stopped,
        }
    }

    pub fn as_i8(self) -> i8 {
        match self {
            Self::Forward => 1,
            Self::Backward => -1,
            Self::Stopped => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "FWD",
            Self::Backward => "REV",
            Self::Stopped => "STOP",
        }
    }
}

/// Current 2-bit level of the A/B sensor pins.
pub trait PhaseInput {
    fn phase(&self) -> u8;
}

pub fn phase_of(a_high: bool, b_high: bool) -> u8 {
    ((a_high as u8) << 1) | b_high as u8
}

// ── Interrupt side ────────────────────────────────────────────────────────────

/// Single-producer / single-consumer hand-off between the edge handler and
/// the sensing loop. Lock-free; never blocks either side.
pub struct EdgeLatch {
    pending: AtomicBool,
    edge_us: AtomicU32,
    levels: AtomicU8,
}

impl EdgeLatch {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            edge_us: AtomicU32::new(0),
            levels: AtomicU8::new(0),
        }
    }

    /// Edge on either pin. `now_us` is the free-running microsecond clock,
    /// `levels` the pin state read in the handler. Returns whether the edge
    /// survived the debounce window.
    pub fn on_edge(&self, now_us: u32, levels: u8) -> bool {
        self.levels.store(levels & 0b11, Ordering::Relaxed);

        let last = self.edge_us.load(Ordering::Relaxed);
        if now_us.wrapping_sub(last) < PAS_DEBOUNCE_US {
            return false;
        }
        self.edge_us.store(now_us, Ordering::Relaxed);
        self.pending.store(true, Ordering::Release);
        true
    }

    /// Consume the pending edge, if any, returning its timestamp.
    pub fn take(&self) -> Option<u32> {
        if self.pending.swap(false, Ordering::Acquire) {
            Some(self.edge_us.load(Ordering::Relaxed))
        } else {
            None
        }
    }
}

impl Default for EdgeLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// The latch mirrors the pin levels, so it doubles as the pin sampler.
impl PhaseInput for EdgeLatch {
    fn phase(&self) -> u8 {
        self.levels.load(Ordering::Relaxed)
    }
}

// ── Decoder ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PositionWrap {
    pub from: i32,
    pub to: i32,
}

impl PositionWrap {
    /// Amount added to the position by the wrap.
    pub fn offset(&self) -> i32 {
        self.to - self.from
    }
}

/// Outcome of one accepted quadrature transition.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Step {
    pub direction: Direction,
    pub position: i32,
    /// Filtered cadence if this step produced a valid sample
    pub cadence_rpm: Option<f32>,
    pub wrap: Option<PositionWrap>,
}

pub struct PasDecoder {
    position: i32,
    phase: u8,
    direction: Direction,
    cadence: AdaptiveLowPass,
    last_edge_us: Option<u32>,
    last_activity: Option<Instant>,
}

impl PasDecoder {
    pub const fn new() -> Self {
        Self {
            position: 0,
            phase: 0,
            direction: Direction::Stopped,
            cadence: AdaptiveLowPass::new(CADENCE_ALPHA, CADENCE_ALPHA_FAST, CADENCE_FAST_CHANGE),
            last_edge_us: None,
            last_activity: None,
        }
    }

    /// Per-cycle decode. Returns immediately when no edge is pending.
    pub fn decode(&mut self, edge_us: Option<u32>, pins: &impl PhaseInput, now: Instant) -> Option<Step> {
        let edge_us = edge_us?;

        let new_phase = pins.phase() & 0b11;
        if new_phase == self.phase {
            return None;
        }
        let step = QUADRATURE_TABLE[self.phase as usize][new_phase as usize];
        self.phase = new_phase;
        if step == 0 {
            return None;
        }

        self.position += i32::from(step);
        self.direction = Direction::from_step(step);

        let mut cadence_rpm = None;
        if step > 0 {
            if let Some(prev) = self.last_edge_us {
                cadence_rpm = self.cadence_sample(edge_us.wrapping_sub(prev));
            }
        }
        self.last_edge_us = Some(edge_us);
        self.last_activity = Some(now);

        let wrap = self.guard_position();
        if let Some(w) = wrap {
            trace!("pas position wrap {} -> {}", w.from, w.to);
        }

        Some(Step {
            direction: self.direction,
            position: self.position,
            cadence_rpm,
            wrap,
        })
    }

    /// Instantaneous cadence from one step interval, blended into the estimate.
    /// Implausible samples are dropped and the previous estimate kept.
    fn cadence_sample(&mut self, interval_us: u32) -> Option<f32> {
        if interval_us <= STEP_INTERVAL_MIN_US || interval_us >= STEP_INTERVAL_MAX_US {
            return None;
        }
        let revolution_ms = interval_us as f32 * PAS_STEPS_PER_REV as f32 / 1000.0;
        let raw_rpm = 60_000.0 / revolution_ms;
        if !(CADENCE_MIN_RPM..=CADENCE_MAX_RPM).contains(&raw_rpm) {
            return None;
        }
        Some(self.cadence.filter(raw_rpm))
    }

    fn guard_position(&mut self) -> Option<PositionWrap> {
        if self.position >= i32::MAX - POSITION_GUARD || self.position <= i32::MIN + POSITION_GUARD {
            let from = self.position;
            self.position %= POSITION_WRAP;
            Some(PositionWrap { from, to: self.position })
        } else {
            None
        }
    }

    /// Time-based watchdog, once per sensing cycle.
    pub fn watchdog(&mut self, now: Instant) {
        let idle = self
            .last_activity
            .map(|t| now.checked_duration_since(t).unwrap_or(Duration::from_ticks(0)));

        match idle {
            Some(idle) if idle <= Duration::from_millis(CADENCE_DECAY_AFTER_MS) => {}
            Some(idle) if idle <= Duration::from_millis(PEDAL_TIMEOUT_MS) => {
                let decayed = self.cadence.output() * CADENCE_DECAY;
                self.cadence.set(if decayed < 1.0 { 0.0 } else { decayed });
            }
            _ => self.stop(),
        }
    }

    fn stop(&mut self) {
        self.cadence.reset();
        self.direction = Direction::Stopped;
        self.position = 0;
        self.last_edge_us = None;
    }

    /// Alternate data source: take a cadence value as-is instead of decoding.
    pub fn inject_cadence(&mut self, cadence_rpm: f32, now: Instant) {
        self.cadence.set(cadence_rpm);
        if cadence_rpm > 5.0 {
            self.direction = Direction::Forward;
            self.last_activity = Some(now);
        } else {
            self.direction = Direction::Stopped;
        }
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn cadence_rpm(&self) -> f32 {
        self.cadence.output()
    }

    pub fn cadence_rps(&self) -> f32 {
        self.cadence.output() / 60.0
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    #[cfg(test)]
    pub(crate) fn with_position(mut self, position: i32) -> Self {
        self.position = position;
        self
    }
}

impl Default for PasDecoder {
    fn default() -> Self {
        Self::new()
    }
}
