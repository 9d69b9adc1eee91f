//! Motor enable decision.
//!
//! Recomputed from scratch every sensing cycle. Six interlocks must all hold;
//! three overrides can still force the motor off afterwards.

use embassy_time::{Duration, Instant};
use micromath::F32Ext;

use crate::config::{CADENCE_FAULT_RPM, EMERGENCY_SPEED_KMH, MIN_CADENCE_RPM, MIN_TORQUE_NM, PEDAL_TIMEOUT_MS, TELEMETRY_FRESH_MS};
use crate::drivers::pas::Direction;
use crate::events::Event;

#[derive(Clone, Copy, Debug)]
pub struct SafetyInputs {
    pub last_pedal_activity: Option<Instant>,
    pub torque_nm: f32,
    pub torque_in_deadband: bool,
    pub cadence_rpm: f32,
    pub mode: usize,
    pub direction: Direction,
    /// Age of the newest motor-controller data, `None` if never received
    pub telemetry_age: Option<Duration>,
    pub speed_kmh: f32,
    pub target_current_a: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Interlocks {
    pub pedal_active: bool,
    pub torque_present: bool,
    pub cadence_valid: bool,
    pub mode_valid: bool,
    pub forward: bool,
    pub telemetry_fresh: bool,
}

impl Interlocks {
    pub fn all(&self) -> bool {
        self.pedal_active && self.torque_present && self.cadence_valid && self.mode_valid && self.forward && self.telemetry_fresh
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SafetyDecision {
    pub enabled: bool,
    /// Assist current, zeroed by the emergency cutoff
    pub target_current_a: f32,
    pub interlocks: Interlocks,
    pub overspeed: bool,
    pub cadence_fault: bool,
}

impl SafetyDecision {
    /// What the communication task should send.
    pub fn command_a(&self) -> f32 {
        if self.enabled {
            self.target_current_a
        } else {
            0.0
        }
    }
}

pub struct MotorSafetyGate {
    profile_count: usize,
    // only used to report faults once per occurrence
    overspeed_reported: bool,
    cadence_fault_reported: bool,
}

impl MotorSafetyGate {
    pub fn new(profile_count: usize) -> Self {
        Self {
            profile_count,
            overspeed_reported: false,
            cadence_fault_reported: false,
        }
    }

    pub fn interlocks(&self, i: &SafetyInputs, now: Instant) -> Interlocks {
        let pedal_active = i
            .last_pedal_activity
            .and_then(|t| now.checked_duration_since(t))
            .is_some_and(|idle| idle < Duration::from_millis(PEDAL_TIMEOUT_MS));
        let telemetry_fresh = i
            .telemetry_age
            .is_some_and(|age| age < Duration::from_millis(TELEMETRY_FRESH_MS));

        Interlocks {
            pedal_active,
            torque_present: i.torque_nm.abs() > MIN_TORQUE_NM,
            cadence_valid: i.cadence_rpm > MIN_CADENCE_RPM,
            mode_valid: i.mode < self.profile_count,
            forward: i.direction == Direction::Forward,
            telemetry_fresh,
        }
    }

    /// Returns the decision and, on the first cycle of a fault, its event.
    pub fn evaluate(&mut self, i: &SafetyInputs, now: Instant) -> (SafetyDecision, Option<Event>) {
        let interlocks = self.interlocks(i, now);
        let mut enabled = interlocks.all();
        let mut target_current_a = i.target_current_a;
        let mut event = None;

        let cadence_fault = i.cadence_rpm > CADENCE_FAULT_RPM;
        if cadence_fault {
            enabled = false;
            if !self.cadence_fault_reported {
                event = Some(Event::ExcessiveCadence { cadence_rpm: i.cadence_rpm });
            }
        }
        self.cadence_fault_reported = cadence_fault;

        if i.torque_in_deadband {
            enabled = false;
        }

        let overspeed = i.speed_kmh > EMERGENCY_SPEED_KMH;
        if overspeed {
            enabled = false;
            target_current_a = 0.0;
            if !self.overspeed_reported {
                event = Some(Event::EmergencyCutoff { speed_kmh: i.speed_kmh });
            }
        }
        self.overspeed_reported = overspeed;

        let decision = SafetyDecision {
            enabled,
            target_current_a,
            interlocks,
            overspeed,
            cadence_fault,
        };
        (decision, event)
    }
}
