//! Battery level state machine and warning LED pattern.

use embassy_time::{Duration, Instant};

use crate::config::{BATTERY_BLINK_MS, BATTERY_CRITICAL_VOLTAGE, BATTERY_FAST_BLINK_MS, BATTERY_FULL_VOLTAGE, ControllerConfig};
use crate::events::Event;

/// Ordered by severity. `Critical` implies low.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BatteryLevel {
    #[default]
    Ok,
    Low,
    Critical,
}

impl BatteryLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Low => "LOW",
            Self::Critical => "CRITICAL",
        }
    }

    pub fn is_low(self) -> bool {
        self >= Self::Low
    }

    pub fn is_critical(self) -> bool {
        self == Self::Critical
    }

    fn blink_interval(self) -> Option<Duration> {
        match self {
            Self::Ok => None,
            Self::Low => Some(Duration::from_millis(BATTERY_BLINK_MS)),
            Self::Critical => Some(Duration::from_millis(BATTERY_FAST_BLINK_MS)),
        }
    }
}

/// Linear state of charge between the empty and full pack voltages.
pub fn percentage_from_voltage(voltage: f32) -> f32 {
    let span = BATTERY_FULL_VOLTAGE - BATTERY_CRITICAL_VOLTAGE;
    ((voltage - BATTERY_CRITICAL_VOLTAGE) / span * 100.0).clamp(0.0, 100.0)
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryStatus {
    pub voltage: f32,
    pub percentage: f32,
    pub level: BatteryLevel,
    pub led_on: bool,
}

impl BatteryStatus {
    pub fn low(&self) -> bool {
        self.level.is_low()
    }

    pub fn critical(&self) -> bool {
        self.level.is_critical()
    }
}

pub struct BatteryMonitor {
    low_percent: f32,
    critical_percent: f32,
    critical_voltage: f32,
    status: BatteryStatus,
    last_toggle: Instant,
}

impl BatteryMonitor {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            low_percent: config.battery_low_percent,
            critical_percent: config.battery_critical_percent,
            critical_voltage: config.battery_critical_voltage,
            status: BatteryStatus::default(),
            last_toggle: Instant::from_ticks(0),
        }
    }

    pub fn classify(&self, voltage: f32, percentage: f32) -> BatteryLevel {
        if percentage <= self.critical_percent || voltage < self.critical_voltage {
            BatteryLevel::Critical
        } else if percentage <= self.low_percent {
            BatteryLevel::Low
        } else {
            BatteryLevel::Ok
        }
    }

    /// Feed a fresh measurement. Only call with real readings: a zero
    /// voltage classifies as critical.
    pub fn update(&mut self, voltage: f32, percentage: f32) -> Option<Event> {
        let from = self.status.level;
        let to = self.classify(voltage, percentage);
        self.status.voltage = voltage;
        self.status.percentage = percentage;
        self.status.level = to;

        (from != to).then_some(Event::BatteryLevelChanged {
            from,
            to,
            voltage,
            percentage,
        })
    }

    /// Advance the blink pattern; returns the LED state to drive.
    pub fn update_led(&mut self, now: Instant) -> bool {
        match self.status.level.blink_interval() {
            None => self.status.led_on = false,
            Some(interval) => {
                let due = now
                    .checked_duration_since(self.last_toggle)
                    .is_some_and(|elapsed| elapsed >= interval);
                if due {
                    self.status.led_on = !self.status.led_on;
                    self.last_toggle = now;
                }
            }
        }
        self.status.led_on
    }

    pub fn status(&self) -> BatteryStatus {
        self.status
    }
}
