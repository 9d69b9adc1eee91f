//! Notable controller transitions and the single log sink they go through.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::control::battery::BatteryLevel;

/// Something worth telling the rider or the log about.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    BatteryLevelChanged {
        from: BatteryLevel,
        to: BatteryLevel,
        voltage: f32,
        percentage: f32,
    },
    TelemetryLost,
    TelemetryRestored,
    /// No successful motor-controller query for longer than the fail-safe window
    LinkFailsafe,
    EmergencyCutoff { speed_kmh: f32 },
    ExcessiveCadence { cadence_rpm: f32 },
    ModeChanged { mode: u8, reverse_steps: i32 },
    PositionWrapped { from: i32, to: i32 },
}

/// Capacity of the outbound event queue; older consumers just miss events.
pub const EVENT_QUEUE_LEN: usize = 8;

/// Events for low-priority consumers (USB status, companion links).
pub static EVENTS: Channel<CriticalSectionRawMutex, Event, EVENT_QUEUE_LEN> = Channel::new();

/// Log an event and offer it to consumers. Never blocks.
pub fn log_event(event: &Event) {
    match *event {
        Event::BatteryLevelChanged { from, to, voltage, percentage } => {
            if to > from {
                warn!("battery {} -> {}: {} V ({} %)", from.as_str(), to.as_str(), voltage, percentage);
            } else {
                info!("battery {} -> {}: {} V ({} %)", from.as_str(), to.as_str(), voltage, percentage);
            }
        }
        Event::TelemetryLost => warn!("motor controller link lost"),
        Event::TelemetryRestored => info!("motor controller link restored"),
        Event::LinkFailsafe => error!("motor disabled: motor controller unreachable"),
        Event::EmergencyCutoff { speed_kmh } => {
            error!("EMERGENCY: speed limit exceeded ({} km/h), motor stopped", speed_kmh)
        }
        Event::ExcessiveCadence { cadence_rpm } => {
            warn!("motor stopped: excessive cadence ({} rpm)", cadence_rpm)
        }
        Event::ModeChanged { mode, reverse_steps } => {
            info!("mode -> {} (reverse steps {})", mode, reverse_steps)
        }
        Event::PositionWrapped { from, to } => debug!("pedal position wrapped {} -> {}", from, to),
    }
    let _ = EVENTS.try_send(*event);
}
