//! Companion consumer: status lines out, single-letter commands in.
//!
//! Transport-agnostic; the firmware wires it to the USB serial port.

use core::fmt::Write;

use heapless::{String, Vec};

use crate::config::AssistProfileTable;
use crate::control::mode::{ModeControl, ModeError};
use crate::events::Event;
use crate::state::{SensorSnapshot, TelemetrySnapshot};

pub const LINE_LEN: usize = 160;
pub const COMMAND_LEN: usize = 16;

pub type Line = String<LINE_LEN>;

pub fn sensor_line(s: &SensorSnapshot, profiles: &AssistProfileTable) -> Line {
    let mut m = Line::new();
    let _ = write!(
        m,
        "[PAS] {:.1}rpm {} pos={} trq={:.1}Nm raw={} mode={}({}) light={} human={:.0}W k={:.2} assist={:.0}W I={:.2}A motor={}\r\n",
        s.cadence_rpm,
        s.direction.as_str(),
        s.position,
        s.torque_nm,
        s.torque_raw,
        s.mode,
        profiles.name(s.mode as usize),
        s.light_on as u8,
        s.human_power_w,
        s.assist_factor,
        s.assist_power_w,
        s.target_current_a,
        if s.motor_enabled { "ON" } else { "OFF" },
    );
    m
}

pub fn telemetry_line(t: &TelemetrySnapshot) -> Line {
    let mut m = Line::new();
    let _ = write!(
        m,
        "[VESC] ok={} {:.1}km/h {:.0}erpm duty={:.1}% I={:.2}A bat={:.1}V {:.0}% low={} crit={} fet={:.1}C mot={:.1}C {:.2}Ah {:.1}Wh fs={}\r\n",
        t.valid as u8,
        t.speed_kmh,
        t.erpm,
        t.duty_cycle_pct,
        t.actual_current_a,
        t.battery_voltage,
        t.battery_percentage,
        t.battery_low as u8,
        t.battery_critical as u8,
        t.temp_mosfet_c,
        t.temp_motor_c,
        t.amp_hours,
        t.watt_hours,
        t.link_failsafe as u8,
    );
    m
}

pub fn event_line(event: &Event) -> Line {
    let mut m = Line::new();
    let _ = match *event {
        Event::BatteryLevelChanged { from, to, voltage, percentage } => write!(
            m,
            "[EVT] battery {} -> {} {:.1}V {:.0}%\r\n",
            from.as_str(),
            to.as_str(),
            voltage,
            percentage
        ),
        Event::TelemetryLost => write!(m, "[EVT] motor controller lost\r\n"),
        Event::TelemetryRestored => write!(m, "[EVT] motor controller restored\r\n"),
        Event::LinkFailsafe => write!(m, "[EVT] motor disabled, controller unreachable\r\n"),
        Event::EmergencyCutoff { speed_kmh } => write!(m, "[EVT] EMERGENCY stop at {:.1}km/h\r\n", speed_kmh),
        Event::ExcessiveCadence { cadence_rpm } => write!(m, "[EVT] cadence fault {:.0}rpm\r\n", cadence_rpm),
        Event::ModeChanged { mode, reverse_steps } => {
            write!(m, "[EVT] mode {} (reverse {})\r\n", mode, reverse_steps)
        }
        Event::PositionWrapped { from, to } => write!(m, "[EVT] position wrap {} -> {}\r\n", from, to),
    };
    m
}

/// Split `line` into transfer packets of at most `packet_size` bytes
/// (non-zero). A line filling its last packet exactly gets a trailing
/// empty packet so the host sees the transfer end.
pub fn packets(line: &[u8], packet_size: usize) -> impl Iterator<Item = &[u8]> {
    let needs_zlp = !line.is_empty() && line.len() % packet_size == 0;
    line.chunks(packet_size).chain(needs_zlp.then_some(&line[..0]))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// `m<index>`
    SetMode(i32),
}

/// Parse one line, surrounding whitespace ignored.
pub fn parse_command(line: &[u8]) -> Option<Command> {
    let line = core::str::from_utf8(line).ok()?.trim();
    let digits = line.strip_prefix('m').or_else(|| line.strip_prefix('M'))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(Command::SetMode)
}

pub fn execute(cmd: Command, modes: &ModeControl, profiles: &AssistProfileTable) -> Line {
    let mut m = Line::new();
    let _ = match cmd {
        Command::SetMode(index) => match modes.set_mode(index) {
            Ok(mode) => write!(m, "[CMD] mode {} ({})\r\n", mode, profiles.name(mode as usize)),
            Err(ModeError::OutOfRange { requested, available }) => {
                write!(m, "[CMD] mode {} rejected, 0..{} available\r\n", requested, available)
            }
        },
    };
    m
}

/// Collects received bytes into lines. Over-long lines are discarded.
pub struct LineAssembler {
    buf: Vec<u8, COMMAND_LEN>,
    overflow: bool,
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            overflow: false,
        }
    }

    /// Feed one byte; returns a command when it completes a valid line.
    pub fn push(&mut self, b: u8) -> Option<Command> {
        if b == b'\n' || b == b'\r' {
            let cmd = if self.overflow { None } else { parse_command(&self.buf) };
            self.buf.clear();
            self.overflow = false;
            return cmd;
        }
        if self.buf.push(b).is_err() {
            self.overflow = true;
        }
        None
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}
