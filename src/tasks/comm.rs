//! Communication cycle (20 Hz): query the motor controller, publish
//! telemetry, send the current command.

use embassy_time::{with_timeout, Instant};

use crate::config::{ControllerConfig, COMM_COMMAND_TIMEOUT, COMM_WRITE_TIMEOUT, LINK_QUERY_TIMEOUT};
use crate::control::battery::{percentage_from_voltage, BatteryMonitor};
use crate::control::link::{telemetry_from_values, CommandThrottle, LinkSupervisor};
use crate::drivers::vesc::{LinkError, MotorLink};
use crate::events::log_event;
use crate::state::{MotorCommand, SharedState, TelemetrySnapshot};

pub struct CommLoop<L> {
    link: L,
    supervisor: LinkSupervisor,
    throttle: CommandThrottle,
    battery: BatteryMonitor,
    telemetry: TelemetrySnapshot,
    command: MotorCommand,
    battery_led: bool,
}

impl<L: MotorLink> CommLoop<L> {
    pub fn new(link: L, config: &ControllerConfig) -> Self {
        Self {
            link,
            supervisor: LinkSupervisor::new(),
            throttle: CommandThrottle::new(),
            battery: BatteryMonitor::new(config),
            telemetry: TelemetrySnapshot::ZERO,
            command: MotorCommand::ZERO,
            battery_led: false,
        }
    }

    /// Query the controller and fold the result into the telemetry copy.
    async fn refresh_telemetry(&mut self, now: Instant) {
        let result = match with_timeout(LINK_QUERY_TIMEOUT, self.link.query_values()).await {
            Ok(r) => r,
            Err(_) => Err(LinkError::Timeout),
        };

        match result {
            Ok(values) => {
                let mut t = telemetry_from_values(&values, now);
                let percentage = percentage_from_voltage(t.battery_voltage);
                if let Some(event) = self.battery.update(t.battery_voltage, percentage) {
                    log_event(&event);
                }
                let battery = self.battery.status();
                t.battery_percentage = battery.percentage;
                t.battery_low = battery.low();
                t.battery_critical = battery.critical();
                if !t.valid {
                    debug!("implausible motor speed, erpm {}", t.erpm);
                }
                self.telemetry = t;
                if let Some(event) = self.supervisor.on_success() {
                    log_event(&event);
                }
            }
            Err(_) => {
                // keep battery and extended fields from the last good reply
                self.telemetry.valid = false;
                self.telemetry.speed_kmh = 0.0;
                trace!("motor controller query failed");
                if let Some(event) = self.supervisor.on_failure(now) {
                    log_event(&event);
                }
            }
        }
        self.telemetry.link_failsafe = self.supervisor.failsafe();
    }

    /// Current to send this cycle: nothing while the link fail-safe is active.
    fn current_to_send(&self) -> f32 {
        if self.supervisor.failsafe() {
            0.0
        } else {
            self.command.current_a()
        }
    }

    pub async fn run_once(&mut self, shared: &SharedState, now: Instant) -> TelemetrySnapshot {
        // ── A. Telemetry ──────────────────────────────────────────────────────
        self.refresh_telemetry(now).await;
        self.battery_led = self.battery.update_led(now);
        if !shared.telemetry.write(self.telemetry, COMM_WRITE_TIMEOUT).await {
            trace!("telemetry write skipped");
        }

        // ── B. Command ────────────────────────────────────────────────────────
        if let Some(cmd) = shared.command.read(COMM_COMMAND_TIMEOUT).await {
            self.command = cmd;
        }
        let amps = self.current_to_send();
        if self.throttle.should_send(amps) {
            match with_timeout(LINK_QUERY_TIMEOUT, self.link.send_current(amps)).await {
                Ok(Ok(())) => self.throttle.mark_sent(amps),
                Ok(Err(_)) | Err(_) => trace!("current command not sent"),
            }
        }

        self.telemetry
    }

    /// Battery warning LED level for this cycle.
    pub fn battery_led(&self) -> bool {
        self.battery_led
    }

    #[cfg(test)]
    pub(crate) fn link(&self) -> &L {
        &self.link
    }
}
