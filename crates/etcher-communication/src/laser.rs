//! Laser Control
//!
//! The laser controller sits on its own serial adapter and understands two
//! fixed commands. Each command resolves the controller afresh, opens a
//! short-lived 9600-8-N-1 connection, writes the command and closes.
//!
//! Laser commands never return errors. When the controller cannot be found or
//! reached the outcome carries a warning telling the operator to switch the
//! laser manually. `stop` is the safety fallback of the whole rig and must be
//! callable at any time, including while a failure is being handled.

use crate::communication::{ConnectionParams, PortConnector, PortEnumerator};
use crate::resolver::PortResolver;
use crate::transport::write_fully;
use etcher_core::{LaserCommand, LaserOutcome};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WRITE_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Command strings understood by the laser controller (without terminator)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaserCommands {
    /// Start emitting
    pub fire: String,
    /// Stop emitting
    pub stop: String,
}

impl Default for LaserCommands {
    fn default() -> Self {
        Self {
            fire: "$FIRE 01".to_string(),
            stop: "$STOP 00".to_string(),
        }
    }
}

impl LaserCommands {
    fn frame(&self, command: LaserCommand) -> String {
        match command {
            LaserCommand::Fire => format!("{}\r", self.fire),
            LaserCommand::Stop => format!("{}\r", self.stop),
        }
    }
}

/// Something that can switch the laser
pub trait LaserSwitch: Send + Sync {
    /// Start the laser
    fn fire(&self) -> LaserOutcome;

    /// Stop the laser; safe to call in any state
    fn stop(&self) -> LaserOutcome;
}

/// Laser controller on a serial port identified by its hardware serial number
#[derive(Clone)]
pub struct LaserControl {
    resolver: PortResolver,
    connector: Arc<dyn PortConnector>,
    laser_serial: Option<String>,
    commands: LaserCommands,
}

impl LaserControl {
    /// Create a laser control for the controller with `laser_serial`
    pub fn new(
        enumerator: Arc<dyn PortEnumerator>,
        connector: Arc<dyn PortConnector>,
        laser_serial: Option<String>,
        commands: LaserCommands,
    ) -> Self {
        Self {
            resolver: PortResolver::new(enumerator),
            connector,
            laser_serial,
            commands,
        }
    }

    fn send(&self, command: LaserCommand) -> LaserOutcome {
        let port = match self
            .resolver
            .try_resolve(self.laser_serial.as_deref(), "laser controller")
        {
            Ok(port) => port,
            Err(e) => {
                let warning = not_found_warning(command);
                tracing::warn!("{} ({})", warning, e);
                return LaserOutcome::DeviceNotFound { command, warning };
            }
        };

        match self.write_command(&port, command) {
            Ok(()) => {
                tracing::info!("Laser {} sent to {}", command, port);
                LaserOutcome::Sent { command, port }
            }
            Err(reason) => {
                let warning = unreachable_warning(command, &port, &reason);
                tracing::warn!("{}", warning);
                LaserOutcome::Unreachable {
                    command,
                    port,
                    warning,
                }
            }
        }
    }

    fn write_command(&self, port: &str, command: LaserCommand) -> Result<(), String> {
        let params =
            ConnectionParams::serial(port).with_timeout_ms(POLL_INTERVAL.as_millis() as u64);
        let mut link = self.connector.open(&params).map_err(|e| e.to_string())?;

        let frame = self.commands.frame(command);
        let written = write_fully(
            link.as_mut(),
            frame.as_bytes(),
            Instant::now() + WRITE_TIMEOUT,
            POLL_INTERVAL,
        )
        .and_then(|complete| {
            if complete {
                link.flush()
            } else {
                Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "command not fully written",
                ))
            }
        });

        // Close regardless of the write result
        let closed = link.close();
        written.map_err(|e| e.to_string())?;
        closed.map_err(|e| e.to_string())
    }

    fn send_guarded(&self, command: LaserCommand) -> LaserOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.send(command))) {
            Ok(outcome) => outcome,
            Err(_) => {
                let warning = unreachable_warning(command, "unknown port", "internal fault");
                tracing::error!("{}", warning);
                LaserOutcome::Unreachable {
                    command,
                    port: String::new(),
                    warning,
                }
            }
        }
    }
}

impl LaserSwitch for LaserControl {
    fn fire(&self) -> LaserOutcome {
        self.send_guarded(LaserCommand::Fire)
    }

    fn stop(&self) -> LaserOutcome {
        self.send_guarded(LaserCommand::Stop)
    }
}

fn not_found_warning(command: LaserCommand) -> String {
    match command {
        LaserCommand::Fire => "Could not find laser to turn on! Turn it on manually! \
                               Etching will continue."
            .to_string(),
        LaserCommand::Stop => "Could not find laser to turn off! Turn it off manually!".to_string(),
    }
}

fn unreachable_warning(command: LaserCommand, port: &str, reason: &str) -> String {
    match command {
        LaserCommand::Fire => format!(
            "Could not reach laser at {} to turn it on ({})! Turn it on manually!",
            port, reason
        ),
        LaserCommand::Stop => format!(
            "Could not reach laser at {} to turn it off ({})! Turn it off manually!",
            port, reason
        ),
    }
}
