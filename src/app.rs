//! Command handlers behind the `laser-etcher` binary
//!
//! Every command works against a fresh [`EtchSession`], so the pre-test that
//! an etch depends on always runs in the same process as the etch.

use etcher_communication::{LineProgress, MockBus, SerialPortInfo};
use etcher_core::{EtchAttemptResult, LaserOutcome, PrepareOutcome, Result};
use etcher_session::{EtchSession, Hardware};
use etcher_settings::Config;
use serde::Serialize;
use std::path::Path;

/// Serial number the simulated motion controller reports when none is configured
pub const SIM_MOTION_SERIAL: &str = "SIM-MOTION";
/// Serial number the simulated laser controller reports when none is configured
pub const SIM_LASER_SERIAL: &str = "SIM-LASER";

/// Pre-test and etch results of one `etch` command
#[derive(Debug, Clone, Serialize)]
pub struct EtchReport {
    /// Pre-test outcome
    pub prepare: PrepareOutcome,
    /// Etch result; absent when the pre-test failed
    pub etch: Option<EtchAttemptResult>,
}

impl EtchReport {
    /// Whether the program was etched completely
    pub fn success(&self) -> bool {
        self.etch.as_ref().is_some_and(|etch| etch.success)
    }
}

/// Configuration plus the hardware it runs against
#[derive(Clone)]
pub struct App {
    config: Config,
    hardware: Hardware,
}

impl App {
    /// Run against `hardware`
    pub fn new(config: Config, hardware: Hardware) -> Self {
        Self { config, hardware }
    }

    /// Run against the platform's serial ports
    pub fn system(config: Config) -> Self {
        Self::new(config, Hardware::system())
    }

    /// Run against a simulated rig carrying the configured serial numbers
    pub fn simulated(mut config: Config) -> Self {
        if config.motion_serial_number().is_none() {
            config.devices.serial_number = Some(SIM_MOTION_SERIAL.to_string());
        }
        if config.laser_serial_number().is_none() {
            config.devices.laser_number = Some(SIM_LASER_SERIAL.to_string());
        }

        let bus = MockBus::simulated_rig(
            config.motion_serial_number(),
            config.laser_serial_number(),
        );
        tracing::info!(
            "Simulating motion controller at {} and laser at {}",
            MockBus::SIM_MOTION_PORT,
            MockBus::SIM_LASER_PORT
        );
        Self::new(config, Hardware::simulated(bus))
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A new session in the IDLE state
    pub fn session(&self) -> EtchSession {
        EtchSession::from_config(&self.hardware, &self.config)
    }

    /// Every attached serial port
    pub fn ports(&self) -> Result<Vec<SerialPortInfo>> {
        self.hardware.list_ports()
    }

    /// Run the pre-test only
    pub fn prepare(&self) -> PrepareOutcome {
        self.session().prepare()
    }

    /// Run the pre-test and, if it passes, etch `program`
    pub fn etch(&self, session: &mut EtchSession, program: &Path) -> EtchReport {
        let prepare = session.prepare();
        if !prepare.ready {
            return EtchReport {
                prepare,
                etch: None,
            };
        }

        let mut observer = |progress: &LineProgress<'_>| {
            if progress.line_number % 100 == 0 || progress.line_number == progress.total_lines {
                tracing::info!("Etched {}/{} lines", progress.line_number, progress.total_lines);
            }
        };
        let etch = session.etch_with(program, &mut observer);
        EtchReport {
            prepare,
            etch: Some(etch),
        }
    }

    /// Fire the laser
    pub fn fire(&self) -> LaserOutcome {
        self.session().fire_laser()
    }

    /// Stop the laser
    pub fn stop(&self) -> LaserOutcome {
        self.session().stop_laser()
    }
}
