//! Hardware wiring
//!
//! Bundles the port source and connector every session component shares, and
//! turns configuration sections into the communication layer's parameters.

use etcher_communication::{
    AckPolicy, LaserCommands, LaserControl, MockBus, PortConnector, PortEnumerator,
    SerialPortInfo, StreamOptions, SystemPorts,
};
use etcher_core::Result;
use etcher_settings::{Config, LaserSettings, ProtocolSettings};
use std::sync::Arc;

/// Port source and connector used by a session
#[derive(Clone)]
pub struct Hardware {
    /// Enumerates attached ports
    pub enumerator: Arc<dyn PortEnumerator>,
    /// Opens ports
    pub connector: Arc<dyn PortConnector>,
}

impl Hardware {
    /// The platform's serial ports
    pub fn system() -> Self {
        Self {
            enumerator: Arc::new(SystemPorts),
            connector: Arc::new(SystemPorts),
        }
    }

    /// A simulated bus
    pub fn simulated(bus: MockBus) -> Self {
        let bus = Arc::new(bus);
        Self {
            enumerator: bus.clone(),
            connector: bus,
        }
    }

    /// Every attached port
    pub fn list_ports(&self) -> Result<Vec<SerialPortInfo>> {
        self.enumerator.available_ports()
    }

    /// Laser control for the controller named in `config`
    pub fn laser_control(&self, config: &Config) -> LaserControl {
        LaserControl::new(
            Arc::clone(&self.enumerator),
            Arc::clone(&self.connector),
            config.laser_serial_number().map(str::to_string),
            laser_commands(&config.laser),
        )
    }
}

/// Acknowledgment policy described by the protocol settings
pub fn ack_policy(protocol: &ProtocolSettings) -> AckPolicy {
    AckPolicy {
        ack_token: protocol.ack_token.clone(),
        error_prefix: non_empty(&protocol.error_prefix),
        busy_token: non_empty(&protocol.busy_token),
        timeout: protocol.ack_timeout(),
        max_busy_wait: protocol.max_busy_wait(),
        poll_interval: protocol.poll_interval(),
    }
}

/// Streaming options described by the protocol settings
pub fn stream_options(protocol: &ProtocolSettings) -> StreamOptions {
    StreamOptions {
        skip_blank_lines: protocol.skip_blank_lines,
    }
}

/// Laser command strings described by the laser settings
pub fn laser_commands(laser: &LaserSettings) -> LaserCommands {
    LaserCommands {
        fire: laser.fire_command.clone(),
        stop: laser.stop_command.clone(),
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}
