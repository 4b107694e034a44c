//! Port Resolver
//!
//! Matches a configured hardware serial number against the ports that are
//! attached right now. USB device paths move between plugs and reboots, so a
//! resolution is never cached: every pre-test and every laser command resolves
//! afresh.

use crate::communication::{PortEnumerator, SerialPortInfo};
use etcher_core::{ConnectionError, Result};
use std::sync::Arc;

/// A configured device and the path it resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialDevice {
    /// The serial number from configuration
    pub configured_serial_number: String,
    /// The device path found in the current enumeration
    pub resolved_path: Option<String>,
}

/// Resolves configured serial numbers to device paths
#[derive(Clone)]
pub struct PortResolver {
    enumerator: Arc<dyn PortEnumerator>,
}

impl PortResolver {
    /// Create a resolver over the given port source
    pub fn new(enumerator: Arc<dyn PortEnumerator>) -> Self {
        Self { enumerator }
    }

    /// Device path of the first port whose serial number equals
    /// `serial_number`, or `None` when it is absent, empty or not attached
    pub fn resolve(&self, serial_number: Option<&str>) -> Option<String> {
        self.try_resolve(serial_number, "device").ok()
    }

    /// Like [`resolve`](Self::resolve), but reports why resolution failed
    ///
    /// An absent or empty serial number fails immediately without enumerating.
    /// `device` names the hardware in the error (e.g. "laser controller").
    pub fn try_resolve(&self, serial_number: Option<&str>, device: &str) -> Result<String> {
        let serial_number = match serial_number {
            Some(s) if !s.trim().is_empty() => s,
            _ => {
                return Err(ConnectionError::MissingSerialNumber {
                    device: device.to_string(),
                }
                .into())
            }
        };

        let ports = self.enumerator.available_ports()?;
        match find_by_serial(&ports, serial_number) {
            Some(port) => {
                tracing::debug!(
                    "Resolved {} serial {} to {}",
                    device,
                    serial_number,
                    port.port_name
                );
                Ok(port.port_name.clone())
            }
            None => {
                tracing::debug!(
                    "No {} with serial {} among {} ports",
                    device,
                    serial_number,
                    ports.len()
                );
                Err(ConnectionError::PortNotFound {
                    serial_number: serial_number.to_string(),
                }
                .into())
            }
        }
    }

    /// Resolve into a [`SerialDevice`] record
    pub fn locate(&self, serial_number: &str) -> SerialDevice {
        SerialDevice {
            configured_serial_number: serial_number.to_string(),
            resolved_path: self.resolve(Some(serial_number)),
        }
    }
}

/// First port whose hardware serial number equals `serial_number` exactly
pub fn find_by_serial<'a>(
    ports: &'a [SerialPortInfo],
    serial_number: &str,
) -> Option<&'a SerialPortInfo> {
    ports
        .iter()
        .find(|p| p.serial_number.as_deref() == Some(serial_number))
}
