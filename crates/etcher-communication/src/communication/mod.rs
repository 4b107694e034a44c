//! Serial connection primitives
//!
//! Provides the connection parameters shared by the motion and laser
//! controllers, and the traits the rest of the crate talks to hardware through:
//! - [`PortEnumerator`] lists the currently attached serial ports
//! - [`PortConnector`] opens a port and hands back a [`SerialLink`]
//!
//! [`SystemPorts`] implements both over the `serialport` crate; the
//! [`mock`] module provides a simulated bus for tests and dry runs.

pub mod mock;
pub mod serial;

use etcher_core::Result;
use serde::{Deserialize, Serialize};
use std::io;

pub use serial::{list_ports, RealSerialPort, SerialPortInfo};

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity bit
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

/// Parameters used to open a serial connection
///
/// Both controllers speak 9600-8-N-1 without flow control. The firmware does
/// not negotiate, so any other framing silently fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Device path (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits per character
    pub data_bits: u8,
    /// Stop bits
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Hardware flow control
    pub flow_control: bool,
    /// Per-call read/write timeout of the port in milliseconds
    pub timeout_ms: u64,
}

impl ConnectionParams {
    /// Controller baud rate
    pub const BAUD_RATE: u32 = 9600;

    /// 9600-8-N-1 parameters for the given device path
    pub fn serial(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: Self::BAUD_RATE,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: false,
            timeout_ms: 10,
        }
    }

    /// Set the per-call port timeout
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms.max(1);
        self
    }
}

/// An open, byte-oriented serial connection
///
/// Reads and writes follow `std::io` conventions: a `TimedOut` error means
/// nothing happened within the port timeout and the call may be retried.
pub trait SerialLink: Send {
    /// Write data to the port, returning how many bytes were accepted
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Read available data from the port
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Flush buffered output to the device
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Drop any unread input (e.g. boot banners) held by the driver
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Device path of the port
    fn name(&self) -> String;

    /// Close the port; further I/O fails with `NotConnected`
    fn close(&mut self) -> io::Result<()>;
}

/// Source of the currently attached serial ports
pub trait PortEnumerator: Send + Sync {
    /// Enumerate every attached port, unfiltered
    fn available_ports(&self) -> Result<Vec<SerialPortInfo>>;
}

/// Opens serial connections
pub trait PortConnector: Send + Sync {
    /// Open the port described by `params`
    fn open(&self, params: &ConnectionParams) -> Result<Box<dyn SerialLink>>;
}

/// The platform's serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn available_ports(&self) -> Result<Vec<SerialPortInfo>> {
        list_ports()
    }
}

impl PortConnector for SystemPorts {
    fn open(&self, params: &ConnectionParams) -> Result<Box<dyn SerialLink>> {
        Ok(Box::new(RealSerialPort::open(params)?))
    }
}
