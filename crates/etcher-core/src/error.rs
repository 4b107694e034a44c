//! Error handling for the laser etcher
//!
//! Provides error types for each layer of the streaming stack:
//! - Connection errors (port discovery, opening, transport I/O)
//! - Protocol errors (controller acknowledgment handshake)
//! - Program errors (loading G-code files)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Represents errors related to finding and talking to a serial device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// No serial number was configured for the device
    #[error("No serial number configured for {device}")]
    MissingSerialNumber {
        /// Which device was being resolved (e.g. "motion controller").
        device: String,
    },

    /// Configured device absent from the current port enumeration
    #[error("No port found with serial number {serial_number}")]
    PortNotFound {
        /// The hardware serial number that was searched for.
        serial_number: String,
    },

    /// The platform port enumeration failed
    #[error("Failed to enumerate serial ports: {reason}")]
    EnumerationFailed {
        /// The reason reported by the platform.
        reason: String,
    },

    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The device path that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },

    /// Connection-level I/O failure, e.g. device unplugged mid-stream
    #[error("I/O error on {port}: {reason}")]
    Io {
        /// The device path.
        port: String,
        /// The underlying I/O error text.
        reason: String,
    },
}

/// Protocol error type
///
/// Raised when the motion controller does not confirm a line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// No acknowledgment arrived before the deadline
    #[error("Line {line_number} not acknowledged within {timeout_ms}ms")]
    AckTimeout {
        /// 1-based program line number.
        line_number: usize,
        /// The acknowledgment timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The controller answered with an error response
    #[error("Line {line_number} rejected by controller: {response}")]
    Rejected {
        /// 1-based program line number.
        line_number: usize,
        /// The raw response line.
        response: String,
    },
}

/// G-code program error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    /// The program file could not be read
    #[error("Failed to read G-code program {path}: {reason}")]
    Unreadable {
        /// The program path.
        path: String,
        /// The reason the file could not be read.
        reason: String,
    },
}

/// Main error type for the etcher
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Program error
    #[error(transparent)]
    Program(#[from] ProgramError),

    /// The operation was cancelled by the caller
    #[error("Cancelled at line {line_number}")]
    Cancelled {
        /// The 1-based line being sent or about to be sent.
        line_number: usize,
    },

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is an acknowledgment timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Protocol(ProtocolError::AckTimeout { .. }))
    }

    /// Check if the configured hardware could not be located
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Connection(
                ConnectionError::PortNotFound { .. }
                    | ConnectionError::MissingSerialNumber { .. }
                    | ConnectionError::EnumerationFailed { .. }
            )
        )
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Io(_))
    }

    /// Check if this is a protocol error
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    /// Check if the caller cancelled the operation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
