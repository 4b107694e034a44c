//! Data models shared across the etcher crates
//!
//! This module provides:
//! - The etch session state machine states
//! - Caller-facing result shapes for the pre-test and the full etch
//! - Laser command outcomes, including manual-intervention warnings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Human-readable failure reasons surfaced to callers
pub mod reasons {
    /// Configured hardware is not in the current port enumeration
    pub const PORT_NOT_FOUND: &str = "port not found";
    /// The homing program could not be streamed
    pub const STREAMING_ERROR: &str = "streaming error";
    /// The user program failed while etching
    pub const CRITICAL_STREAM_ERROR: &str = "critical error streaming gcode";
    /// `etch` was requested before a successful `prepare`
    pub const NOT_PREPARED: &str = "device not prepared";
    /// A fault other than a stream error interrupted the etch
    pub const UNEXPECTED_FAULT: &str = "unexpected fault during etch";
    /// The caller cancelled the etch
    pub const CANCELLED: &str = "etch cancelled";
}

/// Etch session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No device prepared
    Idle,
    /// Homing succeeded; a motion controller path is cached
    Ready,
    /// Streaming the user program
    Etching,
    /// Program streamed completely
    Done,
    /// Streaming failed; the safety stop has run
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Ready => write!(f, "READY"),
            Self::Etching => write!(f, "ETCHING"),
            Self::Done => write!(f, "DONE"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Result of the pre-test (homing) run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareOutcome {
    /// Whether the device is ready for an etch
    pub ready: bool,
    /// Resolved motion controller path, when found
    pub device_path: Option<String>,
    /// Failure reason; empty when ready
    pub reason: String,
    /// Underlying error text, if any
    pub detail: Option<String>,
}

impl PrepareOutcome {
    /// Device homed and ready at `device_path`
    pub fn ready(device_path: impl Into<String>) -> Self {
        Self {
            ready: true,
            device_path: Some(device_path.into()),
            reason: String::new(),
            detail: None,
        }
    }

    /// Device not ready
    pub fn not_ready(reason: &str, detail: Option<String>) -> Self {
        Self {
            ready: false,
            device_path: None,
            reason: reason.to_string(),
            detail,
        }
    }

    /// Attach the device path that was resolved before the failure
    pub fn with_device_path(mut self, device_path: impl Into<String>) -> Self {
        self.device_path = Some(device_path.into());
        self
    }
}

/// Command understood by the laser controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaserCommand {
    /// Start emitting
    Fire,
    /// Stop emitting
    Stop,
}

impl fmt::Display for LaserCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fire => write!(f, "fire"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

/// Outcome of a single laser command
///
/// Laser commands never fail with an error. When the controller cannot be
/// reached the outcome carries a warning asking for manual intervention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LaserOutcome {
    /// Command written to the controller
    Sent {
        /// The command that was sent
        command: LaserCommand,
        /// Device path of the laser controller
        port: String,
    },
    /// No laser controller in the current enumeration
    DeviceNotFound {
        /// The command that could not be sent
        command: LaserCommand,
        /// User-facing warning
        warning: String,
    },
    /// Laser controller found but opening or writing failed
    Unreachable {
        /// The command that could not be sent
        command: LaserCommand,
        /// Device path of the laser controller
        port: String,
        /// User-facing warning
        warning: String,
    },
}

impl LaserOutcome {
    /// Whether the command reached the controller
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }

    /// Manual-intervention warning, if the command did not reach the controller
    pub fn warning(&self) -> Option<&str> {
        match self {
            Self::Sent { .. } => None,
            Self::DeviceNotFound { warning, .. } | Self::Unreachable { warning, .. } => {
                Some(warning)
            }
        }
    }

    /// The command this outcome refers to
    pub fn command(&self) -> LaserCommand {
        match self {
            Self::Sent { command, .. }
            | Self::DeviceNotFound { command, .. }
            | Self::Unreachable { command, .. } => *command,
        }
    }
}

/// Result of one full etch attempt
///
/// All-or-nothing: a failed run carries no partial-progress information and
/// must be restarted from the first line after a fresh pre-test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtchAttemptResult {
    /// Identifier used in log records for this attempt
    pub session_id: Uuid,
    /// Whether the whole program was acknowledged
    pub success: bool,
    /// Failure reason; empty on success
    pub reason: String,
    /// Underlying error text, if any
    pub detail: Option<String>,
    /// Warnings that need operator attention (e.g. manual laser shutoff)
    pub warnings: Vec<String>,
    /// When the attempt started
    pub started_at: DateTime<Utc>,
    /// When the attempt finished
    pub finished_at: DateTime<Utc>,
}

impl EtchAttemptResult {
    /// Successful attempt
    pub fn succeeded(session_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            success: true,
            reason: String::new(),
            detail: None,
            warnings: Vec::new(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Failed attempt
    pub fn failed(
        session_id: Uuid,
        started_at: DateTime<Utc>,
        reason: &str,
        detail: Option<String>,
    ) -> Self {
        Self {
            session_id,
            success: false,
            reason: reason.to_string(),
            detail,
            warnings: Vec::new(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Append the warning carried by a laser outcome, if any
    pub fn note_laser(&mut self, outcome: &LaserOutcome) {
        if let Some(warning) = outcome.warning() {
            self.warnings.push(warning.to_string());
        }
    }
}
