//! Device Session
//!
//! The pre-test: find the motion controller by its serial number and stream
//! the homing program to it. A device that homes cleanly is ready to etch.
//! Errors never escape; they are folded into a [`PrepareOutcome`] whose
//! reason tells "hardware not found" apart from "communication failed".
//!
//! The homing program comes from a configured file, or from the copy built
//! into the binary when none is configured.

use crate::hardware::{ack_policy, stream_options, Hardware};
use etcher_communication::{
    AckPolicy, CancelToken, GcodeProgram, GcodeStreamer, NoopObserver, PortResolver,
    StreamObserver, StreamOptions,
};
use etcher_core::{reasons, PrepareOutcome, Result};
use etcher_settings::Config;
use std::path::{Path, PathBuf};

/// Homing program shipped with the binary
pub const BUNDLED_HOMING_PROGRAM: &str = include_str!("../assets/homing.gcode");

/// Where the homing program is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HomingProgram {
    /// The program built into the binary
    Bundled,
    /// A G-code file, read on every pre-test
    File(PathBuf),
}

impl HomingProgram {
    /// Read the program
    pub fn load(&self) -> Result<GcodeProgram> {
        match self {
            Self::Bundled => Ok(GcodeProgram::from_text(BUNDLED_HOMING_PROGRAM)),
            Self::File(path) => GcodeProgram::load(path),
        }
    }

    /// File path, if the program is not the bundled one
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Bundled => None,
            Self::File(path) => Some(path),
        }
    }
}

impl From<PathBuf> for HomingProgram {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<&Path> for HomingProgram {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

impl From<&str> for HomingProgram {
    fn from(path: &str) -> Self {
        Self::File(PathBuf::from(path))
    }
}

/// Pre-test runner for the motion controller
#[derive(Clone)]
pub struct DeviceSession {
    resolver: PortResolver,
    streamer: GcodeStreamer,
    serial_number: Option<String>,
    homing_program: HomingProgram,
}

impl DeviceSession {
    /// Create a session for the controller with `serial_number`
    pub fn new(
        hardware: &Hardware,
        serial_number: Option<String>,
        homing_program: impl Into<HomingProgram>,
        policy: AckPolicy,
        options: StreamOptions,
    ) -> Self {
        Self {
            resolver: PortResolver::new(hardware.enumerator.clone()),
            streamer: GcodeStreamer::new(hardware.connector.clone(), policy).with_options(options),
            serial_number,
            homing_program: homing_program.into(),
        }
    }

    /// Create a session from configuration
    pub fn from_config(hardware: &Hardware, config: &Config) -> Self {
        Self::new(
            hardware,
            config.motion_serial_number().map(str::to_string),
            config
                .homing_program_path()
                .map_or(HomingProgram::Bundled, HomingProgram::File),
            ack_policy(&config.protocol),
            stream_options(&config.protocol),
        )
    }

    /// Streamer bound to this session's connector and policy
    pub fn streamer(&self) -> &GcodeStreamer {
        &self.streamer
    }

    /// Source of the homing program
    pub fn homing_program(&self) -> &HomingProgram {
        &self.homing_program
    }

    /// Run the pre-test
    pub fn prepare(&self) -> PrepareOutcome {
        self.prepare_with(&mut NoopObserver, &CancelToken::new())
    }

    /// Run the pre-test, reporting homing progress to `observer`
    pub fn prepare_with(
        &self,
        observer: &mut dyn StreamObserver,
        cancel: &CancelToken,
    ) -> PrepareOutcome {
        let device_path = match self
            .resolver
            .try_resolve(self.serial_number.as_deref(), "motion controller")
        {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("Pre-test: motion controller not found: {}", e);
                return PrepareOutcome::not_ready(reasons::PORT_NOT_FOUND, Some(e.to_string()));
            }
        };

        let program = match self.homing_program.load() {
            Ok(program) => program,
            Err(e) => {
                tracing::error!("Pre-test: {}", e);
                return PrepareOutcome::not_ready(reasons::STREAMING_ERROR, Some(e.to_string()))
                    .with_device_path(device_path);
            }
        };

        match self
            .streamer
            .stream_with(&program, &device_path, observer, cancel)
        {
            Ok(report) => {
                tracing::info!(
                    "Pre-test passed on {} ({} lines)",
                    device_path,
                    report.lines_sent
                );
                PrepareOutcome::ready(device_path)
            }
            Err(e) => {
                let reason = if e.is_cancelled() {
                    reasons::CANCELLED
                } else {
                    reasons::STREAMING_ERROR
                };
                tracing::warn!("Pre-test failed on {}: {}", device_path, e);
                PrepareOutcome::not_ready(reason, Some(e.to_string())).with_device_path(device_path)
            }
        }
    }
}
