//! # Laser Etcher
//!
//! Serial handshake and G-code streaming for a two-controller laser etcher:
//! a motion controller that acknowledges every G-code line, and a laser
//! controller that understands a fire and a stop command.
//!
//! ## Architecture
//!
//! The project is organized as a workspace with multiple crates:
//!
//! 1. **etcher-core** - Errors, session states and caller-facing result shapes
//! 2. **etcher-communication** - Port discovery, line transport, streaming, laser control
//! 3. **etcher-settings** - Configuration loading and validation
//! 4. **etcher-session** - Pre-test and the etch session state machine
//! 5. **laser-etcher** - Command line binary that integrates all crates
//!
//! ## Flow
//!
//! - **Pre-test**: resolve the motion controller by serial number, stream the homing program
//! - **Etch**: stream the user program line by line, each line gated on an acknowledgment
//! - **Safety**: any failure while etching stops the laser exactly once

pub mod app;

pub use app::{App, EtchReport};

pub use etcher_communication::{
    AckPolicy, CancelToken, GcodeProgram, GcodeStreamer, LaserControl, LaserSwitch, LineProgress,
    MockBus, MockDevice, SerialPortInfo,
};
pub use etcher_core::{
    reasons, EtchAttemptResult, Error, LaserCommand, LaserOutcome, PrepareOutcome, Result,
    SessionState,
};
pub use etcher_session::{DeviceSession, EtchSession, Hardware, SafetyStop};
pub use etcher_settings::Config;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable, multi-line records
    #[default]
    Pretty,
    /// One JSON object per record
    Json,
}

/// Initialize logging
///
/// Sets up structured logging with:
/// - Output on stderr, keeping stdout free for results
/// - RUST_LOG environment variable support, defaulting to `info`
/// - Pretty or JSON records
pub fn init_logging(format: LogFormat) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .with_thread_names(true)
                .pretty();
            registry.with(fmt_layer).try_init()?;
        }
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(false);
            registry.with(fmt_layer).try_init()?;
        }
    }

    Ok(())
}
