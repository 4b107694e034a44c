//! # Etcher Session
//!
//! Session layer of the laser etcher:
//! - [`DeviceSession`]: the homing pre-test against the motion controller
//! - [`EtchSession`]: the IDLE/READY/ETCHING/DONE/FAILED state machine
//! - [`SafetyStop`]: the scoped laser stop armed while etching
//!
//! Components are built from an [`etcher_settings::Config`] and a
//! [`Hardware`] bundle, either the system's serial ports or a simulated bus.

pub mod device;
pub mod hardware;
pub mod orchestrator;
pub mod safety;

pub use device::{DeviceSession, HomingProgram, BUNDLED_HOMING_PROGRAM};
pub use hardware::{ack_policy, laser_commands, stream_options, Hardware};
pub use orchestrator::EtchSession;
pub use safety::SafetyStop;
