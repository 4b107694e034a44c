//! Etcher Settings Crate
//!
//! Handles the configuration file: device serial numbers, the acknowledgment
//! protocol, laser command strings and bundled file locations.

pub mod config;
pub mod error;

pub use config::{
    Config, DeviceSettings, EtchSettings, FileSettings, LaserSettings, ProtocolSettings,
};
pub use error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
