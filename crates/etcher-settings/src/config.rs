//! Configuration management for the laser etcher
//!
//! Provides configuration file handling and validation.
//! Supports JSON and TOML file formats; the default file lives in the
//! platform configuration directory.
//!
//! Configuration is organized into logical sections:
//! - Device serial numbers (motion controller, laser controller)
//! - Acknowledgment protocol of the motion controller firmware
//! - Laser command strings
//! - Program files (homing program)
//! - Etch behaviour
//!
//! Relative paths resolve against the directory of the file they were loaded
//! from, so a configuration and its homing program can travel together.

use crate::error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hardware serial numbers of the two controllers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Motion controller serial number
    pub serial_number: Option<String>,
    /// Laser controller serial number
    pub laser_number: Option<String>,
}

/// Acknowledgment handshake of the motion controller firmware
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Response that acknowledges a line
    pub ack_token: String,
    /// Prefix of responses that reject a line (empty disables)
    pub error_prefix: String,
    /// Substring of responses that report the controller as busy (empty disables)
    pub busy_token: String,
    /// Acknowledgment timeout in milliseconds
    pub ack_timeout_ms: u64,
    /// Longest total wait for one line while the controller reports busy
    pub max_busy_wait_ms: u64,
    /// Idle poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Do not transmit blank lines
    pub skip_blank_lines: bool,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            ack_token: "ok".to_string(),
            error_prefix: "error".to_string(),
            busy_token: "busy".to_string(),
            ack_timeout_ms: 30_000,
            max_busy_wait_ms: 120_000,
            poll_interval_ms: 10,
            skip_blank_lines: false,
        }
    }
}

impl ProtocolSettings {
    /// Acknowledgment timeout
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Longest total busy wait per line
    pub fn max_busy_wait(&self) -> Duration {
        Duration::from_millis(self.max_busy_wait_ms)
    }

    /// Idle poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Laser controller command strings, sent with a `\r` terminator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserSettings {
    /// Start emitting
    pub fire_command: String,
    /// Stop emitting
    pub stop_command: String,
}

impl Default for LaserSettings {
    fn default() -> Self {
        Self {
            fire_command: "$FIRE 01".to_string(),
            stop_command: "$STOP 00".to_string(),
        }
    }
}

/// Program files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    /// Program that drives the stage to its reference origin; the program
    /// built into the binary when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homing_program: Option<PathBuf>,
}

/// Etch behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtchSettings {
    /// Fire the laser when streaming starts and stop it when streaming ends
    pub fire_laser: bool,
}

impl Default for EtchSettings {
    fn default() -> Self {
        Self { fire_laser: true }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device serial numbers
    pub devices: DeviceSettings,
    /// Acknowledgment protocol
    pub protocol: ProtocolSettings,
    /// Laser commands
    pub laser: LaserSettings,
    /// Bundled files
    pub files: FileSettings,
    /// Etch behaviour
    pub etch: EtchSettings,
    /// Paths of the external conversion tools; kept but not interpreted
    pub tools: BTreeMap<String, String>,
    /// Directory relative paths resolve against
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration file location
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("laser-etcher").join("config.toml"))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("no platform configuration directory".to_string())
            })
    }

    /// Load `path` if given, otherwise the default file if it exists,
    /// otherwise defaults
    pub fn load_or_default(path: Option<&Path>) -> SettingsResult<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => {
                let path = Self::default_path()?;
                if path.exists() {
                    Self::load_from_file(&path)
                } else {
                    tracing::info!("No configuration at {}, using defaults", path.display());
                    Ok(Self::default())
                }
            }
        }
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = Format::of(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::LoadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match Format::of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content).map_err(|e| SettingsError::SaveError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        let protocol = &self.protocol;
        if protocol.ack_token.trim().is_empty() {
            return Err(ConfigError::invalid("protocol.ack_token", "must not be empty"));
        }

        if protocol.ack_timeout_ms == 0 {
            return Err(ConfigError::invalid("protocol.ack_timeout_ms", "must be > 0"));
        }

        if protocol.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("protocol.poll_interval_ms", "must be > 0"));
        }

        if protocol.poll_interval_ms > protocol.ack_timeout_ms {
            return Err(ConfigError::invalid(
                "protocol.poll_interval_ms",
                "must not exceed ack_timeout_ms",
            ));
        }

        for (key, command) in [
            ("laser.fire_command", &self.laser.fire_command),
            ("laser.stop_command", &self.laser.stop_command),
        ] {
            if command.trim().is_empty() {
                return Err(ConfigError::invalid(key, "must not be empty"));
            }
            if command.contains(['\r', '\n']) {
                return Err(ConfigError::invalid(key, "must not contain line terminators"));
            }
        }

        if let Some(homing) = &self.files.homing_program {
            if homing.as_os_str().is_empty() {
                return Err(ConfigError::invalid("files.homing_program", "must not be empty"));
            }
        }

        Ok(())
    }

    /// Set the directory relative paths resolve against
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Directory relative paths resolve against, if any
    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    /// Resolve `path` against the configuration's directory
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Location of a configured homing program, resolved against the
    /// configuration's directory
    pub fn homing_program_path(&self) -> Option<PathBuf> {
        self.files
            .homing_program
            .as_deref()
            .map(|path| self.resolve_path(path))
    }

    /// Motion controller serial number; blank values count as unset
    pub fn motion_serial_number(&self) -> Option<&str> {
        non_blank(self.devices.serial_number.as_deref())
    }

    /// Laser controller serial number; blank values count as unset
    pub fn laser_serial_number(&self) -> Option<&str> {
        non_blank(self.devices.laser_number.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> ConfigResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("toml") => Ok(Self::Toml),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}
