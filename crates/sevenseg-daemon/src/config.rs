//! Configuration management.

#![allow(dead_code)]

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sevenseg_hw::{registry::validate_ids, LineId, DEFAULT_LINES, DEVICE_NAME};
use std::path::Path;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Display line configuration
    #[serde(default)]
    pub device: DeviceConfig,

    /// Sysfs backend configuration
    #[serde(default)]
    pub sysfs: SysfsConfig,

    /// D-Bus configuration
    #[serde(default)]
    pub dbus: DbusConfig,
}

/// Which GPIO backend drives the lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Linux `/sys/class/gpio`
    #[default]
    Sysfs,
    /// In-memory lines, for machines without the display
    Simulated,
}

/// Display line configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Name the device is published under
    #[serde(default = "default_name")]
    pub name: String,

    /// GPIO backend
    #[serde(default)]
    pub backend: Backend,

    /// GPIO numbers in segment order (A first)
    #[serde(default = "default_lines")]
    pub lines: Vec<LineId>,

    /// Consumer label used when claiming lines
    #[serde(default = "default_name")]
    pub label: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            backend: Backend::default(),
            lines: default_lines(),
            label: default_name(),
        }
    }
}

/// Sysfs backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SysfsConfig {
    /// GPIO class directory
    #[serde(default = "default_sysfs_root")]
    pub root: String,

    /// How long to wait for an exported line to appear, in milliseconds
    #[serde(default = "default_export_timeout")]
    pub export_timeout_ms: u64,
}

impl Default for SysfsConfig {
    fn default() -> Self {
        Self {
            root: default_sysfs_root(),
            export_timeout_ms: default_export_timeout(),
        }
    }
}

/// D-Bus bus type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbusBusType {
    /// System bus when running as root, otherwise session bus with system fallback
    #[default]
    Auto,
    /// Session bus (user session)
    Session,
    /// System bus (system-wide)
    System,
}

/// D-Bus configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbusConfig {
    /// Bus to publish on
    #[serde(default)]
    pub bus: DbusBusType,
}

// Default value functions
fn default_name() -> String {
    DEVICE_NAME.to_string()
}

fn default_lines() -> Vec<LineId> {
    DEFAULT_LINES.to_vec()
}

fn default_sysfs_root() -> String {
    "/sys/class/gpio".to_string()
}

fn default_export_timeout() -> u64 {
    500
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read configuration file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse configuration")?;
        Ok(config)
    }

    /// Loads configuration from a TOML file, or the defaults if it does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Saves configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path.as_ref(), content).context("Failed to write configuration file")?;
        Ok(())
    }

    /// Checks the line list before any hardware is touched.
    pub fn validate(&self) -> Result<()> {
        validate_ids(&self.device.lines).context("Invalid [device] section")?;
        Ok(())
    }
}
