//! Monitor Configuration
//!
//! Settings for the hotplug monitor, loadable from YAML. Command line flags
//! are applied on top of the file values by the binary.

use crate::domain::ports::ProbeMode;
use crate::error::{Error, Result};
use crate::probe::ProbeConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// =============================================================================
// Enumerations
// =============================================================================

/// Netlink multicast group to listen on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NetlinkGroup {
    /// Raw kernel uevents
    Kernel,
    /// Events re-broadcast by the udev daemon after rule processing
    #[default]
    Udev,
}

impl NetlinkGroup {
    /// Multicast group bitmask
    pub fn mask(&self) -> u32 {
        match self {
            NetlinkGroup::Kernel => 1,
            NetlinkGroup::Udev => 2,
        }
    }
}

impl std::fmt::Display for NetlinkGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetlinkGroup::Kernel => write!(f, "kernel"),
            NetlinkGroup::Udev => write!(f, "udev"),
        }
    }
}

/// Where reports are shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DisplayBackend {
    /// zenity text window
    #[default]
    Zenity,
    /// Standard output
    Stdout,
}

// =============================================================================
// Monitor Configuration
// =============================================================================

/// Configuration for the monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Path to sysfs
    pub sysfs_path: PathBuf,
    /// Netlink multicast group
    pub netlink_group: NetlinkGroup,
    /// Bounded wait per poll (milliseconds)
    pub poll_timeout_ms: u64,
    /// Probe mode for detected storage
    pub probe_mode: ProbeMode,
    /// Report viewer
    pub display: DisplayBackend,
    /// Directory for temporary report files
    pub report_dir: PathBuf,
    /// Socket receive buffer size
    pub receive_buffer_bytes: usize,
    /// Probe sizing
    pub probe: ProbeConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sysfs_path: PathBuf::from("/sys"),
            netlink_group: NetlinkGroup::Udev,
            poll_timeout_ms: 1000,
            probe_mode: ProbeMode::ReadOnly,
            display: DisplayBackend::Zenity,
            report_dir: PathBuf::from("/var/tmp"),
            receive_buffer_bytes: 1024 * 1024,
            probe: ProbeConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::ConfigFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: MonitorConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the monitor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.poll_timeout_ms == 0 {
            return Err(Error::Configuration("poll_timeout_ms must be positive".into()));
        }
        if self.probe.block_size == 0 {
            return Err(Error::Configuration("probe.block_size must be positive".into()));
        }
        if self.probe.read_write_bytes < self.probe.block_size as u64 {
            return Err(Error::Configuration(
                "probe.read_write_bytes must cover at least one block".into(),
            ));
        }
        Ok(())
    }
}
