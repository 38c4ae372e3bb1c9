//! USB Probe Monitor
//!
//! Watches USB hotplug activity, recognizes mass-storage devices, waits for
//! the kernel to surface their block device and runs a bounded throughput
//! and integrity probe against it, then shows a report.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                 Netlink Monitor (NETLINK_KOBJECT_UEVENT)              │
//! │            poll ─► receive ─► decode ─► filter ─► enrich              │
//! └──────────────────────────────────┬───────────────────────────────────┘
//!                                    │ HotplugEvent
//! ┌──────────────────────────────────┴───────────────────────────────────┐
//! │                        Correlation Engine                             │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌─────────────────────┐  │
//! │  │  Device Registry │  │ Mass-Storage     │  │  Sysfs Device Tree  │  │
//! │  │  (path-keyed)    │  │ Classifier       │  │  (ancestors, size)  │  │
//! │  └──────────────────┘  └──────────────────┘  └─────────────────────┘  │
//! └──────────────────────────────────┬───────────────────────────────────┘
//!                                    │ block device of a storage candidate
//! ┌──────────────────────────────────┴───────────────────────────────────┐
//! │  Storage Probe (read-write / read-only)  ─►  Report ─► Zenity/Stdout  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`hotplug`]: Netlink event source, uevent codec, sysfs device tree
//! - [`engine`]: Event correlation and report dispatch
//! - [`hardware`]: USB discovery, classification and the device registry
//! - [`probe`]: Storage throughput and integrity probe
//! - [`report`]: Report layout and display sinks
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod hotplug;
pub mod probe;
pub mod report;
pub mod shutdown;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::{DisplayBackend, MonitorConfig, NetlinkGroup};

pub use domain::ports::{
    Action, DeviceRecord, HotplugEvent, ProbeMode, Subsystem,
    DeviceTree, StorageClassifier, StorageProber, ReportSink,
};

pub use engine::CorrelationEngine;

pub use error::{Error, Result, Severity};

pub use hardware::{
    AttachedDevice, DeviceRegistry, MassStorageClassifier, RegistryEvent, RegistryStats,
    ScannerConfig, UsbScanner,
};

pub use hotplug::{NetlinkMonitor, SysfsDeviceTree};

pub use probe::{BlockDeviceProber, ProbeConfig, ProbeReport, StorageTester};

pub use report::{StdoutDisplay, ZenityDisplay};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
