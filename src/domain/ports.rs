//! Domain Ports - Core trait definitions for the USB probe monitor
//!
//! These traits define the boundaries between the correlation logic and the
//! host: the device tree (sysfs), the storage probe and the report viewer.
//! Adapters implement these traits to provide concrete functionality.

use crate::error::Result;
use crate::probe::ProbeReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Well-known Values
// =============================================================================

/// Device type of a whole USB device (as opposed to one of its interfaces)
pub const DEVTYPE_USB_DEVICE: &str = "usb_device";

/// Device type of a USB interface node
pub const DEVTYPE_USB_INTERFACE: &str = "usb_interface";

/// Device type of a whole block device (as opposed to a partition)
pub const DEVTYPE_DISK: &str = "disk";

/// Mass-Storage interface class code as exposed by sysfs
pub const MASS_STORAGE_CLASS: &str = "08";

/// Property naming the bus a block device is attached through
pub const PROP_ID_BUS: &str = "ID_BUS";

/// Property naming the kind of block device
pub const PROP_ID_TYPE: &str = "ID_TYPE";

// =============================================================================
// Hotplug Event Types
// =============================================================================

/// Hotplug action
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Add,
    Remove,
    Other(String),
}

impl Action {
    pub fn parse(value: &str) -> Self {
        match value {
            "add" => Action::Add,
            "remove" => Action::Remove,
            other => Action::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Add => write!(f, "add"),
            Action::Remove => write!(f, "remove"),
            Action::Other(other) => write!(f, "{}", other),
        }
    }
}

/// Kernel subsystem an event belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subsystem {
    Usb,
    Block,
    Other(String),
}

impl Subsystem {
    pub fn parse(value: &str) -> Self {
        match value {
            "usb" => Subsystem::Usb,
            "block" => Subsystem::Block,
            other => Subsystem::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subsystem::Usb => write!(f, "usb"),
            Subsystem::Block => write!(f, "block"),
            Subsystem::Other(other) => write!(f, "{}", other),
        }
    }
}

/// A single hotplug notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotplugEvent {
    /// What happened
    pub action: Action,
    /// Subsystem of the device
    pub subsystem: Subsystem,
    /// Hierarchical device path (e.g., /devices/pci0000:00/.../1-1)
    pub devpath: String,
    /// Device type tag (e.g., usb_device, disk)
    pub devtype: Option<String>,
    /// Device node (e.g., /dev/sdb)
    pub devnode: Option<String>,
    /// Properties and descriptor attributes
    pub attributes: BTreeMap<String, String>,
}

impl HotplugEvent {
    pub fn new(action: Action, subsystem: Subsystem, devpath: impl Into<String>) -> Self {
        Self {
            action,
            subsystem,
            devpath: devpath.into(),
            devtype: None,
            devnode: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_devtype(mut self, devtype: impl Into<String>) -> Self {
        self.devtype = Some(devtype.into());
        self
    }

    pub fn with_devnode(mut self, devnode: impl Into<String>) -> Self {
        self.devnode = Some(devnode.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Look up an attribute value
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Attribute value, or an empty string when absent
    pub fn attribute_or_empty(&self, key: &str) -> String {
        self.attribute(key).unwrap_or_default().to_string()
    }

    /// Whole USB device (not an interface)
    pub fn is_usb_device(&self) -> bool {
        self.subsystem == Subsystem::Usb && self.devtype.as_deref() == Some(DEVTYPE_USB_DEVICE)
    }

    /// Whole disk attached over USB, with a device node
    pub fn is_usb_disk(&self) -> bool {
        self.subsystem == Subsystem::Block
            && self.devtype.as_deref() == Some(DEVTYPE_DISK)
            && self.attribute(PROP_ID_BUS) == Some("usb")
            && self.attribute(PROP_ID_TYPE) == Some("disk")
            && self.devnode.as_deref().is_some_and(|node| !node.is_empty())
    }
}

// =============================================================================
// Device Record
// =============================================================================

/// One tracked physical USB device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Hierarchical device path (registry key)
    pub usb_path: String,
    /// idVendor
    pub vendor_id: String,
    /// idProduct
    pub product_id: String,
    /// Manufacturer string descriptor
    pub manufacturer: String,
    /// Product string descriptor
    pub product_name: String,
    /// Exposes a Mass-Storage interface (decided once, at first sight)
    pub is_storage_candidate: bool,
    /// Block device node, once correlated
    pub block_device_node: Option<String>,
    /// Block device capacity, when sysfs reported it
    pub capacity_bytes: Option<u64>,
    /// The report for this attachment was dispatched
    pub report_emitted: bool,
    /// First sight of the device
    pub attached_at: DateTime<Utc>,
}

impl DeviceRecord {
    /// Build a record from a USB add event
    pub fn from_event(event: &HotplugEvent, is_storage_candidate: bool) -> Self {
        Self {
            usb_path: event.devpath.clone(),
            vendor_id: event.attribute_or_empty("idVendor"),
            product_id: event.attribute_or_empty("idProduct"),
            manufacturer: event.attribute_or_empty("manufacturer"),
            product_name: event.attribute_or_empty("product"),
            is_storage_candidate,
            block_device_node: None,
            capacity_bytes: None,
            report_emitted: false,
            attached_at: Utc::now(),
        }
    }

    /// Short human label: product name, else vid:pid
    pub fn label(&self) -> String {
        if self.product_name.is_empty() {
            format!("{}:{}", self.vendor_id, self.product_id)
        } else {
            self.product_name.clone()
        }
    }
}

// =============================================================================
// Probe Mode
// =============================================================================

/// How the storage probe exercises a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMode {
    /// Write a known pattern, read it back and compare
    ReadWrite,
    /// Sequential read throughput only
    ReadOnly,
}

impl std::fmt::Display for ProbeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeMode::ReadWrite => write!(f, "read-write"),
            ProbeMode::ReadOnly => write!(f, "read-only"),
        }
    }
}

// =============================================================================
// Device Tree Port
// =============================================================================

/// Port for device hierarchy queries
pub trait DeviceTree: Send + Sync {
    /// Path of the nearest usb_device ancestor of the event's device
    fn usb_device_ancestor(&self, event: &HotplugEvent) -> Option<String>;

    /// Paths of the usb child nodes directly under a USB device
    fn child_interfaces(&self, usb_path: &str) -> Result<Vec<String>>;

    /// Read a sysfs attribute of a device
    fn attribute(&self, devpath: &str, name: &str) -> Option<String>;

    /// Capacity of a block device given its node (e.g., /dev/sdb)
    fn block_capacity_bytes(&self, devnode: &str) -> Option<u64>;
}

// =============================================================================
// Storage Classifier Port
// =============================================================================

/// Port for deciding whether a USB device is a storage candidate
pub trait StorageClassifier: Send + Sync {
    /// True if any child interface declares the Mass-Storage class.
    /// Lookup failures yield false.
    fn is_mass_storage(&self, usb_path: &str) -> bool;
}

// =============================================================================
// Storage Prober Port
// =============================================================================

/// Port for exercising a block device
pub trait StorageProber: Send + Sync {
    /// Run the probe. Failures are recorded in the report, never raised.
    fn probe(&self, devnode: &str, mode: ProbeMode) -> ProbeReport;
}

// =============================================================================
// Report Sink Port
// =============================================================================

/// Port for surfacing a report to the user
pub trait ReportSink: Send + Sync {
    /// Display a report
    fn display(&self, title: &str, body: &str) -> Result<()>;

    /// Sink name for logging
    fn name(&self) -> &str;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type DeviceTreeRef = Arc<dyn DeviceTree>;
pub type StorageClassifierRef = Arc<dyn StorageClassifier>;
pub type StorageProberRef = Arc<dyn StorageProber>;
pub type ReportSinkRef = Arc<dyn ReportSink>;
