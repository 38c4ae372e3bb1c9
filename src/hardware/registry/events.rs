//! Registry Events
//!
//! Events emitted by the device registry for observers that want to follow
//! device lifecycle and correlation decisions.

use serde::{Deserialize, Serialize};

/// Events emitted by the device registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEvent {
    /// A USB device started being tracked
    DeviceAttached {
        usb_path: String,
        vendor_id: String,
        product_id: String,
        storage_candidate: bool,
    },

    /// A USB device was removed and forgotten
    DeviceDetached {
        usb_path: String,
        report_emitted: bool,
    },

    /// A block device was correlated with a tracked USB device
    BlockDeviceLinked {
        usb_path: String,
        devnode: String,
        capacity_bytes: Option<u64>,
    },

    /// The report for a device was handed to the sink
    ReportDispatched {
        usb_path: String,
        /// A storage probe ran for this report
        probed: bool,
    },

    /// A block event could not be used
    EventDropped { devpath: String, reason: DropReason },
}

/// Why a block event was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// No usb_device ancestor could be resolved
    NoUsbAncestor,
    /// The ancestor is not a tracked device
    UnknownDevice,
    /// The tracked device has no mass-storage interface
    NotStorageCandidate,
    /// The device already had its report
    AlreadyReported,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::NoUsbAncestor => write!(f, "no_usb_ancestor"),
            DropReason::UnknownDevice => write!(f, "unknown_device"),
            DropReason::NotStorageCandidate => write!(f, "not_storage_candidate"),
            DropReason::AlreadyReported => write!(f, "already_reported"),
        }
    }
}

impl RegistryEvent {
    /// Device path the event is about
    pub fn path(&self) -> &str {
        match self {
            RegistryEvent::DeviceAttached { usb_path, .. } => usb_path,
            RegistryEvent::DeviceDetached { usb_path, .. } => usb_path,
            RegistryEvent::BlockDeviceLinked { usb_path, .. } => usb_path,
            RegistryEvent::ReportDispatched { usb_path, .. } => usb_path,
            RegistryEvent::EventDropped { devpath, .. } => devpath,
        }
    }

    /// Get the drop reason if this event records a dropped block event
    pub fn drop_reason(&self) -> Option<DropReason> {
        match self {
            RegistryEvent::EventDropped { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}
