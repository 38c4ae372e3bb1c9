//! USB Device Scanner
//!
//! Enumerates USB devices that are already attached, from the descriptor
//! attributes sysfs exposes under `bus/usb/devices`.

use crate::domain::ports::{DeviceTree, DeviceTreeRef, StorageClassifier};
use crate::error::{Error, Result};
use crate::hardware::classification::MassStorageClassifier;
use crate::hotplug::SysfsDeviceTree;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// Scanner Configuration
// =============================================================================

/// Configuration for the USB scanner
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Include root hubs (devices named usbN)
    pub include_root_hubs: bool,
    /// Path to sysfs (for testing)
    pub sysfs_path: PathBuf,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            include_root_hubs: false,
            sysfs_path: PathBuf::from("/sys"),
        }
    }
}

// =============================================================================
// Attached Device
// =============================================================================

/// A USB device found during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachedDevice {
    /// Kernel name (e.g., 1-1.2)
    pub name: String,
    /// Hierarchical device path
    pub devpath: String,
    pub bus_number: u32,
    pub device_address: u32,
    /// Character device node (/dev/bus/usb/BBB/DDD)
    pub devnode: String,
    pub vendor_id: String,
    pub product_id: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
    /// Negotiated speed in Mbit/s, as sysfs reports it
    pub speed: Option<String>,
    /// Exposes a Mass-Storage interface
    pub mass_storage: bool,
}

impl std::fmt::Display for AttachedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Bus {:03} Device {:03}: ID {}:{}",
            self.bus_number, self.device_address, self.vendor_id, self.product_id
        )?;
        let description = [self.manufacturer.as_deref(), self.product.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if !description.is_empty() {
            write!(f, " {}", description)?;
        }
        if self.mass_storage {
            write!(f, " [mass storage]")?;
        }
        Ok(())
    }
}

// =============================================================================
// USB Scanner
// =============================================================================

/// Scans sysfs for attached USB devices
pub struct UsbScanner {
    config: ScannerConfig,
    tree: Arc<SysfsDeviceTree>,
    classifier: MassStorageClassifier,
}

impl UsbScanner {
    pub fn new(config: ScannerConfig) -> Self {
        let tree = Arc::new(SysfsDeviceTree::new(config.sysfs_path.clone()));
        let tree_ref: DeviceTreeRef = tree.clone();
        Self {
            config,
            tree,
            classifier: MassStorageClassifier::new(tree_ref),
        }
    }

    /// List attached USB devices, ordered by bus and address
    pub fn scan(&self) -> Result<Vec<AttachedDevice>> {
        let devices_dir = self.config.sysfs_path.join("bus/usb/devices");
        if !devices_dir.exists() {
            return Err(Error::DeviceNotFound {
                device: devices_dir.display().to_string(),
            });
        }

        let sysfs_root = fs::canonicalize(&self.config.sysfs_path)?;
        let mut devices = Vec::new();

        for entry in fs::read_dir(&devices_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();

            // Interfaces are named bus-port:config.interface
            if name.contains(':') {
                continue;
            }
            if !self.config.include_root_hubs && name.starts_with("usb") {
                continue;
            }

            match self.scan_device(&name, &entry.path(), &sysfs_root) {
                Ok(device) => devices.push(device),
                Err(e) => debug!("Skipping {}: {}", name, e),
            }
        }

        devices.sort_by_key(|d| (d.bus_number, d.device_address));
        info!("Found {} USB devices", devices.len());
        Ok(devices)
    }

    fn scan_device(&self, name: &str, link: &Path, sysfs_root: &Path) -> Result<AttachedDevice> {
        let devpath = devpath_of(link, sysfs_root)?;

        let bus_number = self.read_number(&devpath, "busnum")?;
        let device_address = self.read_number(&devpath, "devnum")?;
        let vendor_id = self.read_required(&devpath, "idVendor")?;
        let product_id = self.read_required(&devpath, "idProduct")?;

        Ok(AttachedDevice {
            name: name.to_string(),
            bus_number,
            device_address,
            devnode: format!("/dev/bus/usb/{:03}/{:03}", bus_number, device_address),
            vendor_id,
            product_id,
            manufacturer: self.read_optional(&devpath, "manufacturer"),
            product: self.read_optional(&devpath, "product"),
            serial: self.read_optional(&devpath, "serial"),
            speed: self.read_optional(&devpath, "speed"),
            mass_storage: self.classifier.is_mass_storage(&devpath),
            devpath,
        })
    }

    fn read_required(&self, devpath: &str, attr: &str) -> Result<String> {
        self.tree
            .attribute(devpath, attr)
            .ok_or_else(|| Error::SysfsRead {
                path: format!("{}/{}", devpath, attr),
                reason: "missing".to_string(),
            })
    }

    fn read_optional(&self, devpath: &str, attr: &str) -> Option<String> {
        self.tree.attribute(devpath, attr).filter(|v| !v.is_empty())
    }

    fn read_number(&self, devpath: &str, attr: &str) -> Result<u32> {
        let value = self.read_required(devpath, attr)?;
        value.parse().map_err(|_| Error::SysfsRead {
            path: format!("{}/{}", devpath, attr),
            reason: format!("not a number: {}", value),
        })
    }
}

/// DEVPATH of a `bus/usb/devices` entry: its resolved location below sysfs
fn devpath_of(link: &Path, sysfs_root: &Path) -> Result<String> {
    let resolved = fs::canonicalize(link)?;
    let relative = resolved.strip_prefix(sysfs_root).map_err(|_| {
        Error::Internal(format!(
            "{} resolves outside {}",
            link.display(),
            sysfs_root.display()
        ))
    })?;
    Ok(format!("/{}", relative.display()))
}
