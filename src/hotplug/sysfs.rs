//! Sysfs Device Tree
//!
//! Answers device hierarchy questions from sysfs. Device paths are the
//! kernel's DEVPATH form (`/devices/...`), resolved against a configurable
//! sysfs root so tests can point at a temporary tree.

use crate::domain::ports::{DeviceTree, HotplugEvent, DEVTYPE_USB_DEVICE, DEVTYPE_USB_INTERFACE};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Size of a sysfs block sector
pub const SECTOR_SIZE: u64 = 512;

/// DeviceTree backed by sysfs
#[derive(Debug, Clone)]
pub struct SysfsDeviceTree {
    root: PathBuf,
}

impl Default for SysfsDeviceTree {
    fn default() -> Self {
        Self::new("/sys")
    }
}

impl SysfsDeviceTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Filesystem location of a DEVPATH
    pub fn device_dir(&self, devpath: &str) -> PathBuf {
        self.root.join(devpath.trim_start_matches('/'))
    }

    /// Properties from a device's `uevent` file
    pub fn read_uevent(&self, devpath: &str) -> Result<BTreeMap<String, String>> {
        let path = self.device_dir(devpath).join("uevent");
        let content = fs::read_to_string(&path).map_err(|e| Error::SysfsRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(content
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect())
    }

    fn devtype(&self, devpath: &str) -> Option<String> {
        self.read_uevent(devpath).ok()?.remove("DEVTYPE")
    }

    /// Read a sysfs attribute, trimmed
    fn read_sysfs_attr(&self, devpath: &str, name: &str) -> Result<String> {
        let path = self.device_dir(devpath).join(name);
        fs::read_to_string(&path)
            .map(|s| s.trim().to_string())
            .map_err(|e| Error::SysfsRead {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }
}

/// Parent of a DEVPATH, None at the top
fn parent_devpath(devpath: &str) -> Option<&str> {
    let trimmed = devpath.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", _)) | None => None,
        Some((parent, _)) => Some(parent),
    }
}

impl DeviceTree for SysfsDeviceTree {
    fn usb_device_ancestor(&self, event: &HotplugEvent) -> Option<String> {
        let mut current = parent_devpath(&event.devpath);
        while let Some(path) = current {
            if self.devtype(path).as_deref() == Some(DEVTYPE_USB_DEVICE) {
                trace!("Resolved {} to usb device {}", event.devpath, path);
                return Some(path.to_string());
            }
            current = parent_devpath(path);
        }
        debug!("No usb_device ancestor for {}", event.devpath);
        None
    }

    fn child_interfaces(&self, usb_path: &str) -> Result<Vec<String>> {
        let dir = self.device_dir(usb_path);
        if !dir.is_dir() {
            return Err(Error::DeviceNotFound {
                device: usb_path.to_string(),
            });
        }

        let mut interfaces = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let child = format!(
                "{}/{}",
                usb_path.trim_end_matches('/'),
                entry.file_name().to_string_lossy()
            );
            if self.devtype(&child).as_deref() == Some(DEVTYPE_USB_INTERFACE) {
                interfaces.push(child);
            }
        }
        interfaces.sort();
        Ok(interfaces)
    }

    fn attribute(&self, devpath: &str, name: &str) -> Option<String> {
        self.read_sysfs_attr(devpath, name).ok()
    }

    fn block_capacity_bytes(&self, devnode: &str) -> Option<u64> {
        let name = Path::new(devnode).file_name()?.to_string_lossy().to_string();
        let size = self.read_sysfs_attr(&format!("/block/{}", name), "size").ok()?;
        let sectors: u64 = size.parse().ok()?;
        sectors.checked_mul(SECTOR_SIZE)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::ports::{Action, Subsystem};
    use tempfile::TempDir;

    pub(crate) const USB_DEV: &str = "/devices/pci0000:00/0000:00:14.0/usb1/1-1";
    pub(crate) const USB_IF: &str = "/devices/pci0000:00/0000:00:14.0/usb1/1-1/1-1:1.0";
    pub(crate) const DISK: &str =
        "/devices/pci0000:00/0000:00:14.0/usb1/1-1/1-1:1.0/host6/target6:0:0/6:0:0:0/block/sdb";

    fn write(root: &Path, devpath: &str, name: &str, content: &str) {
        let dir = root.join(devpath.trim_start_matches('/'));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), content).unwrap();
    }

    /// A flash drive with one mass-storage interface and its disk
    pub(crate) fn fake_sysfs() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();

        write(root, "/devices/pci0000:00/0000:00:14.0/usb1", "uevent", "DEVTYPE=usb_device\n");
        write(root, USB_DEV, "uevent", "MAJOR=189\nMINOR=3\nDEVNAME=bus/usb/001/004\nDEVTYPE=usb_device\n");
        write(root, USB_DEV, "idVendor", "0781\n");
        write(root, USB_DEV, "idProduct", "5567\n");
        write(root, USB_DEV, "manufacturer", "SanDisk\n");
        write(root, USB_DEV, "product", "Cruzer Blade\n");
        write(root, USB_DEV, "bNumConfigurations", "1\n");
        write(root, USB_DEV, "busnum", "1\n");
        write(root, USB_DEV, "devnum", "4\n");
        write(root, USB_IF, "uevent", "DEVTYPE=usb_interface\nINTERFACE=8/6/80\n");
        write(root, USB_IF, "bInterfaceClass", "08\n");
        write(root, DISK, "uevent", "DEVTYPE=disk\nDEVNAME=sdb\n");
        write(root, "/block/sdb", "size", "30031872\n");

        tmp
    }

    #[test]
    fn test_parent_devpath() {
        assert_eq!(parent_devpath("/1/1/1"), Some("/1/1"));
        assert_eq!(parent_devpath("/1/1"), Some("/1"));
        assert_eq!(parent_devpath("/1"), None);
        assert_eq!(parent_devpath("/devices/usb1/"), Some("/devices"));
    }

    #[test]
    fn test_usb_device_ancestor() {
        let tmp = fake_sysfs();
        let tree = SysfsDeviceTree::new(tmp.path());

        let disk = HotplugEvent::new(Action::Add, Subsystem::Block, DISK);
        assert_eq!(tree.usb_device_ancestor(&disk).as_deref(), Some(USB_DEV));

        let orphan = HotplugEvent::new(Action::Add, Subsystem::Block, "/devices/virtual/block/loop0");
        assert_eq!(tree.usb_device_ancestor(&orphan), None);
    }

    #[test]
    fn test_child_interfaces_and_attributes() {
        let tmp = fake_sysfs();
        let tree = SysfsDeviceTree::new(tmp.path());

        let children = tree.child_interfaces(USB_DEV).unwrap();
        assert_eq!(children, vec![USB_IF.to_string()]);
        assert_eq!(tree.attribute(USB_IF, "bInterfaceClass").as_deref(), Some("08"));
        assert_eq!(tree.attribute(USB_DEV, "product").as_deref(), Some("Cruzer Blade"));
        assert_eq!(tree.attribute(USB_DEV, "serial"), None);

        assert!(tree.child_interfaces("/devices/missing").is_err());
    }

    #[test]
    fn test_block_capacity() {
        let tmp = fake_sysfs();
        let tree = SysfsDeviceTree::new(tmp.path());

        assert_eq!(tree.block_capacity_bytes("/dev/sdb"), Some(30031872 * 512));
        assert_eq!(tree.block_capacity_bytes("/dev/sdz"), None);

        write(tmp.path(), "/block/sdc", "size", "garbage");
        assert_eq!(tree.block_capacity_bytes("/dev/sdc"), None);
    }
}
