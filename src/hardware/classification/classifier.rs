//! Mass-Storage Classifier
//!
//! Decides whether a USB device is a storage candidate by inspecting the
//! interface class of its child interfaces.

use crate::domain::ports::{DeviceTreeRef, StorageClassifier, MASS_STORAGE_CLASS};
use tracing::{debug, warn};

/// Descriptor attribute holding the configuration count
const ATTR_NUM_CONFIGURATIONS: &str = "bNumConfigurations";

/// Interface attribute holding the class code
const ATTR_INTERFACE_CLASS: &str = "bInterfaceClass";

/// Classifies USB devices through the device tree
pub struct MassStorageClassifier {
    tree: DeviceTreeRef,
}

impl MassStorageClassifier {
    pub fn new(tree: DeviceTreeRef) -> Self {
        Self { tree }
    }

    /// A device without configurations exposes no interfaces
    fn has_configurations(&self, usb_path: &str) -> bool {
        self.tree
            .attribute(usb_path, ATTR_NUM_CONFIGURATIONS)
            .and_then(|value| value.trim().parse::<u32>().ok())
            .is_some_and(|count| count > 0)
    }
}

impl StorageClassifier for MassStorageClassifier {
    fn is_mass_storage(&self, usb_path: &str) -> bool {
        if !self.has_configurations(usb_path) {
            debug!("{} has no readable configuration", usb_path);
            return false;
        }

        let interfaces = match self.tree.child_interfaces(usb_path) {
            Ok(interfaces) => interfaces,
            Err(e) => {
                warn!("Cannot enumerate interfaces of {}: {}", usb_path, e);
                return false;
            }
        };

        let found = interfaces.iter().any(|interface| {
            self.tree
                .attribute(interface, ATTR_INTERFACE_CLASS)
                .is_some_and(|class| class.trim().eq_ignore_ascii_case(MASS_STORAGE_CLASS))
        });

        debug!(
            "{}: {} interfaces, mass storage = {}",
            usb_path,
            interfaces.len(),
            found
        );
        found
    }
}
