//! Device Registry
//!
//! Path-keyed map of the USB devices currently attached, with counters and
//! a broadcast of lifecycle events. The registry is owned by a single
//! consumer and takes `&mut self` for every mutation, so it needs no locks.

use super::events::{DropReason, RegistryEvent};
use crate::domain::ports::DeviceRecord;
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Registry Statistics
// =============================================================================

/// Registry counters since start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub attached: u64,
    pub detached: u64,
    pub duplicate_adds: u64,
    pub block_links: u64,
    pub probes_run: u64,
    pub reports_dispatched: u64,
    pub events_dropped: u64,
}

// =============================================================================
// Device Registry
// =============================================================================

/// Registry of tracked USB devices
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceRecord>,
    stats: RegistryStats,
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (event_sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            devices: HashMap::new(),
            stats: RegistryStats::default(),
            event_sender,
        }
    }

    /// Get an event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    fn emit(&self, event: RegistryEvent) {
        // No subscribers is fine
        let _ = self.event_sender.send(event);
    }

    pub fn get(&self, usb_path: &str) -> Option<&DeviceRecord> {
        self.devices.get(usb_path)
    }

    pub fn contains(&self, usb_path: &str) -> bool {
        self.devices.contains_key(usb_path)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Start tracking a device. Returns false if the path is already tracked,
    /// leaving the existing record untouched.
    pub fn attach(&mut self, record: DeviceRecord) -> bool {
        if self.devices.contains_key(&record.usb_path) {
            return false;
        }

        let event = RegistryEvent::DeviceAttached {
            usb_path: record.usb_path.clone(),
            vendor_id: record.vendor_id.clone(),
            product_id: record.product_id.clone(),
            storage_candidate: record.is_storage_candidate,
        };
        self.devices.insert(record.usb_path.clone(), record);
        self.stats.attached += 1;
        self.emit(event);
        true
    }

    /// Stop tracking a device
    pub fn detach(&mut self, usb_path: &str) -> Option<DeviceRecord> {
        let record = self.devices.remove(usb_path)?;
        self.stats.detached += 1;
        self.emit(RegistryEvent::DeviceDetached {
            usb_path: usb_path.to_string(),
            report_emitted: record.report_emitted,
        });
        Some(record)
    }

    /// Attach a block device node to a tracked device
    pub fn link_block_device(
        &mut self,
        usb_path: &str,
        devnode: &str,
        capacity_bytes: Option<u64>,
    ) -> Result<()> {
        let record = self.devices.get_mut(usb_path).ok_or_else(|| Error::DeviceNotFound {
            device: usb_path.to_string(),
        })?;
        record.block_device_node = Some(devnode.to_string());
        record.capacity_bytes = capacity_bytes;

        self.stats.block_links += 1;
        self.emit(RegistryEvent::BlockDeviceLinked {
            usb_path: usb_path.to_string(),
            devnode: devnode.to_string(),
            capacity_bytes,
        });
        Ok(())
    }

    /// Set the at-most-once guard. Returns false if it was already set.
    pub fn mark_report_emitted(&mut self, usb_path: &str) -> Result<bool> {
        let record = self.devices.get_mut(usb_path).ok_or_else(|| Error::DeviceNotFound {
            device: usb_path.to_string(),
        })?;
        if record.report_emitted {
            return Ok(false);
        }
        record.report_emitted = true;
        Ok(true)
    }

    /// Count a dispatched report
    pub fn record_report(&mut self, usb_path: &str, probed: bool) {
        if probed {
            self.stats.probes_run += 1;
        }
        self.stats.reports_dispatched += 1;
        self.emit(RegistryEvent::ReportDispatched {
            usb_path: usb_path.to_string(),
            probed,
        });
    }

    pub fn record_duplicate_add(&mut self, usb_path: &str) {
        debug!("Duplicate add for {}", usb_path);
        self.stats.duplicate_adds += 1;
    }

    pub fn record_dropped(&mut self, devpath: &str, reason: DropReason) {
        self.stats.events_dropped += 1;
        self.emit(RegistryEvent::EventDropped {
            devpath: devpath.to_string(),
            reason,
        });
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
