//! Correlation Engine
//!
//! Reconstructs "this block device belongs to this USB device" from an
//! unordered stream of hotplug events, and drives the probe and report for
//! each attachment.
//!
//! Per attachment at most one report is dispatched. A device without a
//! mass-storage interface gets its report as soon as it is added; a storage
//! candidate waits for the first USB disk whose nearest usb_device ancestor
//! is the candidate's path.

use crate::domain::ports::{
    Action, DeviceRecord, DeviceTreeRef, HotplugEvent, ProbeMode, ReportSinkRef,
    StorageClassifierRef, StorageProberRef, Subsystem,
};
use crate::error::panic_message;
use crate::hardware::registry::{DeviceRegistry, DropReason, RegistryEvent, RegistryStats};
use crate::probe::ProbeReport;
use crate::report::{assemble, DeviceReport};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// Event-driven correlation of USB devices and their block devices
pub struct CorrelationEngine {
    registry: DeviceRegistry,
    tree: DeviceTreeRef,
    classifier: StorageClassifierRef,
    prober: StorageProberRef,
    sink: ReportSinkRef,
    probe_mode: ProbeMode,
}

impl CorrelationEngine {
    pub fn new(
        tree: DeviceTreeRef,
        classifier: StorageClassifierRef,
        prober: StorageProberRef,
        sink: ReportSinkRef,
        probe_mode: ProbeMode,
    ) -> Self {
        Self {
            registry: DeviceRegistry::new(),
            tree,
            classifier,
            prober,
            sink,
            probe_mode,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Follow registry events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.registry.subscribe()
    }

    /// Process one hotplug event. Failures are logged, never returned.
    pub fn handle_event(&mut self, event: &HotplugEvent) {
        if event.devpath.is_empty() {
            debug!("Ignoring event without device path");
            return;
        }

        match (&event.action, &event.subsystem) {
            (Action::Remove, Subsystem::Usb) => self.handle_usb_remove(event),
            (Action::Add, Subsystem::Usb) if event.is_usb_device() => self.handle_usb_add(event),
            (Action::Add, Subsystem::Block) if event.is_usb_disk() => self.handle_block_add(event),
            _ => trace!(
                "Ignoring {} {} event for {}",
                event.action,
                event.subsystem,
                event.devpath
            ),
        }
    }

    fn handle_usb_remove(&mut self, event: &HotplugEvent) {
        if let Some(record) = self.registry.detach(&event.devpath) {
            info!(
                "USB device removed: {} ({})",
                record.usb_path,
                record.label()
            );
        }
    }

    fn handle_usb_add(&mut self, event: &HotplugEvent) {
        let path = event.devpath.as_str();

        if let Some(existing) = self.registry.get(path) {
            let retry = !existing.is_storage_candidate && !existing.report_emitted;
            self.registry.record_duplicate_add(path);
            if retry {
                info!("Retrying report for {}", path);
                self.report_without_probe(path);
            }
            return;
        }

        let is_storage = self.classifier.is_mass_storage(path);
        let record = DeviceRecord::from_event(event, is_storage);
        info!(
            "USB device added: {} (VID={} PID={} product={:?} storage={})",
            path, record.vendor_id, record.product_id, record.product_name, is_storage
        );
        self.registry.attach(record);

        if is_storage {
            info!("Waiting for block device of {}", path);
        } else {
            self.report_without_probe(path);
        }
    }

    fn handle_block_add(&mut self, event: &HotplugEvent) {
        let devnode = event.devnode.as_deref().unwrap_or_default();

        let usb_path = match self.tree.usb_device_ancestor(event) {
            Some(path) => path,
            None => {
                warn!("No USB device found for block device {}", devnode);
                self.registry.record_dropped(&event.devpath, DropReason::NoUsbAncestor);
                return;
            }
        };

        let reason = match self.registry.get(&usb_path) {
            None => Some(DropReason::UnknownDevice),
            Some(record) if !record.is_storage_candidate => Some(DropReason::NotStorageCandidate),
            Some(record) if record.report_emitted => Some(DropReason::AlreadyReported),
            Some(_) => None,
        };
        if let Some(reason) = reason {
            debug!("Dropping block device {} of {}: {}", devnode, usb_path, reason);
            self.registry.record_dropped(&event.devpath, reason);
            return;
        }

        let capacity = self.tree.block_capacity_bytes(devnode);
        if let Err(e) = self.registry.link_block_device(&usb_path, devnode, capacity) {
            error!("Cannot link {} to {}: {}", devnode, usb_path, e);
            return;
        }
        info!("Block device {} belongs to {}", devnode, usb_path);

        // Set before probing so a failing probe is never repeated
        if let Err(e) = self.registry.mark_report_emitted(&usb_path) {
            error!("Cannot mark {} as reported: {}", usb_path, e);
            return;
        }

        let probe = self.run_probe(devnode);
        let Some(record) = self.registry.get(&usb_path) else {
            return;
        };
        let report = assemble(record, Some(&probe));
        self.dispatch(&report);
        self.registry.record_report(&usb_path, true);
    }

    /// A panicking prober yields an aborted report instead of unwinding
    /// into the event loop.
    fn run_probe(&self, devnode: &str) -> ProbeReport {
        let prober = &self.prober;
        let mode = self.probe_mode;
        match catch_unwind(AssertUnwindSafe(|| prober.probe(devnode, mode))) {
            Ok(report) => report,
            Err(panic) => {
                let reason = format!("probe panicked: {}", panic_message(&*panic));
                error!("Probe of {} failed: {}", devnode, reason);
                ProbeReport::aborted(devnode, mode, reason)
            }
        }
    }

    /// Report for a device that gets no probe. The guard is only set once
    /// the sink accepted the report, so a duplicate add can retry.
    fn report_without_probe(&mut self, usb_path: &str) {
        let Some(record) = self.registry.get(usb_path) else {
            return;
        };
        let report = assemble(record, None);
        if !self.dispatch(&report) {
            return;
        }
        if let Err(e) = self.registry.mark_report_emitted(usb_path) {
            error!("Cannot mark {} as reported: {}", usb_path, e);
            return;
        }
        self.registry.record_report(usb_path, false);
    }

    fn dispatch(&self, report: &DeviceReport) -> bool {
        match self.sink.display(&report.title, &report.body) {
            Ok(()) => {
                debug!("Report {:?} handed to {}", report.title, self.sink.name());
                true
            }
            Err(e) => {
                error!("Cannot display report {:?}: {}", report.title, e);
                false
            }
        }
    }
}
