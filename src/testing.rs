//! In-memory port implementations for unit tests

use crate::domain::ports::{
    DeviceTree, HotplugEvent, ProbeMode, ReportSink, StorageClassifier, StorageProber,
};
use crate::error::{Error, Result};
use crate::probe::{IntegrityStatus, PhaseResult, ProbeReport};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Device tree answering from maps
#[derive(Default)]
pub struct FakeDeviceTree {
    attributes: HashMap<(String, String), String>,
    interfaces: HashMap<String, Vec<String>>,
    ancestors: HashMap<String, String>,
    capacities: HashMap<String, u64>,
}

impl FakeDeviceTree {
    pub fn with_attribute(mut self, devpath: &str, name: &str, value: &str) -> Self {
        self.attributes
            .insert((devpath.to_string(), name.to_string()), value.to_string());
        self
    }

    pub fn with_interface(mut self, usb_path: &str, interface: &str) -> Self {
        self.interfaces
            .entry(usb_path.to_string())
            .or_default()
            .push(interface.to_string());
        self
    }

    pub fn with_ancestor(mut self, devpath: &str, usb_path: &str) -> Self {
        self.ancestors.insert(devpath.to_string(), usb_path.to_string());
        self
    }

    pub fn with_capacity(mut self, devnode: &str, bytes: u64) -> Self {
        self.capacities.insert(devnode.to_string(), bytes);
        self
    }
}

impl DeviceTree for FakeDeviceTree {
    fn usb_device_ancestor(&self, event: &HotplugEvent) -> Option<String> {
        self.ancestors.get(&event.devpath).cloned()
    }

    fn child_interfaces(&self, usb_path: &str) -> Result<Vec<String>> {
        self.interfaces
            .get(usb_path)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound {
                device: usb_path.to_string(),
            })
    }

    fn attribute(&self, devpath: &str, name: &str) -> Option<String> {
        self.attributes
            .get(&(devpath.to_string(), name.to_string()))
            .cloned()
    }

    fn block_capacity_bytes(&self, devnode: &str) -> Option<u64> {
        self.capacities.get(devnode).copied()
    }
}

/// Classifier with a fixed answer set, recording queries
#[derive(Default, Clone)]
pub struct FixedClassifier {
    storage: HashSet<String>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl FixedClassifier {
    pub fn storage(paths: &[&str]) -> Self {
        Self {
            storage: paths.iter().map(|p| p.to_string()).collect(),
            calls: Arc::default(),
        }
    }
}

impl StorageClassifier for FixedClassifier {
    fn is_mass_storage(&self, usb_path: &str) -> bool {
        self.calls.lock().push(usb_path.to_string());
        self.storage.contains(usb_path)
    }
}

/// Prober returning a healthy report, recording each call
#[derive(Default, Clone)]
pub struct RecordingProber {
    pub calls: Arc<Mutex<Vec<(String, ProbeMode)>>>,
}

impl StorageProber for RecordingProber {
    fn probe(&self, devnode: &str, mode: ProbeMode) -> ProbeReport {
        self.calls.lock().push((devnode.to_string(), mode));
        let mut report = ProbeReport::new(devnode, mode);
        report.read = Some(PhaseResult::completed(1024 * 1024, 0.5));
        if mode == ProbeMode::ReadWrite {
            report.write = Some(PhaseResult::completed(1024 * 1024, 0.5));
            report.integrity = IntegrityStatus::Passed;
        }
        report
    }
}

/// Sink collecting (title, body) pairs
#[derive(Default, Clone)]
pub struct RecordingSink {
    pub shown: Arc<Mutex<Vec<(String, String)>>>,
    pub fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.shown.lock().len()
    }
}

impl ReportSink for RecordingSink {
    fn display(&self, title: &str, body: &str) -> Result<()> {
        self.shown.lock().push((title.to_string(), body.to_string()));
        if self.fail {
            return Err(Error::DisplayUnavailable("recording sink set to fail".into()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
