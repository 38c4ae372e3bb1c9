//! Report Assembly
//!
//! Builds the fixed-layout text document shown for each device.

use crate::domain::ports::DeviceRecord;
use crate::probe::ProbeReport;
use std::fmt;

const RULE: &str = "========================================";
const NOT_AVAILABLE: &str = "N/A";
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Text shown when a device gets no probe
pub const NO_PROBE_TEXT: &str = "No probe was run: not a storage device.";

/// A titled report ready for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReport {
    pub title: String,
    pub body: String,
}

fn or_na(value: &str) -> &str {
    if value.is_empty() {
        NOT_AVAILABLE
    } else {
        value
    }
}

/// Capacity in gigabytes (1024^3 bytes) with one decimal
pub fn format_capacity(bytes: Option<u64>) -> String {
    match bytes {
        Some(bytes) => format!("{:.1} GB", bytes as f64 / BYTES_PER_GB),
        None => NOT_AVAILABLE.to_string(),
    }
}

/// Window title for a device
pub fn report_title(record: &DeviceRecord) -> String {
    format!("USB device: {}", record.label())
}

/// Device information block at the top of every report
struct IdentityBlock<'a>(&'a DeviceRecord);

impl fmt::Display for IdentityBlock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.0;
        writeln!(f, "{}", RULE)?;
        writeln!(f, "Device information:")?;
        writeln!(f, "  USB path: {}", or_na(&record.usb_path))?;
        writeln!(f, "  VID: {}", or_na(&record.vendor_id))?;
        writeln!(f, "  PID: {}", or_na(&record.product_id))?;
        writeln!(f, "  Manufacturer: {}", or_na(&record.manufacturer))?;
        writeln!(f, "  Product: {}", or_na(&record.product_name))?;
        writeln!(
            f,
            "  Block device: {}",
            record.block_device_node.as_deref().map_or(NOT_AVAILABLE, or_na)
        )?;
        writeln!(f, "  Capacity: {}", format_capacity(record.capacity_bytes))?;
        writeln!(
            f,
            "  Storage device: {}",
            if record.is_storage_candidate { "yes" } else { "no" }
        )?;
        writeln!(
            f,
            "  Attached at: {}",
            record.attached_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(f, "{}", RULE)
    }
}

/// Assemble the report for a device and its optional probe result
pub fn assemble(record: &DeviceRecord, probe: Option<&ProbeReport>) -> DeviceReport {
    let identity = IdentityBlock(record);
    let body = match probe {
        Some(report) => format!("{}\n{}", identity, report),
        None => format!("{}\n{}\n", identity, NO_PROBE_TEXT),
    };

    DeviceReport {
        title: report_title(record),
        body,
    }
}
