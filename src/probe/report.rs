//! Probe Report
//!
//! Structured result of a storage probe run and its fixed text layout.

use crate::domain::ports::ProbeMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const MIB: f64 = 1024.0 * 1024.0;

/// Minimum elapsed time for a meaningful throughput figure
const MIN_ELAPSED_SECS: f64 = 0.0001;

// =============================================================================
// Status Types
// =============================================================================

/// Overall outcome of a probe run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    /// All phases ran (individual phases may still have failed)
    Completed,
    /// The device node could not be opened
    OpenFailed(String),
    /// The probe stopped before the read phase
    Aborted(String),
}

/// Data integrity verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    /// Not checked (read-only probe or aborted run)
    Unknown,
    Passed,
    Failed(String),
    /// Skipped because there is no trustworthy reference
    NotPerformed(String),
}

/// Result of one write or read phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    /// Phase ran to completion without I/O errors
    pub succeeded: bool,
    /// Bytes transferred
    pub bytes: u64,
    /// Wall time in seconds
    pub elapsed_secs: f64,
    /// Throughput in MB/s (MiB based)
    pub speed_mb_s: f64,
    /// Why the phase stopped early
    pub failure: Option<String>,
}

impl PhaseResult {
    pub fn completed(bytes: u64, elapsed_secs: f64) -> Self {
        Self {
            succeeded: true,
            bytes,
            elapsed_secs,
            speed_mb_s: throughput_mb_s(bytes, elapsed_secs),
            failure: None,
        }
    }

    pub fn failed(bytes: u64, elapsed_secs: f64, reason: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            bytes,
            elapsed_secs,
            speed_mb_s: 0.0,
            failure: Some(reason.into()),
        }
    }

    pub fn megabytes(&self) -> f64 {
        self.bytes as f64 / MIB
    }
}

/// Throughput in MB/s, zero when the elapsed time is too small to measure
pub fn throughput_mb_s(bytes: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > MIN_ELAPSED_SECS {
        bytes as f64 / MIB / elapsed_secs
    } else {
        0.0
    }
}

// =============================================================================
// Probe Report
// =============================================================================

/// Result of a storage probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Device node that was probed
    pub device: String,
    /// Probe mode
    pub mode: ProbeMode,
    /// Overall status
    pub status: ProbeStatus,
    /// Write phase (read-write mode only)
    pub write: Option<PhaseResult>,
    /// Read phase
    pub read: Option<PhaseResult>,
    /// Integrity verdict (read-write mode only)
    pub integrity: IntegrityStatus,
    /// Error lines collected during the run
    pub errors: Vec<String>,
    /// When the probe started
    pub started_at: DateTime<Utc>,
}

impl ProbeReport {
    pub fn new(device: impl Into<String>, mode: ProbeMode) -> Self {
        Self {
            device: device.into(),
            mode,
            status: ProbeStatus::Completed,
            write: None,
            read: None,
            integrity: IntegrityStatus::Unknown,
            errors: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Report for a device node that could not be opened
    pub fn open_failed(device: impl Into<String>, mode: ProbeMode, reason: impl Into<String>) -> Self {
        let mut report = Self::new(device, mode);
        let reason = reason.into();
        report.errors.push(format!("cannot open {}: {}", report.device, reason));
        report.status = ProbeStatus::OpenFailed(reason);
        report
    }

    /// Report for a probe that stopped early
    pub fn aborted(device: impl Into<String>, mode: ProbeMode, reason: impl Into<String>) -> Self {
        let mut report = Self::new(device, mode);
        let reason = reason.into();
        report.errors.push(reason.clone());
        report.status = ProbeStatus::Aborted(reason);
        report
    }

    /// Every phase that ran succeeded and integrity did not fail
    pub fn is_healthy(&self) -> bool {
        self.status == ProbeStatus::Completed
            && self.write.as_ref().map_or(true, |w| w.succeeded)
            && self.read.as_ref().map_or(false, |r| r.succeeded)
            && !matches!(self.integrity, IntegrityStatus::Failed(_))
    }
}

fn write_phase(f: &mut fmt::Formatter<'_>, verb: &str, phase: &PhaseResult) -> fmt::Result {
    if phase.succeeded {
        writeln!(f, "  {}: {:.2} MB", verb, phase.megabytes())?;
        writeln!(f, "  Time: {:.3} s", phase.elapsed_secs)?;
        writeln!(f, "  Speed: {:.2} MB/s", phase.speed_mb_s)
    } else {
        writeln!(f, "  {}: {:.2} MB before failure", verb, phase.megabytes())?;
        writeln!(
            f,
            "  Result: FAILED ({})",
            phase.failure.as_deref().unwrap_or("unknown error")
        )
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Probe: {} ({}) ---", self.device, self.mode)?;

        match &self.status {
            ProbeStatus::OpenFailed(reason) => {
                writeln!(f, "ERROR: cannot open {}: {}", self.device, reason)?;
                writeln!(f, "Hint: direct device access usually requires root.")?;
                return writeln!(f, "--- Probe finished with errors ---");
            }
            ProbeStatus::Aborted(reason) if self.read.is_none() => {
                if let Some(write) = &self.write {
                    writeln!(f, "Write test:")?;
                    write_phase(f, "Written", write)?;
                }
                writeln!(f, "ERROR: {}", reason)?;
                return writeln!(f, "--- Probe aborted ---");
            }
            _ => {}
        }

        if let Some(write) = &self.write {
            writeln!(f, "Write test:")?;
            write_phase(f, "Written", write)?;
        }

        if let Some(read) = &self.read {
            writeln!(f, "Read test:")?;
            write_phase(f, "Read", read)?;
        }

        writeln!(f, "Integrity check:")?;
        match (&self.mode, &self.integrity) {
            (ProbeMode::ReadOnly, _) => writeln!(f, "  Result: NOT APPLICABLE (read-only probe)")?,
            (_, IntegrityStatus::Passed) => writeln!(f, "  Result: PASSED")?,
            (_, IntegrityStatus::Failed(reason)) => writeln!(f, "  Result: FAILED ({})", reason)?,
            (_, IntegrityStatus::NotPerformed(reason)) => {
                writeln!(f, "  Result: NOT PERFORMED ({})", reason)?
            }
            (_, IntegrityStatus::Unknown) => writeln!(f, "  Result: UNKNOWN")?,
        }

        writeln!(f, "--- Probe finished ---")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput() {
        assert_eq!(throughput_mb_s(10 * 1024 * 1024, 2.0), 5.0);
        assert_eq!(throughput_mb_s(10 * 1024 * 1024, 0.0), 0.0);
        assert_eq!(throughput_mb_s(4096, 0.00001), 0.0);
    }

    #[test]
    fn test_open_failed_layout() {
        let report = ProbeReport::open_failed("/dev/sdx", ProbeMode::ReadWrite, "Permission denied");
        let text = report.to_string();

        assert!(text.contains("ERROR: cannot open /dev/sdx: Permission denied"));
        assert!(text.contains("requires root"));
        assert!(!report.is_healthy());
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_completed_layout() {
        let mut report = ProbeReport::new("/dev/sdx", ProbeMode::ReadWrite);
        report.write = Some(PhaseResult::completed(10 * 1024 * 1024, 1.0));
        report.read = Some(PhaseResult::completed(10 * 1024 * 1024, 0.5));
        report.integrity = IntegrityStatus::Passed;

        let text = report.to_string();
        assert!(text.contains("Written: 10.00 MB"));
        assert!(text.contains("Speed: 20.00 MB/s"));
        assert!(text.contains("Result: PASSED"));
        assert!(report.is_healthy());
    }

    #[test]
    fn test_failed_write_layout() {
        let mut report = ProbeReport::new("/dev/sdx", ProbeMode::ReadWrite);
        report.write = Some(PhaseResult::failed(8192, 0.1, "short write at block 2"));
        report.read = Some(PhaseResult::completed(10 * 1024 * 1024, 0.5));
        report.integrity = IntegrityStatus::NotPerformed("write phase failed".into());

        let text = report.to_string();
        assert!(text.contains("Result: FAILED (short write at block 2)"));
        assert!(text.contains("NOT PERFORMED"));
        assert!(!report.is_healthy());
    }

    #[test]
    fn test_report_serializes() {
        let report = ProbeReport::aborted("/dev/sdx", ProbeMode::ReadOnly, "seek failed");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["device"], "/dev/sdx");
        assert_eq!(json["mode"], "read_only");
        assert_eq!(json["status"]["aborted"], "seek failed");
    }
}
