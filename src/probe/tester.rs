//! Storage Tester
//!
//! Bounded throughput and integrity exercise of a block device. The tester
//! is generic over any `Read + Write + Seek` device so that the same code
//! runs against a real device node and an in-memory buffer.

use super::report::{IntegrityStatus, PhaseResult, ProbeReport, ProbeStatus};
use crate::domain::ports::{ProbeMode, StorageProber};
use nix::fcntl::OFlag;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::time::Instant;
use tracing::{debug, error, info, warn};

// =============================================================================
// Constants
// =============================================================================

/// Transfer unit for both phases
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Bytes written and read back in read-write mode (10 MiB)
pub const DEFAULT_READ_WRITE_BYTES: u64 = 10 * 1024 * 1024;

/// Upper bound on bytes read in read-only mode (100 MiB)
pub const DEFAULT_READ_ONLY_BYTES: u64 = 100 * 1024 * 1024;

// =============================================================================
// Probe Configuration
// =============================================================================

/// Configuration for the storage probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Bytes per read/write call
    pub block_size: usize,
    /// Window written and verified in read-write mode
    pub read_write_bytes: u64,
    /// Maximum bytes read in read-only mode
    pub read_only_bytes: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            read_write_bytes: DEFAULT_READ_WRITE_BYTES,
            read_only_bytes: DEFAULT_READ_ONLY_BYTES,
        }
    }
}

impl ProbeConfig {
    fn read_write_blocks(&self) -> u64 {
        self.read_write_bytes / self.block_size as u64
    }
}

// =============================================================================
// Test Pattern
// =============================================================================

/// Fill `buf` with the pattern for the bytes starting at `offset`:
/// the byte at device offset `o` is `o mod 256`.
pub fn fill_pattern(buf: &mut [u8], offset: u64) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte = ((offset + i as u64) % 256) as u8;
    }
}

/// Index of the first byte in `buf` that differs from the pattern at `offset`
pub fn first_mismatch(buf: &[u8], offset: u64) -> Option<usize> {
    buf.iter()
        .enumerate()
        .position(|(i, &byte)| byte != ((offset + i as u64) % 256) as u8)
}

/// Read until `buf` is full or the device reports end of data
fn read_full<D: Read>(device: &mut D, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match device.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Write until all of `buf` is accepted or the device stops accepting data
fn write_full<D: Write>(device: &mut D, buf: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < buf.len() {
        match device.write(&buf[written..]) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}

// =============================================================================
// Storage Tester
// =============================================================================

/// Runs the probe phases against an open device
pub struct StorageTester<D> {
    device: D,
    name: String,
    config: ProbeConfig,
}

impl<D: Read + Write + Seek> StorageTester<D> {
    pub fn new(device: D, name: impl Into<String>, config: ProbeConfig) -> Self {
        Self {
            device,
            name: name.into(),
            config,
        }
    }

    /// Access the underlying device
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Consume the tester, returning the device
    pub fn into_inner(self) -> D {
        self.device
    }

    /// Write the pattern over the read-write window.
    /// Stops at the first short write or I/O error.
    pub fn write_phase(&mut self) -> PhaseResult {
        let block_size = self.config.block_size;
        let mut buf = vec![0u8; block_size];
        let mut bytes_written = 0u64;
        let start = Instant::now();

        for block in 0..self.config.read_write_blocks() {
            let offset = block * block_size as u64;
            fill_pattern(&mut buf, offset);

            let failure = match write_full(&mut self.device, &buf) {
                Ok(n) if n == block_size => {
                    bytes_written += n as u64;
                    continue;
                }
                Ok(n) => {
                    bytes_written += n as u64;
                    format!("short write at block {} ({} of {} bytes)", block, n, block_size)
                }
                Err(e) => format!("write error at block {}: {}", block, e),
            };

            error!("Write test on {} failed: {}", self.name, failure);
            return PhaseResult::failed(bytes_written, start.elapsed().as_secs_f64(), failure);
        }

        if let Err(e) = self.device.flush() {
            let failure = format!("flush failed: {}", e);
            error!("Write test on {} failed: {}", self.name, failure);
            return PhaseResult::failed(bytes_written, start.elapsed().as_secs_f64(), failure);
        }

        let result = PhaseResult::completed(bytes_written, start.elapsed().as_secs_f64());
        info!("Write test on {}: {:.2} MB/s", self.name, result.speed_mb_s);
        result
    }

    /// Reposition the device to the start of the window
    pub fn rewind(&mut self) -> io::Result<()> {
        self.device.seek(SeekFrom::Start(0)).map(|_| ())
    }

    /// Read the read-write window back. When `verify` is set every block is
    /// compared against its pattern; a mismatch marks integrity failed but
    /// the phase keeps reading so throughput covers the whole window.
    pub fn verify_phase(&mut self, verify: bool) -> (PhaseResult, IntegrityStatus) {
        let block_size = self.config.block_size;
        let mut buf = vec![0u8; block_size];
        let mut bytes_read = 0u64;
        let mut mismatch: Option<u64> = None;
        let start = Instant::now();

        for block in 0..self.config.read_write_blocks() {
            let failure = match read_full(&mut self.device, &mut buf) {
                Ok(n) if n == block_size => None,
                Ok(n) => {
                    bytes_read += n as u64;
                    Some(format!("short read at block {} ({} of {} bytes)", block, n, block_size))
                }
                Err(e) => Some(format!("read error at block {}: {}", block, e)),
            };

            if let Some(failure) = failure {
                error!("Read test on {} failed: {}", self.name, failure);
                let integrity = if verify {
                    IntegrityStatus::Failed("read error".to_string())
                } else {
                    IntegrityStatus::Unknown
                };
                return (
                    PhaseResult::failed(bytes_read, start.elapsed().as_secs_f64(), failure),
                    integrity,
                );
            }

            bytes_read += block_size as u64;

            if verify && mismatch.is_none() {
                let offset = block * block_size as u64;
                if let Some(pos) = first_mismatch(&buf, offset) {
                    error!(
                        "Integrity error on {} at block {} (byte {})",
                        self.name, block, pos
                    );
                    mismatch = Some(block);
                }
            }
        }

        let result = PhaseResult::completed(bytes_read, start.elapsed().as_secs_f64());
        info!("Read test on {}: {:.2} MB/s", self.name, result.speed_mb_s);

        let integrity = match (verify, mismatch) {
            (false, _) => IntegrityStatus::Unknown,
            (true, None) => IntegrityStatus::Passed,
            (true, Some(block)) => IntegrityStatus::Failed(format!("data mismatch at block {}", block)),
        };
        (result, integrity)
    }

    /// Sequential read up to the read-only bound or end of device
    pub fn read_only_phase(&mut self) -> PhaseResult {
        let block_size = self.config.block_size;
        let mut buf = vec![0u8; block_size];
        let mut bytes_read = 0u64;
        let start = Instant::now();

        while bytes_read < self.config.read_only_bytes {
            let want = block_size.min((self.config.read_only_bytes - bytes_read) as usize);
            match read_full(&mut self.device, &mut buf[..want]) {
                Ok(n) => {
                    bytes_read += n as u64;
                    if n < want {
                        debug!("Reached end of {} after {} bytes", self.name, bytes_read);
                        break;
                    }
                }
                Err(e) => {
                    let failure = format!("read error after {} bytes: {}", bytes_read, e);
                    error!("Read test on {} failed: {}", self.name, failure);
                    return PhaseResult::failed(bytes_read, start.elapsed().as_secs_f64(), failure);
                }
            }
        }

        let result = PhaseResult::completed(bytes_read, start.elapsed().as_secs_f64());
        info!("Read-only test on {}: {:.2} MB/s", self.name, result.speed_mb_s);
        result
    }

    /// Write, rewind, read back and verify
    pub fn run_read_write(&mut self) -> ProbeReport {
        let mut report = ProbeReport::new(self.name.clone(), ProbeMode::ReadWrite);

        let write = self.write_phase();
        let write_ok = write.succeeded;
        if let Some(failure) = &write.failure {
            report.errors.push(failure.clone());
        }
        report.write = Some(write);

        if let Err(e) = self.rewind() {
            let reason = format!("cannot seek to start of device: {}", e);
            error!("Probe of {} aborted: {}", self.name, reason);
            report.errors.push(reason.clone());
            report.status = ProbeStatus::Aborted(reason);
            return report;
        }

        if !write_ok {
            warn!(
                "Integrity check on {} skipped: write phase failed",
                self.name
            );
        }

        let (read, integrity) = self.verify_phase(write_ok);
        if let Some(failure) = &read.failure {
            report.errors.push(failure.clone());
        }
        let integrity = if write_ok {
            integrity
        } else {
            IntegrityStatus::NotPerformed("write phase failed".to_string())
        };
        if let IntegrityStatus::Failed(reason) = &integrity {
            report.errors.push(format!("integrity: {}", reason));
        }
        report.read = Some(read);
        report.integrity = integrity;
        report
    }

    /// Read-only throughput run
    pub fn run_read_only(&mut self) -> ProbeReport {
        let mut report = ProbeReport::new(self.name.clone(), ProbeMode::ReadOnly);
        let read = self.read_only_phase();
        if let Some(failure) = &read.failure {
            report.errors.push(failure.clone());
        }
        report.read = Some(read);
        report
    }

    pub fn run(&mut self, mode: ProbeMode) -> ProbeReport {
        match mode {
            ProbeMode::ReadWrite => self.run_read_write(),
            ProbeMode::ReadOnly => self.run_read_only(),
        }
    }
}

// =============================================================================
// Block Device Prober
// =============================================================================

/// Probes real device nodes
#[derive(Debug, Clone, Default)]
pub struct BlockDeviceProber {
    config: ProbeConfig,
}

impl BlockDeviceProber {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    fn open(devnode: &str, mode: ProbeMode) -> io::Result<File> {
        match mode {
            ProbeMode::ReadWrite => OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(OFlag::O_DSYNC.bits())
                .open(devnode),
            ProbeMode::ReadOnly => OpenOptions::new().read(true).open(devnode),
        }
    }
}

impl StorageProber for BlockDeviceProber {
    fn probe(&self, devnode: &str, mode: ProbeMode) -> ProbeReport {
        info!("Starting {} probe of {}", mode, devnode);

        if devnode.is_empty() {
            warn!("No block device to probe");
            return ProbeReport::aborted(devnode, mode, "no block device to probe");
        }

        let file = match Self::open(devnode, mode) {
            Ok(file) => file,
            Err(e) => {
                error!("Cannot open {}: {}", devnode, e);
                return ProbeReport::open_failed(devnode, mode, e.to_string());
            }
        };

        let mut tester = StorageTester::new(file, devnode, self.config.clone());
        let report = tester.run(mode);
        info!(
            "Probe of {} finished: {}",
            devnode,
            if report.is_healthy() { "healthy" } else { "problems found" }
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Cursor;

    fn small_config() -> ProbeConfig {
        ProbeConfig {
            block_size: 4096,
            read_write_bytes: 64 * 1024,
            read_only_bytes: 128 * 1024,
        }
    }

    #[test]
    fn test_pattern() {
        let mut buf = vec![0u8; 300];
        fill_pattern(&mut buf, 0);
        assert_eq!(buf[0], 0);
        assert_eq!(buf[255], 255);
        assert_eq!(buf[256], 0);
        assert_eq!(first_mismatch(&buf, 0), None);

        fill_pattern(&mut buf, 4096);
        assert_eq!(buf[0], 0);
        assert_eq!(buf[1], 1);

        buf[17] ^= 0xff;
        assert_eq!(first_mismatch(&buf, 4096), Some(17));
    }

    #[test]
    fn test_read_write_round_trip_passes() {
        let mut tester = StorageTester::new(Cursor::new(Vec::new()), "mem0", small_config());
        let report = tester.run_read_write();

        assert_eq!(report.status, ProbeStatus::Completed);
        assert_eq!(report.integrity, IntegrityStatus::Passed);
        assert_eq!(report.write.as_ref().unwrap().bytes, 64 * 1024);
        assert_eq!(report.read.as_ref().unwrap().bytes, 64 * 1024);
        assert!(report.errors.is_empty());
        assert!(report.is_healthy());

        let backing = tester.into_inner().into_inner();
        assert_eq!(backing.len(), 64 * 1024);
        assert_eq!(backing[300], (300 % 256) as u8);
    }

    #[test]
    fn test_corrupted_byte_fails_integrity() {
        let mut tester = StorageTester::new(Cursor::new(Vec::new()), "mem0", small_config());

        let write = tester.write_phase();
        assert!(write.succeeded);

        tester.device_mut().get_mut()[5 * 4096 + 7] ^= 0x5a;
        tester.rewind().unwrap();

        let (read, integrity) = tester.verify_phase(true);
        assert!(read.succeeded);
        assert_eq!(read.bytes, 64 * 1024);
        assert_eq!(
            integrity,
            IntegrityStatus::Failed("data mismatch at block 5".to_string())
        );
    }

    #[test]
    fn test_short_write_skips_integrity() {
        // Backing store smaller than the window: writes stop short
        let mut backing = vec![0u8; 10 * 1024];
        let mut tester = StorageTester::new(Cursor::new(&mut backing[..]), "mem0", small_config());
        let report = tester.run_read_write();

        let write = report.write.as_ref().unwrap();
        assert!(!write.succeeded);
        assert_eq!(write.bytes, 10 * 1024);
        assert!(write.failure.as_ref().unwrap().contains("short write at block 2"));

        // Read phase still ran, integrity was not judged against a bad reference
        let read = report.read.as_ref().unwrap();
        assert!(!read.succeeded);
        assert_eq!(read.bytes, 10 * 1024);
        assert_eq!(
            report.integrity,
            IntegrityStatus::NotPerformed("write phase failed".to_string())
        );
        assert!(report.to_string().contains("NOT PERFORMED (write phase failed)"));
    }

    #[test]
    fn test_read_only_stops_at_end_of_device() {
        let device = Cursor::new(vec![7u8; 10_000]);
        let mut tester = StorageTester::new(device, "mem0", small_config());
        let report = tester.run_read_only();

        let read = report.read.as_ref().unwrap();
        assert!(read.succeeded);
        assert_eq!(read.bytes, 10_000);
        assert!(report.write.is_none());
        assert_eq!(report.integrity, IntegrityStatus::Unknown);
    }

    #[test]
    fn test_read_only_is_bounded() {
        let device = Cursor::new(vec![0u8; 512 * 1024]);
        let mut tester = StorageTester::new(device, "mem0", small_config());
        let report = tester.run(ProbeMode::ReadOnly);

        assert_eq!(report.read.as_ref().unwrap().bytes, 128 * 1024);
    }

    #[test]
    fn test_probe_missing_node_reports_open_failure() {
        let prober = BlockDeviceProber::new(small_config());
        let report = prober.probe("/nonexistent/usb-probe-test", ProbeMode::ReadOnly);

        assert_matches!(report.status, ProbeStatus::OpenFailed(_));
        assert!(report.read.is_none());
    }

    #[test]
    fn test_probe_empty_node_aborts() {
        let prober = BlockDeviceProber::default();
        let report = prober.probe("", ProbeMode::ReadWrite);
        assert_matches!(report.status, ProbeStatus::Aborted(_));
    }

    #[test]
    fn test_probe_regular_file_read_write() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().to_string();

        let prober = BlockDeviceProber::new(small_config());
        let report = prober.probe(&path, ProbeMode::ReadWrite);

        assert_eq!(report.status, ProbeStatus::Completed);
        assert_eq!(report.integrity, IntegrityStatus::Passed);
    }
}
