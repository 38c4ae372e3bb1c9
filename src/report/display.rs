//! Report Sinks
//!
//! `ZenityDisplay` shows a report in a zenity text window, `StdoutDisplay`
//! prints it for headless hosts.

use crate::config::DisplayBackend;
use crate::domain::ports::{ReportSink, ReportSinkRef};
use crate::error::{Error, Result};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use tempfile::TempPath;
use tracing::{debug, error, info, warn};

/// Prefix of temporary report files
pub const REPORT_FILE_PREFIX: &str = "usb-probe-";

const ZENITY: &str = "zenity";
const WINDOW_WIDTH: u32 = 800;
const WINDOW_HEIGHT: u32 = 600;

// =============================================================================
// Zenity Display
// =============================================================================

/// Shows reports with `zenity --text-info`
#[derive(Debug, Clone)]
pub struct ZenityDisplay {
    report_dir: PathBuf,
    program: String,
}

impl ZenityDisplay {
    pub fn new(report_dir: impl Into<PathBuf>) -> Self {
        Self::with_program(report_dir, ZENITY)
    }

    /// Use a different viewer executable taking zenity's arguments
    pub fn with_program(report_dir: impl Into<PathBuf>, program: impl Into<String>) -> Self {
        Self {
            report_dir: report_dir.into(),
            program: program.into(),
        }
    }

    /// Write the report file
    fn write_report(&self, body: &str) -> Result<TempPath> {
        let mut file = tempfile::Builder::new()
            .prefix(REPORT_FILE_PREFIX)
            .suffix(".txt")
            .tempfile_in(&self.report_dir)?;
        file.write_all(body.as_bytes())?;
        file.flush()?;
        Ok(file.into_temp_path())
    }

    /// Start the viewer on a report file
    fn launch(&self, title: &str, path: &Path) -> std::io::Result<Child> {
        Command::new(&self.program)
            .arg("--text-info")
            .arg(format!("--title={}", title))
            .arg(format!("--filename={}", path.display()))
            .arg(format!("--width={}", WINDOW_WIDTH))
            .arg(format!("--height={}", WINDOW_HEIGHT))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
    }
}

/// Wait for the viewer and dispose of the report file. Exit status 0 or 1
/// (window closed) is success and removes the file; anything else keeps it.
pub fn reap(mut child: Child, path: TempPath) -> Result<()> {
    let status = child.wait()?;
    match status.code() {
        Some(0) | Some(1) => {
            debug!("Report viewer closed, removing {}", path.display());
            drop(path);
            Ok(())
        }
        code => {
            keep_report(path);
            Err(Error::DisplayFailed { code })
        }
    }
}

fn keep_report(path: TempPath) {
    match path.keep() {
        Ok(kept) => warn!("Report kept at {}", kept.display()),
        Err(e) => error!("Cannot keep report file: {}", e),
    }
}

impl ReportSink for ZenityDisplay {
    fn display(&self, title: &str, body: &str) -> Result<()> {
        let path = self.write_report(body)?;
        info!("Report for {:?} written to {}", title, path.display());

        let child = match self.launch(title, &path) {
            Ok(child) => child,
            Err(e) => {
                keep_report(path);
                return Err(if e.kind() == ErrorKind::NotFound {
                    Error::DisplayUnavailable(format!("{}: not found", self.program))
                } else {
                    Error::DisplayUnavailable(format!("cannot start {}: {}", self.program, e))
                });
            }
        };

        // The viewer stays open until the user closes it
        let spawned = thread::Builder::new()
            .name("report-viewer".to_string())
            .spawn(move || {
                if let Err(e) = reap(child, path) {
                    warn!("Report viewer failed: {}", e);
                }
            });
        if let Err(e) = spawned {
            return Err(Error::Internal(format!("cannot start reaper thread: {}", e)));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        ZENITY
    }
}

// =============================================================================
// Stdout Display
// =============================================================================

/// Prints reports to standard output
#[derive(Debug, Clone, Default)]
pub struct StdoutDisplay;

impl ReportSink for StdoutDisplay {
    fn display(&self, title: &str, body: &str) -> Result<()> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", title)?;
        writeln!(out, "{}", body)?;
        out.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Build the configured sink
pub fn build_sink(backend: DisplayBackend, report_dir: &Path) -> ReportSinkRef {
    match backend {
        DisplayBackend::Zenity => Arc::new(ZenityDisplay::new(report_dir)),
        DisplayBackend::Stdout => Arc::new(StdoutDisplay),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::fs;

    fn report_files(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .unwrap()
                    .to_string_lossy()
                    .starts_with(REPORT_FILE_PREFIX)
            })
            .collect()
    }

    #[test]
    fn test_missing_viewer_keeps_report() {
        let dir = tempfile::TempDir::new().unwrap();
        let display = ZenityDisplay::with_program(dir.path(), "/nonexistent/zenity");

        let err = display.display("USB device: test", "body text").unwrap_err();
        assert_matches!(err, Error::DisplayUnavailable(_));
        assert!(!err.is_fatal());

        let files = report_files(dir.path());
        assert_eq!(files.len(), 1);
        assert_eq!(fs::read_to_string(&files[0]).unwrap(), "body text");
    }

    #[test]
    fn test_reap_success_removes_report() {
        let dir = tempfile::TempDir::new().unwrap();
        let display = ZenityDisplay::with_program(dir.path(), "true");

        let path = display.write_report("body").unwrap();
        let child = display.launch("title", &path).unwrap();
        reap(child, path).unwrap();
        assert!(report_files(dir.path()).is_empty());

        // Closing the window exits with 1
        let display = ZenityDisplay::with_program(dir.path(), "false");
        let path = display.write_report("body").unwrap();
        let child = display.launch("title", &path).unwrap();
        reap(child, path).unwrap();
        assert!(report_files(dir.path()).is_empty());
    }

    #[test]
    fn test_reap_failure_keeps_report() {
        let dir = tempfile::TempDir::new().unwrap();
        let display = ZenityDisplay::new(dir.path());
        let path = display.write_report("body").unwrap();

        let child = Command::new("sh").arg("-c").arg("exit 5").spawn().unwrap();
        let err = reap(child, path).unwrap_err();
        assert_matches!(err, Error::DisplayFailed { code: Some(5) });
        assert_eq!(report_files(dir.path()).len(), 1);
    }

    #[test]
    fn test_build_sink() {
        let sink = build_sink(DisplayBackend::Stdout, Path::new("/var/tmp"));
        assert_eq!(sink.name(), "stdout");
        let sink = build_sink(DisplayBackend::Zenity, Path::new("/var/tmp"));
        assert_eq!(sink.name(), "zenity");
    }
}
