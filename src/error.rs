//! Error types for the USB probe monitor
//!
//! Provides structured error types for the monitor components: the hotplug
//! event source, sysfs lookups and the report display. Probe failures are
//! recorded inside the probe report instead.

use std::any::Any;
use thiserror::Error;

/// Unified error type for the monitor
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to load configuration file {path}: {reason}")]
    ConfigFile { path: String, reason: String },

    // =========================================================================
    // Event Source Errors
    // =========================================================================
    #[error("Event source setup failed: {0}")]
    EventSourceSetup(String),

    #[error("Event source error: {0}")]
    EventSource(String),

    #[error("Malformed hotplug event: {0}")]
    MalformedEvent(String),

    // =========================================================================
    // Device Tree Errors
    // =========================================================================
    #[error("Device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("Failed to read sysfs attribute {path}: {reason}")]
    SysfsRead { path: String, reason: String },

    // =========================================================================
    // Display Errors
    // =========================================================================
    #[error("Report viewer unavailable: {0}")]
    DisplayUnavailable(String),

    #[error("Report viewer exited with status {code:?}")]
    DisplayFailed { code: Option<i32> },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How an error affects the running monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Dropped with a log line, no user-visible effect
    Ignorable,
    /// Handled locally and surfaced in the report or the log
    Recoverable,
    /// The process cannot start or continue
    Fatal,
}

impl Error {
    /// Classify this error
    pub fn severity(&self) -> Severity {
        match self {
            Error::MalformedEvent(_) | Error::DeviceNotFound { .. } => Severity::Ignorable,

            Error::EventSourceSetup(_)
            | Error::Configuration(_)
            | Error::ConfigFile { .. }
            | Error::Yaml(_)
            | Error::Internal(_) => Severity::Fatal,

            _ => Severity::Recoverable,
        }
    }

    /// Check if this error must stop the process
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Check if this error is dropped without any user-visible effect
    pub fn is_ignorable(&self) -> bool {
        self.severity() == Severity::Ignorable
    }
}

/// Result type alias for the monitor
pub type Result<T> = std::result::Result<T, Error>;

/// Text of a caught panic payload
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let err = Error::MalformedEvent("missing DEVPATH".into());
        assert_eq!(err.severity(), Severity::Ignorable);
        assert!(err.is_ignorable());

        let err = Error::EventSourceSetup("bind failed".into());
        assert_eq!(err.severity(), Severity::Fatal);
        assert!(err.is_fatal());

        let err = Error::SysfsRead {
            path: "/sys/block/sdx/size".into(),
            reason: "Permission denied".into(),
        };
        assert_eq!(err.severity(), Severity::Recoverable);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_display_errors_are_not_fatal() {
        let err = Error::DisplayFailed { code: Some(5) };
        assert!(!err.is_fatal());
        assert!(!err.is_ignorable());

        let err = Error::DisplayUnavailable("zenity: not found".into());
        assert_eq!(err.severity(), Severity::Recoverable);
    }

    #[test]
    fn test_error_messages() {
        let err = Error::SysfsRead {
            path: "/sys/block/sdx/size".into(),
            reason: "No such file or directory".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to read sysfs attribute /sys/block/sdx/size: No such file or directory"
        );
    }

    #[test]
    fn test_panic_message() {
        let panic = std::panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(&*panic), "boom 1");

        let panic = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(&*panic), "static");

        let panic = std::panic::catch_unwind(|| std::panic::panic_any(7u8)).unwrap_err();
        assert_eq!(panic_message(&*panic), "unknown panic");
    }
}
