//! Domain layer - Core types and port definitions
//!
//! This module defines the hotplug event model, the tracked device record,
//! and the traits (ports) that host adapters implement.

pub mod ports;

pub use ports::*;
