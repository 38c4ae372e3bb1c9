//! Correlation engine
//!
//! Consumes hotplug events and turns them into probes and reports.

pub mod correlator;

pub use correlator::*;
