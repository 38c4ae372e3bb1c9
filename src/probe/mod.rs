//! Storage probe
//!
//! Throughput and integrity testing of block devices, and the report
//! produced by a probe run.

pub mod report;
pub mod tester;

pub use report::*;
pub use tester::*;
