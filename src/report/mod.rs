//! Report Module
//!
//! Assembly of the per-device report and the sinks that show it.

pub mod assembly;
pub mod display;

pub use assembly::*;
pub use display::*;
