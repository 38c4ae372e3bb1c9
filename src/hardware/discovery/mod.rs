//! Hardware Discovery Module
//!
//! Enumerates USB devices that are already attached to the host.

pub mod scanner;

pub use scanner::*;
