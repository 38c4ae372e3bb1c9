//! Hardware Module
//!
//! Provides USB device discovery, mass-storage classification and the
//! registry of attached devices.

pub mod discovery;
pub mod classification;
pub mod registry;

pub use discovery::*;
pub use classification::*;
pub use registry::*;
