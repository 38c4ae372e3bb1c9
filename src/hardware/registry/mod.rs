//! Device Registry Module
//!
//! Tracks the USB devices currently attached and broadcasts their
//! lifecycle to observers.

pub mod device_registry;
pub mod events;

pub use device_registry::*;
pub use events::*;
