//! Hardware Classification Module
//!
//! Decides whether an attached USB device exposes a mass-storage interface.

pub mod classifier;

pub use classifier::*;
