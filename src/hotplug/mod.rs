//! Hotplug Module
//!
//! Kernel hotplug notifications: the netlink event source, the uevent
//! codec and the sysfs-backed device tree.

pub mod codec;
pub mod monitor;
pub mod sysfs;

pub use monitor::*;
pub use sysfs::*;
