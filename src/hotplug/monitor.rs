//! Netlink Monitor
//!
//! Owns the `NETLINK_KOBJECT_UEVENT` socket and runs the single consumer
//! loop: bounded poll, receive, decode, filter, enrich, dispatch.
//!
//! Raw kernel uevents lack the udev properties the engine keys on. On the
//! kernel group a usb_device is announced on its `bind` event (interfaces
//! exist by then) and a disk below a USB device is marked USB-attached.

use super::codec;
use crate::config::{MonitorConfig, NetlinkGroup};
use crate::domain::ports::{
    Action, DeviceTreeRef, HotplugEvent, Subsystem, DEVTYPE_DISK, PROP_ID_BUS, PROP_ID_TYPE,
};
use crate::error::{panic_message, Error, Result};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::socket::{
    bind, recvfrom, setsockopt, socket, sockopt, AddressFamily, NetlinkAddr, SockFlag,
    SockProtocol, SockType,
};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Largest uevent datagram we accept
const RECV_BUFFER_LEN: usize = 16 * 1024;

/// Kernel action emitted once a driver bound to a device
const ACTION_BIND: &str = "bind";

/// Descriptor attributes snapshotted into usb_device events
pub const USB_DESCRIPTOR_ATTRIBUTES: [&str; 5] =
    ["idVendor", "idProduct", "manufacturer", "product", "serial"];

// =============================================================================
// Netlink Monitor
// =============================================================================

/// Hotplug event source on a netlink socket
pub struct NetlinkMonitor {
    fd: OwnedFd,
    group: NetlinkGroup,
    poll_timeout_ms: u16,
    tree: DeviceTreeRef,
    buf: Vec<u8>,
}

impl NetlinkMonitor {
    /// Open and bind the socket
    pub fn open(config: &MonitorConfig, tree: DeviceTreeRef) -> Result<Self> {
        let fd = socket(
            AddressFamily::Netlink,
            SockType::Raw,
            SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
            SockProtocol::NetlinkKObjectUEvent,
        )
        .map_err(|e| Error::EventSourceSetup(format!("cannot create netlink socket: {}", e)))?;

        if let Err(e) = setsockopt(&fd, sockopt::RcvBuf, &config.receive_buffer_bytes) {
            warn!("Cannot set receive buffer to {} bytes: {}", config.receive_buffer_bytes, e);
        }

        let addr = NetlinkAddr::new(0, config.netlink_group.mask());
        bind(fd.as_raw_fd(), &addr).map_err(|e| {
            Error::EventSourceSetup(format!(
                "cannot bind netlink socket to {} group: {}",
                config.netlink_group, e
            ))
        })?;

        let timeout_ms = u16::try_from(config.poll_timeout_ms).unwrap_or(u16::MAX);
        info!(
            "Listening for {} hotplug events (poll timeout {} ms)",
            config.netlink_group, timeout_ms
        );

        Ok(Self::from_fd(fd, config.netlink_group, timeout_ms, tree))
    }

    /// Wrap an already bound datagram socket
    pub fn from_fd(fd: OwnedFd, group: NetlinkGroup, poll_timeout_ms: u16, tree: DeviceTreeRef) -> Self {
        Self {
            fd,
            group,
            poll_timeout_ms,
            tree,
            buf: vec![0u8; RECV_BUFFER_LEN],
        }
    }

    /// Run until the token is cancelled or the socket fails.
    ///
    /// Each relevant event is passed to `handler` in delivery order. A panic
    /// inside the handler is logged and the loop keeps going.
    pub fn run<F>(&mut self, token: &CancellationToken, mut handler: F) -> Result<()>
    where
        F: FnMut(&HotplugEvent),
    {
        info!("Hotplug monitor loop started");

        loop {
            if token.is_cancelled() {
                break;
            }

            let ready = {
                let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
                poll(&mut fds, PollTimeout::from(self.poll_timeout_ms))
            };
            match ready {
                Ok(0) => continue,
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(Error::EventSource(format!("poll failed: {}", e))),
            }

            if token.is_cancelled() {
                break;
            }

            let event = match self.receive() {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Receive failed: {}", e);
                    continue;
                }
            };

            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                error!(
                    "Event handler panicked on {} {}: {}",
                    event.action,
                    event.devpath,
                    panic_message(&*panic)
                );
            }
        }

        info!("Hotplug monitor loop stopped");
        Ok(())
    }

    /// Receive one datagram. Ok(None) when nothing relevant was received.
    pub fn receive(&mut self) -> Result<Option<HotplugEvent>> {
        let (len, sender) = match recvfrom::<NetlinkAddr>(self.fd.as_raw_fd(), &mut self.buf) {
            Ok(received) => received,
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => return Ok(None),
            Err(Errno::ENOBUFS) => {
                warn!("Netlink receive buffer overflowed, hotplug events were lost");
                return Ok(None);
            }
            Err(e) => return Err(Error::EventSource(format!("recvfrom failed: {}", e))),
        };

        // Only the kernel may speak on the kernel group
        if self.group == NetlinkGroup::Kernel && sender.map_or(true, |addr| addr.pid() != 0) {
            trace!("Discarding datagram from non-kernel sender");
            return Ok(None);
        }

        match codec::decode(&self.buf[..len]) {
            Ok(event) => Ok(admit(event, self.group, &self.tree)),
            Err(e) => {
                debug!("Dropping datagram: {}", e);
                Ok(None)
            }
        }
    }
}

/// Filter a decoded event and bring it into the shape the engine expects.
/// None when the event is not relevant.
pub fn admit(event: HotplugEvent, group: NetlinkGroup, tree: &DeviceTreeRef) -> Option<HotplugEvent> {
    if let Subsystem::Other(_) = event.subsystem {
        return None;
    }
    let event = match group {
        NetlinkGroup::Kernel => adapt_kernel_event(event, tree)?,
        NetlinkGroup::Udev => event,
    };
    Some(enrich(event, tree))
}

/// Map raw kernel uevents onto udev semantics
fn adapt_kernel_event(mut event: HotplugEvent, tree: &DeviceTreeRef) -> Option<HotplugEvent> {
    if event.is_usb_device() {
        if event.action == Action::Add {
            trace!("Deferring {} until its driver is bound", event.devpath);
            return None;
        }
        if matches!(&event.action, Action::Other(action) if action == ACTION_BIND) {
            event.action = Action::Add;
        }
    } else if event.subsystem == Subsystem::Block
        && event.action == Action::Add
        && event.devtype.as_deref() == Some(DEVTYPE_DISK)
        && !event.attributes.contains_key(PROP_ID_BUS)
        && tree.usb_device_ancestor(&event).is_some()
    {
        event.attributes.insert(PROP_ID_BUS.to_string(), "usb".to_string());
        event.attributes.insert(PROP_ID_TYPE.to_string(), "disk".to_string());
    }
    Some(event)
}

/// Snapshot descriptor attributes of a usb_device from the device tree.
/// Values already carried by the event win.
pub fn enrich(mut event: HotplugEvent, tree: &DeviceTreeRef) -> HotplugEvent {
    if event.is_usb_device() {
        for name in USB_DESCRIPTOR_ATTRIBUTES {
            if event.attributes.contains_key(name) {
                continue;
            }
            if let Some(value) = tree.attribute(&event.devpath, name) {
                event.attributes.insert(name.to_string(), value);
            }
        }
    }
    trace!(
        "Hotplug event: {} {} {} {:?}",
        event.action,
        event.subsystem,
        event.devpath,
        event.devtype
    );
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{DeviceTree, ProbeMode};
    use crate::engine::CorrelationEngine;
    use crate::hardware::MassStorageClassifier;
    use crate::hotplug::codec::tests::{kernel_frame, udev_frame};
    use crate::hotplug::sysfs::tests::{fake_sysfs, DISK, USB_DEV};
    use crate::hotplug::sysfs::SysfsDeviceTree;
    use crate::testing::{FakeDeviceTree, RecordingProber, RecordingSink};
    use nix::sys::socket::{send, socketpair, MsgFlags};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_enrich_usb_device() {
        let tmp = fake_sysfs();
        let tree: DeviceTreeRef = Arc::new(SysfsDeviceTree::new(tmp.path()));

        let event = HotplugEvent::new(Action::Add, Subsystem::Usb, USB_DEV)
            .with_devtype("usb_device")
            .with_attribute("product", "From Event");
        let event = enrich(event, &tree);

        assert_eq!(event.attribute("idVendor"), Some("0781"));
        assert_eq!(event.attribute("idProduct"), Some("5567"));
        assert_eq!(event.attribute("manufacturer"), Some("SanDisk"));
        assert_eq!(event.attribute("product"), Some("From Event"));
        assert_eq!(event.attribute("serial"), None);
    }

    #[test]
    fn test_enrich_leaves_block_events_alone() {
        let tmp = fake_sysfs();
        let tree: DeviceTreeRef = Arc::new(SysfsDeviceTree::new(tmp.path()));

        let event = HotplugEvent::new(Action::Add, Subsystem::Block, DISK).with_devtype("disk");
        let enriched = enrich(event.clone(), &tree);
        assert_eq!(enriched, event);
        assert!(tree.attribute(DISK, "idVendor").is_none());
    }

    fn socket_monitor(poll_timeout_ms: u16) -> (NetlinkMonitor, OwnedFd) {
        let (ours, peer) = socketpair(
            AddressFamily::Unix,
            SockType::Datagram,
            None::<SockProtocol>,
            SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
        )
        .unwrap();
        let tree: DeviceTreeRef = Arc::new(FakeDeviceTree::default());
        let monitor = NetlinkMonitor::from_fd(ours, NetlinkGroup::Udev, poll_timeout_ms, tree);
        (monitor, peer)
    }

    fn send_frame(peer: &OwnedFd, frame: &[u8]) {
        send(peer.as_raw_fd(), frame, MsgFlags::empty()).unwrap();
    }

    fn disk_frame(name: &str) -> Vec<u8> {
        let devpath = format!("/devices/usb1/1-1/1-1:1.0/block/{}", name);
        let devname = format!("/dev/{}", name);
        udev_frame(&[
            ("ACTION", "add"),
            ("DEVPATH", &devpath),
            ("SUBSYSTEM", "block"),
            ("DEVTYPE", "disk"),
            ("DEVNAME", &devname),
        ])
    }

    #[test]
    fn test_run_returns_when_cancelled_before_start() {
        let (mut monitor, peer) = socket_monitor(1000);
        send_frame(&peer, &disk_frame("sdb"));

        let token = CancellationToken::new();
        token.cancel();

        let started = Instant::now();
        let mut seen = 0;
        monitor.run(&token, |_| seen += 1).unwrap();

        assert_eq!(seen, 0);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_run_observes_cancel_during_wait() {
        let (mut monitor, _peer) = socket_monitor(50);
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                token.cancel();
            })
        };

        let started = Instant::now();
        monitor.run(&token, |_| {}).unwrap();
        canceller.join().unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_run_survives_handler_panic() {
        let (mut monitor, peer) = socket_monitor(50);
        send_frame(&peer, b"not a uevent");
        send_frame(&peer, &disk_frame("sdb"));
        send_frame(&peer, &disk_frame("sdc"));

        let token = CancellationToken::new();
        let mut seen = Vec::new();
        monitor
            .run(&token, |event| {
                seen.push(event.devnode.clone().unwrap_or_default());
                if seen.len() == 1 {
                    panic!("handler failure");
                }
                token.cancel();
            })
            .unwrap();

        assert_eq!(seen, vec!["/dev/sdb".to_string(), "/dev/sdc".to_string()]);
    }

    #[test]
    fn test_kernel_events_drive_engine() {
        let tmp = fake_sysfs();
        let tree: DeviceTreeRef = Arc::new(SysfsDeviceTree::new(tmp.path()));
        let prober = RecordingProber::default();
        let sink = RecordingSink::default();
        let mut engine = CorrelationEngine::new(
            tree.clone(),
            Arc::new(MassStorageClassifier::new(tree.clone())),
            Arc::new(prober.clone()),
            Arc::new(sink.clone()),
            ProbeMode::ReadOnly,
        );

        let usb_props = |action: &'static str| {
            kernel_frame(
                action,
                USB_DEV,
                &[
                    ("ACTION", action),
                    ("DEVPATH", USB_DEV),
                    ("SUBSYSTEM", "usb"),
                    ("DEVTYPE", "usb_device"),
                    ("DEVNAME", "bus/usb/001/004"),
                ],
            )
        };
        let frames = [
            usb_props("add"),
            usb_props("bind"),
            kernel_frame(
                "add",
                DISK,
                &[
                    ("ACTION", "add"),
                    ("DEVPATH", DISK),
                    ("SUBSYSTEM", "block"),
                    ("DEVTYPE", "disk"),
                    ("DEVNAME", "sdb"),
                ],
            ),
        ];

        let mut admitted = 0;
        for frame in &frames {
            let event = codec::decode(frame).unwrap();
            if let Some(event) = admit(event, NetlinkGroup::Kernel, &tree) {
                admitted += 1;
                engine.handle_event(&event);
            }
        }

        // The raw add waits for bind
        assert_eq!(admitted, 2);
        assert_eq!(
            prober.calls.lock().clone(),
            vec![("/dev/sdb".to_string(), ProbeMode::ReadOnly)]
        );
        let shown = sink.shown.lock().clone();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].0, "USB device: Cruzer Blade");
        assert!(shown[0].1.contains("0781"));
        assert!(shown[0].1.contains("14.3 GB"));
    }

    #[test]
    fn test_udev_events_are_not_adapted() {
        let tmp = fake_sysfs();
        let tree: DeviceTreeRef = Arc::new(SysfsDeviceTree::new(tmp.path()));

        let add = HotplugEvent::new(Action::Add, Subsystem::Usb, USB_DEV).with_devtype("usb_device");
        assert!(admit(add.clone(), NetlinkGroup::Udev, &tree).is_some());
        assert!(admit(add, NetlinkGroup::Kernel, &tree).is_none());

        let disk = HotplugEvent::new(Action::Add, Subsystem::Block, DISK)
            .with_devtype("disk")
            .with_devnode("/dev/sdb");
        let admitted = admit(disk, NetlinkGroup::Udev, &tree).unwrap();
        assert!(!admitted.is_usb_disk());

        let other = HotplugEvent::new(Action::Add, Subsystem::Other("net".into()), "/devices/virtual/net/lo");
        assert!(admit(other, NetlinkGroup::Kernel, &tree).is_none());
    }
}
