//! Uevent Codec
//!
//! Decodes `NETLINK_KOBJECT_UEVENT` datagrams into [`HotplugEvent`]s.
//!
//! Two framings arrive on the socket depending on the multicast group:
//!
//! - udev (group 2): a 40 byte `libudev` header followed by NUL separated
//!   `KEY=VALUE` properties. The header carries the magic `0xfeedcafe` in
//!   network byte order and native-endian offsets.
//! - kernel (group 1): an `action@devpath` line followed by NUL separated
//!   `KEY=VALUE` properties.

use crate::domain::ports::{Action, HotplugEvent, Subsystem};
use crate::error::{Error, Result};
use std::collections::BTreeMap;

// =============================================================================
// Constants
// =============================================================================

/// Prefix of every udev daemon message
pub const UDEV_PREFIX: &[u8] = b"libudev\0";

/// udev monitor magic, stored big-endian
pub const UDEV_MAGIC: u32 = 0xfeed_cafe;

/// Size of the udev monitor header
pub const UDEV_HEADER_LEN: usize = 40;

const KEY_ACTION: &str = "ACTION";
const KEY_DEVPATH: &str = "DEVPATH";
const KEY_SUBSYSTEM: &str = "SUBSYSTEM";
const KEY_DEVTYPE: &str = "DEVTYPE";
const KEY_DEVNAME: &str = "DEVNAME";

// =============================================================================
// Decoding
// =============================================================================

/// Decode one datagram, whichever framing it uses
pub fn decode(datagram: &[u8]) -> Result<HotplugEvent> {
    if datagram.starts_with(UDEV_PREFIX) {
        decode_udev(datagram)
    } else {
        decode_kernel(datagram)
    }
}

/// Decode a udev daemon message
pub fn decode_udev(datagram: &[u8]) -> Result<HotplugEvent> {
    if datagram.len() < UDEV_HEADER_LEN {
        return Err(Error::MalformedEvent(format!(
            "udev message too short ({} bytes)",
            datagram.len()
        )));
    }

    let magic = u32::from_be_bytes(word(datagram, 8));
    if magic != UDEV_MAGIC {
        return Err(Error::MalformedEvent(format!("bad udev magic {:#010x}", magic)));
    }

    let header_size = u32::from_ne_bytes(word(datagram, 12)) as usize;
    let properties_off = u32::from_ne_bytes(word(datagram, 16)) as usize;
    let properties_len = u32::from_ne_bytes(word(datagram, 20)) as usize;

    if header_size < UDEV_HEADER_LEN || properties_off < header_size {
        return Err(Error::MalformedEvent(format!(
            "bad udev header (size {}, properties at {})",
            header_size, properties_off
        )));
    }

    let end = properties_off
        .checked_add(properties_len)
        .filter(|end| *end <= datagram.len())
        .ok_or_else(|| {
            Error::MalformedEvent(format!(
                "udev properties out of bounds ({}+{} > {})",
                properties_off,
                properties_len,
                datagram.len()
            ))
        })?;

    event_from_properties(parse_properties(&datagram[properties_off..end]))
}

/// Decode a raw kernel uevent
pub fn decode_kernel(datagram: &[u8]) -> Result<HotplugEvent> {
    let header_end = datagram
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(datagram.len());
    let header = String::from_utf8_lossy(&datagram[..header_end]);

    if !header.contains('@') {
        return Err(Error::MalformedEvent(format!(
            "kernel uevent header without '@': {:?}",
            header
        )));
    }

    let body = datagram.get(header_end + 1..).unwrap_or_default();
    event_from_properties(parse_properties(body))
}

/// Split a NUL separated `KEY=VALUE` block. Entries without '=' are skipped.
pub fn parse_properties(block: &[u8]) -> BTreeMap<String, String> {
    block
        .split(|&b| b == 0)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            entry
                .split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// Build an event from its properties. ACTION, DEVPATH and SUBSYSTEM are
/// required; the structural keys are lifted out of the attribute map.
pub fn event_from_properties(mut props: BTreeMap<String, String>) -> Result<HotplugEvent> {
    let action = take_required(&mut props, KEY_ACTION)?;
    let devpath = take_required(&mut props, KEY_DEVPATH)?;
    let subsystem = take_required(&mut props, KEY_SUBSYSTEM)?;

    let mut event = HotplugEvent::new(Action::parse(&action), Subsystem::parse(&subsystem), devpath);
    event.devtype = props.remove(KEY_DEVTYPE).filter(|v| !v.is_empty());
    event.devnode = props
        .remove(KEY_DEVNAME)
        .filter(|v| !v.is_empty())
        .map(|name| device_node(&name));
    event.attributes = props;
    Ok(event)
}

/// DEVNAME is relative to /dev in kernel uevents and absolute from udev
pub fn device_node(devname: &str) -> String {
    if devname.starts_with('/') {
        devname.to_string()
    } else {
        format!("/dev/{}", devname)
    }
}

fn take_required(props: &mut BTreeMap<String, String>, key: &str) -> Result<String> {
    props
        .remove(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::MalformedEvent(format!("missing {}", key)))
}

fn word(buf: &[u8], at: usize) -> [u8; 4] {
    [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]
}
