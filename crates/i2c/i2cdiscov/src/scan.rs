//! sysfs scanning.
//!
//! Adapters are found through the `i2c-N` links in `<sysfs>/bus/i2c/devices`.
//! For each one the canonical directory tells where it sits:
//!
//! ```text
//! /sys/devices/pci0000:00/0000:00:1f.3/i2c-0                 root adapter
//! /sys/devices/pci0000:00/0000:00:1f.3/i2c-0/i2c-3           mux channel, legacy layout
//! /sys/devices/pci0000:00/0000:00:1f.3/i2c-0/0-0070/i2c-5    mux channel behind mux chip 0-0070
//! ```
//!
//! Legacy mux channels are recognized by their `i2c-M-mux (chan_id K)` name
//! and sit directly inside their parent adapter. Channels behind a mux chip
//! carry a `mux_device` link to the chip, whose `channel-K` links point back
//! at them. Devices are the `N-AAAA` directories inside an adapter.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::error::{Error, Result};
use crate::node::{AdapterNode, BusDescriptor, DeclaredParent, DeviceNode, NodeId};
use crate::settings::DiscoverySettings;
use crate::sysfs::{self, AttributeReader};
use crate::tree::AdapterTree;

/// Why one adapter or device was left out of a scan.
#[derive(Debug, Error)]
enum Skip {
    #[error("not an i2c-N entry")]
    BadName,
    #[error("cannot resolve {}: {source}", path.display())]
    Unresolvable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no name attribute")]
    NoName,
}

/// Scan sysfs and build the adapter tree with every adapter's devices attached.
///
/// Adapters and devices that cannot be read are skipped with a log notice.
///
/// # Errors
///
/// Returns [`Error::SysfsMissing`] or [`Error::Io`] if sysfs cannot be
/// listed, and any consistency error from [`AdapterTree::build`].
pub fn scan(reader: &impl AttributeReader, settings: &DiscoverySettings) -> Result<AdapterTree> {
    sysfs::check_mount(&settings.sysfs_root, settings.verify_sysfs)?;

    let dir = settings.i2c_devices_dir();
    let names = reader
        .list_dir(&dir)
        .map_err(|e| Error::io(format!("listing {}", dir.display()), e))?;

    let mut adapters = Vec::new();
    for name in names.iter().filter(|n| n.starts_with("i2c-")) {
        match read_adapter(reader, settings, &dir.join(name), name) {
            Ok(adapter) => adapters.push(adapter),
            Err(reason) => log::info!("skipping adapter {name}: {reason}"),
        }
    }

    let mut tree = AdapterTree::build(adapters, settings.orphans)?;

    let placed: Vec<NodeId> = tree.pre_order().map(|(_, id)| id).collect();
    for id in placed {
        let devices = read_devices(reader, &tree, id);
        tree.set_devices(id, devices);
    }

    log::info!(
        "found {} adapters and {} devices under {}",
        tree.len(),
        tree.devices().count(),
        settings.sysfs_root.display()
    );
    Ok(tree)
}

/// Kernel id from an `i2c-N` name.
fn adapter_nr(name: &str) -> Option<u32> {
    name.strip_prefix("i2c-")?.parse().ok()
}

/// Parent id and channel from a legacy `i2c-M-mux (chan_id K)` name.
fn parse_mux_name(name: &str) -> Option<(u32, u32)> {
    let (parent, rest) = name
        .strip_prefix("i2c-")?
        .split_once("-mux (chan_id ")?;
    let digits = rest
        .find(|c: char| !c.is_ascii_digit())
        .map_or(rest, |end| &rest[..end]);
    Some((parent.parse().ok()?, digits.parse().ok()?))
}

fn read_adapter(
    reader: &impl AttributeReader,
    settings: &DiscoverySettings,
    link: &Path,
    entry: &str,
) -> Result<AdapterNode, Skip> {
    let nr = adapter_nr(entry).ok_or(Skip::BadName)?;
    let devpath = reader
        .canonicalize(link)
        .map_err(|source| Skip::Unresolvable {
            path: link.to_owned(),
            source,
        })?;
    let name = reader.read_attr(&devpath, "name").ok_or(Skip::NoName)?;

    let mux_device = reader.canonicalize(&devpath.join("mux_device")).ok();
    let parent_name = devpath
        .parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned());

    let declared = match parent_name.as_deref().and_then(adapter_nr) {
        Some(parent) => DeclaredParent::Adapter(parent),
        None => mux_device
            .as_deref()
            .and_then(Path::parent)
            .and_then(Path::file_name)
            .and_then(|n| adapter_nr(&n.to_string_lossy()))
            .map_or(DeclaredParent::Root, DeclaredParent::Adapter),
    };

    let channel = match parse_mux_name(&name) {
        Some((_, chan)) => Some(chan),
        None if name.contains("mux") && mux_device.is_none() => {
            log::info!("i2c-{nr}: unrecognized mux name {name:?}, treating as plain adapter");
            None
        }
        None => mux_device
            .as_deref()
            .and_then(|mux| mux_channel(reader, mux, &devpath)),
    };

    let mut adapter = AdapterNode::new(nr, declared);
    if let Some(chan) = channel {
        adapter = adapter.with_channel(chan);
    }
    adapter.subsystem = reader.link_name(&devpath, "subsystem");
    adapter.char_dev = reader.file_id(&settings.dev_node(nr));
    adapter.parent_name = parent_name;
    adapter.name = Some(name);
    adapter.devpath = devpath;

    log::debug!(
        "i2c-{nr}: parent {:?}, channel {:?}, {}",
        adapter.declared_parent(),
        adapter.chan_id(),
        adapter.devpath.display()
    );
    Ok(adapter)
}

/// Channel number of `adapter` from the `channel-K` links of its mux chip.
fn mux_channel(reader: &impl AttributeReader, mux: &Path, adapter: &Path) -> Option<u32> {
    let names = reader.list_dir(mux).ok()?;
    names.iter().find_map(|name| {
        let chan = name.strip_prefix("channel-")?.parse().ok()?;
        let target = reader.canonicalize(&mux.join(name)).ok()?;
        (target == adapter).then_some(chan)
    })
}

fn read_devices(reader: &impl AttributeReader, tree: &AdapterTree, id: NodeId) -> Vec<DeviceNode> {
    let adapter = tree.node(id);
    let prefix = format!("{}-", adapter.nr());
    let names = match reader.list_dir(&adapter.devpath) {
        Ok(names) => names,
        Err(err) => {
            log::info!("i2c-{}: cannot list devices: {err}", adapter.nr());
            return Vec::new();
        }
    };

    let bus = BusDescriptor {
        kind: adapter.bus_type,
        nr: adapter.nr(),
        path: adapter.path().to_owned(),
    };

    names
        .iter()
        .filter_map(|entry| {
            let hex = entry.strip_prefix(&prefix)?;
            if hex.is_empty() {
                return None;
            }
            let addr = u16::from_str_radix(hex, 16).ok()?;
            match read_device(reader, &adapter.devpath.join(entry), addr, &bus, id) {
                Ok(device) => Some(device),
                Err(reason) => {
                    log::info!("skipping device {entry}: {reason}");
                    None
                }
            }
        })
        .collect()
}

fn read_device(
    reader: &impl AttributeReader,
    path: &Path,
    addr: u16,
    bus: &BusDescriptor,
    adapter: NodeId,
) -> Result<DeviceNode, Skip> {
    let devpath = reader
        .canonicalize(path)
        .map_err(|source| Skip::Unresolvable {
            path: path.to_owned(),
            source,
        })?;
    let name = reader.read_attr(path, "name").ok_or(Skip::NoName)?;

    // Dummy clients reserve an address for another driver and never bind.
    let (driver, module) = if name.starts_with("dummy") {
        (None, None)
    } else {
        (
            reader.link_name(path, "driver"),
            reader.link_name(&path.join("driver"), "module"),
        )
    };

    Ok(DeviceNode {
        addr,
        bus: bus.clone(),
        name: Some(name),
        driver,
        module,
        subsystem: reader.link_name(path, "subsystem"),
        devpath,
        adapter,
    })
}
