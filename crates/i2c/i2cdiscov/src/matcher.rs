//! Matching configured chips against discovered devices.

use crate::config::ConfigEntry;
use crate::node::{DeviceNode, NodeId};
use crate::tree::AdapterTree;

/// Returns `true` if `device` satisfies `entry`.
///
/// Name prefix and bus path compare case-insensitively, the address
/// compares exactly. A field passes when either side leaves it open.
#[must_use]
pub fn matches(device: &DeviceNode, entry: &ConfigEntry) -> bool {
    let name_ok = match (&entry.prefix, &device.name) {
        (Some(prefix), Some(name)) => prefix.eq_ignore_ascii_case(name),
        _ => true,
    };
    let addr_ok = entry.addr.is_none_or(|addr| addr == device.addr);
    let bus_ok = entry
        .bus
        .path
        .as_deref()
        .is_none_or(|path| path.eq_ignore_ascii_case(&device.bus.path));

    name_ok && addr_ok && bus_ok
}

/// A discovered device paired with the configuration entry it satisfies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfiguredDevice {
    /// Adapter holding the device.
    pub adapter: NodeId,
    /// Index into that adapter's device list.
    pub device: usize,
    /// Index of the satisfied entry.
    pub entry: usize,
}

impl AdapterTree {
    /// The adapter a configuration entry points at, if it exists.
    ///
    /// A path is resolved through the tree, a bare id through the registry.
    /// Wildcard and malformed selectors resolve to nothing.
    #[must_use]
    pub fn entry_adapter(&self, entry: &ConfigEntry) -> Option<NodeId> {
        match (&entry.bus.path, entry.bus.nr) {
            (Some(path), _) => self.resolve(path).ok().flatten(),
            (None, Some(nr)) => self.lookup(nr),
            (None, None) => None,
        }
    }

    /// Recompute `adapter_available` and `matched` for every entry.
    pub fn reconcile(&self, entries: &mut [ConfigEntry]) {
        for entry in entries.iter_mut() {
            let adapter = self.entry_adapter(entry);
            entry.adapter_available = adapter.is_some();
            entry.matched = adapter.is_some_and(|id| {
                self.node(id)
                    .devices()
                    .iter()
                    .any(|device| matches(device, entry))
            });
            log::debug!(
                "{}: {entry} available={} matched={}",
                entry.origin,
                entry.adapter_available,
                entry.matched
            );
        }
    }

    /// Every discovered device that satisfies at least one entry.
    ///
    /// When several entries match a device, the one declared last wins.
    #[must_use]
    pub fn configured_devices(&self, entries: &[ConfigEntry]) -> Vec<ConfiguredDevice> {
        self.pre_order()
            .flat_map(|(_, adapter)| {
                self.node(adapter)
                    .devices()
                    .iter()
                    .enumerate()
                    .filter_map(move |(device, node)| {
                        entries
                            .iter()
                            .rposition(|entry| matches(node, entry))
                            .map(|entry| ConfiguredDevice {
                                adapter,
                                device,
                                entry,
                            })
                    })
            })
            .collect()
    }

    /// First device on `adapter` that satisfies any entry; marks that entry matched.
    pub fn first_configured_device(
        &self,
        adapter: NodeId,
        entries: &mut [ConfigEntry],
    ) -> Option<ConfiguredDevice> {
        for (device, node) in self.node(adapter).devices().iter().enumerate() {
            if let Some(entry) = entries.iter().position(|entry| matches(node, entry)) {
                entries[entry].matched = true;
                return Some(ConfiguredDevice {
                    adapter,
                    device,
                    entry,
                });
            }
        }
        None
    }
}
