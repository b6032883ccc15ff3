//! Text rendering of adapters, devices and configuration.
//!
//! Every function returns lines instead of printing so the layout can be
//! checked without a terminal.

use std::collections::HashSet;

use i2cdiscov::{
    AdapterTree, ConfigEntry, DeviceNode, Functionality, NodeId, ParsedPath, PathToken,
    ProbeOutcome,
};

/// One line per adapter, indented by depth.
///
/// `detail` adds the sysfs directory and `/dev` identity.
pub fn tree_lines(
    tree: &AdapterTree,
    nodes: impl Iterator<Item = (usize, NodeId)>,
    detail: bool,
) -> Vec<String> {
    nodes
        .map(|(depth, id)| {
            let node = tree.node(id);
            let mut line = format!(
                "{:indent$}{:<12} i2c-{:<4} {:<4} {}",
                "",
                node.path(),
                node.nr(),
                node.bus_type,
                node.name.as_deref().unwrap_or("?"),
                indent = depth * 2,
            );
            if detail {
                line.push_str(&format!("  [{}]", node.devpath.display()));
                if let Some(dev) = node.char_dev {
                    line.push_str(&format!(" dev={}:{}", dev.dev, dev.ino));
                }
            }
            line
        })
        .collect()
}

/// One line per device; configured devices are marked with `*`.
pub fn device_lines<'a>(
    devices: impl Iterator<Item = &'a DeviceNode>,
    configured: &HashSet<(NodeId, u16)>,
    detail: bool,
) -> Vec<String> {
    devices
        .map(|device| {
            let mark = if configured.contains(&(device.adapter, device.addr)) {
                '*'
            } else {
                ' '
            };
            let mut line = format!(
                "{mark} {:<28} driver={:<12} module={}",
                device.to_string(),
                device.driver.as_deref().unwrap_or("-"),
                device.module.as_deref().unwrap_or("-"),
            );
            if detail {
                line.push_str(&format!("  [{}]", device.devpath.display()));
            }
            line
        })
        .collect()
}

/// One line per configuration entry with its reconciliation state.
pub fn config_lines(entries: &[ConfigEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let state = match (entry.adapter_available, entry.matched) {
                (_, true) => "found",
                (true, false) => "missing",
                (false, false) => "no adapter",
            };
            format!("{:<24} {:<32} {state}", entry.origin.to_string(), entry.to_string())
        })
        .collect()
}

/// Tokens of a parsed path, one per line.
pub fn token_lines(parsed: &ParsedPath) -> Vec<String> {
    parsed
        .tokens()
        .iter()
        .map(|token| match token {
            PathToken::Bus(nr) => format!("bus      {nr}"),
            PathToken::Mux { ordinal, channel } => format!("mux      {ordinal}.{channel}"),
            PathToken::Channel(chan) => format!("channel  {chan}"),
            PathToken::Address(addr) => format!("address  0x{addr:02x}"),
            PathToken::End => "end".to_owned(),
        })
        .collect()
}

/// Names of the set functionality flags, one per line.
pub fn funcs_lines(funcs: Functionality) -> Vec<String> {
    funcs
        .iter_names()
        .map(|(name, _)| name.to_lowercase().replace('_', " "))
        .collect()
}

/// An `i2cdetect`-style grid of probe results.
///
/// Addresses missing from `results` print as blanks.
pub fn probe_grid(results: &[(u16, ProbeOutcome)]) -> Vec<String> {
    let mut lines = vec![format!(
        "    {}",
        (0..16).map(|col| format!("{col:2x}")).collect::<Vec<_>>().join(" ")
    )];
    for row in (0u16..0x80).step_by(16) {
        let cells: Vec<String> = (row..row + 16)
            .map(|addr| match results.iter().find(|(a, _)| *a == addr) {
                Some((_, ProbeOutcome::Present)) => format!("{addr:02x}"),
                Some((_, ProbeOutcome::Busy)) => "UU".to_owned(),
                Some((_, ProbeOutcome::Absent)) => "--".to_owned(),
                None => "  ".to_owned(),
            })
            .collect();
        lines.push(format!("{row:02x}: {}", cells.join(" ")));
    }
    lines
}
