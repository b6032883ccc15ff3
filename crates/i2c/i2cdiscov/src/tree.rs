//! Adapter forest construction and path stamping.
//!
//! A scan yields a flat list of adapters, each knowing only the kernel id of
//! its parent. [`AdapterTree::build`] turns that list into a forest:
//!
//! 1. Adapters that declare no parent become roots, sorted by kernel id.
//! 2. Every root pulls its children out of the remaining list, sorted by
//!    kernel id, and recurses.
//! 3. Each time a mux channel is attached, every sibling sharing its channel
//!    number is renumbered so that `bus_id` is its ordinal within that group.
//! 4. Every placed node is stamped with its path: `nr` for roots, otherwise
//!    the parent's path followed by `:bus_id.chan_id` (mux channels) or
//!    `:nr` (plain adapters). A subtree whose path would outgrow
//!    [`NAME_MAX`] is logged and left unplaced.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::node::{AdapterNode, DeclaredParent, DeviceNode, NodeId};
use crate::registry::NodeRegistry;

/// Longest path a node may be given, in bytes.
pub const NAME_MAX: usize = 255;

/// What to do with adapters whose declared parent was never discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrphanPolicy {
    /// Log a warning and leave them out of the forest.
    #[default]
    Warn,
    /// Fail the build with [`Error::Orphaned`].
    Strict,
}

/// The discovered adapter forest.
#[derive(Debug, Default)]
pub struct AdapterTree {
    nodes: Vec<AdapterNode>,
    roots: Vec<NodeId>,
    registry: NodeRegistry,
    unplaced: Vec<NodeId>,
}

impl AdapterTree {
    /// Build a forest from adapters in discovery order.
    ///
    /// A subtree whose path would exceed [`NAME_MAX`] is logged and left out
    /// of the forest; everything else is still placed.
    ///
    /// # Errors
    ///
    /// Returns a consistency error ([`Error::DuplicateNr`],
    /// [`Error::ParentCycle`], or [`Error::Orphaned`] under
    /// [`OrphanPolicy::Strict`]).
    pub fn build(nodes: Vec<AdapterNode>, policy: OrphanPolicy) -> Result<Self> {
        // Kernel ids must be unique across the raw input, placed or not.
        NodeRegistry::build(&nodes, (0..nodes.len()).map(NodeId))?;

        let mut tree = Self {
            nodes,
            ..Self::default()
        };
        let mut pending: Vec<NodeId> = (0..tree.nodes.len()).map(NodeId).collect();

        let mut roots = Vec::new();
        for id in tree.take_declared(&mut pending, DeclaredParent::Root) {
            tree.insert_sorted(&mut roots, id);
        }
        tree.roots = roots;

        for i in 0..tree.roots.len() {
            let root = tree.roots[i];
            tree.attach_children(root, &mut pending);
        }

        tree.check_unplaced(pending, policy)?;
        tree.stamp_paths();
        tree.registry = NodeRegistry::build(&tree.nodes, tree.pre_order().map(|(_, id)| id))?;

        log::debug!(
            "built adapter tree: {} roots, {} adapters, {} unplaced",
            tree.roots.len(),
            tree.registry.len(),
            tree.unplaced.len()
        );
        Ok(tree)
    }

    /// Remove and return, in discovery order, every pending node declaring `parent`.
    fn take_declared(&self, pending: &mut Vec<NodeId>, parent: DeclaredParent) -> Vec<NodeId> {
        let (taken, rest) = pending
            .iter()
            .copied()
            .partition(|id| self.nodes[id.0].declared_parent() == parent);
        *pending = rest;
        taken
    }

    fn insert_sorted(&self, list: &mut Vec<NodeId>, id: NodeId) {
        let nr = self.nodes[id.0].nr();
        let pos = list
            .binary_search_by_key(&nr, |c| self.nodes[c.0].nr())
            .unwrap_or_else(|pos| pos);
        list.insert(pos, id);
    }

    fn attach_children(&mut self, parent: NodeId, pending: &mut Vec<NodeId>) {
        let parent_nr = self.nodes[parent.0].nr();
        let mut children = std::mem::take(&mut self.nodes[parent.0].children);

        for child in self.take_declared(pending, DeclaredParent::Adapter(parent_nr)) {
            self.insert_sorted(&mut children, child);
            self.nodes[child.0].parent = Some(parent);
            let chan = self.nodes[child.0].chan_id();
            self.renumber(&children, chan);
        }
        self.nodes[parent.0].children = children;

        if pending.is_empty() {
            return;
        }
        for i in 0..self.nodes[parent.0].children.len() {
            let child = self.nodes[parent.0].children[i];
            self.attach_children(child, pending);
        }
    }

    /// Assign `bus_id` 0, 1, 2, ... to the siblings sharing `chan`, in sibling order.
    fn renumber(&mut self, siblings: &[NodeId], chan: Option<u32>) {
        let mut ordinal = 0;
        for &id in siblings {
            if self.nodes[id.0].chan_id() == chan {
                self.nodes[id.0].bus_id = Some(ordinal);
                ordinal += 1;
            }
        }
    }

    fn check_unplaced(&mut self, pending: Vec<NodeId>, policy: OrphanPolicy) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }

        let by_nr: HashMap<u32, NodeId> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.nr(), NodeId(i)))
            .collect();

        for &id in &pending {
            let mut seen = HashSet::new();
            let mut cursor = id;
            while let DeclaredParent::Adapter(parent) = self.nodes[cursor.0].declared_parent() {
                if !seen.insert(cursor) {
                    return Err(Error::ParentCycle {
                        nr: self.nodes[cursor.0].nr(),
                    });
                }
                match by_nr.get(&parent) {
                    Some(&next) => cursor = next,
                    None => break,
                }
            }
        }

        for &id in &pending {
            let node = &self.nodes[id.0];
            let DeclaredParent::Adapter(parent) = node.declared_parent() else {
                continue;
            };
            if policy == OrphanPolicy::Strict {
                return Err(Error::Orphaned {
                    nr: node.nr(),
                    parent,
                });
            }
            log::warn!(
                "adapter i2c-{} hangs off i2c-{parent} which is not in the tree; skipping",
                node.nr()
            );
        }
        self.unplaced = pending;
        Ok(())
    }

    /// Stamp every placed node; subtrees with an overlong path become unplaced.
    fn stamp_paths(&mut self) {
        let mut dropped = Vec::new();
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.0];
            if node.path.is_none() {
                let path = match node.parent() {
                    None => node.nr().to_string(),
                    Some(parent) => format!("{}:{}", self.nodes[parent.0].path(), node.segment()),
                };
                if path.len() > NAME_MAX {
                    let err = Error::PathTooLong {
                        nr: node.nr(),
                        max: NAME_MAX,
                    };
                    log::warn!("{err}; dropping its subtree");
                    dropped.push(id);
                    continue;
                }
                self.nodes[id.0].path = Some(path);
            }
            stack.extend(self.nodes[id.0].children().iter().rev().copied());
        }

        for id in dropped {
            let subtree: Vec<NodeId> = self.subtree(id).map(|(_, n)| n).collect();
            match self.nodes[id.0].parent() {
                Some(parent) => self.nodes[parent.0].children.retain(|&c| c != id),
                None => self.roots.retain(|&r| r != id),
            }
            self.unplaced.extend(subtree);
        }
    }

    // ---- Accessors ----------------------------------------------------------

    /// The node behind `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not produced by this tree.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &AdapterNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut AdapterNode {
        &mut self.nodes[id.0]
    }

    /// Root adapters in ascending kernel id order.
    #[must_use]
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Kernel id index over all placed adapters.
    #[must_use]
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Find a placed adapter by kernel id.
    #[must_use]
    pub fn lookup(&self, nr: u32) -> Option<NodeId> {
        self.registry.lookup(nr)
    }

    /// Adapters left out of the forest: orphans under [`OrphanPolicy::Warn`]
    /// and subtrees whose path would exceed [`NAME_MAX`].
    #[must_use]
    pub fn unplaced(&self) -> &[NodeId] {
        &self.unplaced
    }

    /// Number of placed adapters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Returns `true` if no adapter was placed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Every placed adapter with its depth, parents before children,
    /// siblings in ascending kernel id order.
    pub fn pre_order(&self) -> impl Iterator<Item = (usize, NodeId)> + '_ {
        self.walk(self.roots.clone())
    }

    /// `id` and everything below it, with depths relative to `id`.
    pub fn subtree(&self, id: NodeId) -> impl Iterator<Item = (usize, NodeId)> + '_ {
        self.walk(vec![id])
    }

    fn walk(&self, start: Vec<NodeId>) -> impl Iterator<Item = (usize, NodeId)> + '_ {
        let mut stack: Vec<(usize, NodeId)> = start.into_iter().rev().map(|id| (0, id)).collect();
        std::iter::from_fn(move || {
            let (depth, id) = stack.pop()?;
            stack.extend(
                self.nodes[id.0]
                    .children()
                    .iter()
                    .rev()
                    .map(|&child| (depth + 1, child)),
            );
            Some((depth, id))
        })
    }

    /// Every discovered device, adapters in pre-order.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceNode> + '_ {
        self.pre_order()
            .flat_map(move |(_, id)| self.nodes[id.0].devices().iter())
    }

    /// Replace the device list of `id`, keeping it sorted by address.
    pub(crate) fn set_devices(&mut self, id: NodeId, mut devices: Vec<DeviceNode>) {
        devices.sort_by_key(|d| d.addr);
        self.nodes[id.0].devices = devices;
    }
}
