//! Sorted index of adapters by kernel id.

use crate::error::{Error, Result};
use crate::node::{AdapterNode, NodeId};

/// Adapter lookup table keyed by kernel id.
///
/// Built once per scan over the placed nodes of a tree and never mutated
/// afterwards. Lookups are a binary search.
#[derive(Debug, Default, Clone)]
pub struct NodeRegistry {
    entries: Vec<(u32, NodeId)>,
}

impl NodeRegistry {
    /// Index `ids` (nodes of `nodes`) by kernel id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateNr`] if two indexed nodes share a kernel id.
    pub fn build(nodes: &[AdapterNode], ids: impl IntoIterator<Item = NodeId>) -> Result<Self> {
        let mut entries: Vec<(u32, NodeId)> = ids
            .into_iter()
            .map(|id| (nodes[id.0].nr(), id))
            .collect();
        entries.sort_unstable_by_key(|&(nr, _)| nr);

        if let Some(pair) = entries.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(Error::DuplicateNr { nr: pair[0].0 });
        }

        Ok(Self { entries })
    }

    /// Find the node with kernel id `nr`.
    #[must_use]
    pub fn lookup(&self, nr: u32) -> Option<NodeId> {
        self.entries
            .binary_search_by_key(&nr, |&(key, _)| key)
            .ok()
            .map(|i| self.entries[i].1)
    }

    /// Number of indexed adapters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no adapter is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Node ids in ascending kernel id order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.iter().map(|&(_, id)| id)
    }
}
