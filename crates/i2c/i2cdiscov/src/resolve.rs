//! Path to adapter resolution.

use crate::node::NodeId;
use crate::path::{self, ParsedPath, PathError, PathToken};
use crate::tree::AdapterTree;

impl AdapterTree {
    /// Resolve a path string to the adapter it names.
    ///
    /// Returns `Ok(None)` when the path is well formed but names no adapter.
    ///
    /// # Errors
    ///
    /// Returns [`PathError`] if `path` does not parse.
    pub fn resolve(&self, path: &str) -> Result<Option<NodeId>, PathError> {
        let parsed = path::parse(path)?;
        Ok(self.resolve_tokens(&parsed))
    }

    /// Walk the tree along an already parsed path.
    ///
    /// The first token is looked up by kernel id, so any placed adapter can
    /// start a walk, not only roots. Each following bus token selects the
    /// child with that kernel id; each mux token selects the child with that
    /// `bus_id` and `chan_id`. A channel, address or end token stops the walk
    /// at the node reached so far.
    #[must_use]
    pub fn resolve_tokens(&self, parsed: &ParsedPath) -> Option<NodeId> {
        let (first, rest) = parsed.tokens().split_first()?;
        let mut current = match *first {
            PathToken::Bus(nr)
            | PathToken::Mux {
                ordinal: nr,
                ..
            } => self.lookup(nr)?,
            _ => return None,
        };

        for token in rest {
            let children = self.node(current).children();
            current = match *token {
                PathToken::Bus(nr) => children
                    .iter()
                    .copied()
                    .find(|&c| self.node(c).nr() == nr)?,
                PathToken::Mux { ordinal, channel } => children.iter().copied().find(|&c| {
                    let child = self.node(c);
                    child.bus_id() == Some(ordinal) && child.chan_id() == Some(channel)
                })?,
                PathToken::Channel(_) | PathToken::Address(_) | PathToken::End => break,
            };
        }

        Some(current)
    }
}
