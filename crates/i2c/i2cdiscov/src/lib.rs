//! I2C/SMBus adapter discovery for Linux.
//!
//! This crate scans sysfs for I2C adapters, multiplexer channels and the
//! chips sitting on them, arranges the adapters into a forest, and gives
//! every adapter a stable path built from its position in that forest.
//!
//! # Paths
//!
//! A root adapter's path is its kernel id. Below it, a mux channel adds
//! `:<ordinal>.<channel>` and any other child adds `:<kernel id>`:
//!
//! ```text
//! 0             i2c-0, a host adapter
//! 0:0.0         channel 0 of the first mux behind i2c-0
//! 0:0.1         channel 1 of the same mux
//! 0:0.1:7       a plain adapter below that channel
//! ```
//!
//! The ordinal counts siblings sharing the same channel number in kernel id
//! order, so paths survive adapters being renumbered by the kernel.
//!
//! # Architecture
//!
//! - [`path`] - path grammar and tokens
//! - [`tree`] - forest building, ordinals and path stamping
//! - [`registry`] - sorted kernel id index for the first hop of a lookup
//! - [`resolve`] - path to adapter resolution
//! - [`config`] - configured chip lines and their sources
//! - [`matcher`] - reconciling configured chips with discovered ones
//! - [`scan`] - reading sysfs through an [`AttributeReader`]
//! - [`context`] - lifecycle, rescans and handle caching
//! - [`handle`] - `/dev/i2c-N` ioctls and probing
//! - [`devctl`] - `new_device` / `delete_device` control files
//!
//! # Example
//!
//! ```no_run
//! use i2cdiscov::{DiscoverySettings, I2cContext};
//!
//! let settings = DiscoverySettings::default();
//! let source = settings.default_config_source();
//! let mut ctx = I2cContext::new(settings);
//! ctx.init(&source)?;
//!
//! let tree = ctx.tree()?;
//! for (depth, id) in tree.pre_order() {
//!     let node = tree.node(id);
//!     println!("{:indent$}{} i2c-{}", "", node.path(), node.nr(), indent = depth * 2);
//! }
//! # Ok::<(), i2cdiscov::Error>(())
//! ```

pub mod config;
pub mod context;
pub mod devctl;
pub mod error;
pub mod handle;
pub mod matcher;
pub mod node;
pub mod path;
pub mod registry;
pub mod resolve;
pub mod scan;
pub mod settings;
pub mod sysfs;
pub mod tree;

#[cfg(test)]
mod testutil;

pub use config::{BusSelector, ConfigEntry, ConfigSource, Origin};
pub use context::{I2cContext, LibState};
pub use devctl::load_kernel_module;
pub use error::{Error, Result};
pub use handle::{AdapterHandle, Functionality, ProbeMode, ProbeOutcome};
pub use matcher::ConfiguredDevice;
pub use node::{AdapterNode, BusDescriptor, BusType, DeclaredParent, DeviceNode, NodeId};
pub use path::{ParsedPath, PathError, PathToken};
pub use settings::DiscoverySettings;
pub use sysfs::{AttributeReader, FsReader};
pub use tree::{AdapterTree, OrphanPolicy};
