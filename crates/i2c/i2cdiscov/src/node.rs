//! Adapter and device nodes of the discovered topology.

use std::fmt;
use std::path::PathBuf;

use crate::handle::AdapterHandle;

/// Index of an adapter inside an [`AdapterTree`](crate::tree::AdapterTree).
///
/// Ids are only meaningful for the tree that produced them; a rescan
/// invalidates every id handed out before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Position of the node in discovery order.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Kind of bus an adapter provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BusType {
    /// A plain I2C/SMBus adapter.
    #[default]
    I2c,
    /// A channel behind an I2C multiplexer.
    Mux,
}

impl BusType {
    /// Short lowercase name as used in chip names and config lines.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::I2c => "i2c",
            Self::Mux => "mux",
        }
    }
}

impl fmt::Display for BusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// The parent an adapter reports for itself before the tree is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclaredParent {
    /// Hangs directly off a host controller.
    Root,
    /// Child of the adapter with this kernel id.
    Adapter(u32),
}

/// `(st_dev, st_ino)` of an adapter's `/dev/i2c-N` character device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharDevId {
    /// Device of the filesystem holding the node.
    pub dev: u64,
    /// Inode number of the node.
    pub ino: u64,
}

/// Snapshot of the adapter a device sits on, taken when the device is discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusDescriptor {
    /// Adapter bus type.
    pub kind: BusType,
    /// Adapter kernel id.
    pub nr: u32,
    /// Adapter path.
    pub path: String,
}

/// A bus adapter or mux channel.
#[derive(Debug)]
pub struct AdapterNode {
    nr: u32,
    declared_parent: DeclaredParent,
    chan_id: Option<u32>,
    pub(crate) bus_id: Option<u32>,
    pub(crate) path: Option<String>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) devices: Vec<DeviceNode>,
    pub(crate) handle: Option<AdapterHandle>,

    /// Adapter bus type.
    pub bus_type: BusType,
    /// Contents of the sysfs `name` attribute.
    pub name: Option<String>,
    /// Canonical sysfs directory of the adapter.
    pub devpath: PathBuf,
    /// Basename of the `subsystem` link.
    pub subsystem: Option<String>,
    /// Name of the sysfs directory containing the adapter.
    pub parent_name: Option<String>,
    /// Identity of `/dev/i2c-N`, if the character device exists.
    pub char_dev: Option<CharDevId>,
}

impl AdapterNode {
    /// Create an undiscovered adapter with only its kernel id and declared parent.
    #[must_use]
    pub fn new(nr: u32, declared_parent: DeclaredParent) -> Self {
        Self {
            nr,
            declared_parent,
            chan_id: None,
            bus_id: None,
            path: None,
            parent: None,
            children: Vec::new(),
            devices: Vec::new(),
            handle: None,
            bus_type: BusType::I2c,
            name: None,
            devpath: PathBuf::new(),
            subsystem: None,
            parent_name: None,
            char_dev: None,
        }
    }

    /// Mark the adapter as mux channel `chan_id`.
    #[must_use]
    pub fn with_channel(mut self, chan_id: u32) -> Self {
        self.chan_id = Some(chan_id);
        self.bus_type = BusType::Mux;
        self
    }

    /// Set the adapter name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Kernel id (`N` in `i2c-N`).
    #[must_use]
    pub fn nr(&self) -> u32 {
        self.nr
    }

    /// Parent as reported by the scan.
    #[must_use]
    pub fn declared_parent(&self) -> DeclaredParent {
        self.declared_parent
    }

    /// Mux output number, for mux channels.
    #[must_use]
    pub fn chan_id(&self) -> Option<u32> {
        self.chan_id
    }

    /// Ordinal among siblings sharing this node's `chan_id`; `None` for roots.
    #[must_use]
    pub fn bus_id(&self) -> Option<u32> {
        self.bus_id
    }

    /// Synthesized path; empty until the tree has been stamped.
    #[must_use]
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or_default()
    }

    /// Placed parent, `None` for roots.
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in ascending kernel id order.
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Devices attached to this adapter, in ascending address order.
    #[must_use]
    pub fn devices(&self) -> &[DeviceNode] {
        &self.devices
    }

    /// Returns `true` if this node is a mux channel.
    #[must_use]
    pub fn is_mux(&self) -> bool {
        self.chan_id.is_some()
    }

    /// Path segment this node contributes below its parent.
    pub(crate) fn segment(&self) -> String {
        match (self.chan_id, self.bus_id) {
            (Some(chan), Some(bus)) => format!("{bus}.{chan}"),
            _ => self.nr.to_string(),
        }
    }
}

/// A chip sitting on one adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNode {
    /// 7- or 10-bit chip address.
    pub addr: u16,
    /// Copy of the owning adapter's descriptor.
    pub bus: BusDescriptor,
    /// Contents of the sysfs `name` attribute.
    pub name: Option<String>,
    /// Basename of the bound driver, if any.
    pub driver: Option<String>,
    /// Basename of the driver's module, if any.
    pub module: Option<String>,
    /// Basename of the `subsystem` link.
    pub subsystem: Option<String>,
    /// Canonical sysfs directory of the device.
    pub devpath: PathBuf,
    /// Owning adapter.
    pub adapter: NodeId,
}

impl DeviceNode {
    /// sysfs directory name of a device: `<nr>-<addr as 4 hex digits>`.
    #[must_use]
    pub fn dir_name(nr: u32, addr: u16) -> String {
        format!("{nr}-{addr:04x}")
    }
}

/// Renders the device as a chip name: `<name>-i2c-<path>-<addr>`.
impl fmt::Display for DeviceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-i2c-{}-{:02x}",
            self.name.as_deref().unwrap_or("*"),
            self.bus.path,
            self.addr
        )
    }
}
