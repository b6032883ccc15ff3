//! Discovery context and its lifecycle.
//!
//! An [`I2cContext`] owns one adapter tree and the configuration reconciled
//! against it. Every entry point checks the context state first:
//!
//! ```text
//! NotReady --init--> Ready --rescan--> Busy --(swap or keep)--> Ready
//!     ^                |
//!     +----cleanup-----+
//! ```

use crate::config::{ConfigEntry, ConfigSource};
use crate::error::{Error, Result};
use crate::handle::AdapterHandle;
use crate::node::NodeId;
use crate::scan;
use crate::settings::DiscoverySettings;
use crate::sysfs::{AttributeReader, FsReader};
use crate::tree::AdapterTree;

/// Readiness of an [`I2cContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LibState {
    /// Not initialized, or cleaned up.
    #[default]
    NotReady,
    /// A rescan is replacing the tree.
    Busy,
    /// A tree is installed.
    Ready,
}

/// Owner of the discovered topology and the configured chip list.
#[derive(Debug)]
pub struct I2cContext<R: AttributeReader = FsReader> {
    pub(crate) reader: R,
    pub(crate) settings: DiscoverySettings,
    pub(crate) state: LibState,
    pub(crate) tree: AdapterTree,
    pub(crate) config: Vec<ConfigEntry>,
    rescans: u64,
    cache_invalid: bool,
}

impl I2cContext {
    /// An uninitialized context reading the real filesystem.
    #[must_use]
    pub fn new(settings: DiscoverySettings) -> Self {
        Self::with_reader(FsReader, settings)
    }
}

impl<R: AttributeReader> I2cContext<R> {
    /// An uninitialized context reading through `reader`.
    #[must_use]
    pub fn with_reader(reader: R, settings: DiscoverySettings) -> Self {
        Self {
            reader,
            settings,
            state: LibState::NotReady,
            tree: AdapterTree::default(),
            config: Vec::new(),
            rescans: 0,
            cache_invalid: false,
        }
    }

    /// Scan sysfs, load configuration from `source` and reconcile the two.
    ///
    /// Initializing a ready context starts over from scratch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] during a rescan, and any scan or
    /// configuration error; the context is left not ready in that case.
    pub fn init(&mut self, source: &ConfigSource) -> Result<()> {
        if self.state == LibState::Busy {
            return Err(Error::Busy);
        }
        self.cleanup();

        let tree = scan::scan(&self.reader, &self.settings)?;
        let mut config = source.load()?;
        tree.reconcile(&mut config);

        log::info!(
            "initialized with {} adapters and {} config entries",
            tree.len(),
            config.len()
        );
        self.tree = tree;
        self.config = config;
        self.state = LibState::Ready;
        Ok(())
    }

    /// Drop the tree, every open handle and the configuration.
    pub fn cleanup(&mut self) {
        self.tree = AdapterTree::default();
        self.config.clear();
        self.cache_invalid = false;
        self.state = LibState::NotReady;
    }

    /// Current readiness.
    #[must_use]
    pub fn state(&self) -> LibState {
        self.state
    }

    pub(crate) fn ensure_ready(&self) -> Result<()> {
        match self.state {
            LibState::Ready => Ok(()),
            LibState::Busy => Err(Error::Busy),
            LibState::NotReady => Err(Error::NotReady),
        }
    }

    /// Settings the context was created with.
    #[must_use]
    pub fn settings(&self) -> &DiscoverySettings {
        &self.settings
    }

    /// The installed adapter tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] or [`Error::Busy`].
    pub fn tree(&self) -> Result<&AdapterTree> {
        self.ensure_ready()?;
        Ok(&self.tree)
    }

    /// Configured chips, with flags from the last reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] or [`Error::Busy`].
    pub fn config(&self) -> Result<&[ConfigEntry]> {
        self.ensure_ready()?;
        Ok(&self.config)
    }

    /// Resolve a path; `Ok(None)` if no adapter has it.
    ///
    /// # Errors
    ///
    /// Returns a state error, or [`Error::Path`] for malformed input.
    pub fn lookup(&self, path: &str) -> Result<Option<NodeId>> {
        self.ensure_ready()?;
        Ok(self.tree.resolve(path)?)
    }

    /// Resolve a path that must name an adapter.
    ///
    /// # Errors
    ///
    /// As [`lookup`](Self::lookup), plus [`Error::NoAdapter`] if nothing matches.
    pub fn adapter(&self, path: &str) -> Result<NodeId> {
        self.lookup(path)?
            .ok_or_else(|| Error::NoAdapter(path.to_owned()))
    }

    /// Number of successful rescans since creation.
    #[must_use]
    pub fn rescan_count(&self) -> u64 {
        self.rescans
    }

    /// Returns `true` if the next handle open will rescan first.
    #[must_use]
    pub fn cache_invalidated(&self) -> bool {
        self.cache_invalid
    }

    /// Force a rescan before the next handle open.
    pub fn invalidate_cache(&mut self) {
        self.cache_invalid = true;
    }

    /// Rebuild the tree from sysfs and reconcile the configuration against it.
    ///
    /// The new tree replaces the old one only once it is complete. Every
    /// [`NodeId`] and open handle from before a successful rescan is gone.
    ///
    /// # Errors
    ///
    /// Returns a state error, or the scan error; the previous tree stays
    /// installed in that case.
    pub fn rescan(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.state = LibState::Busy;
        let scanned = scan::scan(&self.reader, &self.settings);
        self.state = LibState::Ready;

        let tree = scanned.inspect_err(|err| log::warn!("rescan failed, keeping old tree: {err}"))?;
        tree.reconcile(&mut self.config);
        self.tree = tree;
        self.rescans += 1;
        self.cache_invalid = false;
        log::info!("rescan #{} found {} adapters", self.rescans, self.tree.len());
        Ok(())
    }

    fn attach_handle(&mut self, id: NodeId) -> Result<()> {
        let dev_node = self.settings.dev_node(self.tree.node(id).nr());
        let node = self.tree.node_mut(id);
        if node.handle.is_none() {
            node.handle = Some(AdapterHandle::open(&dev_node, node.nr(), &mut node.char_dev)?);
        }
        Ok(())
    }

    /// Open (or reuse) the handle of the adapter at `path`.
    ///
    /// A replaced `/dev/i2c-N` triggers one rescan and a second attempt.
    ///
    /// # Errors
    ///
    /// Returns a state or lookup error, [`Error::StaleHandle`] if the node
    /// changed again after the rescan, or [`Error::Io`] if it cannot be opened.
    pub fn open_handle(&mut self, path: &str) -> Result<&mut AdapterHandle> {
        self.ensure_ready()?;
        if self.cache_invalid {
            self.rescan()?;
        }

        let first = self.adapter(path)?;
        let id = match self.attach_handle(first) {
            Ok(()) => first,
            Err(err @ Error::StaleHandle { .. }) => {
                log::info!("{err}, rescanning");
                self.invalidate_cache();
                self.rescan()?;
                let id = self.adapter(path)?;
                self.attach_handle(id)?;
                id
            }
            Err(err) => return Err(err),
        };

        let node = self.tree.node_mut(id);
        let nr = node.nr();
        node.handle.as_mut().ok_or(Error::StaleHandle { nr })
    }

    /// Close the handle of the adapter at `path`; `false` if none was open.
    ///
    /// # Errors
    ///
    /// Returns a state or lookup error.
    pub fn close_handle(&mut self, path: &str) -> Result<bool> {
        let id = self.adapter(path)?;
        Ok(self.tree.node_mut(id).handle.take().is_some())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::testutil::FakeSysfs;
    use crate::tree::OrphanPolicy;

    fn ready(sys: &FakeSysfs) -> I2cContext {
        let mut ctx = I2cContext::new(sys.settings());
        ctx.init(&sys.settings().default_config_source()).unwrap();
        ctx
    }

    // ---- State --------------------------------------------------------------

    #[test]
    fn uninitialized_context_refuses_everything() {
        let sys = FakeSysfs::new();
        let mut ctx = I2cContext::new(sys.settings());
        assert_eq!(ctx.state(), LibState::NotReady);
        assert!(matches!(ctx.tree(), Err(Error::NotReady)));
        assert!(matches!(ctx.lookup("0"), Err(Error::NotReady)));
        assert!(matches!(ctx.rescan(), Err(Error::NotReady)));
        assert!(matches!(ctx.open_handle("0"), Err(Error::NotReady)));
        assert_eq!(ctx.rescan_count(), 0);
    }

    #[test]
    fn busy_context_refuses_everything() {
        let sys = FakeSysfs::new();
        sys.add_adapter("platform/a", 0, "adapter");
        let mut ctx = ready(&sys);
        ctx.state = LibState::Busy;
        assert!(matches!(ctx.config(), Err(Error::Busy)));
        assert!(matches!(ctx.rescan(), Err(Error::Busy)));
        assert!(matches!(ctx.init(&ConfigSource::None), Err(Error::Busy)));
        assert_eq!(ctx.rescan_count(), 0);
    }

    #[test]
    fn cleanup_returns_to_not_ready() {
        let sys = FakeSysfs::new();
        sys.add_adapter("platform/a", 0, "adapter");
        let mut ctx = ready(&sys);
        assert_eq!(ctx.state(), LibState::Ready);
        ctx.cleanup();
        assert_eq!(ctx.state(), LibState::NotReady);
        assert!(matches!(ctx.config(), Err(Error::NotReady)));
    }

    // ---- Init ---------------------------------------------------------------

    #[test]
    fn init_reconciles_config() {
        let sys = FakeSysfs::new();
        let root = sys.add_adapter("platform/a", 0, "adapter");
        sys.add_device(&root, 0, 0x48, "lm75", Some("lm75"));
        sys.write_config("lm75-i2c-0-0x48\neeprom-i2c-0-0x50\nfoo-i2c-7-0x10\n");

        let ctx = ready(&sys);
        let config = ctx.config().unwrap();
        assert_eq!(config.len(), 3);
        assert!(config[0].matched && config[0].adapter_available);
        assert!(!config[1].matched && config[1].adapter_available);
        assert!(!config[2].matched && !config[2].adapter_available);
        assert_eq!(ctx.adapter("0").unwrap(), ctx.tree().unwrap().lookup(0).unwrap());
        assert!(matches!(ctx.adapter("7"), Err(Error::NoAdapter(_))));
        assert!(matches!(ctx.lookup("0:"), Err(Error::Path(_))));
    }

    #[test]
    fn failed_init_stays_not_ready() {
        let sys = FakeSysfs::new();
        let settings = sys.settings().with_sysfs_root(sys.root().join("nowhere"));
        let mut ctx = I2cContext::new(settings);
        assert!(matches!(ctx.init(&ConfigSource::None), Err(Error::SysfsMissing(_))));
        assert_eq!(ctx.state(), LibState::NotReady);
    }

    // ---- Rescan -------------------------------------------------------------

    #[test]
    fn rescan_picks_up_new_adapters() {
        let sys = FakeSysfs::new();
        sys.add_adapter("platform/a", 0, "adapter");
        let mut ctx = ready(&sys);
        sys.add_adapter("platform/b", 1, "second");

        ctx.rescan().unwrap();
        assert_eq!(ctx.tree().unwrap().len(), 2);
        assert_eq!(ctx.rescan_count(), 1);
        assert_eq!(ctx.state(), LibState::Ready);
    }

    #[test]
    fn failed_rescan_keeps_old_tree() {
        let sys = FakeSysfs::new();
        sys.add_adapter("platform/a", 0, "adapter");
        let mut ctx = ready(&sys);
        ctx.invalidate_cache();

        let moved = sys.root().with_file_name("sys-gone");
        fs::rename(sys.root(), &moved).unwrap();
        assert!(ctx.rescan().is_err());
        assert_eq!(ctx.state(), LibState::Ready);
        assert_eq!(ctx.tree().unwrap().len(), 1);
        assert!(ctx.cache_invalidated());
        assert_eq!(ctx.rescan_count(), 0);
    }

    #[test]
    fn inconsistent_rescan_keeps_old_tree() {
        let sys = FakeSysfs::new();
        sys.add_adapter("platform/a", 0, "adapter");
        let mut settings = sys.settings();
        settings.orphans = OrphanPolicy::Strict;
        let mut ctx = I2cContext::new(settings);
        ctx.init(&ConfigSource::None).unwrap();
        let before = ctx.tree().unwrap().lookup(0);

        // i2c-5 sits below an i2c-9 that was never registered.
        sys.add_adapter("platform/i2c-9", 5, "orphan");
        let err = ctx.rescan().unwrap_err();
        assert!(matches!(err, Error::Orphaned { nr: 5, parent: 9 }), "unexpected error: {err}");
        assert!(err.is_consistency());

        assert_eq!(ctx.state(), LibState::Ready);
        let tree = ctx.tree().unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.lookup(0), before);
        assert_eq!(tree.lookup(5), None);
        assert_eq!(ctx.rescan_count(), 0);
    }

    // ---- Handles ------------------------------------------------------------

    #[test]
    fn handles_are_reused_until_closed() {
        let sys = FakeSysfs::new();
        sys.add_adapter("platform/a", 0, "adapter");
        let mut ctx = ready(&sys);

        assert_eq!(ctx.open_handle("0").unwrap().nr(), 0);
        assert_eq!(ctx.open_handle("0").unwrap().nr(), 0);
        assert!(ctx.close_handle("0").unwrap());
        assert!(!ctx.close_handle("0").unwrap());
        assert_eq!(ctx.rescan_count(), 0);
    }

    #[test]
    fn replaced_dev_node_triggers_rescan() {
        let sys = FakeSysfs::new();
        sys.add_adapter("platform/a", 0, "adapter");
        let mut ctx = ready(&sys);

        let node = ctx.settings().dev_node(0);
        fs::rename(&node, node.with_file_name("i2c-0.old")).unwrap();
        fs::write(&node, "").unwrap();

        assert_eq!(ctx.open_handle("0").unwrap().nr(), 0);
        assert_eq!(ctx.rescan_count(), 1);
        assert!(!ctx.cache_invalidated());
    }

    #[test]
    fn invalidated_cache_rescans_before_open() {
        let sys = FakeSysfs::new();
        sys.add_adapter("platform/a", 0, "adapter");
        let mut ctx = ready(&sys);
        ctx.invalidate_cache();
        ctx.open_handle("0").unwrap();
        assert_eq!(ctx.rescan_count(), 1);
        assert!(!ctx.cache_invalidated());
    }
}
