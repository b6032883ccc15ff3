//! Instantiating and removing chips through the adapter control files.
//!
//! The kernel exposes `new_device` and `delete_device` in every adapter
//! directory; writing `"<name> 0x<addr>"` or `"0x<addr>"` binds or unbinds
//! a client. Nothing here changes the installed tree: callers rescan (the
//! bulk operations do it themselves) to see the effect.

use std::process::Command;

use crate::config::{ConfigEntry, MAX_CHIP_ADDR};
use crate::context::I2cContext;
use crate::error::{Error, Result};
use crate::node::{DeviceNode, NodeId};
use crate::settings::DiscoverySettings;
use crate::sysfs::AttributeReader;

/// Name and address of an entry that can be instantiated as-is.
fn concrete(entry: &ConfigEntry) -> Result<(&str, u16)> {
    let incomplete = |missing| Error::IncompleteEntry {
        origin: entry.origin.to_string(),
        missing,
    };
    let name = entry.prefix.as_deref().ok_or_else(|| incomplete("name"))?;
    let addr = entry.addr.ok_or_else(|| incomplete("address"))?;
    Ok((name, addr))
}

impl<R: AttributeReader> I2cContext<R> {
    fn control(&self, id: NodeId, attr: &str, value: &str) -> Result<()> {
        let adapter = self.tree.node(id);
        log::info!("i2c-{}: {attr} <- {value:?}", adapter.nr());
        self.reader
            .write_attr(&adapter.devpath, attr, value)
            .map_err(|e| Error::io(format!("writing {attr} of i2c-{}", adapter.nr()), e))
    }

    fn device_present(&self, id: NodeId, addr: u16) -> bool {
        let adapter = self.tree.node(id);
        self.reader
            .exists(&adapter.devpath.join(DeviceNode::dir_name(adapter.nr(), addr)))
    }

    fn instantiate(&self, id: NodeId, name: &str, addr: u16) -> Result<bool> {
        if addr > MAX_CHIP_ADDR {
            return Err(Error::InvalidAddress(addr));
        }
        if self.device_present(id, addr) {
            log::debug!("i2c-{}: 0x{addr:02x} already present", self.tree.node(id).nr());
            return Ok(false);
        }
        self.control(id, "new_device", &format!("{name} 0x{addr:02x}"))?;
        Ok(true)
    }

    fn remove(&self, id: NodeId, addr: u16) -> Result<bool> {
        if !self.device_present(id, addr) {
            return Ok(false);
        }
        self.control(id, "delete_device", &format!("0x{addr:02x}"))?;
        Ok(true)
    }

    /// Ask the kernel to instantiate chip `name` at `addr` on the adapter at `path`.
    ///
    /// Returns `false` without writing if a device already sits at `addr`.
    ///
    /// # Errors
    ///
    /// Returns a state or lookup error, [`Error::InvalidAddress`] above
    /// `0x3ff`, or [`Error::Io`] if the control file rejects the write.
    pub fn new_device(&self, path: &str, name: &str, addr: u16) -> Result<bool> {
        let id = self.adapter(path)?;
        self.instantiate(id, name, addr)
    }

    /// Ask the kernel to remove the chip at `addr` on the adapter at `path`.
    ///
    /// Returns `false` without writing if no device sits at `addr`.
    ///
    /// # Errors
    ///
    /// Returns a state or lookup error, or [`Error::Io`] if the control file
    /// rejects the write.
    pub fn delete_device(&self, path: &str, addr: u16) -> Result<bool> {
        let id = self.adapter(path)?;
        self.remove(id, addr)
    }

    /// Instantiate every configured chip whose adapter exists and that was
    /// not found, then rescan. Returns how many chips were requested.
    ///
    /// Entries with a wildcard name or address are skipped; a failed write
    /// is logged and the remaining entries are still tried.
    ///
    /// # Errors
    ///
    /// Returns a state error, or the rescan error.
    pub fn initialize_all_config_chips(&mut self) -> Result<usize> {
        self.ensure_ready()?;
        let mut created = 0;
        for entry in self.config.iter().filter(|e| e.adapter_available && !e.matched) {
            let Some(id) = self.tree.entry_adapter(entry) else {
                continue;
            };
            let outcome = concrete(entry).and_then(|(name, addr)| self.instantiate(id, name, addr));
            match outcome {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(err @ Error::IncompleteEntry { .. }) => log::debug!("{err}"),
                Err(err) => log::warn!("{}: {err}", entry.origin),
            }
        }
        if created > 0 {
            self.rescan()?;
        }
        Ok(created)
    }

    /// Remove every discovered chip that satisfies a configuration entry,
    /// then rescan. Returns how many chips were removed.
    ///
    /// # Errors
    ///
    /// Returns a state error, or the rescan error.
    pub fn remove_all_config_chips(&mut self) -> Result<usize> {
        self.ensure_ready()?;
        let mut removed = 0;
        for found in self.tree.configured_devices(&self.config) {
            let addr = self.tree.node(found.adapter).devices()[found.device].addr;
            match self.remove(found.adapter, addr) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => log::warn!("{}: {err}", self.config[found.entry].origin),
            }
        }
        if removed > 0 {
            self.rescan()?;
        }
        Ok(removed)
    }

    /// Remove the configured chips on the adapter at `path` one at a time,
    /// rescanning after each. Returns how many chips were removed.
    ///
    /// Stops early if a removal does not take effect.
    ///
    /// # Errors
    ///
    /// Returns a state or lookup error, a failed control write, or the
    /// rescan error.
    pub fn remove_adapter_config_chips(&mut self, path: &str) -> Result<usize> {
        let mut removed = 0;
        let mut last = None;
        loop {
            let id = self.adapter(path)?;
            let Some(found) = self.tree.first_configured_device(id, &mut self.config) else {
                break;
            };
            let addr = self.tree.node(id).devices()[found.device].addr;
            if last == Some(addr) {
                log::warn!("i2c-{}: 0x{addr:02x} survived removal", self.tree.node(id).nr());
                break;
            }
            last = Some(addr);
            if self.remove(id, addr)? {
                removed += 1;
            }
            self.rescan()?;
        }
        Ok(removed)
    }
}

/// Make sure the i2c character-device driver is loaded.
///
/// Returns `false` if it already was, `true` if `modprobe` loaded it.
///
/// # Errors
///
/// Returns [`Error::ModuleLoad`] if `modprobe` cannot run or fails.
pub fn load_kernel_module(settings: &DiscoverySettings) -> Result<bool> {
    if settings.i2c_dev_class_dir().is_dir() {
        return Ok(false);
    }
    let module = &settings.kernel_module;
    log::info!("loading kernel module {module}");
    let fail = |reason: String| Error::ModuleLoad {
        module: module.clone(),
        reason,
    };
    let status = Command::new("modprobe")
        .arg(module)
        .status()
        .map_err(|e| fail(e.to_string()))?;
    if !status.success() {
        return Err(fail(status.to_string()));
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::config::ConfigSource;
    use crate::testutil::FakeSysfs;

    fn ready(sys: &FakeSysfs) -> I2cContext {
        let mut ctx = I2cContext::new(sys.settings());
        ctx.init(&sys.settings().default_config_source()).unwrap();
        ctx
    }

    // ---- Single devices -----------------------------------------------------

    #[test]
    fn new_device_writes_control_file() {
        let sys = FakeSysfs::new();
        let root = sys.add_adapter("platform/a", 0, "adapter");
        sys.add_device(&root, 0, 0x50, "eeprom", Some("at24"));
        let ctx = ready(&sys);

        assert!(ctx.new_device("0", "lm75", 0x48).unwrap());
        assert_eq!(fs::read_to_string(root.join("new_device")).unwrap(), "lm75 0x48");
        assert!(!ctx.new_device("0", "eeprom", 0x50).unwrap());
        assert!(matches!(
            ctx.new_device("0", "big", 0x400),
            Err(Error::InvalidAddress(0x400))
        ));
        assert!(matches!(ctx.new_device("3", "lm75", 0x48), Err(Error::NoAdapter(_))));
    }

    #[test]
    fn delete_device_needs_existing_device() {
        let sys = FakeSysfs::new();
        let root = sys.add_adapter("platform/a", 0, "adapter");
        sys.add_device(&root, 0, 0x50, "eeprom", None);
        let ctx = ready(&sys);

        assert!(!ctx.delete_device("0", 0x51).unwrap());
        assert!(ctx.delete_device("0", 0x50).unwrap());
        assert_eq!(fs::read_to_string(root.join("delete_device")).unwrap(), "0x50");
    }

    #[test]
    fn controls_require_ready_context() {
        let sys = FakeSysfs::new();
        sys.add_adapter("platform/a", 0, "adapter");
        let mut ctx = I2cContext::new(sys.settings());
        assert!(matches!(ctx.new_device("0", "lm75", 0x48), Err(Error::NotReady)));
        assert!(matches!(ctx.initialize_all_config_chips(), Err(Error::NotReady)));
        assert!(matches!(ctx.remove_all_config_chips(), Err(Error::NotReady)));
    }

    // ---- Bulk operations ----------------------------------------------------

    #[test]
    fn initialize_all_skips_matched_and_wildcard_entries() {
        let sys = FakeSysfs::new();
        let root = sys.add_adapter("platform/a", 0, "adapter");
        sys.add_device(&root, 0, 0x50, "eeprom", None);
        sys.write_config(
            "eeprom-i2c-0-0x50\n\
             lm75-i2c-0-0x48\n\
             *-i2c-0-0x49\n\
             tmp102-i2c-5-0x4a\n",
        );
        let mut ctx = ready(&sys);

        assert_eq!(ctx.initialize_all_config_chips().unwrap(), 1);
        assert_eq!(fs::read_to_string(root.join("new_device")).unwrap(), "lm75 0x48");
        assert_eq!(ctx.rescan_count(), 1);
    }

    #[test]
    fn remove_all_deletes_matching_devices() {
        let sys = FakeSysfs::new();
        let root = sys.add_adapter("platform/a", 0, "adapter");
        sys.add_device(&root, 0, 0x48, "lm75", Some("lm75"));
        sys.add_device(&root, 0, 0x50, "eeprom", None);
        sys.write_config("lm75-i2c-0-*\n");
        let mut ctx = ready(&sys);

        assert_eq!(ctx.remove_all_config_chips().unwrap(), 1);
        assert_eq!(fs::read_to_string(root.join("delete_device")).unwrap(), "0x48");
        assert_eq!(ctx.rescan_count(), 1);
    }

    #[test]
    fn remove_adapter_stops_when_device_survives() {
        let sys = FakeSysfs::new();
        let root = sys.add_adapter("platform/a", 0, "adapter");
        sys.add_device(&root, 0, 0x48, "lm75", Some("lm75"));
        sys.write_config("lm75-i2c-0-0x48\n");
        let mut ctx = ready(&sys);

        // The fake kernel never removes the directory.
        assert_eq!(ctx.remove_adapter_config_chips("0").unwrap(), 1);
        assert!(ctx.config().unwrap()[0].matched);
    }

    #[test]
    fn nothing_configured_nothing_removed() {
        let sys = FakeSysfs::new();
        let root = sys.add_adapter("platform/a", 0, "adapter");
        sys.add_device(&root, 0, 0x48, "lm75", None);
        let mut ctx = I2cContext::new(sys.settings());
        ctx.init(&ConfigSource::None).unwrap();

        assert_eq!(ctx.remove_adapter_config_chips("0").unwrap(), 0);
        assert_eq!(ctx.remove_all_config_chips().unwrap(), 0);
        assert_eq!(ctx.rescan_count(), 0);
    }

    // ---- Kernel module ------------------------------------------------------

    #[test]
    fn module_already_loaded() {
        let sys = FakeSysfs::new();
        fs::create_dir_all(sys.root().join("class/i2c-dev")).unwrap();
        assert!(!load_kernel_module(&sys.settings()).unwrap());
    }

    #[test]
    fn module_load_failure_is_reported() {
        let sys = FakeSysfs::new();
        let mut settings = sys.settings();
        settings.kernel_module = "i2cdiscov-no-such-module".to_owned();
        let err = load_kernel_module(&settings).unwrap_err();
        assert!(matches!(err, Error::ModuleLoad { .. }), "unexpected error: {err}");
    }
}
