//! Fake sysfs trees for tests.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::node::DeviceNode;
use crate::settings::DiscoverySettings;

/// A throwaway `sys/` + `dev/` + `etc/` layout with real symlinks.
pub(crate) struct FakeSysfs {
    tmp: TempDir,
}

impl FakeSysfs {
    pub(crate) fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let sys = tmp.path().join("sys");
        for dir in ["bus/i2c/devices", "bus/i2c/drivers", "module", "devices"] {
            fs::create_dir_all(sys.join(dir)).unwrap();
        }
        fs::create_dir_all(tmp.path().join("dev")).unwrap();
        fs::create_dir_all(tmp.path().join("etc/i2cdiscov.d")).unwrap();
        Self { tmp }
    }

    pub(crate) fn root(&self) -> PathBuf {
        self.tmp.path().join("sys")
    }

    pub(crate) fn settings(&self) -> DiscoverySettings {
        let mut settings = DiscoverySettings::default().with_sysfs_root(self.root());
        settings.dev_root = self.tmp.path().join("dev");
        settings.config_file = self.tmp.path().join("etc/i2cdiscov.conf");
        settings.config_dir = self.tmp.path().join("etc/i2cdiscov.d");
        settings
    }

    pub(crate) fn write_config(&self, text: &str) {
        fs::write(self.settings().config_file, text).unwrap();
    }

    pub(crate) fn adapter_dir(&self, parent: &str, nr: u32) -> PathBuf {
        self.root().join("devices").join(parent).join(format!("i2c-{nr}"))
    }

    /// Adapter `i2c-<nr>` under `sys/devices/<parent>`.
    pub(crate) fn add_adapter(&self, parent: &str, nr: u32, name: &str) -> PathBuf {
        self.add_adapter_in(&self.root().join("devices").join(parent), nr, name)
    }

    /// Adapter `i2c-<nr>` directly inside `parent`.
    pub(crate) fn add_adapter_in(&self, parent: &Path, nr: u32, name: &str) -> PathBuf {
        let dir = parent.join(format!("i2c-{nr}"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("name"), format!("{name}\n")).unwrap();
        fs::write(dir.join("new_device"), "").unwrap();
        fs::write(dir.join("delete_device"), "").unwrap();
        symlink(self.root().join("bus/i2c"), dir.join("subsystem")).unwrap();
        symlink(&dir, self.root().join(format!("bus/i2c/devices/i2c-{nr}"))).unwrap();
        fs::write(self.settings().dev_node(nr), "").unwrap();
        dir
    }

    /// Device `<nr>-<addr>` inside `adapter`, optionally bound to `driver`.
    pub(crate) fn add_device(
        &self,
        adapter: &Path,
        nr: u32,
        addr: u16,
        name: &str,
        driver: Option<&str>,
    ) -> PathBuf {
        let entry = DeviceNode::dir_name(nr, addr);
        let dir = adapter.join(&entry);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("name"), format!("{name}\n")).unwrap();
        symlink(self.root().join("bus/i2c"), dir.join("subsystem")).unwrap();
        symlink(&dir, self.root().join("bus/i2c/devices").join(&entry)).unwrap();

        if let Some(driver) = driver {
            let drv = self.root().join("bus/i2c/drivers").join(driver);
            let module = self.root().join("module").join(driver);
            fs::create_dir_all(&drv).unwrap();
            fs::create_dir_all(&module).unwrap();
            if fs::symlink_metadata(drv.join("module")).is_err() {
                symlink(&module, drv.join("module")).unwrap();
            }
            symlink(&drv, dir.join("driver")).unwrap();
        }
        dir
    }

    pub(crate) fn link(&self, at: &Path, target: &Path) {
        symlink(target, at).unwrap();
    }

    pub(crate) fn dangling_link(&self, entry: &str) {
        symlink(
            self.root().join("devices/gone"),
            self.root().join("bus/i2c/devices").join(entry),
        )
        .unwrap();
    }

    pub(crate) fn remove_attr(&self, dir: &Path, attr: &str) {
        fs::remove_file(dir.join(attr)).unwrap();
    }
}
