//! Discovery settings.
//!
//! Every field has a default matching a stock Linux system, so an empty
//! settings file (or none at all) is valid:
//!
//! ```toml
//! sysfs-root = "/sys"
//! dev-root = "/dev"
//! config-file = "/etc/i2cdiscov.conf"
//! config-dir = "/etc/i2cdiscov.d"
//! kernel-module = "i2c_dev"
//! verify-sysfs = true
//! orphans = "warn"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::ConfigSource;
use crate::error::{Error, Result};
use crate::tree::OrphanPolicy;

/// Where to look for adapters and configuration, and how strictly to build the tree.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct DiscoverySettings {
    /// sysfs mount point.
    pub sysfs_root: PathBuf,
    /// Directory holding the `i2c-N` character devices.
    pub dev_root: PathBuf,
    /// Default configuration file.
    pub config_file: PathBuf,
    /// Default drop-in configuration directory.
    pub config_dir: PathBuf,
    /// Module providing the i2c character devices.
    pub kernel_module: String,
    /// Require `sysfs-root` to carry the sysfs filesystem magic.
    pub verify_sysfs: bool,
    /// Treatment of adapters whose parent is missing.
    pub orphans: OrphanPolicy,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
            dev_root: PathBuf::from("/dev"),
            config_file: PathBuf::from("/etc/i2cdiscov.conf"),
            config_dir: PathBuf::from("/etc/i2cdiscov.d"),
            kernel_module: "i2c_dev".to_owned(),
            verify_sysfs: true,
            orphans: OrphanPolicy::Warn,
        }
    }
}

impl DiscoverySettings {
    /// Parse settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns the TOML error for malformed input or unknown keys.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and
    /// [`Error::Settings`] if it does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::io(format!("reading settings {}", path.display()), e))?;
        Self::from_toml(&text).map_err(|source| Error::Settings {
            file: path.to_owned(),
            source,
        })
    }

    /// Settings rooted at a fake sysfs tree, with magic verification off.
    #[must_use]
    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self.verify_sysfs = false;
        self
    }

    /// `<sysfs>/bus/i2c/devices`, where every adapter and device is linked.
    #[must_use]
    pub fn i2c_devices_dir(&self) -> PathBuf {
        self.sysfs_root.join("bus/i2c/devices")
    }

    /// `<sysfs>/class/i2c-dev`, present once the character-device module is loaded.
    #[must_use]
    pub fn i2c_dev_class_dir(&self) -> PathBuf {
        self.sysfs_root.join("class/i2c-dev")
    }

    /// `<dev>/i2c-<nr>`.
    #[must_use]
    pub fn dev_node(&self, nr: u32) -> PathBuf {
        self.dev_root.join(format!("i2c-{nr}"))
    }

    /// The default file plus drop-in directory.
    #[must_use]
    pub fn default_config_source(&self) -> ConfigSource {
        ConfigSource::Default {
            file: self.config_file.clone(),
            dir: self.config_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_settings_are_defaults() {
        assert_eq!(DiscoverySettings::from_toml("").unwrap(), DiscoverySettings::default());
    }

    #[test]
    fn overrides_are_applied() {
        let s = DiscoverySettings::from_toml(
            r#"
            sysfs-root = "/tmp/fake-sys"
            verify-sysfs = false
            orphans = "strict"
            "#,
        )
        .unwrap();
        assert_eq!(s.sysfs_root, Path::new("/tmp/fake-sys"));
        assert!(!s.verify_sysfs);
        assert_eq!(s.orphans, OrphanPolicy::Strict);
        assert_eq!(s.kernel_module, "i2c_dev");
        assert_eq!(s.i2c_devices_dir(), Path::new("/tmp/fake-sys/bus/i2c/devices"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(DiscoverySettings::from_toml("sysfs = \"/sys\"").is_err());
    }

    #[test]
    fn load_reports_file_name() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("discov.toml");
        fs::write(&file, "orphans = \"sometimes\"\n").unwrap();
        let err = DiscoverySettings::load(&file).unwrap_err();
        assert!(matches!(err, Error::Settings { .. }), "unexpected error: {err}");
        assert!(err.to_string().contains("discov.toml"), "unexpected error: {err}");
    }

    #[test]
    fn derived_paths() {
        let s = DiscoverySettings::default();
        assert_eq!(s.dev_node(3), Path::new("/dev/i2c-3"));
        assert_eq!(s.i2c_dev_class_dir(), Path::new("/sys/class/i2c-dev"));
    }
}
