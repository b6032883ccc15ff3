//! Raw sysfs access.
//!
//! Everything the scanner and the device controls need from the filesystem
//! goes through [`AttributeReader`], so a fake tree can stand in for `/sys`.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::sys::statfs::{SYSFS_MAGIC, statfs};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::node::CharDevId;

/// Read/write primitives over a sysfs-like tree.
pub trait AttributeReader {
    /// First line of `dir/attr` without the newline; `None` if missing or empty.
    fn read_attr(&self, dir: &Path, attr: &str) -> Option<String>;

    /// Target of the symlink `dir/attr`.
    fn read_link(&self, dir: &Path, attr: &str) -> Option<PathBuf>;

    /// Resolve every symlink in `path`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if `path` does not exist.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;

    /// Names of the entries of `dir`, sorted.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if `dir` cannot be listed.
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<String>>;

    /// Returns `true` if `path` exists (following symlinks).
    fn exists(&self, path: &Path) -> bool;

    /// Write `value` to the existing control file `dir/attr`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the file is missing or the write is refused.
    fn write_attr(&self, dir: &Path, attr: &str, value: &str) -> io::Result<()>;

    /// `(st_dev, st_ino)` of `path`.
    fn file_id(&self, path: &Path) -> Option<CharDevId>;

    /// Basename of the target of the symlink `dir/attr`.
    fn link_name(&self, dir: &Path, attr: &str) -> Option<String> {
        let target = self.read_link(dir, attr)?;
        let name = target.file_name()?.to_string_lossy().into_owned();
        (!name.is_empty()).then_some(name)
    }
}

/// [`AttributeReader`] backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsReader;

impl AttributeReader for FsReader {
    fn read_attr(&self, dir: &Path, attr: &str) -> Option<String> {
        let text = fs::read_to_string(dir.join(attr)).ok()?;
        let line = text.lines().next()?;
        (!line.is_empty()).then(|| line.to_owned())
    }

    fn read_link(&self, dir: &Path, attr: &str) -> Option<PathBuf> {
        fs::read_link(dir.join(attr)).ok()
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path)
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<String>> {
        fs::metadata(dir)?;
        WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .map(|entry| {
                entry
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .map_err(io::Error::from)
            })
            .collect()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn write_attr(&self, dir: &Path, attr: &str, value: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(dir.join(attr))?;
        file.write_all(value.as_bytes())
    }

    fn file_id(&self, path: &Path) -> Option<CharDevId> {
        let meta = fs::metadata(path).ok()?;
        Some(CharDevId {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }
}

/// Check that `root` is a directory and, if asked, that it is a sysfs mount.
///
/// # Errors
///
/// Returns [`Error::SysfsMissing`] if either check fails.
pub fn check_mount(root: &Path, verify_magic: bool) -> Result<()> {
    if !root.is_dir() {
        return Err(Error::SysfsMissing(root.to_owned()));
    }
    if verify_magic {
        let is_sysfs = statfs(root).is_ok_and(|fs| fs.filesystem_type() == SYSFS_MAGIC);
        if !is_sysfs {
            return Err(Error::SysfsMissing(root.to_owned()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use super::*;

    #[test]
    fn read_attr_takes_first_line() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("name"), "SMBus I801 adapter\nsecond\n").unwrap();
        fs::write(tmp.path().join("empty"), "\n").unwrap();

        let r = FsReader;
        assert_eq!(r.read_attr(tmp.path(), "name").as_deref(), Some("SMBus I801 adapter"));
        assert_eq!(r.read_attr(tmp.path(), "empty"), None);
        assert_eq!(r.read_attr(tmp.path(), "missing"), None);
    }

    #[test]
    fn link_name_is_target_basename() {
        let tmp = tempfile::tempdir().unwrap();
        symlink("../../bus/i2c", tmp.path().join("subsystem")).unwrap();

        let r = FsReader;
        assert_eq!(r.link_name(tmp.path(), "subsystem").as_deref(), Some("i2c"));
        assert_eq!(r.link_name(tmp.path(), "driver"), None);
    }

    #[test]
    fn list_dir_is_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["i2c-2", "i2c-10", "0-0050", "i2c-1"] {
            fs::create_dir(tmp.path().join(name)).unwrap();
        }
        let names = FsReader.list_dir(tmp.path()).unwrap();
        assert_eq!(names, ["0-0050", "i2c-1", "i2c-10", "i2c-2"]);
        assert!(FsReader.list_dir(&tmp.path().join("nope")).is_err());
    }

    #[test]
    fn write_attr_requires_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("new_device"), "").unwrap();

        FsReader
            .write_attr(tmp.path(), "new_device", "lm75 0x48")
            .unwrap();
        assert_eq!(
            fs::read_to_string(tmp.path().join("new_device")).unwrap(),
            "lm75 0x48"
        );
        assert!(FsReader.write_attr(tmp.path(), "delete_device", "0x48").is_err());
    }

    #[test]
    fn file_id_changes_when_file_is_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let node = tmp.path().join("i2c-0");
        let keep = tmp.path().join("keep");
        fs::write(&node, "").unwrap();
        let first = FsReader.file_id(&node).unwrap();
        // Hold the first inode alive so it cannot be reused.
        fs::rename(&node, &keep).unwrap();
        fs::write(&node, "").unwrap();
        assert_ne!(FsReader.file_id(&node).unwrap(), first);
    }

    #[test]
    fn check_mount_without_magic() {
        let tmp = tempfile::tempdir().unwrap();
        check_mount(tmp.path(), false).unwrap();
        let err = check_mount(&tmp.path().join("absent"), false).unwrap_err();
        assert!(matches!(err, Error::SysfsMissing(_)), "unexpected error: {err}");
        // A temp directory is never a sysfs mount.
        assert!(check_mount(tmp.path(), true).is_err());
    }
}
