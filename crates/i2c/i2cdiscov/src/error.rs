//! Error types shared by every layer of the discovery library.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::path::PathError;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while discovering, resolving or driving adapters.
///
/// A path that simply does not name a node is *not* an error; lookups
/// return `Option` for that case.
#[derive(Debug, Error)]
pub enum Error {
    // ---- Parse --------------------------------------------------------------
    /// A path string did not follow the `seg(:seg)*` grammar.
    #[error(transparent)]
    Path(#[from] PathError),
    /// A settings file could not be deserialized.
    #[error("invalid settings in {}: {source}", file.display())]
    Settings {
        /// Settings file that failed to parse.
        file: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    // ---- State --------------------------------------------------------------
    /// The context has not been initialized, or was cleaned up.
    #[error("i2c discovery context is not initialized")]
    NotReady,
    /// A rescan is in progress.
    #[error("i2c discovery context is busy rescanning")]
    Busy,

    // ---- Consistency --------------------------------------------------------
    /// Two adapters share the same kernel id.
    #[error("duplicate adapter id i2c-{nr}")]
    DuplicateNr {
        /// The repeated kernel id.
        nr: u32,
    },
    /// Following declared parents from an adapter loops back on itself.
    #[error("adapter i2c-{nr} is part of a parent cycle")]
    ParentCycle {
        /// An adapter on the cycle.
        nr: u32,
    },
    /// An adapter names a parent that was never discovered.
    #[error("adapter i2c-{nr} declares missing parent i2c-{parent}")]
    Orphaned {
        /// The unplaced adapter.
        nr: u32,
        /// The parent id it declared.
        parent: u32,
    },
    /// A synthesized path would exceed the maximum name length. Logged when
    /// the subtree is dropped from the forest.
    #[error("path of adapter i2c-{nr} exceeds {max} bytes")]
    PathTooLong {
        /// Root of the subtree that could not be stamped.
        nr: u32,
        /// Maximum path length in bytes.
        max: usize,
    },
    /// The character device behind an open handle was replaced.
    #[error("/dev/i2c-{nr} changed since the last scan")]
    StaleHandle {
        /// Adapter whose device node changed.
        nr: u32,
    },

    // ---- Lookup / arguments -------------------------------------------------
    /// No adapter answers to the given path.
    #[error("no such adapter: {0}")]
    NoAdapter(String),
    /// A chip address outside the 7-bit probe range was given.
    #[error("invalid chip address 0x{0:02x}")]
    InvalidAddress(u16),
    /// A timeout that rounds down to zero kernel ticks.
    #[error("invalid adapter timeout of {0} ms")]
    InvalidTimeout(u32),
    /// A configuration entry lacks a field needed to act on it.
    #[error("config entry at {origin} is not concrete: missing {missing}")]
    IncompleteEntry {
        /// `file:line` of the entry.
        origin: String,
        /// Which field is a wildcard.
        missing: &'static str,
    },

    // ---- Resource -----------------------------------------------------------
    /// The sysfs mount point is missing or is not a sysfs filesystem.
    #[error("sysfs not found at {}", .0.display())]
    SysfsMissing(PathBuf),
    /// A filesystem operation failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// An adapter ioctl was rejected by the kernel.
    #[error("{op} on i2c-{nr} failed: {source}")]
    Ioctl {
        /// Name of the request.
        op: &'static str,
        /// Adapter the handle belongs to.
        nr: u32,
        /// Errno returned by the kernel.
        #[source]
        source: nix::Error,
    },
    /// Loading the i2c character-device kernel module failed.
    #[error("failed to load kernel module {module}: {reason}")]
    ModuleLoad {
        /// Module name passed to `modprobe`.
        module: String,
        /// Exit status or spawn error.
        reason: String,
    },
}

impl Error {
    /// Wrap an I/O error with a short description of the failed operation.
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns `true` for errors that describe an inconsistent adapter topology.
    #[must_use]
    pub fn is_consistency(&self) -> bool {
        matches!(
            self,
            Self::DuplicateNr { .. }
                | Self::ParentCycle { .. }
                | Self::Orphaned { .. }
        )
    }
}
