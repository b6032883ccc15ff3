//! Expected-chip configuration.
//!
//! Each non-comment line declares one chip the system should have:
//!
//! ```text
//! # prefix-bustype[-path]-addr
//! lm75-i2c-0-0x48
//! pca9541-i2c-1:0.1-0x73
//! *-i2c-3-*
//! ```
//!
//! `*` is a wildcard for the prefix, the path and the address. A path
//! without `:` or `.` is a decimal kernel id. Only the first word of a line
//! is read; `#` starts a comment.

use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::node::BusType;
use crate::path::{self, PathError};

/// Largest address a 10-bit chip can have.
pub const MAX_CHIP_ADDR: u16 = 0x3ff;

/// Where a configuration entry was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// File name, or `<stdin>`.
    pub source: String,
    /// One-based line number.
    pub line: usize,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.line)
    }
}

/// The adapter half of a configuration entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BusSelector {
    /// Bus type; only I2C is accepted in config lines.
    pub kind: BusType,
    /// Kernel id, when the path was a bare number.
    pub nr: Option<u32>,
    /// Adapter path; `None` is the wildcard.
    pub path: Option<String>,
}

impl BusSelector {
    /// Returns `true` if any adapter is acceptable.
    #[must_use]
    pub fn is_any(&self) -> bool {
        self.nr.is_none() && self.path.is_none()
    }
}

/// One expected chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    /// Chip name prefix; `None` matches any name.
    pub prefix: Option<String>,
    /// Chip address; `None` matches any address.
    pub addr: Option<u16>,
    /// Adapter the chip is expected on.
    pub bus: BusSelector,
    /// Where the entry came from.
    pub origin: Origin,
    /// A discovered device satisfied this entry in the last reconciliation.
    pub matched: bool,
    /// The entry's adapter exists in the current tree.
    pub adapter_available: bool,
}

impl ConfigEntry {
    /// Build an entry by hand; every `None` is a wildcard.
    #[must_use]
    pub fn new(prefix: Option<&str>, bus: BusSelector, addr: Option<u16>, origin: Origin) -> Self {
        Self {
            prefix: prefix.map(str::to_owned),
            addr,
            bus,
            origin,
            matched: false,
            adapter_available: false,
        }
    }
}

/// Renders the entry back in config line syntax.
impl fmt::Display for ConfigEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-",
            self.prefix.as_deref().unwrap_or("*"),
            self.bus.kind,
            self.bus.path.as_deref().unwrap_or("*")
        )?;
        match self.addr {
            Some(addr) => write!(f, "0x{addr:02x}"),
            None => f.write_str("*"),
        }
    }
}

/// Why a config line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    /// The line ended before a required field.
    #[error("missing {0}")]
    MissingField(&'static str),
    /// A bus type other than `i2c`.
    #[error("unsupported bus type {0:?}")]
    UnsupportedBus(String),
    /// A malformed adapter path.
    #[error(transparent)]
    BadPath(#[from] PathError),
    /// A malformed or out of range chip address.
    #[error("bad chip address {0:?}")]
    BadAddress(String),
}

/// Strip leading blanks, then keep everything up to the first blank or `#`.
fn clean_line(line: &str) -> Option<&str> {
    let word = line
        .trim_start()
        .split(|c: char| c == '#' || c.is_whitespace())
        .next()?;
    (!word.is_empty()).then_some(word)
}

/// Parse one config line.
///
/// Returns `Ok(None)` for blank and comment-only lines.
///
/// # Errors
///
/// Returns [`LineError`] describing the first malformed field.
pub fn parse_line(line: &str, origin: Origin) -> Result<Option<ConfigEntry>, LineError> {
    let Some(word) = clean_line(line) else {
        return Ok(None);
    };

    let (prefix, rest) = word
        .split_once('-')
        .ok_or(LineError::MissingField("bus type"))?;
    let (kind, rest) = rest
        .split_once('-')
        .ok_or(LineError::MissingField("address"))?;
    if kind != "i2c" {
        return Err(LineError::UnsupportedBus(kind.to_owned()));
    }
    let (bus_path, addr) = match rest.split_once('-') {
        Some((bus_path, addr)) => (Some(bus_path), addr),
        None => (None, rest),
    };
    if addr.is_empty() {
        return Err(LineError::MissingField("address"));
    }

    let bus = match bus_path {
        None | Some("*") => BusSelector::default(),
        Some(p) if p.contains([':', '.']) => {
            path::parse(p)?;
            BusSelector {
                kind: BusType::I2c,
                nr: None,
                path: Some(p.to_owned()),
            }
        }
        Some(p) => {
            let nr: u32 = p.parse().map_err(|_| {
                LineError::BadPath(PathError {
                    input: p.to_owned(),
                    kind: path::PathErrorKind::NotNumeric {
                        index: 0,
                        segment: p.to_owned(),
                    },
                })
            })?;
            BusSelector {
                kind: BusType::I2c,
                nr: Some(nr),
                path: Some(nr.to_string()),
            }
        }
    };

    let addr = match addr {
        "*" => None,
        text => Some(
            path::parse_integer(text)
                .and_then(|a| u16::try_from(a).ok())
                .filter(|&a| a <= MAX_CHIP_ADDR)
                .ok_or_else(|| LineError::BadAddress(text.to_owned()))?,
        ),
    };

    let prefix = (prefix != "*").then_some(prefix);
    Ok(Some(ConfigEntry::new(prefix, bus, addr, origin)))
}

/// Parse a whole configuration text, logging and skipping malformed lines.
#[must_use]
pub fn parse_config(text: &str, source: &str) -> Vec<ConfigEntry> {
    text.lines()
        .enumerate()
        .filter_map(|(i, line)| {
            let origin = Origin {
                source: source.to_owned(),
                line: i + 1,
            };
            match parse_line(line, origin.clone()) {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!("{origin}: ignoring config line: {err}");
                    None
                }
            }
        })
        .collect()
}

/// Read and parse one configuration file.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be read.
pub fn load_file(path: &Path) -> Result<Vec<ConfigEntry>> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::io(format!("reading config {}", path.display()), e))?;
    Ok(parse_config(&text, &path.display().to_string()))
}

/// Read and parse configuration from an arbitrary reader.
///
/// # Errors
///
/// Returns [`Error::Io`] if reading fails.
pub fn load_reader(mut reader: impl Read, source: &str) -> Result<Vec<ConfigEntry>> {
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|e| Error::io(format!("reading config from {source}"), e))?;
    Ok(parse_config(&text, source))
}

/// Parse every regular, non-hidden file of `dir` in name order.
///
/// A missing directory yields no entries.
///
/// # Errors
///
/// Returns [`Error::Io`] if the directory or one of its files cannot be read.
pub fn load_dir(dir: &Path) -> Result<Vec<ConfigEntry>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for item in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let item = item.map_err(|e| {
            Error::io(format!("listing {}", dir.display()), io::Error::other(e))
        })?;
        let hidden = item.file_name().to_string_lossy().starts_with('.');
        if hidden || !item.file_type().is_file() {
            continue;
        }
        entries.extend(load_file(item.path())?);
    }
    Ok(entries)
}

/// Where configuration is taken from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// The default file (may be missing) followed by the default directory.
    Default {
        /// Main config file.
        file: PathBuf,
        /// Drop-in directory.
        dir: PathBuf,
    },
    /// Exactly one file.
    File(PathBuf),
    /// Standard input.
    Stdin,
    /// No configuration.
    None,
}

impl ConfigSource {
    /// Pick a source from a command-line style argument: `-` is stdin.
    #[must_use]
    pub fn from_arg(arg: &Path) -> Self {
        if arg == Path::new("-") {
            Self::Stdin
        } else {
            Self::File(arg.to_owned())
        }
    }

    /// Load every entry this source provides, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if an explicitly named file or stdin cannot be
    /// read, or the default file exists but cannot be read.
    pub fn load(&self) -> Result<Vec<ConfigEntry>> {
        match self {
            Self::Default { file, dir } => {
                let mut entries = match load_file(file) {
                    Ok(entries) => entries,
                    Err(Error::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                        Vec::new()
                    }
                    Err(err) => return Err(err),
                };
                entries.extend(load_dir(dir)?);
                Ok(entries)
            }
            Self::File(file) => load_file(file),
            Self::Stdin => load_reader(io::stdin().lock(), "<stdin>"),
            Self::None => Ok(Vec::new()),
        }
    }
}
