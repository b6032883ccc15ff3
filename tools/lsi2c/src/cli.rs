//! Command-line interface definitions for lsi2c.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use i2cdiscov::ProbeMode;
use i2cdiscov::path::parse_integer;

/// List I2C adapters, mux channels and devices discovered from sysfs.
#[derive(Parser)]
#[command(name = "lsi2c", version, about)]
pub struct Cli {
    /// Subcommand to execute (defaults to `tree`).
    #[command(subcommand)]
    pub command: Option<Command>,

    /// File listing expected chips, or `-` for stdin.
    #[arg(long, short = 'c', global = true)]
    pub config_file: Option<PathBuf>,

    /// Discovery settings file (TOML).
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Read a sysfs tree rooted somewhere other than `/sys`.
    #[arg(long, global = true)]
    pub sysfs_root: Option<PathBuf>,

    /// Only print errors and requested data.
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// More detail; repeat for library debug logs.
    #[arg(long, short = 'v', global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Print the adapter forest.
    Tree(TreeArgs),
    /// List discovered devices.
    Devices(DevicesArgs),
    /// List configured chips and whether they were found.
    Config,
    /// Parse an adapter path and show what it resolves to.
    Path(AdapterArg),
    /// Check which addresses answer on an adapter.
    Probe(ProbeArgs),
    /// Show the functionality flags of an adapter.
    Funcs(AdapterArg),
    /// Set an adapter's transfer timeout.
    Timeout(TimeoutArgs),
    /// Set an adapter's retry count.
    Retries(RetriesArgs),
    /// Rescan sysfs, optionally several times.
    Rescan(RescanArgs),
    /// Instantiate every configured chip that is missing.
    Init,
    /// Remove configured chips, everywhere or on one adapter.
    Remove(RemoveArgs),
    /// Load the i2c character-device kernel module if needed.
    Kmod,
}

/// Arguments for the `tree` subcommand.
#[derive(Parser, Default)]
pub struct TreeArgs {
    /// Start at this adapter instead of every root.
    pub path: Option<String>,

    /// With a path, also print everything below it.
    #[arg(long)]
    pub children: bool,
}

/// Arguments for the `devices` subcommand.
#[derive(Parser)]
pub struct DevicesArgs {
    /// Only list devices on this adapter.
    pub path: Option<String>,
}

/// A single adapter path argument.
#[derive(Parser)]
pub struct AdapterArg {
    /// Adapter path, e.g. `0` or `0:1.2`.
    pub path: String,
}

/// Arguments for the `probe` subcommand.
#[derive(Parser)]
pub struct ProbeArgs {
    /// Adapter path.
    pub path: String,

    /// Address to probe; every 7-bit address if omitted.
    #[arg(value_parser = parse_address)]
    pub addr: Option<u16>,

    /// Transfer used to detect a chip.
    #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
    pub mode: ModeArg,

    /// Adapter timeout in milliseconds while probing.
    #[arg(long, default_value_t = 20)]
    pub timeout: u32,
}

/// Arguments for the `timeout` subcommand.
#[derive(Parser)]
pub struct TimeoutArgs {
    /// Adapter path.
    pub path: String,

    /// Timeout in milliseconds, rounded to 10 ms.
    pub ms: u32,
}

/// Arguments for the `retries` subcommand.
#[derive(Parser)]
pub struct RetriesArgs {
    /// Adapter path.
    pub path: String,

    /// Number of retries.
    pub count: u32,
}

/// Arguments for the `rescan` subcommand.
#[derive(Parser)]
pub struct RescanArgs {
    /// How many times to rescan.
    #[arg(default_value_t = 1)]
    pub count: u32,
}

/// Arguments for the `remove` subcommand.
#[derive(Parser)]
pub struct RemoveArgs {
    /// Only remove chips on this adapter.
    pub path: Option<String>,
}

/// Probe transfer selection.
#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Receive byte on EEPROM ranges, quick write elsewhere.
    Auto,
    /// SMBus quick write.
    Quick,
    /// SMBus receive byte.
    Read,
}

impl From<ModeArg> for ProbeMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Auto => Self::Auto,
            ModeArg::Quick => Self::Quick,
            ModeArg::Read => Self::ReadByte,
        }
    }
}

/// Chip address in C notation: `0x48`, `72` or `0110`.
fn parse_address(text: &str) -> Result<u16, String> {
    parse_integer(text)
        .and_then(|addr| u16::try_from(addr).ok())
        .ok_or_else(|| format!("`{text}` is not an address"))
}
