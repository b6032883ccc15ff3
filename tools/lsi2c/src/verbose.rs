//! Output verbosity and log setup.
//!
//! Three output levels controlled by CLI flags:
//! - **Quiet** (`-q`): errors and the requested data only
//! - **Default** (no flag): data plus short status lines
//! - **Verbose** (`-v`): sysfs paths, device identities, timings
//!
//! Library logs go through `env_logger`; `-q` keeps only errors, the
//! default shows warnings, `-v` adds info and `-vv` debug. `RUST_LOG`
//! overrides all of this.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use log::LevelFilter;

/// Output verbosity level.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet = 0,
    Default = 1,
    Verbose = 2,
}

/// Global verbosity level, set once at startup.
static VERBOSITY: AtomicU8 = AtomicU8::new(1); // Default

/// Initialize the verbosity level and the logger for the current process.
pub fn init(quiet: bool, verbose: u8) {
    let level = if quiet {
        Verbosity::Quiet
    } else if verbose > 0 {
        Verbosity::Verbose
    } else {
        Verbosity::Default
    };
    VERBOSITY.store(level as u8, Ordering::Relaxed);

    let filter = match (level, verbose) {
        (Verbosity::Quiet, _) => LevelFilter::Error,
        (Verbosity::Default, _) => LevelFilter::Warn,
        (Verbosity::Verbose, 1) => LevelFilter::Info,
        (Verbosity::Verbose, _) => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(filter)
        .format_timestamp(None)
        .parse_default_env()
        .init();
}

/// Returns the current verbosity level.
pub fn verbosity() -> Verbosity {
    match VERBOSITY.load(Ordering::Relaxed) {
        0 => Verbosity::Quiet,
        2 => Verbosity::Verbose,
        _ => Verbosity::Default,
    }
}

/// Returns `true` if verbose mode is active.
pub fn is_verbose() -> bool {
    verbosity() == Verbosity::Verbose
}

/// Returns `true` if quiet mode is active.
pub fn is_quiet() -> bool {
    verbosity() == Verbosity::Quiet
}

/// Print a message only when verbose mode is enabled.
macro_rules! vprintln {
    ($($arg:tt)*) => {
        if $crate::verbose::is_verbose() {
            println!($($arg)*);
        }
    };
}

pub(crate) use vprintln;

/// Print a status line unless quiet mode is enabled.
macro_rules! dprintln {
    ($($arg:tt)*) => {
        if !$crate::verbose::is_quiet() {
            println!($($arg)*);
        }
    };
}

pub(crate) use dprintln;

/// Prints the elapsed duration on drop when verbose mode is active.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    /// Begin timing a labeled operation.
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if is_verbose() {
            println!("  {}: {:.1?}", self.label, self.start.elapsed());
        }
    }
}
