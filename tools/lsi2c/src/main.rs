//! I2C adapter listing tool.
//!
//! Scans sysfs for adapters, mux channels and devices, prints them by
//! path, and drives the per-adapter controls (probing, timeouts, chip
//! instantiation) of the `i2cdiscov` library.
//!
//! Flow: parse flags → load settings → initialize the context → run one
//! subcommand against it.

mod cli;
mod report;
mod verbose;

use std::collections::HashSet;

use anyhow::{Context, Result, bail};
use clap::Parser;
use i2cdiscov::{ConfigSource, DiscoverySettings, I2cContext, NodeId, ProbeMode};

use verbose::{Timer, dprintln, vprintln};

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    verbose::init(cli.quiet, cli.verbose);

    let settings = load_settings(&cli)?;
    if let Some(cli::Command::Kmod) = cli.command {
        return cmd_kmod(&settings);
    }

    let source = cli
        .config_file
        .as_deref()
        .map_or_else(|| settings.default_config_source(), ConfigSource::from_arg);
    let mut ctx = I2cContext::new(settings);
    {
        let _t = Timer::start("initial scan");
        ctx.init(&source).context("failed to discover i2c adapters")?;
    }

    match cli.command {
        None => cmd_tree(&ctx, &cli::TreeArgs::default()),
        Some(cli::Command::Tree(ref args)) => cmd_tree(&ctx, args),
        Some(cli::Command::Devices(ref args)) => cmd_devices(&ctx, args.path.as_deref()),
        Some(cli::Command::Config) => cmd_config(&ctx),
        Some(cli::Command::Path(ref args)) => cmd_path(&ctx, &args.path),
        Some(cli::Command::Probe(ref args)) => cmd_probe(&mut ctx, args),
        Some(cli::Command::Funcs(ref args)) => cmd_funcs(&mut ctx, &args.path),
        Some(cli::Command::Timeout(ref args)) => cmd_timeout(&mut ctx, args),
        Some(cli::Command::Retries(ref args)) => cmd_retries(&mut ctx, args),
        Some(cli::Command::Rescan(ref args)) => cmd_rescan(&mut ctx, args.count),
        Some(cli::Command::Init) => cmd_init(&mut ctx),
        Some(cli::Command::Remove(ref args)) => cmd_remove(&mut ctx, args.path.as_deref()),
        Some(cli::Command::Kmod) => unreachable!("handled before initialization"),
    }
}

// ===========================================================================
// Setup
// ===========================================================================

/// Settings from `--settings` (or defaults), with `--sysfs-root` applied last.
fn load_settings(cli: &cli::Cli) -> Result<DiscoverySettings> {
    let mut settings = match cli.settings {
        Some(ref path) => DiscoverySettings::load(path)?,
        None => DiscoverySettings::default(),
    };
    if let Some(ref root) = cli.sysfs_root {
        settings = settings.with_sysfs_root(root);
    }
    vprintln!("sysfs root: {}", settings.sysfs_root.display());
    Ok(settings)
}

/// Resolve a path that must name an adapter, with a readable error.
fn adapter(ctx: &I2cContext, path: &str) -> Result<NodeId> {
    ctx.adapter(path)
        .with_context(|| format!("cannot select adapter `{path}`"))
}

fn print_lines(lines: impl IntoIterator<Item = String>) {
    for line in lines {
        println!("{line}");
    }
}

// ===========================================================================
// Listing
// ===========================================================================

/// Print the forest, or one adapter (and optionally its subtree).
fn cmd_tree(ctx: &I2cContext, args: &cli::TreeArgs) -> Result<()> {
    let tree = ctx.tree()?;
    let detail = verbose::is_verbose();
    let lines = match args.path {
        None => report::tree_lines(tree, tree.pre_order(), detail),
        Some(ref path) => {
            let id = adapter(ctx, path)?;
            if args.children {
                report::tree_lines(tree, tree.subtree(id), detail)
            } else {
                report::tree_lines(tree, std::iter::once((0, id)), detail)
            }
        }
    };
    print_lines(lines);

    let unplaced = tree.unplaced();
    if !unplaced.is_empty() {
        dprintln!("{} adapter(s) could not be placed in the tree", unplaced.len());
    }
    Ok(())
}

/// Print every device, or the devices of one adapter.
fn cmd_devices(ctx: &I2cContext, path: Option<&str>) -> Result<()> {
    let tree = ctx.tree()?;
    let configured: HashSet<(NodeId, u16)> = tree
        .configured_devices(ctx.config()?)
        .into_iter()
        .map(|found| {
            let device = &tree.node(found.adapter).devices()[found.device];
            (found.adapter, device.addr)
        })
        .collect();

    let detail = verbose::is_verbose();
    let lines = match path {
        None => report::device_lines(tree.devices(), &configured, detail),
        Some(path) => {
            let id = adapter(ctx, path)?;
            report::device_lines(tree.node(id).devices().iter(), &configured, detail)
        }
    };
    if lines.is_empty() {
        dprintln!("no devices");
    }
    print_lines(lines);
    Ok(())
}

/// Print the configured chips and whether each was found.
fn cmd_config(ctx: &I2cContext) -> Result<()> {
    let entries = ctx.config()?;
    if entries.is_empty() {
        dprintln!("no chips configured");
    }
    print_lines(report::config_lines(entries));
    Ok(())
}

/// Show how a path parses and which adapter it names.
fn cmd_path(ctx: &I2cContext, path: &str) -> Result<()> {
    let parsed = i2cdiscov::path::parse(path)?;
    vprintln!("{} token(s)", parsed.depth());
    print_lines(report::token_lines(&parsed));

    let tree = ctx.tree()?;
    match tree.resolve_tokens(&parsed) {
        Some(id) => {
            let node = tree.node(id);
            println!("-> i2c-{} ({})", node.nr(), node.path());
        }
        None => bail!("no adapter at `{parsed}`"),
    }
    Ok(())
}

// ===========================================================================
// Adapter controls
// ===========================================================================

/// Probe one address, or every 7-bit address as a grid.
fn cmd_probe(ctx: &mut I2cContext, args: &cli::ProbeArgs) -> Result<()> {
    let mode = ProbeMode::from(args.mode);
    let handle = ctx.open_handle(&args.path)?;
    handle.set_timeout(args.timeout)?;

    if let Some(addr) = args.addr {
        let outcome = handle.probe(addr, mode)?;
        println!("0x{addr:02x}: {outcome:?}");
        return Ok(());
    }

    let _t = Timer::start("probe");
    let mut results = Vec::new();
    for addr in 0x08..=0x77u16 {
        results.push((addr, handle.probe(addr, mode)?));
    }
    print_lines(report::probe_grid(&results));
    Ok(())
}

fn cmd_funcs(ctx: &mut I2cContext, path: &str) -> Result<()> {
    let funcs = ctx.open_handle(path)?.functionality()?;
    vprintln!("raw functionality: {:#010x}", funcs.bits());
    print_lines(report::funcs_lines(funcs));
    Ok(())
}

fn cmd_timeout(ctx: &mut I2cContext, args: &cli::TimeoutArgs) -> Result<()> {
    ctx.open_handle(&args.path)?.set_timeout(args.ms)?;
    dprintln!("timeout of {} set to {} ms", args.path, args.ms);
    Ok(())
}

fn cmd_retries(ctx: &mut I2cContext, args: &cli::RetriesArgs) -> Result<()> {
    ctx.open_handle(&args.path)?.set_retries(args.count)?;
    dprintln!("retries of {} set to {}", args.path, args.count);
    Ok(())
}

// ===========================================================================
// Lifecycle
// ===========================================================================

fn cmd_rescan(ctx: &mut I2cContext, count: u32) -> Result<()> {
    for round in 1..=count {
        let _t = Timer::start(format!("rescan {round}"));
        ctx.rescan()
            .with_context(|| format!("rescan {round} of {count} failed"))?;
    }
    let tree = ctx.tree()?;
    dprintln!(
        "{} rescan(s): {} adapters, {} devices",
        ctx.rescan_count(),
        tree.len(),
        tree.devices().count()
    );
    Ok(())
}

fn cmd_init(ctx: &mut I2cContext) -> Result<()> {
    let created = ctx.initialize_all_config_chips()?;
    dprintln!("requested {created} chip(s)");
    cmd_config(ctx)
}

fn cmd_remove(ctx: &mut I2cContext, path: Option<&str>) -> Result<()> {
    let removed = match path {
        Some(path) => ctx.remove_adapter_config_chips(path)?,
        None => ctx.remove_all_config_chips()?,
    };
    dprintln!("removed {removed} chip(s)");
    Ok(())
}

fn cmd_kmod(settings: &DiscoverySettings) -> Result<()> {
    if i2cdiscov::load_kernel_module(settings)? {
        dprintln!("loaded {}", settings.kernel_module);
    } else {
        dprintln!("{} already loaded", settings.kernel_module);
    }
    Ok(())
}
