#![forbid(unsafe_code)]

mod config;
mod render;

use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use pcitop_core::{DataSource, LiveSource, NameResolver, Topology};
use pcitop_snapshot::SnapshotSource;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::render::RenderOptions;

#[derive(Debug, Parser)]
#[command(
    version,
    about = "List the PCI devices of this machine or of a captured snapshot"
)]
pub struct Args {
    /// Root of the sysfs tree to scan (overrides PCITOP_SYSFS_ROOT; default /sys).
    #[arg(long, conflicts_with = "load")]
    sysfs_root: Option<PathBuf>,

    /// pci.ids name database (overrides PCITOP_PCI_IDS).
    #[arg(long, conflicts_with = "numeric")]
    pci_ids: Option<PathBuf>,

    /// Replay a snapshot instead of scanning the running system.
    #[arg(long)]
    load: Option<PathBuf>,

    /// Capture the topology to a new snapshot file; an existing file is never replaced.
    #[arg(long)]
    save: Option<PathBuf>,

    /// Show buses as a tree below their bridges.
    #[arg(long)]
    tree: bool,

    /// Show subsystem, BAR, capability and driver details.
    #[arg(short, long)]
    verbose: bool,

    /// Show numeric IDs only; skips the name database.
    #[arg(short, long)]
    numeric: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    if cfg!(target_endian = "big") {
        bail!("pcitop decodes little-endian register layouts and cannot run on a big-endian host");
    }

    run(Args::parse())
}

fn run(args: Args) -> Result<()> {
    let config = Config::from_env().context("invalid configuration")?;

    let mut names = if args.numeric {
        NameResolver::empty()
    } else {
        load_names(args.pci_ids.or(config.pci_ids).as_deref())
    };

    let topology = match &args.load {
        Some(path) => {
            let mut source = SnapshotSource::open(path)
                .with_context(|| format!("failed to load snapshot {}", path.display()))?;
            Topology::build(&mut source, &mut names)
                .with_context(|| format!("failed to replay snapshot {}", path.display()))?
        }
        None => {
            let root = args.sysfs_root.unwrap_or(config.sysfs_root);
            let mut source = LiveSource::new(&root);
            Topology::build(&mut source, &mut names)
                .with_context(|| format!("failed to scan PCI devices under {}", root.display()))?
        }
    };

    if let Some(path) = &args.save {
        SnapshotSource::new(path)
            .save(&topology)
            .with_context(|| format!("failed to save snapshot {}", path.display()))?;
    }

    let opts = RenderOptions {
        numeric: args.numeric,
        verbose: args.verbose,
    };
    let mut out = BufWriter::new(io::stdout().lock());
    if args.tree {
        render::write_tree(&mut out, &topology, opts)?;
    } else {
        render::write_listing(&mut out, &topology, opts)?;
    }
    out.flush()?;
    Ok(())
}

/// Loads the name database; a missing or unreadable one only costs the names.
fn load_names(path: Option<&Path>) -> NameResolver {
    let Some(path) = path else {
        tracing::warn!("no PCI name database found; showing numeric IDs");
        return NameResolver::empty();
    };
    match NameResolver::open(path) {
        Ok(names) => names,
        Err(err) => {
            tracing::warn!("cannot read name database {}: {err}", path.display());
            NameResolver::empty()
        }
    }
}
