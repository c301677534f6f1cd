//! Run command - execute a Lua script file.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use clap::Args;

use super::HostArgs;
use crate::OutputFormat;

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    /// Path to the Lua script
    #[arg(required = true)]
    pub script: PathBuf,

    #[command(flatten)]
    pub host: HostArgs,

    /// Print pool statistics after the run
    #[arg(long)]
    pub stats: bool,
}

/// Execute the run command.
pub fn execute(args: RunArgs, config: Option<&Path>, format: OutputFormat, quiet: bool) -> Result<()> {
    let host = args.host.build_host(config)?;

    tracing::info!(script = %args.script.display(), "Running script");
    let start = Instant::now();
    let result = host.do_file(&args.script);
    let elapsed = start.elapsed();

    if args.stats && !quiet {
        let stats = host.stats();
        eprintln!(
            "pool: created={} discarded={} acquired={} idle={} in_use={}",
            stats.created, stats.discarded, stats.acquired, stats.idle, stats.in_use
        );
    }

    super::report(&args.script.display().to_string(), result, elapsed, format, quiet)
}
