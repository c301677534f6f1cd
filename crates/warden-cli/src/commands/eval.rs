//! Eval command - execute inline Lua source.

use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use clap::Args;

use super::HostArgs;
use crate::OutputFormat;

/// Arguments for the eval command.
#[derive(Args)]
pub struct EvalArgs {
    /// Lua source to run
    #[arg(required = true)]
    pub source: String,

    #[command(flatten)]
    pub host: HostArgs,
}

/// Execute the eval command.
pub fn execute(args: EvalArgs, config: Option<&Path>, format: OutputFormat, quiet: bool) -> Result<()> {
    let host = args.host.build_host(config)?;

    let start = Instant::now();
    let result = host.do_string(&args.source);
    let elapsed = start.elapsed();

    super::report("inline", result, elapsed, format, quiet)
}
