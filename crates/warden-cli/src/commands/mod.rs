//! CLI subcommands and the host flags they share.

pub mod eval;
pub mod modules;
pub mod run;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use warden::prelude::*;

use crate::OutputFormat;

/// Flags that shape the host.
#[derive(Args, Debug, Default)]
pub struct HostArgs {
    /// Route script traffic through a proxy (http:// or socks5://)
    #[arg(long)]
    pub proxy: Option<String>,

    /// Directory scripts see as their filesystem root
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Maximum number of pooled interpreters
    #[arg(long)]
    pub max_contexts: Option<usize>,

    /// Execution timeout in seconds (0 disables it)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Interpreter heap limit in bytes
    #[arg(long)]
    pub memory_limit: Option<usize>,
}

impl HostArgs {
    /// Load the config file, if any, and apply flag overrides.
    pub fn resolve(&self, config: Option<&Path>) -> Result<WardenConfig> {
        let mut resolved = match config {
            Some(path) => WardenConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => WardenConfig::default(),
        };

        if let Some(proxy) = &self.proxy {
            resolved = resolved.with_proxy(proxy.clone());
        }
        if let Some(root) = &self.root {
            resolved = resolved.with_root(root.clone());
        }
        if let Some(max) = self.max_contexts {
            resolved.pool = resolved.pool.with_max_contexts(max);
        }
        if let Some(secs) = self.timeout {
            let timeout = (secs > 0).then(|| Duration::from_secs(secs));
            resolved.pool = resolved.pool.with_execution_timeout(timeout);
        }
        if let Some(bytes) = self.memory_limit {
            resolved.pool = resolved.pool.with_memory_limit(Some(bytes));
        }

        resolved.validate().context("Invalid configuration")?;
        Ok(resolved)
    }

    /// Build a host from the resolved configuration.
    pub fn build_host(&self, config: Option<&Path>) -> Result<WardenHost> {
        let resolved = self.resolve(config)?;
        Warden::from_config(resolved).context("Failed to create host")
    }
}

/// Print the effective configuration.
pub fn print_config(args: &HostArgs, config: Option<&Path>) -> Result<()> {
    let resolved = args.resolve(config)?;
    print!("{}", resolved.to_toml()?);
    Ok(())
}

/// What a run prints in JSON formats.
#[derive(Debug, Serialize)]
struct RunReport<'a> {
    chunk: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_id: Option<String>,
    values: &'a [String],
    elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

/// Print the result of one run and pass its error on.
pub fn report(
    chunk: &str,
    result: WardenResult<RunOutcome>,
    elapsed: Duration,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    match format {
        OutputFormat::Human => {
            if let Ok(outcome) = &result {
                for value in &outcome.values {
                    println!("{value}");
                }
            }
            if !quiet {
                println!("use: {:.3} ms", millis(elapsed));
            }
        }
        OutputFormat::Json | OutputFormat::JsonCompact => {
            let report = RunReport {
                chunk,
                context_id: result.as_ref().ok().map(|o| o.context_id.to_string()),
                values: result.as_ref().map(|o| o.values.as_slice()).unwrap_or_default(),
                elapsed_ms: millis(elapsed),
                error: result.as_ref().err().map(ToString::to_string),
            };
            let json = if matches!(format, OutputFormat::JsonCompact) {
                serde_json::to_string(&report)?
            } else {
                serde_json::to_string_pretty(&report)?
            };
            println!("{json}");
        }
    }

    result.map(|_| ()).map_err(anyhow::Error::from)
}
