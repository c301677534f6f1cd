//! Warden CLI - Command-line host for the Warden script sandbox.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;

/// Warden Lua Script Host
#[derive(Parser)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long, global = true, default_value = "human")]
    pub format: OutputFormat,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Output format options.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    #[default]
    Human,
    /// JSON output
    Json,
    /// Compact JSON (single line)
    JsonCompact,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run a Lua script file
    Run(commands::run::RunArgs),
    /// Run inline Lua source
    Eval(commands::eval::EvalArgs),
    /// List the namespaces scripts can require
    Modules(commands::modules::ModulesArgs),
    /// Print the effective configuration as TOML
    Config(commands::HostArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warden={log_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args, config, cli.format, cli.quiet),
        Commands::Eval(args) => commands::eval::execute(args, config, cli.format, cli.quiet),
        Commands::Modules(args) => commands::modules::execute(args, config, cli.format),
        Commands::Config(args) => commands::print_config(&args, config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if !cli.quiet {
                eprintln!("error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}
