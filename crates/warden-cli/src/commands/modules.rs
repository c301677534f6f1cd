//! Modules command - list bound namespaces.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::HostArgs;
use crate::OutputFormat;

/// Arguments for the modules command.
#[derive(Args)]
pub struct ModulesArgs {
    #[command(flatten)]
    pub host: HostArgs,
}

#[derive(Debug, Serialize)]
struct ModuleDisplay {
    namespace: String,
    module: String,
}

/// Execute the modules command.
pub fn execute(args: ModulesArgs, config: Option<&Path>, format: OutputFormat) -> Result<()> {
    let host = args.host.build_host(config)?;
    let modules: Vec<ModuleDisplay> = host
        .pool()
        .catalog()
        .iter()
        .map(|entry| ModuleDisplay {
            namespace: entry.namespace.to_string(),
            module: entry.module.name().to_string(),
        })
        .collect();

    match format {
        OutputFormat::Human => {
            let width = modules.iter().map(|m| m.namespace.len()).max().unwrap_or(0);
            for m in &modules {
                println!("{:width$}  {}", m.namespace, m.module);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&modules)?),
        OutputFormat::JsonCompact => println!("{}", serde_json::to_string(&modules)?),
    }
    Ok(())
}
