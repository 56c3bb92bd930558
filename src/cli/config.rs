//! CLI configuration commands
//!
//! `kiln config show` prints the effective configuration as TOML;
//! `kiln config validate` checks it and exits non-zero on errors;
//! `kiln config export` writes it to a file for editing.

use crate::server::{environment_name, load_config};
use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Validate the effective configuration
    Validate,
    /// Write the effective configuration to a file
    Export {
        #[arg(default_value = "config/local.toml")]
        path: PathBuf,
    },
}

pub fn run(cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Show => cmd_show(),
        ConfigCommands::Validate => cmd_validate(),
        ConfigCommands::Export { path } => cmd_export(&path),
    }
}

fn cmd_show() -> Result<()> {
    let config = load_config().context("Failed to load configuration")?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    println!("# environment: {}", environment_name());
    print!("{}", rendered);
    Ok(())
}

fn cmd_validate() -> Result<()> {
    let config = load_config().context("Failed to load configuration")?;
    match config.validate() {
        Ok(()) => {
            println!("Configuration OK ({})", environment_name());
            Ok(())
        }
        Err(errors) => {
            for e in &errors {
                eprintln!("  - {}", e);
            }
            anyhow::bail!("{} configuration error(s)", errors.len())
        }
    }
}

fn cmd_export(path: &std::path::Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    let config = load_config().context("Failed to load configuration")?;
    config.save(path)?;
    println!("Configuration written to {}", path.display());
    Ok(())
}
