use anyhow::Result;
use std::path::PathBuf;

use crate::cli::ConfigCommands;
use crate::config::AmlqConfig;

/// Execute config subcommand
pub fn execute(config_file: Option<PathBuf>, cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Show { format } => show(config_file, &format),
        ConfigCommands::Dump => dump(),
    }
}

/// Show the effective configuration
fn show(config_file: Option<PathBuf>, format: &str) -> Result<()> {
    let config = AmlqConfig::load(config_file)?;
    let output = match format {
        "json" => config.display_as_json()?,
        "toml" => config.display_as_toml()?,
        other => anyhow::bail!("Unknown format '{}': expected toml or json", other),
    };
    println!("{}", output);
    Ok(())
}

/// Print the default configuration
fn dump() -> Result<()> {
    println!("{}", AmlqConfig::default().display_as_toml()?);
    Ok(())
}
