//! `tinta config`: show the effective configuration.

use anyhow::{Context, Result};
use clap::Subcommand;

use super::load_config;
use crate::GlobalArgs;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the merged configuration (file + defaults + flags).
    Show,
}

pub fn run(global: &GlobalArgs, command: ConfigCommand) -> Result<()> {
    let config = load_config(global)?;
    match command {
        ConfigCommand::Show => {
            if global.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&config)
                        .context("failed to render config JSON")?
                );
            } else {
                print!("{}", config.to_yaml().context("failed to render config YAML")?);
            }
        }
    }
    Ok(())
}
