//! Configuration view and validation commands — `forge-codegen config`.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use forge_codegen::config::{CodegenConfig, DEFAULT_CONFIG_PATH};

use super::super::ConfigCommands;

pub fn cmd_config(
    config: &CodegenConfig,
    explicit_path: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = explicit_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!(
                    "No codegen.toml at {} (showing defaults)",
                    config_path.display()
                );
            }
            println!("Effective values (with env overrides):");
            println!();
            let rendered =
                toml::to_string_pretty(config).context("Failed to render configuration")?;
            println!("{}", rendered);

            let key_env = &config.gateway.api_key_env;
            if config.api_key().is_ok() {
                println!("{} {} is set", style("✓").green(), key_env);
            } else {
                println!("{} {} is not set", style("!").yellow(), key_env);
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("{}", style("Configuration is valid.").green());
            } else {
                println!("{}", style("Configuration warnings:").yellow());
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("codegen.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            CodegenConfig::default().save(config_path)?;

            println!("Created codegen.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port");
            println!("  - [models.<tier>] model, temperature");
            println!("  - [sandbox] root, templates_dir, retry");
            println!("  - [validation] max_fix_attempts, unrecognized_failures");
            println!();
        }
    }

    Ok(())
}
