//! Configuration view and validation commands: `uplift config`.

use anyhow::{Context, Result};
use std::path::Path;
use uplift::pipeline_config::{CONFIG_FILE, ENV_DISTILL_CMD, UpliftToml};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let uplift_dir = project_dir.join(".uplift");
    let config_path = uplift_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Uplift Configuration");
            println!("====================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                UpliftToml::load(&config_path)?
            } else {
                println!("No uplift.toml found at {}", config_path.display());
                println!("Using default configuration.");
                UpliftToml::default()
            };
            println!();

            let rendered =
                toml::to_string_pretty(&toml).context("Failed to render configuration")?;
            for line in rendered.lines() {
                println!("  {line}");
            }
            println!();

            println!("Effective values (with env overrides):");
            println!(
                "  distill command = {}",
                toml.distill_command()
                    .map(|c| format!("\"{c}\""))
                    .unwrap_or_else(|| format!("(unset; set {ENV_DISTILL_CMD})"))
            );
            println!("  user_agent = \"{}\"", toml.user_agent());
            println!();

            if !config_path.exists() {
                println!("Run 'uplift config init' to create an uplift.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let toml = if config_path.exists() {
                UpliftToml::load(&config_path)?
            } else {
                println!("No uplift.toml found. Checking defaults.");
                UpliftToml::default()
            };
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("uplift.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&uplift_dir)
                .with_context(|| format!("Failed to create {}", uplift_dir.display()))?;
            UpliftToml::default().save(&config_path)?;

            println!("Created uplift.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [distillation] command, args");
            println!("  - [collection] / [distillation] retries, timeouts, concurrency");
            println!("  - [validation.max_failure_ratio] per-phase failure tolerance");
            println!();
        }
    }

    Ok(())
}
