//! Configuration view and validation commands: `stagewise config`.

use anyhow::Result;

use stagewise::config::{ENV_DB, ENV_PORT, StagewiseConfig, StagewiseToml};

use super::super::ConfigCommands;

fn print_sections(toml: &StagewiseToml) {
    println!("[database]");
    println!("  path = \"{}\"", toml.database.path);
    println!("  busy_timeout_ms = {}", toml.database.busy_timeout_ms);
    println!();
    println!("[server]");
    println!("  host = \"{}\"", toml.server.host);
    println!("  port = {}", toml.server.port);
    println!("  dev = {}", toml.server.dev);
    println!();
    println!("[logging]");
    match &toml.logging.level {
        Some(level) => println!("  level = \"{}\"", level),
        None => println!("  level = (unset, RUST_LOG or info)"),
    }
    println!("  json = {}", toml.logging.json);
    println!();
}

pub fn cmd_config(config: &StagewiseConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("stagewise Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No stagewise.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();
            print_sections(&config.toml);

            println!("Effective values (with env/CLI overrides):");
            println!("  database = {}", config.db_path().display());
            match config.port(None) {
                Ok(port) => println!("  port = {}", port),
                Err(e) => println!("  port = {} ({})", console::style("invalid").red(), e),
            }
            println!(
                "  log level = {}",
                config.log_level().unwrap_or_else(|| "RUST_LOG or info".to_string())
            );
            println!("  ({} and {} override the file)", ENV_DB, ENV_PORT);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No stagewise.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = StagewiseToml::load(&config_path)?;
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
                println!("stagewise.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&config.stagewise_dir)?;
            StagewiseToml::default().save(&config_path)?;

            println!("Created stagewise.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [database] path, busy_timeout_ms");
            println!("  - [server] host, port, dev");
            println!("  - [logging] level, json");
            println!();
        }
    }

    Ok(())
}
