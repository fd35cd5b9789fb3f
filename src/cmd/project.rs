//! Project initialization and server commands.

use anyhow::{Context, Result};

use stagewise::board::db::BoardDb;
use stagewise::config::{StagewiseConfig, StagewiseToml};

/// Open the configured board database, creating its directory if needed.
pub fn open_board(config: &StagewiseConfig) -> Result<BoardDb> {
    let db_path = config.db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    BoardDb::open(&db_path, config.busy_timeout())
        .with_context(|| format!("Failed to open board database at {}", db_path.display()))
}

pub fn cmd_init(config: &StagewiseConfig) -> Result<()> {
    let was_initialized = config.stagewise_dir.exists();
    std::fs::create_dir_all(&config.stagewise_dir)
        .context("Failed to create .stagewise directory")?;

    let config_path = config.config_file();
    if !config_path.exists() {
        StagewiseToml::default().save(&config_path)?;
    }
    open_board(config)?;

    if was_initialized {
        println!(
            "stagewise project already initialized at {}",
            config.stagewise_dir.display()
        );
        println!("Database and config verified.");
    } else {
        println!(
            "Initialized stagewise project at {}",
            config.stagewise_dir.display()
        );
        println!();
        println!("  .stagewise/");
        println!("  ├── stagewise.toml   # Configuration (use `stagewise config`)");
        println!("  └── stagewise.db     # Pipelines, items and stage history");
        println!();
        println!("Next steps:");
        println!("  1. stagewise pipeline create Sales Lead Qualified Won");
        println!("  2. stagewise item create \"Acme\" --stage <id> --owner <user>");
        println!("  3. stagewise serve");
    }

    Ok(())
}

pub async fn cmd_serve(config: &StagewiseConfig, port: Option<u16>, dev: bool) -> Result<()> {
    let server_config = config.server_config(port, dev)?;
    stagewise::board::server::start_server(server_config).await
}
