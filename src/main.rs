use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use stagewise::board::models::StagePosition;
use stagewise::config::StagewiseConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "stagewise")]
#[command(version, about = "Pipeline stage tracking with dwell-time analytics")]
pub struct Cli {
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Database file. Overrides STAGEWISE_DB and stagewise.toml.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Log level or filter directive (e.g. "debug", "stagewise=trace")
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .stagewise/, a default config and the database
    Init,
    /// Serve the HTTP API
    Serve {
        /// Port to serve on (overrides STAGEWISE_PORT and stagewise.toml)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (CORS permissive for a local front-end)
        #[arg(long)]
        dev: bool,
    },
    /// Create, list and inspect pipelines
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Add, rename and delete stages
    Stage {
        #[command(subcommand)]
        command: StageCommands,
    },
    /// Create, move and delete pipeline items
    Item {
        #[command(subcommand)]
        command: ItemCommands,
    },
    /// Manage the automation rule of a stage
    Rule {
        #[command(subcommand)]
        command: RuleCommands,
    },
    /// Per-stage dwell-time report for a pipeline
    Report {
        pipeline_id: i64,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Cross-pipeline item counts and average stage dwell time
    Velocity {
        #[arg(long)]
        json: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum PipelineCommands {
    /// Create a pipeline with its stages, in order
    Create {
        name: String,
        #[arg(required = true)]
        stages: Vec<String>,
    },
    List,
    /// Show a pipeline's stages and their rules
    Show { id: i64 },
}

#[derive(Subcommand, Clone)]
pub enum StageCommands {
    Add {
        pipeline_id: i64,
        name: String,
        /// start, end, or a zero-based index
        #[arg(long, default_value = "end")]
        position: StagePosition,
    },
    Rename { stage_id: i64, name: String },
    /// Delete an empty stage
    Delete { stage_id: i64 },
}

#[derive(Subcommand, Clone)]
pub enum ItemCommands {
    Create {
        title: String,
        #[arg(long)]
        stage: i64,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        person: Option<i64>,
        #[arg(long)]
        org: Option<i64>,
    },
    Move { item_id: i64, stage_id: i64 },
    Delete { item_id: i64 },
    /// Show an item's stage history and generated tasks
    History { item_id: i64 },
}

#[derive(Subcommand, Clone)]
pub enum RuleCommands {
    /// Create the stage's rule, or update it if one exists
    Set {
        stage_id: i64,
        title: String,
        #[arg(long, default_value = "0")]
        offset_days: i64,
    },
    Delete { stage_id: i64 },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default stagewise.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = StagewiseConfig::with_cli_args(project_dir, cli.db.clone(), cli.log_level.clone())?;
    stagewise::logging::init_logging(config.log_level().as_deref(), config.toml.logging.json);

    match &cli.command {
        Commands::Init => cmd::cmd_init(&config)?,
        Commands::Serve { port, dev } => cmd::cmd_serve(&config, *port, *dev).await?,
        Commands::Pipeline { command } => cmd::cmd_pipeline(&config, command.clone())?,
        Commands::Stage { command } => cmd::cmd_stage(&config, command.clone())?,
        Commands::Item { command } => cmd::cmd_item(&config, command.clone())?,
        Commands::Rule { command } => cmd::cmd_rule(&config, command.clone())?,
        Commands::Report { pipeline_id, json } => cmd::cmd_report(&config, *pipeline_id, *json)?,
        Commands::Velocity { json } => cmd::cmd_velocity(&config, *json)?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
