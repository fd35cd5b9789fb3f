//! Configuration for stagewise, read from `.stagewise/stagewise.toml`.
//!
//! Every field has a default, so a missing file or a partial one is fine.
//! Values are layered file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [database]
//! path = ".stagewise/stagewise.db"
//! busy_timeout_ms = 5000
//!
//! [server]
//! host = "127.0.0.1"
//! port = 3142
//! dev = false
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::board::server::ServerConfig;

pub const STAGEWISE_DIR: &str = ".stagewise";
pub const CONFIG_FILE: &str = "stagewise.toml";

/// Environment override for the database path.
pub const ENV_DB: &str = "STAGEWISE_DB";
/// Environment override for the server port.
pub const ENV_PORT: &str = "STAGEWISE_PORT";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file, relative to the project directory unless absolute
    #[serde(default = "default_db_path")]
    pub path: String,
    /// How long a writer waits for the write lock before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> String {
    format!("{}/stagewise.db", STAGEWISE_DIR)
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for a locally served front-end
    #[serde(default)]
    pub dev: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3142
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive. Unset defers to `RUST_LOG`.
    #[serde(default)]
    pub level: Option<String>,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

/// Contents of `stagewise.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagewiseToml {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StagewiseToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse stagewise.toml")
    }

    /// Load `stagewise.toml` from `dir`, or defaults if it doesn't exist.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize stagewise.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.database.path.trim().is_empty() {
            warnings.push("database.path is empty".to_string());
        }
        if self.database.busy_timeout_ms == 0 {
            warnings.push(
                "database.busy_timeout_ms is 0: concurrent writers will fail immediately".to_string(),
            );
        }
        if self.server.port == 0 {
            warnings.push("server.port is 0: the OS will pick a random port".to_string());
        }
        if let Some(ref level) = self.logging.level
            && !is_valid_log_level(level)
        {
            warnings.push(format!(
                "Invalid logging.level '{}': expected one of {} or a filter directive",
                level,
                LOG_LEVELS.join(", ")
            ));
        }

        warnings
    }
}

/// A bare level name, or an `EnvFilter` directive such as `stagewise=debug`.
fn is_valid_log_level(level: &str) -> bool {
    let level = level.trim().to_lowercase();
    LOG_LEVELS.contains(&level.as_str()) || level.contains('=')
}

/// Resolved configuration: file, environment and CLI flags combined.
#[derive(Debug, Clone)]
pub struct StagewiseConfig {
    pub project_dir: PathBuf,
    pub stagewise_dir: PathBuf,
    pub toml: StagewiseToml,
    /// CLI override for the database path
    pub cli_db: Option<PathBuf>,
    /// CLI override for the log level
    pub cli_log_level: Option<String>,
}

impl StagewiseConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let stagewise_dir = project_dir.join(STAGEWISE_DIR);
        let toml = StagewiseToml::load_or_default(&stagewise_dir)?;

        Ok(Self {
            project_dir,
            stagewise_dir,
            toml,
            cli_db: None,
            cli_log_level: None,
        })
    }

    pub fn with_cli_args(
        project_dir: PathBuf,
        db: Option<PathBuf>,
        log_level: Option<String>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.cli_db = db;
        config.cli_log_level = log_level;
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.stagewise_dir.join(CONFIG_FILE)
    }

    /// Database path (CLI → `STAGEWISE_DB` → file), resolved against the project dir.
    pub fn db_path(&self) -> PathBuf {
        self.resolve_db_path(std::env::var(ENV_DB).ok())
    }

    fn resolve_db_path(&self, env_value: Option<String>) -> PathBuf {
        let raw = self
            .cli_db
            .clone()
            .or_else(|| env_value.filter(|v| !v.is_empty()).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(&self.toml.database.path));
        if raw.is_absolute() {
            raw
        } else {
            self.project_dir.join(raw)
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.toml.database.busy_timeout_ms)
    }

    /// Server port (CLI → `STAGEWISE_PORT` → file).
    pub fn port(&self, cli_port: Option<u16>) -> Result<u16> {
        self.resolve_port(cli_port, std::env::var(ENV_PORT).ok())
    }

    fn resolve_port(&self, cli_port: Option<u16>, env_value: Option<String>) -> Result<u16> {
        if let Some(port) = cli_port {
            return Ok(port);
        }
        match env_value {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid {} value '{}'", ENV_PORT, raw)),
            None => Ok(self.toml.server.port),
        }
    }

    /// Log level (CLI → file). `None` leaves the choice to `RUST_LOG`.
    pub fn log_level(&self) -> Option<String> {
        self.cli_log_level
            .clone()
            .or_else(|| self.toml.logging.level.clone())
    }

    pub fn server_config(&self, cli_port: Option<u16>, dev: bool) -> Result<ServerConfig> {
        Ok(ServerConfig {
            host: self.toml.server.host.clone(),
            port: self.port(cli_port)?,
            db_path: self.db_path(),
            busy_timeout: self.busy_timeout(),
            dev_mode: dev || self.toml.server.dev,
        })
    }
}
