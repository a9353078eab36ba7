//! Configuration management for gridscout.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use crate::types::ScrapingMode;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration.
///
/// This is loaded from `~/.config/gridscout/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Per-cell crawl behaviour
    pub crawl: CrawlConfig,
    /// Where progress state and output land
    pub storage: StorageConfig,
    /// Job scheduling and progress broadcast
    pub orchestrator: OrchestratorConfig,
    /// Log filtering
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific file, falling back to defaults if
    /// the file does not exist.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            tracing::debug!("Loading config from {}", path.display());
            let contents = fs::read_to_string(path)?;
            let config: Self = toml::from_str(&contents)?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `GRIDSCOUT_MAX_PER_CELL`: Override the per-cell listing cap
    /// - `GRIDSCOUT_CELL_TIMEOUT_SECS`: Override the per-cell extraction timeout
    /// - `GRIDSCOUT_MAX_CONCURRENT_JOBS`: Override cross-job parallelism
    /// - `GRIDSCOUT_STATE_DIR`: Override the progress state directory
    /// - `GRIDSCOUT_LOG`: Override the log filter directive
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (normally the process env).
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("GRIDSCOUT_MAX_PER_CELL") {
            if let Ok(cap) = val.parse() {
                self.crawl.max_per_cell = cap;
                tracing::debug!("Override crawl.max_per_cell from env: {}", cap);
            }
        }

        if let Some(val) = lookup("GRIDSCOUT_CELL_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                self.crawl.cell_timeout_secs = secs;
                tracing::debug!("Override crawl.cell_timeout_secs from env: {}", secs);
            }
        }

        if let Some(val) = lookup("GRIDSCOUT_MAX_CONCURRENT_JOBS") {
            if let Ok(max) = val.parse() {
                self.orchestrator.max_concurrent_jobs = max;
                tracing::debug!("Override orchestrator.max_concurrent_jobs from env: {}", max);
            }
        }

        if let Some(val) = lookup("GRIDSCOUT_STATE_DIR") {
            if !val.trim().is_empty() {
                tracing::debug!("Override storage.state_dir from env: {}", val);
                self.storage.state_dir = Some(PathBuf::from(val));
            }
        }

        if let Some(val) = lookup("GRIDSCOUT_LOG") {
            if !val.trim().is_empty() {
                self.logging.filter = val;
            }
        }
    }

    /// Reject values the crawler cannot work with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.crawl.default_grid_size == 0 {
            return Err(ConfigError::invalid("crawl.default_grid_size", "must be at least 1"));
        }
        if self.crawl.max_per_cell == 0 {
            return Err(ConfigError::invalid("crawl.max_per_cell", "must be at least 1"));
        }
        if self.crawl.detail_batch_size == 0 {
            return Err(ConfigError::invalid("crawl.detail_batch_size", "must be at least 1"));
        }
        if self.crawl.checkpoint_every == 0 {
            return Err(ConfigError::invalid("crawl.checkpoint_every", "must be at least 1"));
        }
        if self.crawl.cell_timeout_secs == 0 {
            return Err(ConfigError::invalid("crawl.cell_timeout_secs", "must be at least 1"));
        }
        if self.orchestrator.max_concurrent_jobs == 0 {
            return Err(ConfigError::invalid(
                "orchestrator.max_concurrent_jobs",
                "must be at least 1",
            ));
        }
        if self.orchestrator.snapshot_capacity == 0 {
            return Err(ConfigError::invalid(
                "orchestrator.snapshot_capacity",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::invalid("config_path", "no parent directory"))?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/gridscout/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/gridscout`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        Ok(project_dirs()?.data_dir().to_path_buf())
    }

    /// Directory holding one progress document per job key.
    pub fn state_dir(&self) -> ConfigResult<PathBuf> {
        match &self.storage.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::data_dir()?.join("state")),
        }
    }

    /// Directory receiving collected records.
    pub fn output_dir(&self) -> ConfigResult<PathBuf> {
        match &self.storage.output_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::data_dir()?.join("output")),
        }
    }
}

fn project_dirs() -> ConfigResult<ProjectDirs> {
    ProjectDirs::from("com", "gridscout", "gridscout").ok_or(ConfigError::NoConfigDir)
}

/// Per-cell crawl behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Grid dimension used when a job does not specify one
    pub default_grid_size: u32,
    /// Zoom hint passed to the extraction agent
    pub default_zoom: u8,
    /// Maximum raw listings requested per cell
    pub max_per_cell: u32,
    /// Maximum detail items (reviews) fetched per accepted record
    pub max_details_per_record: u32,
    /// Detail items written per sink call
    pub detail_batch_size: usize,
    /// Accepted records between progress checkpoints
    pub checkpoint_every: usize,
    /// Upper bound for one cell's extraction call, in seconds
    pub cell_timeout_secs: u64,
    /// Extra attempts for transient navigation failures
    pub cell_retries: u32,
    /// Base delay between attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Mode used when a job does not specify one
    pub default_mode: ScrapingMode,
}

impl CrawlConfig {
    /// Per-cell timeout as a `Duration`.
    #[must_use]
    pub fn cell_timeout(&self) -> Duration {
        Duration::from_secs(self.cell_timeout_secs)
    }

    /// Retry base delay as a `Duration`.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            default_grid_size: 2,
            default_zoom: 12,
            max_per_cell: 120,
            max_details_per_record: 100,
            detail_batch_size: 10,
            checkpoint_every: 1,
            cell_timeout_secs: 60,
            cell_retries: 2,
            retry_delay_ms: 2000,
            default_mode: ScrapingMode::Fast,
        }
    }
}

/// Storage locations. `None` resolves under the XDG data directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Progress state directory
    pub state_dir: Option<PathBuf>,
    /// Output directory for collected records
    pub output_dir: Option<PathBuf>,
}

/// Job scheduling and progress broadcast settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Number of jobs that may crawl at the same time
    pub max_concurrent_jobs: usize,
    /// Snapshots buffered per subscriber before it starts skipping
    pub snapshot_capacity: usize,
    /// How long finished jobs stay listed
    pub retain_finished_hours: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1,
            snapshot_capacity: 64,
            retain_finished_hours: 24,
        }
    }
}

/// Log filtering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
    /// Include the event target in log lines
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,gridscout=debug".to_string(),
            with_target: true,
        }
    }
}
