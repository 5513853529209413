//! Configuration for the backup service.
//!
//! Supports multiple configuration sources with precedence:
//! 1. Environment variables (highest priority)
//! 2. TOML configuration file
//! 3. Default values (lowest priority)

use crate::scheduler::Trigger;
use campusvault_storage::{BackupSettings, CompressionConfig, RetentionPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "campusvault.toml";

/// Main configuration structure.
///
/// Can be loaded from TOML file or constructed with defaults.
/// Environment variables override TOML settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Live database
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Snapshot destination and compression
    #[serde(default)]
    pub backup: BackupConfig,

    /// Tiered retention counts
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Recurring backup triggers
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file (default: "instance/database.db")
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

/// Backup destination configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory holding snapshots (default: "backups")
    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,

    /// Gzip snapshots (default: true)
    #[serde(default = "default_true")]
    pub compress: bool,

    /// Gzip level 0-9 (default: 6)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

/// Retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Daily snapshots kept (default: 7)
    #[serde(default = "default_keep_daily")]
    pub keep_daily: u32,

    /// Weekly snapshots kept (default: 4)
    #[serde(default = "default_keep_weekly")]
    pub keep_weekly: u32,

    /// Monthly snapshots kept (default: 6)
    #[serde(default = "default_keep_monthly")]
    pub keep_monthly: u32,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Weekly trigger, `"<weekday> HH:MM"`; empty disables (default: "sun 02:00")
    #[serde(default = "default_weekly_trigger")]
    pub weekly: String,

    /// Daily trigger, `"HH:MM"`; empty disables (default: "03:00")
    #[serde(default = "default_daily_trigger")]
    pub daily: String,

    /// Run one backup cycle as soon as the scheduler starts (default: true)
    #[serde(default = "default_true")]
    pub run_on_start: bool,

    /// Append-only scheduler log (default: "logs/backup_scheduler.log")
    #[serde(default = "default_scheduler_log")]
    pub log_file: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error (default: "info")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty (default: "pretty")
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_db_path() -> PathBuf {
    PathBuf::from("instance/database.db")
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("backups")
}

fn default_true() -> bool {
    true
}

fn default_compression_level() -> u32 {
    CompressionConfig::default().level
}

fn default_keep_daily() -> u32 {
    RetentionPolicy::default().keep_daily
}

fn default_keep_weekly() -> u32 {
    RetentionPolicy::default().keep_weekly
}

fn default_keep_monthly() -> u32 {
    RetentionPolicy::default().keep_monthly
}

fn default_weekly_trigger() -> String {
    "sun 02:00".to_string()
}

fn default_daily_trigger() -> String {
    "03:00".to_string()
}

fn default_scheduler_log() -> PathBuf {
    PathBuf::from("logs/backup_scheduler.log")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
            compress: true,
            compression_level: default_compression_level(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep_daily: default_keep_daily(),
            keep_weekly: default_keep_weekly(),
            keep_monthly: default_keep_monthly(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            weekly: default_weekly_trigger(),
            daily: default_daily_trigger(),
            run_on_start: true,
            log_file: default_scheduler_log(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file doesn't exist or has invalid TOML syntax.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::TomlError { path, source: e })
    }

    /// Load configuration with environment variable overrides.
    ///
    /// An explicit `path` must exist. Without one, `campusvault.toml` in the
    /// working directory is used if present, otherwise defaults.
    ///
    /// Supported environment variables:
    /// - `CAMPUSVAULT_DB_PATH` - Live database file
    /// - `CAMPUSVAULT_BACKUP_DIR` - Snapshot directory
    /// - `CAMPUSVAULT_BACKUP_COMPRESS` - `true`/`false`
    /// - `CAMPUSVAULT_KEEP_DAILY`, `CAMPUSVAULT_KEEP_WEEKLY`, `CAMPUSVAULT_KEEP_MONTHLY`
    /// - `CAMPUSVAULT_WEEKLY_TRIGGER`, `CAMPUSVAULT_DAILY_TRIGGER`
    /// - `CAMPUSVAULT_SCHEDULER_LOG` - Scheduler log file
    /// - `CAMPUSVAULT_LOG_LEVEL`, `CAMPUSVAULT_LOG_FORMAT`
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(DEFAULT_CONFIG_FILE)?,
            None => Self::default(),
        };

        // Apply environment variable overrides
        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Unparsable numeric or boolean values are ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("CAMPUSVAULT_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }

        if let Some(dir) = var("CAMPUSVAULT_BACKUP_DIR") {
            self.backup.dir = PathBuf::from(dir);
        }

        if let Some(compress) = var("CAMPUSVAULT_BACKUP_COMPRESS") {
            if let Ok(compress) = compress.parse() {
                self.backup.compress = compress;
            }
        }

        if let Some(keep) = var("CAMPUSVAULT_KEEP_DAILY") {
            if let Ok(keep) = keep.parse() {
                self.retention.keep_daily = keep;
            }
        }

        if let Some(keep) = var("CAMPUSVAULT_KEEP_WEEKLY") {
            if let Ok(keep) = keep.parse() {
                self.retention.keep_weekly = keep;
            }
        }

        if let Some(keep) = var("CAMPUSVAULT_KEEP_MONTHLY") {
            if let Ok(keep) = keep.parse() {
                self.retention.keep_monthly = keep;
            }
        }

        if let Some(trigger) = var("CAMPUSVAULT_WEEKLY_TRIGGER") {
            self.scheduler.weekly = trigger;
        }

        if let Some(trigger) = var("CAMPUSVAULT_DAILY_TRIGGER") {
            self.scheduler.daily = trigger;
        }

        if let Some(log_file) = var("CAMPUSVAULT_SCHEDULER_LOG") {
            self.scheduler.log_file = PathBuf::from(log_file);
        }

        if let Some(level) = var("CAMPUSVAULT_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = var("CAMPUSVAULT_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "database.path cannot be empty".to_string(),
            ));
        }

        if self.backup.dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "backup.dir cannot be empty".to_string(),
            ));
        }

        self.compression()
            .validate()
            .map_err(ConfigError::ValidationError)?;

        self.retention_policy()
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("retention: {e}")))?;

        self.triggers()?;

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.level must be one of: {}",
                valid_levels.join(", ")
            )));
        }

        // Validate log format
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.format must be one of: {}",
                valid_formats.join(", ")
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn compression(&self) -> CompressionConfig {
        CompressionConfig {
            level: self.backup.compression_level,
        }
    }

    #[must_use]
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            keep_daily: self.retention.keep_daily,
            keep_weekly: self.retention.keep_weekly,
            keep_monthly: self.retention.keep_monthly,
        }
    }

    /// Settings for a [`campusvault_storage::BackupManager`].
    #[must_use]
    pub fn backup_settings(&self) -> BackupSettings {
        BackupSettings {
            database_path: self.database.path.clone(),
            backup_dir: self.backup.dir.clone(),
            compress: self.backup.compress,
            compression: self.compression(),
            retention: self.retention_policy(),
        }
    }

    /// Enabled triggers as `(id, name, trigger)`, weekly first.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if a trigger does not parse or
    /// both are disabled.
    pub fn triggers(&self) -> Result<Vec<(&'static str, &'static str, Trigger)>, ConfigError> {
        let mut triggers = Vec::new();

        for (id, name, raw) in [
            ("weekly_backup", "Weekly backup", &self.scheduler.weekly),
            ("daily_backup", "Daily backup", &self.scheduler.daily),
        ] {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let trigger = raw.parse::<Trigger>().map_err(|e| {
                ConfigError::ValidationError(format!("scheduler.{}: {e}", id.trim_end_matches("_backup")))
            })?;
            triggers.push((id, name, trigger));
        }

        if triggers.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one of scheduler.weekly, scheduler.daily must be set".to_string(),
            ));
        }
        Ok(triggers)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file
    #[error("Failed to read config file {path:?}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// TOML parsing error
    #[error("Failed to parse TOML in {path:?}: {source}")]
    TomlError {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Validation error
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
