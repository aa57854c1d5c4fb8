//! Handles settings for the application. Configuration is read from
//! `settings.toml` (or the file given with `--settings`), then from
//! `ROUNDUP__<SECTION>__<KEY>` environment variables.
//!
//! See `settings.toml` for the configuration.
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use engine::{CategorizerConfig, MAX_WORKERS, SyncWorkerConfig};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use uuid::Uuid;

const DEFAULT_SETTINGS: &str = "settings";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid [{section}] settings: {reason}")]
    Invalid {
        section: &'static str,
        reason: String,
    },
}

/// One settings section checking its own values.
pub trait Validate {
    const SECTION: &'static str;

    fn validate(&self) -> Result<(), String>;
}

fn check<T: Validate>(section: &T) -> Result<(), SettingsError> {
    section
        .validate()
        .map_err(|reason| SettingsError::Invalid {
            section: T::SECTION,
            reason,
        })
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct App {
    pub level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Validate for App {
    const SECTION: &'static str = "app";

    fn validate(&self) -> Result<(), String> {
        self.level
            .parse::<LevelFilter>()
            .map(|_| ())
            .map_err(|_| format!("unknown log level {:?}", self.level))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    #[default]
    Memory,
    Sqlite(String),
}

impl Database {
    pub fn url(&self) -> String {
        match self {
            Self::Memory => String::from("sqlite::memory:"),
            Self::Sqlite(path) => format!("sqlite:{path}?mode=rwc"),
        }
    }
}

impl Validate for Database {
    const SECTION: &'static str = "database";

    fn validate(&self) -> Result<(), String> {
        match self {
            Self::Sqlite(path) if path.trim().is_empty() => {
                Err("sqlite path must not be empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregatorMode {
    #[default]
    Sandbox,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Aggregator {
    pub mode: AggregatorMode,
    /// Links a sandbox item with a sample rule for this user at startup.
    pub demo_user: Option<Uuid>,
}

impl Validate for Aggregator {
    const SECTION: &'static str = "aggregator";

    fn validate(&self) -> Result<(), String> {
        match (&self.mode, self.demo_user) {
            (AggregatorMode::Sandbox, Some(user)) if user.is_nil() => {
                Err("demo_user must not be the nil uuid".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Categorizer {
    pub workers: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for Categorizer {
    fn default() -> Self {
        let config = CategorizerConfig::default();
        Self {
            workers: config.workers,
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay.as_millis() as u64,
        }
    }
}

impl Categorizer {
    pub fn to_config(&self) -> CategorizerConfig {
        CategorizerConfig {
            workers: self.workers,
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

impl Validate for Categorizer {
    const SECTION: &'static str = "categorizer";

    fn validate(&self) -> Result<(), String> {
        if !(1..=MAX_WORKERS).contains(&self.workers) {
            return Err(format!(
                "workers must be between 1 and {MAX_WORKERS}, got {}",
                self.workers
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Worker {
    pub enabled: bool,
    pub interval_secs: u64,
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for Worker {
    fn default() -> Self {
        let config = SyncWorkerConfig::default();
        Self {
            enabled: true,
            interval_secs: config.interval.as_secs(),
            min_backoff_ms: config.min_backoff.as_millis() as u64,
            max_backoff_ms: config.max_backoff.as_millis() as u64,
        }
    }
}

impl Worker {
    pub fn to_config(&self) -> SyncWorkerConfig {
        SyncWorkerConfig {
            interval: Duration::from_secs(self.interval_secs),
            min_backoff: Duration::from_millis(self.min_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

impl Validate for Worker {
    const SECTION: &'static str = "worker";

    fn validate(&self) -> Result<(), String> {
        if self.interval_secs == 0 {
            return Err("interval_secs must be greater than zero".to_string());
        }
        if self.min_backoff_ms == 0 {
            return Err("min_backoff_ms must be greater than zero".to_string());
        }
        if self.min_backoff_ms > self.max_backoff_ms {
            return Err(format!(
                "min_backoff_ms ({}) is above max_backoff_ms ({})",
                self.min_backoff_ms, self.max_backoff_ms
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: App,
    pub database: Database,
    pub aggregator: Aggregator,
    pub categorizer: Categorizer,
    pub worker: Worker,
}

impl Settings {
    /// Reads `path` (required) or `settings.toml` (optional) plus the
    /// environment, then validates every section.
    pub fn load(path: Option<&str>) -> Result<Self, SettingsError> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_SETTINGS).required(false),
        };
        let config = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("ROUNDUP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Self::from_config(config)
    }

    fn from_config(config: Config) -> Result<Self, SettingsError> {
        let settings: Self = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        check(&self.app)?;
        check(&self.database)?;
        check(&self.aggregator)?;
        check(&self.categorizer)?;
        check(&self.worker)?;
        Ok(())
    }
}
