use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod debug;
mod general;
mod pool;
mod scheduler;
pub mod workload;

pub use debug::Debug;
pub use general::General;
pub use pool::Pool;
pub use scheduler::{Distribution, Mode, Scheduler, TimeUnit};
pub use workload::{Command, ObjectCommand, ObjectVerb, Workload};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl ToString) -> Self {
        Self::Invalid {
            field,
            reason: reason.to_string(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct Config {
    general: General,
    #[serde(default)]
    debug: Debug,
    pool: Pool,
    scheduler: Scheduler,
    #[serde(default)]
    workload: Workload,
}

impl Config {
    /// Load and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        content.parse()
    }

    pub fn general(&self) -> &General {
        &self.general
    }

    pub fn debug(&self) -> &Debug {
        &self.debug
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn workload(&self) -> &Workload {
        &self.workload
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.general.validate()?;
        self.debug.validate()?;
        self.pool.validate()?;
        self.scheduler.validate()?;
        self.workload.validate()
    }
}

impl std::str::FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

fn parse_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|e| ConfigError::invalid(field, e))
}
