//! Runtime configuration parsing and management.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Tunables for an `App`
///
/// ```yaml
/// background_threads: 4
/// thread_name: hearth-worker
/// entity_capacity: 100000
/// max_effects_per_flush: 100000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Worker threads in the background pool
    #[serde(default = "default_background_threads")]
    pub background_threads: usize,

    /// Name given to background worker threads
    #[serde(default = "default_thread_name")]
    pub thread_name: String,

    /// Maximum number of live entities; `None` means only the id space limits it
    #[serde(default)]
    pub entity_capacity: Option<usize>,

    /// Effects processed by one flush before the rest are dropped
    #[serde(default = "default_max_effects_per_flush")]
    pub max_effects_per_flush: usize,
}

fn default_background_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

fn default_thread_name() -> String {
    String::from("hearth-worker")
}

fn default_max_effects_per_flush() -> usize {
    100_000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            background_threads: default_background_threads(),
            thread_name: default_thread_name(),
            entity_capacity: None,
            max_effects_per_flush: default_max_effects_per_flush(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `HEARTH_*` environment overrides
    ///
    /// Recognised variables: `HEARTH_BACKGROUND_THREADS`,
    /// `HEARTH_ENTITY_CAPACITY` and `HEARTH_MAX_EFFECTS_PER_FLUSH`.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup("HEARTH_BACKGROUND_THREADS") {
            self.background_threads = parse_count("background_threads", &value)?;
        }
        if let Some(value) = lookup("HEARTH_ENTITY_CAPACITY") {
            self.entity_capacity = Some(parse_count("entity_capacity", &value)?);
        }
        if let Some(value) = lookup("HEARTH_MAX_EFFECTS_PER_FLUSH") {
            self.max_effects_per_flush = parse_count("max_effects_per_flush", &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values the runtime cannot operate with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.background_threads == 0 {
            return Err(ConfigError::Invalid {
                key: "background_threads",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_effects_per_flush == 0 {
            return Err(ConfigError::Invalid {
                key: "max_effects_per_flush",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.thread_name.is_empty() {
            return Err(ConfigError::Invalid {
                key: "thread_name",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_count(key: &'static str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse().map_err(|err| ConfigError::Invalid {
        key,
        reason: format!("{value:?} is not a count ({err})"),
    })
}
