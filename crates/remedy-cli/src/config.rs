use std::path::{Path, PathBuf};

use remedy_core::RetryBudget;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("refuse_probability must be within 0.0..=1.0, got {0}")]
    Probability(f64),
}

/// Settings for the demo run. Every field has a default, so `{}` is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Timeouts the simulated service returns before answering.
    pub timeouts: u32,

    /// Chance that a call is refused outright (served from cache instead).
    pub refuse_probability: f64,

    pub seed: u64,

    /// Value returned when the service refuses.
    pub cached_value: String,

    pub retry: RetryBudget,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            timeouts: 2,
            refuse_probability: 0.0,
            seed: 7,
            cached_value: "cached greeting".to_string(),
            retry: RetryBudget::default_v1(),
        }
    }
}

impl DemoConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.refuse_probability) {
            return Err(ConfigError::Probability(self.refuse_probability));
        }
        Ok(())
    }
}
