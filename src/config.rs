//! Runtime configuration
//!
//! All settings have defaults, so a config file only needs the keys it changes.

use crate::error::TraceError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Features every stored session must carry
pub const DEFAULT_REQUIRED_FEATURES: [&str; 6] = [
    "totalTime",
    "manipulationCount",
    "feedbackCount",
    "uniqueStates",
    "successRate",
    "consecutiveFailures",
];

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TraceConfig {
    pub validation: ValidationConfig,
    pub experiment: ExperimentConfig,
}

impl TraceConfig {
    /// Parse a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self, TraceError> {
        let config: TraceConfig = serde_json::from_str(json)
            .map_err(|e| TraceError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            TraceError::ConfigError(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&contents)
    }

    fn check(&self) -> Result<(), TraceError> {
        if self.validation.min_events > self.validation.max_events {
            return Err(TraceError::ConfigError(format!(
                "minEvents ({}) exceeds maxEvents ({})",
                self.validation.min_events, self.validation.max_events
            )));
        }
        if !(0.0..1.0).contains(&self.experiment.test_size) {
            return Err(TraceError::ConfigError(format!(
                "testSize must be in [0, 1), got {}",
                self.experiment.test_size
            )));
        }
        Ok(())
    }
}

/// Session and dataset validation thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidationConfig {
    /// Fewest events a valid session may have
    pub min_events: usize,
    /// Most events a valid session may have
    pub max_events: usize,
    /// Feature keys that must be present on every stored session
    pub required_features: Vec<String>,
    /// Number of most frequent issues kept in a dataset report
    pub top_issues: usize,
    /// Number of invalid sessions sampled into a dataset report
    pub invalid_sample_limit: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_events: 5,
            max_events: 500,
            required_features: DEFAULT_REQUIRED_FEATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            top_issues: 5,
            invalid_sample_limit: 10,
        }
    }
}

/// Transfer-learning data preparation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExperimentConfig {
    /// Fraction of Parsons sessions held out for testing
    pub test_size: f64,
    /// Seed for the train/test shuffle
    pub random_state: u64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            random_state: 42,
        }
    }
}
