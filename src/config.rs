// ⚙️ Engine Configuration - thresholds, classifier bounds, storage location
//
// Every field has a default, so an empty JSON object is a valid config file.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ReconError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Exact pass accepts the first pairing at or above this score
    pub exact_threshold: f64,

    /// Fuzzy pass ignores pairings below this score
    pub fuzzy_threshold: f64,

    /// Fuzzy matches at or above this score are accepted, the rest go to review
    pub fuzzy_accept_threshold: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        MatchingConfig {
            exact_threshold: 0.95,
            fuzzy_threshold: 0.70,
            fuzzy_accept_threshold: 0.85,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
    /// Pairwise score needed to join a within-list cluster
    pub group_threshold: f64,

    /// Confidence recorded on within-list groups
    pub exact_group_confidence: f64,

    /// Fuzzy matches below this score are also reported as potential duplicates
    pub potential_below: f64,

    /// Two timestamps closer than this count as "the same moment"
    pub time_window_secs: i64,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        DuplicateConfig {
            group_threshold: 0.90,
            exact_group_confidence: 0.95,
            potential_below: 0.80,
            time_window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConflictConfig {
    /// Skip re-creating a conflict when a resolved one exists for the same
    /// match and field. Off unless explicitly enabled.
    pub skip_resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Suggestions below this confidence are not applied
    pub min_confidence: f64,

    /// Upper bound for one classifier call
    pub timeout_ms: u64,

    /// JSON rules file for the rule-based classifier
    pub rules_path: Option<PathBuf>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            min_confidence: 0.7,
            timeout_ms: 5_000,
            rules_path: None,
        }
    }
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            db_path: PathBuf::from("reconciliation.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub matching: MatchingConfig,
    pub duplicates: DuplicateConfig,
    pub conflicts: ConflictConfig,
    pub classifier: ClassifierConfig,
    pub storage: StorageConfig,
    pub log_level: String,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        ReconciliationConfig {
            matching: MatchingConfig::default(),
            duplicates: DuplicateConfig::default(),
            conflicts: ConflictConfig::default(),
            classifier: ClassifierConfig::default(),
            storage: StorageConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ReconciliationConfig {
    /// Load config from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ReconError::Config(format!("Failed to read config file {:?}: {}", path.as_ref(), e))
        })?;

        let config: ReconciliationConfig = serde_json::from_str(&content)
            .map_err(|e| ReconError::Config(format!("Failed to parse config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `RECON_*` environment variables on top of the current values
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(path) = env::var("RECON_DB_PATH") {
            self.storage.db_path = PathBuf::from(path);
        }

        if let Ok(level) = env::var("RECON_LOG_LEVEL") {
            self.log_level = level;
        }

        if let Ok(timeout) = env::var("RECON_CLASSIFIER_TIMEOUT_MS") {
            self.classifier.timeout_ms = timeout.trim().parse().map_err(|_| {
                ReconError::Config(format!(
                    "RECON_CLASSIFIER_TIMEOUT_MS must be a number of milliseconds, got {:?}",
                    timeout
                ))
            })?;
        }

        if let Ok(path) = env::var("RECON_RULES_PATH") {
            self.classifier.rules_path = Some(PathBuf::from(path));
        }

        self.validate()?;
        Ok(self)
    }

    /// Thresholds must be probabilities and keep their ordering
    pub fn validate(&self) -> Result<()> {
        let probabilities = [
            ("matching.exact_threshold", self.matching.exact_threshold),
            ("matching.fuzzy_threshold", self.matching.fuzzy_threshold),
            ("matching.fuzzy_accept_threshold", self.matching.fuzzy_accept_threshold),
            ("duplicates.group_threshold", self.duplicates.group_threshold),
            ("duplicates.exact_group_confidence", self.duplicates.exact_group_confidence),
            ("duplicates.potential_below", self.duplicates.potential_below),
            ("classifier.min_confidence", self.classifier.min_confidence),
        ];

        for (name, value) in probabilities {
            if !(0.0..=1.0).contains(&value) {
                return Err(ReconError::Config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if self.matching.fuzzy_accept_threshold < self.matching.fuzzy_threshold {
            return Err(ReconError::Config(
                "matching.fuzzy_accept_threshold must not be below matching.fuzzy_threshold"
                    .to_string(),
            ));
        }

        if self.duplicates.time_window_secs < 0 {
            return Err(ReconError::Config(
                "duplicates.time_window_secs must not be negative".to_string(),
            ));
        }

        Ok(())
    }
}
