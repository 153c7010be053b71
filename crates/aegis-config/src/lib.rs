//! Process-wide configuration for the Aegis pipeline (§6.4, §10.3).
//!
//! Loaded once at process start from a JSON file, validated against
//! [`PolicyViolation`], and held behind a [`parking_lot::RwLock`] so that
//! the remediation gate's safety invariant — read the policy at decision
//! time, not at ingress time — holds without a process restart.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Master switch for the optional, expensive pipeline stages.
///
/// `Off` disables both gates outright; `NotifyOnly` disables the
/// remediation gate regardless of `priority_score`; `Full` enables both
/// subject to their own threshold checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionPolicy {
    Off,
    NotifyOnly,
    Full,
}

impl ActionPolicy {
    pub fn allows_analysis(self) -> bool {
        !matches!(self, ActionPolicy::Off)
    }

    pub fn allows_remediation(self) -> bool {
        matches!(self, ActionPolicy::Full)
    }
}

impl Default for ActionPolicy {
    fn default() -> Self {
        ActionPolicy::NotifyOnly
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("policy violation: {0}")]
    PolicyViolation(String),
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn default_warn_threshold() -> u8 {
    70
}
fn default_remediate_threshold() -> u8 {
    90
}
fn default_bus_capacity() -> usize {
    1_000
}
fn default_max_concurrent_events() -> usize {
    64
}
fn default_oracle_concurrency() -> usize {
    16
}
fn default_event_deadline_ms() -> u64 {
    60_000
}
fn default_store_ttl_seconds() -> u64 {
    30 * 24 * 3_600
}
fn default_notify_dedup_window_ms() -> u64 {
    5 * 60 * 1_000
}
fn default_ml_model_version() -> String {
    "threat-scorer-v1".to_string()
}
fn default_bus_lane_count() -> usize {
    16
}
fn default_bus_retention_hours() -> i64 {
    24
}

/// The full set of recognized configuration options (§6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: u8,
    #[serde(default = "default_remediate_threshold")]
    pub remediate_threshold: u8,
    #[serde(default)]
    pub action_policy: ActionPolicy,
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
    #[serde(default = "default_bus_lane_count")]
    pub bus_lane_count: usize,
    #[serde(default = "default_bus_retention_hours")]
    pub bus_retention_hours: i64,
    #[serde(default = "default_max_concurrent_events")]
    pub max_concurrent_events: usize,
    #[serde(default = "default_oracle_concurrency")]
    pub oracle_concurrency: usize,
    #[serde(default = "default_event_deadline_ms")]
    pub event_deadline_ms: u64,
    #[serde(default = "default_store_ttl_seconds")]
    pub store_ttl_seconds: u64,
    #[serde(default = "default_notify_dedup_window_ms")]
    pub notify_dedup_window_ms: u64,
    #[serde(default = "default_ml_model_version")]
    pub ml_model_version: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            warn_threshold: default_warn_threshold(),
            remediate_threshold: default_remediate_threshold(),
            action_policy: ActionPolicy::default(),
            bus_capacity: default_bus_capacity(),
            bus_lane_count: default_bus_lane_count(),
            bus_retention_hours: default_bus_retention_hours(),
            max_concurrent_events: default_max_concurrent_events(),
            oracle_concurrency: default_oracle_concurrency(),
            event_deadline_ms: default_event_deadline_ms(),
            store_ttl_seconds: default_store_ttl_seconds(),
            notify_dedup_window_ms: default_notify_dedup_window_ms(),
            ml_model_version: default_ml_model_version(),
        }
    }
}

impl PipelineConfig {
    /// Load from `path`, falling back to defaults if the file does not
    /// exist. Always validates before returning.
    pub fn load(path: &Path) -> Result<Self> {
        let config = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Persist operator edits back to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject startup-fatal misconfigurations (§7 `PolicyViolation`).
    pub fn validate(&self) -> Result<()> {
        if self.remediate_threshold as u16 <= self.warn_threshold as u16 {
            return Err(ConfigError::PolicyViolation(format!(
                "remediate_threshold ({}) must be greater than warn_threshold ({})",
                self.remediate_threshold, self.warn_threshold
            )));
        }
        if self.warn_threshold as u16 > 100 || self.remediate_threshold as u16 > 100 {
            return Err(ConfigError::PolicyViolation(
                "thresholds must be within [0, 100]".to_string(),
            ));
        }
        for (name, value) in [
            ("bus_capacity", self.bus_capacity),
            ("bus_lane_count", self.bus_lane_count),
            ("max_concurrent_events", self.max_concurrent_events),
            ("oracle_concurrency", self.oracle_concurrency),
        ] {
            if value == 0 {
                return Err(ConfigError::PolicyViolation(format!(
                    "{name} must be a positive integer"
                )));
            }
        }
        if self.event_deadline_ms == 0 {
            return Err(ConfigError::PolicyViolation(
                "event_deadline_ms must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}

/// Shared, re-readable configuration handle.
///
/// Every gate evaluation reads through this handle fresh — never a value
/// captured once per event at ingress (§4.6 safety invariant).
#[derive(Clone)]
pub struct SharedConfig(Arc<RwLock<PipelineConfig>>);

impl SharedConfig {
    pub fn new(config: PipelineConfig) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }

    pub fn snapshot(&self) -> PipelineConfig {
        self.0.read().clone()
    }

    /// Apply an operator edit. Revalidates before committing; on
    /// violation the previous configuration is left untouched.
    pub fn update(&self, new_config: PipelineConfig) -> Result<()> {
        new_config.validate()?;
        let mut guard = self.0.write();
        warn!(
            previous_policy = ?guard.action_policy,
            new_policy = ?new_config.action_policy,
            "pipeline configuration replaced"
        );
        *guard = new_config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_remediate_not_greater_than_warn() {
        let mut config = PipelineConfig::default();
        config.remediate_threshold = config.warn_threshold;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PolicyViolation(_))
        ));
    }

    #[test]
    fn rejects_zero_capacity() {
        let mut config = PipelineConfig::default();
        config.bus_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing.json");
        let config = PipelineConfig::load(&path).expect("load");
        assert_eq!(config.warn_threshold, 70);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        let mut config = PipelineConfig::default();
        config.warn_threshold = 60;
        config.remediate_threshold = 95;
        config.save(&path).expect("save");

        let loaded = PipelineConfig::load(&path).expect("load");
        assert_eq!(loaded.warn_threshold, 60);
        assert_eq!(loaded.remediate_threshold, 95);
    }

    #[test]
    fn shared_config_rereads_after_update() {
        let shared = SharedConfig::new(PipelineConfig::default());
        assert_eq!(shared.snapshot().action_policy, ActionPolicy::NotifyOnly);

        let mut edited = shared.snapshot();
        edited.action_policy = ActionPolicy::Full;
        shared.update(edited).expect("update");

        assert_eq!(shared.snapshot().action_policy, ActionPolicy::Full);
    }

    #[test]
    fn shared_config_rejects_bad_update() {
        let shared = SharedConfig::new(PipelineConfig::default());
        let mut bad = shared.snapshot();
        bad.warn_threshold = 90;
        bad.remediate_threshold = 90;
        assert!(shared.update(bad).is_err());
        // Previous config untouched.
        assert_eq!(shared.snapshot().warn_threshold, 70);
        assert_eq!(shared.snapshot().remediate_threshold, 90);
    }
}
