#![deny(missing_docs)]
//! Run configuration (spec §6 "Configuration" table).
//!
//! `theater_vocab`/`event_type_vocab` are deliberately *not* fields here:
//! the spec calls them "closed lists; changing them is a breaking change",
//! which in Rust is best expressed as the closed `Theater`/`EventType` enums
//! in `ef_types::vocab` rather than a runtime-configurable list. Everything
//! else the spec calls configuration lives in [`EfConfig`], mirroring
//! `brain::BrainConfig`'s load-from-JSON-with-default-fallback shape.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading or validating an [`EfConfig`].
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file's contents didn't parse as JSON matching [`EfConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A numeric field was out of its valid range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Per-phase deadlines for a single run (spec §6 `phase_timeouts`, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseTimeouts {
    /// Deadline for the Title Selector phase.
    #[serde(with = "duration_secs")]
    pub select: Duration,
    /// Deadline for the Map phase.
    #[serde(with = "duration_secs")]
    pub map: Duration,
    /// Deadline for the Reduce phase (incidents + orphans).
    #[serde(with = "duration_secs")]
    pub reduce: Duration,
    /// Deadline for the Merge phase.
    #[serde(with = "duration_secs")]
    pub merge: Duration,
    /// Deadline for the Persist phase.
    #[serde(with = "duration_secs")]
    pub persist: Duration,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            select: Duration::from_secs(10),
            map: Duration::from_secs(60),
            reduce: Duration::from_secs(120),
            merge: Duration::from_secs(30),
            persist: Duration::from_secs(30),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Full run configuration (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EfConfig {
    /// Upper bound on titles selected per run.
    pub max_titles: usize,
    /// Titles per Map shard prompt.
    pub map_batch_size: usize,
    /// Map pool capacity (bounded concurrent shard calls).
    pub map_concurrency: usize,
    /// Reduce pool capacity (bounded concurrent incident calls).
    pub reduce_concurrency: usize,
    /// Per-LLM-call deadline, in seconds.
    #[serde(with = "duration_secs")]
    pub llm_timeout: Duration,
    /// Per-call retry cap.
    pub llm_max_retries: u32,
    /// Per-call output token cap.
    pub llm_max_tokens: u32,
    /// Per-phase deadlines for Select/Map/Reduce/Merge/Persist.
    pub phase_timeouts: PhaseTimeouts,
    /// Subtracted from confidence when Reduce emits an unknown enum value
    /// (spec §9, Open Question 3 — fixed at 0.15; see `SPEC_FULL.md` §11).
    pub confidence_unknown_penalty: f64,
    /// Base URL of the LLM chat-completion service.
    pub llm_base_url: String,
    /// Model name passed to the LLM service.
    pub llm_model: String,
}

impl Default for EfConfig {
    fn default() -> Self {
        Self {
            max_titles: 500,
            map_batch_size: 25,
            map_concurrency: 4,
            reduce_concurrency: 8,
            llm_timeout: Duration::from_secs(30),
            llm_max_retries: 3,
            llm_max_tokens: 2048,
            phase_timeouts: PhaseTimeouts::default(),
            confidence_unknown_penalty: 0.15,
            llm_base_url: "https://api.anthropic.com".to_string(),
            llm_model: "claude-3-haiku".to_string(),
        }
    }
}

impl EfConfig {
    /// Load configuration from a JSON file, falling back to [`Default`] for
    /// any field the file omits (every field carries `#[serde(default)]` via
    /// the struct-level `#[serde(default)]` attribute).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path` if it exists, otherwise return the
    /// default (mirrors `brain::main`'s `brain.json`-if-present fallback).
    pub fn from_path_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_path(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject configurations that would make the pipeline meaningless or
    /// divide by zero (zero-capacity pools, out-of-range penalty/confidence).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.map_concurrency == 0 {
            return Err(ConfigError::Invalid("map_concurrency must be >= 1".into()));
        }
        if self.reduce_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "reduce_concurrency must be >= 1".into(),
            ));
        }
        if self.map_batch_size == 0 {
            return Err(ConfigError::Invalid("map_batch_size must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.confidence_unknown_penalty) {
            return Err(ConfigError::Invalid(
                "confidence_unknown_penalty must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_validates() {
        assert!(EfConfig::default().validate().is_ok());
    }

    #[test]
    fn from_path_or_default_falls_back_when_missing() {
        let config = EfConfig::from_path_or_default("/nonexistent/ef-config.json").unwrap();
        assert_eq!(config, EfConfig::default());
    }

    #[test]
    fn from_path_loads_partial_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_titles": 10, "map_concurrency": 2}}"#).unwrap();
        let config = EfConfig::from_path(file.path()).unwrap();
        assert_eq!(config.max_titles, 10);
        assert_eq!(config.map_concurrency, 2);
        assert_eq!(config.reduce_concurrency, EfConfig::default().reduce_concurrency);
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = EfConfig::default();
        config.map_concurrency = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn phase_timeouts_roundtrip_as_seconds() {
        let json = serde_json::to_string(&PhaseTimeouts::default()).unwrap();
        let back: PhaseTimeouts = serde_json::from_str(&json).unwrap();
        assert_eq!(PhaseTimeouts::default(), back);
    }
}
