//! Configuration types.
//!
//! Every struct carries production defaults; a TOML file only needs to name
//! the values it overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level labeler configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LabelerConfig {
    pub thresholds: ThresholdConfig,
    pub embedding: EmbeddingConfig,
    pub adjudication: AdjudicationConfig,
}

/// Confidence thresholds and bounds for the decision cascade.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// A candidate at or above this confidence is accepted without escalation.
    pub accept_confidence: f32,
    /// Competing candidates closer than this are treated as ambiguous.
    pub ambiguity_margin: f32,
    /// Number of nearest neighbors consulted by the similarity resolver.
    pub neighbor_k: usize,
    /// Best-neighbor similarity below which the resolver stays unresolved.
    pub min_similarity: f32,
    /// Minimum weighted keyword score for a heuristic category proposal.
    pub min_category_score: u32,
    /// Score margin over the runner-up below which a proposal is ambiguous.
    pub min_category_margin: u32,
    /// Body prefix length (in characters) kept by the normalizer.
    pub body_snippet_chars: usize,
    /// Junk score at or above which the heuristic is confident it is junk.
    pub junk_high_score: u32,
    /// Junk score at or below which the heuristic is confident it is not junk.
    pub junk_low_score: u32,
    /// Confidence assigned to an in-set adjudicated label.
    pub adjudicated_confidence: f32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            accept_confidence: 0.75,
            ambiguity_margin: 0.10,
            neighbor_k: 5,
            min_similarity: 0.20,
            min_category_score: 3,
            min_category_margin: 2,
            body_snippet_chars: 280,
            junk_high_score: 6,
            junk_low_score: 2,
            adjudicated_confidence: 0.90,
        }
    }
}

/// Encoder selection and index cache location.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `hashing`, `openai` or `disabled`.
    pub provider: String,
    pub model: Option<String>,
    pub dims: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Where the persisted index lives; `None` keeps the index in memory only.
    pub cache_path: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hashing".to_string(),
            model: None,
            dims: 256,
            timeout_secs: 30,
            max_retries: 3,
            cache_path: Some(PathBuf::from(".mail-labeler/embedding-index.json")),
        }
    }
}

/// Generative-model adjudication settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdjudicationConfig {
    pub enabled: bool,
    /// `anthropic` or `openai`.
    pub backend: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Attempts after the first one.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for AdjudicationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            timeout_secs: 20,
            max_retries: 2,
            backoff_base_ms: 500,
        }
    }
}

impl AdjudicationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

impl LabelerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MAIL_LABELER_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("MAIL_LABELER_MODEL") {
            self.adjudication.model = model;
        }
        if let Ok(path) = std::env::var("MAIL_LABELER_INDEX_CACHE") {
            self.embedding.cache_path = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }
    }

    /// Reject values the cascade cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        for (key, value) in [
            ("thresholds.accept_confidence", t.accept_confidence),
            ("thresholds.ambiguity_margin", t.ambiguity_margin),
            ("thresholds.min_similarity", t.min_similarity),
            ("thresholds.adjudicated_confidence", t.adjudicated_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("{value} is outside [0, 1]"),
                });
            }
        }
        if t.neighbor_k == 0 {
            return Err(ConfigError::InvalidValue {
                key: "thresholds.neighbor_k".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if t.junk_low_score >= t.junk_high_score {
            return Err(ConfigError::InvalidValue {
                key: "thresholds.junk_low_score".to_string(),
                message: format!(
                    "must be below junk_high_score ({})",
                    t.junk_high_score
                ),
            });
        }
        if self.embedding.dims == 0 {
            return Err(ConfigError::InvalidValue {
                key: "embedding.dims".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
