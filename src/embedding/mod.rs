//! Encoder abstraction and implementations.
//!
//! - [`HashingEncoder`]: deterministic local feature hashing, no network
//! - [`OpenAiEncoder`]: `POST /v1/embeddings` with timeout, retry and backoff
//! - [`DisabledEncoder`]: always errors; similarity resolution degrades to unresolved
//!
//! Use [`create_encoder`] to pick one from configuration.

mod hashing;
mod openai;

pub use hashing::HashingEncoder;
pub use openai::OpenAiEncoder;

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;

const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Text → fixed-length vector.
///
/// Implementations must be deterministic for identical input within a run.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Model identifier, part of the index cache fingerprint.
    fn model_name(&self) -> &str;

    /// Output dimensionality.
    fn dims(&self) -> usize;

    /// Encode a batch, one vector per input, in input order.
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Encode a single text.
    async fn encode_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.encode(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".into()))
    }
}

/// Encoder used when embeddings are turned off.
pub struct DisabledEncoder;

#[async_trait]
impl Encoder for DisabledEncoder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn encode(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Disabled)
    }
}

/// Create the configured encoder.
///
/// | `provider` | Encoder |
/// |------------|---------|
/// | `"hashing"` | [`HashingEncoder`] |
/// | `"openai"` | [`OpenAiEncoder`] (needs `OPENAI_API_KEY`) |
/// | `"disabled"` | [`DisabledEncoder`] |
///
/// A missing key disables the encoder instead of failing, the same way a
/// missing LLM key disables adjudication.
pub fn create_encoder(config: &EmbeddingConfig) -> Result<Arc<dyn Encoder>, EmbeddingError> {
    let openai_key = std::env::var(OPENAI_API_KEY_VAR)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .map(SecretString::from);
    build_encoder(config, openai_key)
}

fn build_encoder(
    config: &EmbeddingConfig,
    openai_key: Option<SecretString>,
) -> Result<Arc<dyn Encoder>, EmbeddingError> {
    match config.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingEncoder::new(config.dims))),
        "openai" => match openai_key {
            Some(key) => Ok(Arc::new(OpenAiEncoder::new(config, key)?)),
            None => {
                let err = EmbeddingError::MissingApiKey(OPENAI_API_KEY_VAR);
                warn!(error = %err, "Embedding encoder disabled; similarity stays unresolved");
                Ok(Arc::new(DisabledEncoder))
            }
        },
        "disabled" => Ok(Arc::new(DisabledEncoder)),
        other => Err(EmbeddingError::UnknownProvider(other.to_string())),
    }
}

/// Cosine similarity in `[-1, 1]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn create_encoder_by_name() {
        let mut config = EmbeddingConfig::default();
        assert_eq!(create_encoder(&config).unwrap().model_name(), "hashing-v1");
        config.provider = "disabled".into();
        assert_eq!(create_encoder(&config).unwrap().dims(), 0);
        config.provider = "word2vec".into();
        assert!(matches!(
            create_encoder(&config),
            Err(EmbeddingError::UnknownProvider(_))
        ));
    }

    #[test]
    fn openai_without_key_degrades_to_disabled() {
        let config = EmbeddingConfig {
            provider: "openai".into(),
            ..EmbeddingConfig::default()
        };
        let encoder = build_encoder(&config, None).unwrap();
        assert_eq!(encoder.model_name(), "disabled");

        let encoder = build_encoder(&config, Some(SecretString::from("sk-test".to_string()))).unwrap();
        assert_ne!(encoder.model_name(), "disabled");
    }

    #[tokio::test]
    async fn disabled_encoder_errors() {
        let err = DisabledEncoder.encode_one("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Disabled));
    }
}
