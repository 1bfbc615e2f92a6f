//! Error types for the mail labeler.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for a labeling run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while reading, validating or writing run inputs and outputs.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("JSON file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Unable to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Invalid(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Adjudication is disabled")]
    Disabled,
}

impl LlmError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RequestFailed { .. } | Self::RateLimited { .. } | Self::Timeout { .. }
        )
    }
}

/// Encoder and embedding-index errors.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding provider is disabled")]
    Disabled,

    #[error("Unknown embedding provider: {0}")]
    UnknownProvider(String),

    #[error("Embedding request failed: {0}")]
    RequestFailed(String),

    #[error("{0} environment variable not set")]
    MissingApiKey(&'static str),

    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index cache error at {path}: {reason}")]
    Cache { path: PathBuf, reason: String },
}

/// Pipeline precondition errors.
///
/// Resolution failures are never errors; they surface as unresolved decisions.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid category inventory: {0}")]
    Inventory(String),

    #[error("Only category/priority may change; {0}")]
    FieldMutation(String),
}

/// Result type alias for the labeler.
pub type Result<T> = std::result::Result<T, Error>;
