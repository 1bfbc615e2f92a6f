//! Bounded retry with per-attempt timeout and jittered exponential backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::AdjudicationConfig;
use crate::error::LlmError;

/// Longest single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AdjudicationConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.backoff_base(),
            attempt_timeout: config.timeout(),
        }
    }

    /// Delay before retry number `attempt` (1-based): base × 2^(attempt−1),
    /// capped, plus up to 25% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(10))
            .min(MAX_BACKOFF);
        let jitter_ms = (exp.as_millis() as u64) / 4;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        exp + Duration::from_millis(jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&AdjudicationConfig::default())
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent. Each attempt is bounded by `attempt_timeout`.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, provider: &str, mut op: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut last_err = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            tokio::time::sleep(policy.backoff(attempt)).await;
        }

        match tokio::time::timeout(policy.attempt_timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if e.is_retryable() => {
                warn!(provider, attempt, error = %e, "LLM call failed, will retry");
                last_err = Some(e);
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!(provider, attempt, timeout = ?policy.attempt_timeout, "LLM call timed out");
                last_err = Some(LlmError::Timeout {
                    provider: provider.to_string(),
                    timeout: policy.attempt_timeout,
                });
            }
        }
    }

    Err(last_err.unwrap_or_else(|| LlmError::RequestFailed {
        provider: provider.to_string(),
        reason: "retry budget exhausted".to_string(),
    }))
}
