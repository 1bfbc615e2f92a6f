//! Bridges a rig-core completion model to [`LlmProvider`].

use async_trait::async_trait;
use rig::agent::AgentBuilder;
use rig::completion::{CompletionModel, Prompt};

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};

pub struct RigAdapter<M> {
    model: M,
    model_name: String,
}

impl<M> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Clone + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut builder = AgentBuilder::new(self.model.clone());
        if let Some(system) = request.system_prompt() {
            builder = builder.preamble(&system);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }
        let agent = builder.build();

        let content = agent
            .prompt(request.user_prompt())
            .await
            .map_err(|e| classify_error(&self.model_name, e.to_string()))?;

        Ok(CompletionResponse { content })
    }
}

/// Map a rig error message onto [`LlmError`]. rig folds the HTTP status and
/// provider error body into the message, so auth and rate-limit failures are
/// recognized from it; everything else stays a retryable request failure.
fn classify_error(provider: &str, message: String) -> LlmError {
    let lower = message.to_lowercase();
    let has_status = |code: &str| {
        lower
            .split(|c: char| !c.is_ascii_digit())
            .any(|token| token == code)
    };

    if has_status("401")
        || has_status("403")
        || lower.contains("unauthorized")
        || lower.contains("authentication")
        || lower.contains("invalid api key")
        || lower.contains("invalid x-api-key")
        || lower.contains("permission_error")
    {
        return LlmError::AuthFailed {
            provider: provider.to_string(),
        };
    }
    if has_status("429") || lower.contains("rate limit") || lower.contains("rate_limit") {
        return LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after: None,
        };
    }
    LlmError::RequestFailed {
        provider: provider.to_string(),
        reason: message,
    }
}
