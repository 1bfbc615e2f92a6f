//! Adjudication gateway: the only stage that talks to a generative model.
//!
//! An adjudicator answers one bounded question per call and returns the raw
//! label it chose. The label is untrusted; the escalation controller checks
//! it against the allowed set before using it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::llm::retry::{RetryPolicy, with_retry};
use crate::pipeline::normalizer::NormalizedContext;
use crate::pipeline::types::DecisionKind;

/// Max tokens for an adjudication reply. The answer is a single label.
const ADJUDICATION_MAX_TOKENS: u32 = 64;

const ADJUDICATION_TEMPERATURE: f32 = 0.0;

/// One question for the adjudicator.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjudicationRequest {
    pub kind: DecisionKind,
    pub allowed_labels: Vec<String>,
    pub context: NormalizedContext,
}

#[async_trait]
pub trait Adjudicator: Send + Sync {
    fn name(&self) -> &str;

    /// Pick one label for `request`. Implementations must give up in
    /// bounded time and report failure instead of blocking.
    async fn adjudicate(&self, request: &AdjudicationRequest) -> Result<String, LlmError>;
}

/// Used when no model is configured; every call fails immediately so the
/// controller falls back to its best candidate.
pub struct DisabledAdjudicator;

#[async_trait]
impl Adjudicator for DisabledAdjudicator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn adjudicate(&self, _request: &AdjudicationRequest) -> Result<String, LlmError> {
        Err(LlmError::Disabled)
    }
}

/// Adjudicator backed by an [`LlmProvider`], with timeout and bounded retry.
pub struct LlmAdjudicator {
    llm: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
}

impl LlmAdjudicator {
    pub fn new(llm: Arc<dyn LlmProvider>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }
}

#[async_trait]
impl Adjudicator for LlmAdjudicator {
    fn name(&self) -> &str {
        self.llm.model_name()
    }

    async fn adjudicate(&self, request: &AdjudicationRequest) -> Result<String, LlmError> {
        let completion = CompletionRequest::new(vec![
            ChatMessage::system(build_system_prompt()),
            ChatMessage::user(build_user_prompt(request)),
        ])
        .with_temperature(ADJUDICATION_TEMPERATURE)
        .with_max_tokens(ADJUDICATION_MAX_TOKENS);

        let provider = self.llm.model_name().to_string();
        with_retry(&self.retry, &provider, || {
            let completion = completion.clone();
            let provider = provider.clone();
            async move {
                let response = self.llm.complete(completion).await?;
                debug!(kind = %request.kind, raw = %response.content, "Adjudicator replied");
                parse_label(&response.content, &provider)
            }
        })
        .await
    }
}

fn build_system_prompt() -> String {
    "You label email for a personal mailbox. You are given one question, the \
     allowed labels and the email. Reply with a single JSON object of the form \
     {\"label\": \"<one allowed label>\"}. The label must be copied exactly from \
     the allowed list. Do not add any other text."
        .to_string()
}

fn build_user_prompt(request: &AdjudicationRequest) -> String {
    let ctx = &request.context;
    let mut prompt = String::with_capacity(512 + ctx.body.len());

    prompt.push_str(match request.kind {
        DecisionKind::Category => "Which folder should this email be filed in?",
        DecisionKind::Junk => {
            "Is this email junk (spam, scam or unsolicited promotion)? \
             Answer \"junk\" or \"not_junk\"."
        }
        DecisionKind::Priority => {
            "Does this email need a response or action from the recipient? \
             Answer \"high\" if it does, otherwise \"normal\"."
        }
    });

    prompt.push_str("\n\nAllowed labels: ");
    prompt.push_str(&request.allowed_labels.join(", "));

    prompt.push_str("\n\nFrom: ");
    if !ctx.sender_display.is_empty() {
        prompt.push_str(&ctx.sender_display);
        prompt.push(' ');
    }
    prompt.push('<');
    prompt.push_str(&ctx.sender);
    prompt.push_str(">\nSubject: ");
    prompt.push_str(&ctx.subject);
    prompt.push_str("\nBody:\n");
    prompt.push_str(&ctx.body);
    prompt
}

#[derive(Debug, Deserialize)]
struct LabelReply {
    label: String,
}

/// Pull the label out of a reply. Accepts the JSON object (optionally fenced)
/// or a bare single-line label; anything else is an invalid response.
fn parse_label(raw: &str, provider: &str) -> Result<String, LlmError> {
    let invalid = |reason: String| LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason,
    };

    let json = json_span(raw);
    let label = if json.starts_with('{') {
        serde_json::from_str::<LabelReply>(json)
            .map_err(|e| invalid(format!("JSON parse error: {e}")))?
            .label
    } else {
        let line = json.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`');
        if line.is_empty() || line.contains('\n') || line.len() > 64 {
            return Err(invalid(format!("unparseable reply: {raw:?}")));
        }
        line.to_string()
    };

    let label = label.trim();
    if label.is_empty() {
        return Err(invalid("empty label".to_string()));
    }
    Ok(label.to_string())
}

/// The outermost `{...}` span of a reply, which also unwraps markdown
/// fences and chatty preambles. Without braces the trimmed reply is returned.
fn json_span(text: &str) -> &str {
    let trimmed = text.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::llm::provider::CompletionResponse;
    use crate::pipeline::types::EmailRecord;

    /// Replays canned replies in order, repeating the last one.
    struct ScriptedLlm {
        replies: Vec<Result<String, LlmError>>,
        calls: AtomicU32,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let reply = &self.replies[i.min(self.replies.len() - 1)];
            match reply {
                Ok(content) => Ok(CompletionResponse {
                    content: content.clone(),
                }),
                Err(_) => Err(LlmError::RequestFailed {
                    provider: "scripted".into(),
                    reason: "unavailable".into(),
                }),
            }
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            attempt_timeout: Duration::from_millis(200),
        }
    }

    fn request(kind: DecisionKind, labels: &[&str]) -> AdjudicationRequest {
        let record = EmailRecord::new(
            "2024-03-01",
            "Dana Lee <dana@acme.io>",
            "Quarterly numbers",
            "Please review the attached figures.",
        );
        AdjudicationRequest {
            kind,
            allowed_labels: labels.iter().map(|s| s.to_string()).collect(),
            context: NormalizedContext::from_record(&record, 280),
        }
    }

    #[test]
    fn parses_plain_and_fenced_json() {
        assert_eq!(parse_label(r#"{"label": "Work"}"#, "p").unwrap(), "Work");
        assert_eq!(
            parse_label("```json\n{\"label\": \"high\"}\n```", "p").unwrap(),
            "high"
        );
        assert_eq!(
            parse_label("Sure! {\"label\": \"not_junk\"} hope that helps", "p").unwrap(),
            "not_junk"
        );
    }

    #[test]
    fn json_span_unwraps_fences_and_preambles() {
        assert_eq!(json_span("```\n{\"label\": \"Work\"}\n```"), r#"{"label": "Work"}"#);
        assert_eq!(json_span("Answer: {\"label\": \"high\"}."), r#"{"label": "high"}"#);
        assert_eq!(json_span("  Travel \n"), "Travel");
        assert_eq!(json_span("} backwards {"), "} backwards {");
    }

    #[test]
    fn accepts_bare_single_line_label() {
        assert_eq!(parse_label("  \"Travel\"  ", "p").unwrap(), "Travel");
    }

    #[test]
    fn rejects_empty_or_rambling_replies() {
        assert!(matches!(
            parse_label("", "p"),
            Err(LlmError::InvalidResponse { .. })
        ));
        assert!(parse_label(r#"{"label": "  "}"#, "p").is_err());
        assert!(parse_label("I think\nit is probably Work", "p").is_err());
        assert!(parse_label(r#"{"category": "Work"}"#, "p").is_err());
    }

    #[test]
    fn user_prompt_lists_labels_and_context() {
        let prompt = build_user_prompt(&request(DecisionKind::Category, &["Work", "Archive"]));
        assert!(prompt.contains("Allowed labels: Work, Archive"));
        assert!(prompt.contains("dana lee <dana@acme.io>"));
        assert!(prompt.contains("Quarterly numbers"));
    }

    #[tokio::test]
    async fn llm_adjudicator_retries_transient_failures() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Err(LlmError::Disabled),
            Ok(r#"{"label": "Work"}"#.into()),
        ]));
        let adjudicator = LlmAdjudicator::new(llm.clone(), policy());
        let label = adjudicator
            .adjudicate(&request(DecisionKind::Category, &["Work", "Archive"]))
            .await
            .unwrap();
        assert_eq!(label, "Work");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn llm_adjudicator_gives_up_after_budget() {
        let llm = Arc::new(ScriptedLlm::new(vec![Err(LlmError::Disabled)]));
        let adjudicator = LlmAdjudicator::new(llm.clone(), policy());
        let result = adjudicator
            .adjudicate(&request(DecisionKind::Junk, &["junk", "not_junk"]))
            .await;
        assert!(result.is_err());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn malformed_reply_is_not_retried() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok("I cannot decide.\nSorry.".into())]));
        let adjudicator = LlmAdjudicator::new(llm.clone(), policy());
        let result = adjudicator
            .adjudicate(&request(DecisionKind::Priority, &["high", "normal"]))
            .await;
        assert!(matches!(result, Err(LlmError::InvalidResponse { .. })));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_adjudicator_always_fails() {
        let result = DisabledAdjudicator
            .adjudicate(&request(DecisionKind::Category, &["Archive"]))
            .await;
        assert!(matches!(result, Err(LlmError::Disabled)));
    }
}
