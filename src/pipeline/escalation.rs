//! Per-decision escalation state machine.
//!
//! ```text
//! Unresolved ──┐
//!              ├─> Escalated ──(adjudicate | fall back)──> Final
//! Candidate ───┤
//!              └─> Accepted ───────────────────────────────> Final
//! ```
//!
//! Each decision kind (junk, category, priority) runs its own machine; no
//! state is shared between kinds.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ThresholdConfig;
use crate::pipeline::adjudication::{AdjudicationRequest, Adjudicator};
use crate::pipeline::normalizer::NormalizedContext;
use crate::pipeline::types::{
    Decision, DecisionKind, DecisionSource, Neighbor, Priority, TraceEvent, TraceStep,
};

const JUNK_LABEL: &str = "junk";
const NOT_JUNK_LABEL: &str = "not_junk";

/// A label type that can be recovered from an untrusted adjudicator reply.
pub trait Label: Clone + PartialEq + fmt::Display + Send + Sync {
    /// Map `raw` onto a member of `allowed`; `None` if it is not one.
    fn from_adjudicated(raw: &str, allowed: &[String]) -> Option<Self>;
}

impl Label for String {
    fn from_adjudicated(raw: &str, allowed: &[String]) -> Option<Self> {
        let raw = raw.trim();
        allowed.iter().find(|a| a.eq_ignore_ascii_case(raw)).cloned()
    }
}

impl Label for bool {
    fn from_adjudicated(raw: &str, allowed: &[String]) -> Option<Self> {
        let raw = raw.trim();
        if !allowed.iter().any(|a| a.eq_ignore_ascii_case(raw)) {
            return None;
        }
        match raw.to_ascii_lowercase().as_str() {
            JUNK_LABEL => Some(true),
            NOT_JUNK_LABEL => Some(false),
            _ => None,
        }
    }
}

impl Label for Priority {
    fn from_adjudicated(raw: &str, allowed: &[String]) -> Option<Self> {
        let priority = Priority::parse(raw)?;
        allowed
            .iter()
            .any(|a| a == priority.as_str())
            .then_some(priority)
    }
}

/// Allowed adjudicator answers for the junk question.
pub fn junk_labels() -> Vec<String> {
    vec![JUNK_LABEL.to_string(), NOT_JUNK_LABEL.to_string()]
}

/// Allowed adjudicator answers for the priority question.
pub fn priority_labels() -> Vec<String> {
    Priority::ALL.iter().map(|p| p.as_str().to_string()).collect()
}

/// States of one decision.
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationState<L> {
    /// No stage produced a label.
    Unresolved,
    /// The strongest opinion so far; `contested` when another label is
    /// within the ambiguity margin.
    Candidate { best: Decision<L>, contested: bool },
    Accepted(Decision<L>),
    /// Waiting on adjudication; `fallback` is what we keep if it fails.
    Escalated { fallback: Option<Decision<L>> },
    Final(Decision<L>),
}

/// Outcome of one decision plus its trace.
#[derive(Debug, Clone)]
pub struct Resolution<L> {
    pub decision: Decision<L>,
    pub trace: Vec<TraceEvent>,
}

pub struct EscalationController {
    accept_confidence: f32,
    ambiguity_margin: f32,
    adjudicated_confidence: f32,
    adjudicator: Arc<dyn Adjudicator>,
}

impl EscalationController {
    pub fn new(thresholds: &ThresholdConfig, adjudicator: Arc<dyn Adjudicator>) -> Self {
        Self {
            accept_confidence: thresholds.accept_confidence,
            ambiguity_margin: thresholds.ambiguity_margin,
            adjudicated_confidence: thresholds.adjudicated_confidence,
            adjudicator,
        }
    }

    /// Drive one decision from its stage candidates to a final value.
    ///
    /// `neighbors` are attached to the embedding candidate's trace event.
    pub async fn resolve<L: Label>(
        &self,
        kind: DecisionKind,
        candidates: Vec<Decision<L>>,
        allowed_labels: Vec<String>,
        ctx: &NormalizedContext,
        neighbors: &[Neighbor],
    ) -> Resolution<L> {
        let mut trace: Vec<TraceEvent> = candidates
            .iter()
            .map(|c| {
                let event = TraceEvent::from_decision(kind, TraceStep::Candidate, c);
                if c.source == DecisionSource::Embedding && !neighbors.is_empty() {
                    event.with_neighbors(neighbors.to_vec())
                } else {
                    event
                }
            })
            .collect();

        let mut state = self.gather(&candidates);
        loop {
            state = match state {
                pending @ (EscalationState::Unresolved | EscalationState::Candidate { .. }) => {
                    self.gate(pending, &candidates)
                }
                EscalationState::Accepted(decision) => {
                    trace.push(TraceEvent::from_decision(kind, TraceStep::Accepted, &decision));
                    EscalationState::Final(decision)
                }
                EscalationState::Escalated { fallback } => {
                    let detail = match &fallback {
                        Some(f) => format!("best candidate {} at {:.2}", label_of(f), f.confidence),
                        None => "no usable candidate".to_string(),
                    };
                    trace.push(TraceEvent::note(kind, TraceStep::Escalated, detail));
                    let decision = self
                        .adjudicate(kind, fallback, allowed_labels.clone(), ctx, &mut trace)
                        .await;
                    EscalationState::Final(decision)
                }
                EscalationState::Final(decision) => {
                    debug!(
                        %kind,
                        label = %label_of(&decision),
                        source = %decision.source,
                        confidence = decision.confidence,
                        "Decision final"
                    );
                    return Resolution { decision, trace };
                }
            };
        }
    }

    /// Unresolved → Candidate: pick the highest-confidence resolved opinion
    /// (first one wins ties) and check for a close rival label.
    pub fn gather<L: Label>(&self, candidates: &[Decision<L>]) -> EscalationState<L> {
        let Some(best) = best_of(candidates.iter()) else {
            return EscalationState::Unresolved;
        };
        let contested = candidates.iter().any(|c| {
            c.is_resolved()
                && c.label != best.label
                && best.confidence - c.confidence <= self.ambiguity_margin
        });
        EscalationState::Candidate {
            best: best.clone(),
            contested,
        }
    }

    /// Candidate → Accepted | Escalated, Unresolved → Escalated.
    pub fn gate<L: Label>(
        &self,
        state: EscalationState<L>,
        candidates: &[Decision<L>],
    ) -> EscalationState<L> {
        match state {
            EscalationState::Candidate { best, contested }
                if best.confidence >= self.accept_confidence && !best.ambiguous && !contested =>
            {
                EscalationState::Accepted(best)
            }
            EscalationState::Candidate { .. } | EscalationState::Unresolved => {
                // Self-flagged toss-ups never become the fallback.
                let fallback = best_of(candidates.iter().filter(|c| !c.ambiguous)).cloned();
                EscalationState::Escalated { fallback }
            }
            other => other,
        }
    }

    /// Escalated → Final. A reply outside `allowed_labels` counts as failure.
    async fn adjudicate<L: Label>(
        &self,
        kind: DecisionKind,
        fallback: Option<Decision<L>>,
        allowed_labels: Vec<String>,
        ctx: &NormalizedContext,
        trace: &mut Vec<TraceEvent>,
    ) -> Decision<L> {
        let request = AdjudicationRequest {
            kind,
            allowed_labels,
            context: ctx.clone(),
        };

        let failure = match self.adjudicator.adjudicate(&request).await {
            Ok(raw) => match L::from_adjudicated(&raw, &request.allowed_labels) {
                Some(label) => {
                    let decision = Decision::proposed(
                        label,
                        self.adjudicated_confidence,
                        DecisionSource::Adjudicated,
                        format!("{} answered {raw:?}", self.adjudicator.name()),
                    );
                    info!(%kind, label = %label_of(&decision), "Adjudicated");
                    trace.push(TraceEvent::from_decision(kind, TraceStep::Adjudicated, &decision));
                    return decision;
                }
                None => format!("label {raw:?} is not an allowed {kind} label"),
            },
            Err(e) => e.to_string(),
        };

        warn!(%kind, adjudicator = self.adjudicator.name(), reason = %failure, "Adjudication failed, falling back");
        trace.push(TraceEvent::note(kind, TraceStep::AdjudicationFailed, failure));

        match fallback {
            Some(decision) => {
                trace.push(TraceEvent::from_decision(kind, TraceStep::Fallback, &decision));
                decision
            }
            None => Decision::unresolved(DecisionSource::Fallback, "no candidate survived escalation"),
        }
    }
}

fn best_of<'a, L: 'a>(candidates: impl Iterator<Item = &'a Decision<L>>) -> Option<&'a Decision<L>> {
    let mut best: Option<&Decision<L>> = None;
    for c in candidates.filter(|c| c.is_resolved()) {
        if best.is_none_or(|b| c.confidence > b.confidence) {
            best = Some(c);
        }
    }
    best
}

fn label_of<L: fmt::Display>(decision: &Decision<L>) -> String {
    decision
        .label
        .as_ref()
        .map_or_else(|| "unresolved".to_string(), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::LlmError;
    use crate::pipeline::adjudication::DisabledAdjudicator;
    use crate::pipeline::types::EmailRecord;

    struct FixedAdjudicator {
        reply: &'static str,
        calls: AtomicU32,
    }

    impl FixedAdjudicator {
        fn new(reply: &'static str) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Adjudicator for FixedAdjudicator {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn adjudicate(&self, _request: &AdjudicationRequest) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.to_string())
        }
    }

    fn controller(adjudicator: Arc<dyn Adjudicator>) -> EscalationController {
        EscalationController::new(&ThresholdConfig::default(), adjudicator)
    }

    fn ctx() -> NormalizedContext {
        NormalizedContext::from_record(&EmailRecord::new("d", "a@b.com", "s", "b"), 280)
    }

    fn cat(label: &str, confidence: f32, source: DecisionSource) -> Decision<String> {
        Decision::proposed(label.to_string(), confidence, source, "test")
    }

    fn steps(trace: &[TraceEvent]) -> Vec<TraceStep> {
        trace.iter().map(|e| e.step).collect()
    }

    #[test]
    fn gather_without_resolved_candidates_is_unresolved() {
        let c = controller(Arc::new(DisabledAdjudicator));
        let state = c.gather::<String>(&[Decision::unresolved(DecisionSource::Prior, "none")]);
        assert_eq!(state, EscalationState::Unresolved);
    }

    #[test]
    fn close_rival_contests_the_candidate() {
        let c = controller(Arc::new(DisabledAdjudicator));
        let candidates = vec![
            cat("Work", 0.85, DecisionSource::Heuristic),
            cat("Travel", 0.80, DecisionSource::Embedding),
        ];
        let state = c.gather(&candidates);
        assert!(matches!(state, EscalationState::Candidate { contested: true, .. }));
        assert!(matches!(
            c.gate(state, &candidates),
            EscalationState::Escalated { fallback: Some(_) }
        ));
    }

    #[test]
    fn agreeing_candidates_do_not_contest() {
        let c = controller(Arc::new(DisabledAdjudicator));
        let candidates = vec![
            cat("Work", 0.85, DecisionSource::Heuristic),
            cat("Work", 0.84, DecisionSource::Prior),
        ];
        let state = c.gather(&candidates);
        assert!(matches!(
            c.gate(state, &candidates),
            EscalationState::Accepted(d) if d.source == DecisionSource::Heuristic
        ));
    }

    #[test]
    fn ambiguous_candidates_are_not_fallbacks() {
        let c = controller(Arc::new(DisabledAdjudicator));
        let candidates = vec![cat("Work", 0.5, DecisionSource::Embedding).mark_ambiguous()];
        let state = c.gather(&candidates);
        assert_eq!(
            c.gate(state, &candidates),
            EscalationState::Escalated { fallback: None }
        );
    }

    #[tokio::test]
    async fn confident_candidate_is_accepted_without_adjudication() {
        let adjudicator = FixedAdjudicator::new("Travel");
        let c = controller(adjudicator.clone());
        let res = c
            .resolve(
                DecisionKind::Category,
                vec![cat("Work", 0.9, DecisionSource::Heuristic)],
                vec!["Work".into(), "Travel".into()],
                &ctx(),
                &[],
            )
            .await;
        assert_eq!(res.decision.label.as_deref(), Some("Work"));
        assert_eq!(adjudicator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(steps(&res.trace), vec![TraceStep::Candidate, TraceStep::Accepted]);
    }

    #[tokio::test]
    async fn weak_candidate_is_adjudicated() {
        let adjudicator = FixedAdjudicator::new("travel");
        let c = controller(adjudicator.clone());
        let res = c
            .resolve(
                DecisionKind::Category,
                vec![cat("Work", 0.5, DecisionSource::Prior)],
                vec!["Work".into(), "Travel".into()],
                &ctx(),
                &[],
            )
            .await;
        assert_eq!(res.decision.label.as_deref(), Some("Travel"));
        assert_eq!(res.decision.source, DecisionSource::Adjudicated);
        assert!((res.decision.confidence - 0.9).abs() < 1e-6);
        assert_eq!(
            steps(&res.trace),
            vec![TraceStep::Candidate, TraceStep::Escalated, TraceStep::Adjudicated]
        );
    }

    #[tokio::test]
    async fn out_of_set_reply_falls_back() {
        let c = controller(FixedAdjudicator::new("Groceries"));
        let res = c
            .resolve(
                DecisionKind::Category,
                vec![cat("Work", 0.5, DecisionSource::Prior)],
                vec!["Work".into(), "Archive".into()],
                &ctx(),
                &[],
            )
            .await;
        assert_eq!(res.decision.label.as_deref(), Some("Work"));
        assert_eq!(res.decision.source, DecisionSource::Prior);
        assert!(steps(&res.trace).contains(&TraceStep::AdjudicationFailed));
        assert!(steps(&res.trace).contains(&TraceStep::Fallback));
    }

    #[tokio::test]
    async fn failed_adjudication_without_fallback_is_unresolved() {
        let c = controller(Arc::new(DisabledAdjudicator));
        let res = c
            .resolve::<Priority>(
                DecisionKind::Priority,
                vec![Decision::unresolved(DecisionSource::Heuristic, "none")],
                priority_labels(),
                &ctx(),
                &[],
            )
            .await;
        assert!(!res.decision.is_resolved());
        assert_eq!(res.decision.source, DecisionSource::Fallback);
    }

    #[test]
    fn adjudicated_labels_are_closed_sets() {
        let junk = junk_labels();
        assert_eq!(bool::from_adjudicated("JUNK", &junk), Some(true));
        assert_eq!(bool::from_adjudicated("not_junk", &junk), Some(false));
        assert_eq!(bool::from_adjudicated("spam", &junk), None);

        let prio = priority_labels();
        assert_eq!(Priority::from_adjudicated(" High ", &prio), Some(Priority::High));
        assert_eq!(Priority::from_adjudicated("urgent", &prio), None);

        let cats = vec!["Work".to_string()];
        assert_eq!(String::from_adjudicated("work", &cats).as_deref(), Some("Work"));
        assert_eq!(String::from_adjudicated("Junk", &cats), None);
    }

    #[tokio::test]
    async fn embedding_candidate_carries_neighbors() {
        let c = controller(Arc::new(DisabledAdjudicator));
        let neighbors = vec![Neighbor {
            sample_id: 3,
            category: "Work".into(),
            priority: Priority::Normal,
            similarity: 0.9,
        }];
        let res = c
            .resolve(
                DecisionKind::Category,
                vec![
                    cat("Work", 0.9, DecisionSource::Embedding),
                    cat("Work", 0.6, DecisionSource::Prior),
                ],
                vec!["Work".into()],
                &ctx(),
                &neighbors,
            )
            .await;
        assert_eq!(res.trace[0].neighbors, neighbors);
        assert!(res.trace[1].neighbors.is_empty());
    }
}
