//! Shared types for the labeling cascade.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

// ── Email record ────────────────────────────────────────────────────

/// One email as read from the input file.
///
/// Only `category` and `priority` are ever rewritten; every other field,
/// including keys this crate does not know about, passes through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailRecord {
    #[serde(default, deserialize_with = "nullable_string")]
    pub date: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub from: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub subject: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub body: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub category: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub priority: String,
    /// Keys outside the known schema, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A solved example. Same shape as an input record, with labels filled in.
pub type SampleRecord = EmailRecord;

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl EmailRecord {
    /// Convenience constructor with empty labels.
    pub fn new(
        date: impl Into<String>,
        from: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            date: date.into(),
            from: from.into(),
            subject: subject.into(),
            body: body.into(),
            category: String::new(),
            priority: String::new(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_labels(mut self, category: impl Into<String>, priority: Priority) -> Self {
        self.category = category.into();
        self.priority = priority.to_string();
        self
    }
}

// ── Labels ──────────────────────────────────────────────────────────

/// Final priority label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
}

impl Priority {
    pub const ALL: [Priority; 2] = [Priority::High, Priority::Normal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
        }
    }

    /// Case-insensitive parse; `None` for anything outside the allowed set.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(raw.trim()))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which independent decision a piece of evidence belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Category,
    Junk,
    Priority,
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Category => "category",
            Self::Junk => "junk",
            Self::Priority => "priority",
        })
    }
}

/// Which stage produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Heuristic,
    Prior,
    Embedding,
    Adjudicated,
    Fallback,
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Heuristic => "heuristic",
            Self::Prior => "prior",
            Self::Embedding => "embedding",
            Self::Adjudicated => "adjudicated",
            Self::Fallback => "fallback",
        })
    }
}

// ── Decision ────────────────────────────────────────────────────────

/// A confidence-qualified opinion from one stage.
///
/// `label == None` means the stage looked and could not decide.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision<L> {
    pub label: Option<L>,
    pub confidence: f32,
    pub source: DecisionSource,
    pub rationale: String,
    /// Set when the stage itself saw a close competitor for `label`.
    pub ambiguous: bool,
}

impl<L> Decision<L> {
    pub fn proposed(
        label: L,
        confidence: f32,
        source: DecisionSource,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            label: Some(label),
            confidence: confidence.clamp(0.0, 1.0),
            source,
            rationale: rationale.into(),
            ambiguous: false,
        }
    }

    pub fn unresolved(source: DecisionSource, rationale: impl Into<String>) -> Self {
        Self {
            label: None,
            confidence: 0.0,
            source,
            rationale: rationale.into(),
            ambiguous: false,
        }
    }

    pub fn mark_ambiguous(mut self) -> Self {
        self.ambiguous = true;
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.label.is_some()
    }

    pub fn map_label<M>(self, f: impl FnOnce(L) -> M) -> Decision<M> {
        Decision {
            label: self.label.map(f),
            confidence: self.confidence,
            source: self.source,
            rationale: self.rationale,
            ambiguous: self.ambiguous,
        }
    }
}

/// One solved sample retrieved by similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub sample_id: usize,
    pub category: String,
    pub priority: Priority,
    pub similarity: f32,
}

// ── Trace events ────────────────────────────────────────────────────

/// Where in the cascade a trace event was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStep {
    Candidate,
    Accepted,
    Escalated,
    Adjudicated,
    AdjudicationFailed,
    Final,
    Override,
    Fallback,
}

impl fmt::Display for TraceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Candidate => "candidate",
            Self::Accepted => "accepted",
            Self::Escalated => "escalated",
            Self::Adjudicated => "adjudicated",
            Self::AdjudicationFailed => "adjudication_failed",
            Self::Final => "final",
            Self::Override => "override",
            Self::Fallback => "fallback",
        })
    }
}

/// Structured record of one step of one decision, handed to the caller for logging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEvent {
    pub kind: DecisionKind,
    pub step: TraceStep,
    pub source: Option<DecisionSource>,
    pub label: Option<String>,
    pub confidence: f32,
    pub detail: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub neighbors: Vec<Neighbor>,
}

impl TraceEvent {
    pub fn from_decision<L: fmt::Display>(
        kind: DecisionKind,
        step: TraceStep,
        decision: &Decision<L>,
    ) -> Self {
        Self {
            kind,
            step,
            source: Some(decision.source),
            label: decision.label.as_ref().map(ToString::to_string),
            confidence: decision.confidence,
            detail: decision.rationale.clone(),
            neighbors: Vec::new(),
        }
    }

    pub fn note(kind: DecisionKind, step: TraceStep, detail: impl Into<String>) -> Self {
        Self {
            kind,
            step,
            source: None,
            label: None,
            confidence: 0.0,
            detail: detail.into(),
            neighbors: Vec::new(),
        }
    }

    pub fn with_neighbors(mut self, neighbors: Vec<Neighbor>) -> Self {
        self.neighbors = neighbors;
        self
    }
}

// ── Classification ──────────────────────────────────────────────────

/// Result of running one record through the cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: String,
    pub priority: Priority,
    pub junk: bool,
    pub trace: Vec<TraceEvent>,
}

impl Classification {
    /// Copy of `record` carrying the resolved labels; nothing else changes.
    pub fn apply_to(&self, record: &EmailRecord) -> EmailRecord {
        let mut labeled = record.clone();
        labeled.category = self.category.clone();
        labeled.priority = self.priority.to_string();
        labeled
    }

    /// Copy of the raw input object with the resolved labels written in
    /// place. Key order and every other value are kept exactly as read.
    pub fn apply_to_value(&self, original: &serde_json::Value) -> serde_json::Value {
        let mut labeled = original.clone();
        if let Some(object) = labeled.as_object_mut() {
            object.insert("category".into(), self.category.clone().into());
            object.insert("priority".into(), self.priority.to_string().into());
        }
        labeled
    }
}
