//! Email classification cascade.
//!
//! Every record flows through:
//! 1. `NormalizedContext::from_record()`: canonical sender/domain/subject/body
//! 2. `PriorTable`, `HeuristicScorer`, `SimilarityResolver`: independent opinions
//! 3. `EscalationController`: per-decision accept / adjudicate / fall back
//! 4. `guardrail::merge()`: junk override, Archive/normal fallbacks, invariants
//!
//! The cascade never performs I/O of its own apart from the encoder and
//! adjudicator calls; trace events are returned to the caller.

pub mod adjudication;
pub mod classifier;
pub mod escalation;
pub mod guardrail;
pub mod index_cache;
pub mod inventory;
pub mod normalizer;
pub mod priors;
pub mod rules;
pub mod similarity;
pub mod types;

pub use adjudication::{Adjudicator, AdjudicationRequest, DisabledAdjudicator, LlmAdjudicator};
pub use classifier::Classifier;
pub use inventory::CategoryInventory;
pub use types::{Classification, EmailRecord, Priority, SampleRecord, TraceEvent};
