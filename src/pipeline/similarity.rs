//! Embedding similarity resolution over the sample corpus.
//!
//! The index is built (or loaded from cache) once per run; every query does a
//! brute-force cosine scan, takes the top-k and aggregates their labels.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::embedding::{Encoder, cosine_similarity};
use crate::error::EmbeddingError;
use crate::pipeline::inventory::JUNK;
use crate::pipeline::normalizer::NormalizedContext;
use crate::pipeline::types::{Decision, DecisionSource, Neighbor, Priority, SampleRecord};

const ENCODE_BATCH_SIZE: usize = 64;

/// One indexed sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub sample_id: usize,
    pub vector: Vec<f32>,
    pub category: String,
    pub priority: Priority,
}

/// Vectors for every sample, in corpus order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingIndex {
    pub fingerprint: String,
    pub model: String,
    pub dims: usize,
    pub entries: Vec<IndexEntry>,
}

impl EmbeddingIndex {
    /// Encode every sample. Samples whose priority is not `high`/`normal`
    /// are indexed as `normal`; the loader rejects those before this point.
    pub async fn build(
        samples: &[SampleRecord],
        encoder: &dyn Encoder,
        body_snippet_chars: usize,
        fingerprint: String,
    ) -> Result<Self, EmbeddingError> {
        let texts: Vec<String> = samples
            .iter()
            .map(|s| NormalizedContext::from_record(s, body_snippet_chars).embedding_text())
            .collect();

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(ENCODE_BATCH_SIZE) {
            let encoded = encoder.encode(batch).await?;
            if encoded.len() != batch.len() {
                return Err(EmbeddingError::InvalidResponse(format!(
                    "encoder returned {} vectors for {} texts",
                    encoded.len(),
                    batch.len()
                )));
            }
            vectors.extend(encoded);
        }

        let dims = encoder.dims();
        let mut entries = Vec::with_capacity(samples.len());
        for (sample_id, (sample, vector)) in samples.iter().zip(vectors).enumerate() {
            if vector.len() != dims {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dims,
                    actual: vector.len(),
                });
            }
            entries.push(IndexEntry {
                sample_id,
                vector,
                category: sample.category.clone(),
                priority: Priority::parse(&sample.priority).unwrap_or(Priority::Normal),
            });
        }

        info!(entries = entries.len(), model = encoder.model_name(), "Built embedding index");
        Ok(Self {
            fingerprint,
            model: encoder.model_name().to_string(),
            dims,
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-`k` entries by similarity, descending; equal similarities keep
    /// corpus order. Negative similarities are clamped to zero.
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, EmbeddingError> {
        if query.len() != self.dims {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }

        let mut scored: Vec<Neighbor> = self
            .entries
            .iter()
            .map(|entry| Neighbor {
                sample_id: entry.sample_id,
                category: entry.category.clone(),
                priority: entry.priority,
                similarity: cosine_similarity(query, &entry.vector).clamp(0.0, 1.0),
            })
            .collect();
        scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        scored.truncate(k);
        Ok(scored)
    }
}

/// Opinions derived from one neighbor set.
#[derive(Debug, Clone)]
pub struct SimilarityOutcome {
    pub category: Decision<String>,
    pub junk: Decision<bool>,
    pub priority: Decision<Priority>,
    pub neighbors: Vec<Neighbor>,
}

impl SimilarityOutcome {
    fn unresolved(rationale: &str) -> Self {
        Self {
            category: Decision::unresolved(DecisionSource::Embedding, rationale),
            junk: Decision::unresolved(DecisionSource::Embedding, rationale),
            priority: Decision::unresolved(DecisionSource::Embedding, rationale),
            neighbors: Vec::new(),
        }
    }
}

/// k-nearest-neighbor resolver over a read-only index.
pub struct SimilarityResolver {
    encoder: Arc<dyn Encoder>,
    index: Arc<EmbeddingIndex>,
    k: usize,
    min_similarity: f32,
}

impl SimilarityResolver {
    pub fn new(
        encoder: Arc<dyn Encoder>,
        index: Arc<EmbeddingIndex>,
        k: usize,
        min_similarity: f32,
    ) -> Self {
        Self {
            encoder,
            index,
            k: k.max(1),
            min_similarity,
        }
    }

    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    /// Encode the query and aggregate its nearest neighbors.
    ///
    /// Encoder failures and an empty corpus degrade to unresolved decisions.
    pub async fn resolve(&self, ctx: &NormalizedContext) -> SimilarityOutcome {
        if self.index.is_empty() {
            return SimilarityOutcome::unresolved("sample corpus is empty");
        }

        let query = match self.encoder.encode_one(&ctx.embedding_text()).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, sender = %ctx.sender, "Query encoding failed");
                return SimilarityOutcome::unresolved(&format!("encoder failed: {e}"));
            }
        };
        let neighbors = match self.index.nearest(&query, self.k) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Nearest-neighbor lookup failed");
                return SimilarityOutcome::unresolved(&format!("lookup failed: {e}"));
            }
        };

        self.aggregate(neighbors)
    }

    /// Turn an ordered neighbor list into category, junk and priority opinions.
    pub fn aggregate(&self, neighbors: Vec<Neighbor>) -> SimilarityOutcome {
        let Some(best) = neighbors.first() else {
            return SimilarityOutcome::unresolved("no neighbors");
        };
        if best.similarity < self.min_similarity {
            let rationale = format!(
                "nearest sample similarity {:.2} below {:.2}",
                best.similarity, self.min_similarity
            );
            let mut outcome = SimilarityOutcome::unresolved(&rationale);
            outcome.neighbors = neighbors;
            return outcome;
        }

        let total = neighbors.len();
        let category = category_vote(&neighbors, total);
        let junk = binary_vote(&neighbors, |n| n.category == JUNK, "junk");
        let priority = binary_vote(
            &neighbors,
            |n| n.priority == Priority::High,
            "high priority",
        )
        .map_label(|high| if high { Priority::High } else { Priority::Normal });

        debug!(
            neighbors = total,
            best_similarity = best.similarity,
            category = ?category.label,
            confidence = category.confidence,
            "Similarity resolved"
        );

        SimilarityOutcome {
            category,
            junk,
            priority,
            neighbors,
        }
    }
}

/// Majority category among non-junk neighbors.
///
/// Confidence = (votes / all neighbors) × best similarity within the
/// majority; a vote of half or less is flagged ambiguous.
fn category_vote(neighbors: &[Neighbor], total: usize) -> Decision<String> {
    // (category, votes, summed similarity, best similarity), first-seen order
    let mut tally: Vec<(&str, usize, f32, f32)> = Vec::new();
    for n in neighbors.iter().filter(|n| n.category != JUNK) {
        match tally.iter_mut().find(|(c, ..)| *c == n.category) {
            Some(entry) => {
                entry.1 += 1;
                entry.2 += n.similarity;
                entry.3 = entry.3.max(n.similarity);
            }
            None => tally.push((n.category.as_str(), 1, n.similarity, n.similarity)),
        }
    }

    let mut winner: Option<&(&str, usize, f32, f32)> = None;
    for entry in &tally {
        winner = match winner {
            Some(w) if entry.1 > w.1 || (entry.1 == w.1 && entry.2 > w.2) => Some(entry),
            Some(w) => Some(w),
            None => Some(entry),
        };
    }
    let Some(&(label, votes, _, best)) = winner else {
        return Decision::unresolved(DecisionSource::Embedding, "all neighbors are junk");
    };

    let agreement = votes as f32 / total as f32;
    let decision = Decision::proposed(
        label.to_string(),
        agreement * best,
        DecisionSource::Embedding,
        format!("{votes}/{total} neighbors are {label}, best similarity {best:.2}"),
    );
    if total > 1 && votes * 2 <= total {
        decision.mark_ambiguous()
    } else {
        decision
    }
}

/// Yes/no vote weighted the same way as the category vote.
fn binary_vote(
    neighbors: &[Neighbor],
    predicate: impl Fn(&Neighbor) -> bool,
    what: &str,
) -> Decision<bool> {
    let total = neighbors.len();
    let yes: Vec<&Neighbor> = neighbors.iter().filter(|n| predicate(n)).collect();
    let label = yes.len() * 2 > total;

    let best = neighbors
        .iter()
        .filter(|n| predicate(n) == label)
        .map(|n| n.similarity)
        .fold(0.0f32, f32::max);
    let agreeing = if label { yes.len() } else { total - yes.len() };
    let agreement = agreeing as f32 / total as f32;

    let decision = Decision::proposed(
        label,
        agreement * best,
        DecisionSource::Embedding,
        format!("{}/{total} neighbors {what}", yes.len()),
    );
    if yes.len() * 2 == total {
        decision.mark_ambiguous()
    } else {
        decision
    }
}
