//! Per-record classification cascade.
//!
//! Flow:
//! 1. Normalize the record
//! 2. Gather opinions: sample priors, heuristics, embedding neighbors
//! 3. Junk decision (escalating if needed); junk short-circuits to the merge
//! 4. Category and priority decisions, concurrently
//! 5. Guardrail merge
//!
//! Everything built from the samples is read-only once the classifier
//! exists, so records can be classified concurrently without coordination.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::{LabelerConfig, ThresholdConfig};
use crate::embedding::Encoder;
use crate::pipeline::adjudication::Adjudicator;
use crate::pipeline::escalation::{EscalationController, junk_labels, priority_labels};
use crate::pipeline::guardrail::{self, Verdicts};
use crate::pipeline::index_cache;
use crate::pipeline::inventory::{CategoryInventory, JUNK};
use crate::pipeline::normalizer::NormalizedContext;
use crate::pipeline::priors::PriorTable;
use crate::pipeline::rules::HeuristicScorer;
use crate::pipeline::similarity::{EmbeddingIndex, SimilarityResolver};
use crate::pipeline::types::{
    Classification, Decision, DecisionKind, DecisionSource, EmailRecord, SampleRecord,
};

pub struct Classifier {
    body_snippet_chars: usize,
    inventory: Arc<CategoryInventory>,
    priors: PriorTable,
    heuristics: HeuristicScorer,
    similarity: SimilarityResolver,
    escalation: EscalationController,
}

impl Classifier {
    pub fn new(
        thresholds: ThresholdConfig,
        inventory: Arc<CategoryInventory>,
        priors: PriorTable,
        similarity: SimilarityResolver,
        adjudicator: Arc<dyn Adjudicator>,
    ) -> Self {
        Self {
            body_snippet_chars: thresholds.body_snippet_chars,
            inventory,
            priors,
            escalation: EscalationController::new(&thresholds, adjudicator),
            heuristics: HeuristicScorer::new(thresholds),
            similarity,
        }
    }

    /// Build priors and the embedding index from `samples`.
    ///
    /// An index that cannot be built leaves the similarity stage empty
    /// (every embedding opinion unresolved) rather than failing the run.
    pub async fn from_samples(
        config: &LabelerConfig,
        inventory: Arc<CategoryInventory>,
        samples: &[SampleRecord],
        encoder: Arc<dyn Encoder>,
        adjudicator: Arc<dyn Adjudicator>,
    ) -> Self {
        let thresholds = &config.thresholds;
        let priors = PriorTable::build(samples, thresholds.body_snippet_chars);

        let index = match index_cache::load_or_build(
            samples,
            encoder.as_ref(),
            config.embedding.cache_path.as_deref(),
            thresholds.body_snippet_chars,
        )
        .await
        {
            Ok(index) => index,
            Err(e) => {
                warn!(error = %e, "Embedding index unavailable, similarity stage disabled");
                EmbeddingIndex::default()
            }
        };

        info!(
            samples = samples.len(),
            indexed = index.len(),
            categories = inventory.len(),
            adjudicator = adjudicator.name(),
            "Classifier ready"
        );

        let similarity = SimilarityResolver::new(
            encoder,
            Arc::new(index),
            thresholds.neighbor_k,
            thresholds.min_similarity,
        );
        Self::new(thresholds.clone(), inventory, priors, similarity, adjudicator)
    }

    pub fn inventory(&self) -> &CategoryInventory {
        &self.inventory
    }

    /// Resolve one record. Existing labels on the record are ignored.
    pub async fn classify(&self, record: &EmailRecord) -> Classification {
        let ctx = NormalizedContext::from_record(record, self.body_snippet_chars);

        let prior = self.priors.lookup(&ctx);
        let heuristic_junk = self.heuristics.junk(&ctx);
        let heuristic_category = self.heuristics.category(&ctx, &self.inventory);
        let heuristic_priority = self.heuristics.priority(&ctx);
        let similar = self.similarity.resolve(&ctx).await;

        // A prior pointing at Junk is junk evidence, not a category opinion.
        let prior_junk = prior.clone().map_label(|category| category == JUNK);
        let prior_category = if prior.label.as_deref() == Some(JUNK) {
            Decision::unresolved(DecisionSource::Prior, "sender prior is junk")
        } else {
            prior
        };

        let junk = self
            .escalation
            .resolve(
                DecisionKind::Junk,
                vec![prior_junk, heuristic_junk, similar.junk],
                junk_labels(),
                &ctx,
                &similar.neighbors,
            )
            .await;
        let mut trace = junk.trace;

        if junk.decision.label == Some(true) {
            debug!(sender = %ctx.sender, "Junk, skipping category and priority");
            let verdicts = Verdicts {
                junk: junk.decision,
                category: None,
                priority: None,
            };
            return guardrail::merge(&self.inventory, verdicts, trace);
        }

        let (category, priority) = tokio::join!(
            self.escalation.resolve(
                DecisionKind::Category,
                vec![prior_category, heuristic_category, similar.category],
                self.inventory.adjudication_labels(),
                &ctx,
                &similar.neighbors,
            ),
            self.escalation.resolve(
                DecisionKind::Priority,
                vec![heuristic_priority, similar.priority],
                priority_labels(),
                &ctx,
                &similar.neighbors,
            ),
        );
        trace.extend(category.trace);
        trace.extend(priority.trace);

        let verdicts = Verdicts {
            junk: junk.decision,
            category: Some(category.decision),
            priority: Some(priority.decision),
        };
        guardrail::merge(&self.inventory, verdicts, trace)
    }

    /// Classify `records` with up to `concurrency` in flight. Output order
    /// matches input order.
    pub async fn classify_batch(
        &self,
        records: &[EmailRecord],
        concurrency: usize,
    ) -> Vec<Classification> {
        stream::iter(records)
            .map(|record| self.classify(record))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}
