//! Sender and domain category priors learned from the sample corpus.
//!
//! Built once per run and never updated afterwards.

use std::collections::HashMap;

use crate::pipeline::normalizer::NormalizedContext;
use crate::pipeline::types::{Decision, DecisionSource, SampleRecord};

/// Domain-level evidence is shared by every sender at the domain, so it
/// counts for less than the same evidence at the exact address.
const DOMAIN_DISCOUNT: f32 = 0.85;
const MAX_PRIOR_CONFIDENCE: f32 = 0.95;

/// Category occurrence counts for one key, in first-seen category order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryCounts {
    counts: Vec<(String, u32)>,
}

impl CategoryCounts {
    fn increment(&mut self, category: &str) {
        match self.counts.iter_mut().find(|(c, _)| c == category) {
            Some((_, n)) => *n += 1,
            None => self.counts.push((category.to_string(), 1)),
        }
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().map(|(_, n)| n).sum()
    }

    pub fn get(&self, category: &str) -> u32 {
        self.counts
            .iter()
            .find(|(c, _)| c == category)
            .map_or(0, |(_, n)| *n)
    }

    /// (top category, top count, runner-up count). Ties keep first-seen order.
    fn leader(&self) -> Option<(&str, u32, u32)> {
        let mut top: Option<(&str, u32)> = None;
        let mut second = 0;
        for (category, n) in &self.counts {
            match top {
                Some((_, best)) if *n > best => {
                    second = best;
                    top = Some((category.as_str(), *n));
                }
                Some(_) => second = second.max(*n),
                None => top = Some((category.as_str(), *n)),
            }
        }
        top.map(|(c, n)| (c, n, second))
    }
}

/// Sender address / sender domain → category counts.
#[derive(Debug, Clone, Default)]
pub struct PriorTable {
    by_sender: HashMap<String, CategoryCounts>,
    by_domain: HashMap<String, CategoryCounts>,
}

impl PriorTable {
    pub fn build(samples: &[SampleRecord], body_snippet_chars: usize) -> Self {
        let mut table = Self::default();
        for sample in samples {
            let ctx = NormalizedContext::from_record(sample, body_snippet_chars);
            if !ctx.sender.is_empty() {
                table
                    .by_sender
                    .entry(ctx.sender.clone())
                    .or_default()
                    .increment(&sample.category);
            }
            if !ctx.domain.is_empty() {
                table
                    .by_domain
                    .entry(ctx.domain.clone())
                    .or_default()
                    .increment(&sample.category);
            }
        }
        table
    }

    pub fn sender_counts(&self, sender: &str) -> Option<&CategoryCounts> {
        self.by_sender.get(sender)
    }

    pub fn domain_counts(&self, domain: &str) -> Option<&CategoryCounts> {
        self.by_domain.get(domain)
    }

    pub fn is_empty(&self) -> bool {
        self.by_sender.is_empty() && self.by_domain.is_empty()
    }

    /// Look up by exact sender first, falling back to the domain when the
    /// sender is unknown or its top categories are tied.
    pub fn lookup(&self, ctx: &NormalizedContext) -> Decision<String> {
        let sender = self
            .sender_counts(&ctx.sender)
            .and_then(|counts| decide(counts, "sender", &ctx.sender, 1.0));
        if let Some(decision) = sender {
            return decision;
        }

        self.domain_counts(&ctx.domain)
            .and_then(|counts| decide(counts, "domain", &ctx.domain, DOMAIN_DISCOUNT))
            .unwrap_or_else(|| {
                Decision::unresolved(DecisionSource::Prior, "no prior for sender or domain")
            })
    }
}

/// Confidence for a key's leading category.
///
/// `(top − runner_up) / total` rewards dominance, `top / (top + 1)` rewards
/// repetition, so a key seen once scores at most 0.5 and a key seen many
/// times for one category approaches the cap.
pub fn prior_confidence(top: u32, runner_up: u32, total: u32) -> f32 {
    if total == 0 || top <= runner_up {
        return 0.0;
    }
    let dominance = (top - runner_up) as f32 / total as f32;
    let support = top as f32 / (top + 1) as f32;
    (dominance * support).min(MAX_PRIOR_CONFIDENCE)
}

fn decide(
    counts: &CategoryCounts,
    level: &str,
    key: &str,
    discount: f32,
) -> Option<Decision<String>> {
    let (category, top, runner_up) = counts.leader()?;
    if top == runner_up {
        return None;
    }
    let total = counts.total();
    let confidence = prior_confidence(top, runner_up, total) * discount;
    Some(Decision::proposed(
        category.to_string(),
        confidence,
        DecisionSource::Prior,
        format!("{level} {key}: {top}/{total} samples are {category}"),
    ))
}
