//! Deterministic heuristic scoring (no model calls).
//!
//! Three independent opinions per record:
//! - junk: weighted promotional/scam markers and sender anomalies, with
//!   reply/forward markers short-circuiting to "not junk"
//! - category: weighted keyword match of category names against sender,
//!   domain, subject and body
//! - priority: response-needed evidence (questions, action requests, deadlines)

use std::collections::HashSet;

use regex::Regex;
use tracing::debug;

use crate::config::ThresholdConfig;
use crate::pipeline::inventory::CategoryInventory;
use crate::pipeline::normalizer::NormalizedContext;
use crate::pipeline::types::{Decision, DecisionSource, Priority};

/// Keyword weight for a category name in the sender's display name or local part.
const W_FROM: u32 = 4;
/// Keyword weight for a category name in the sender domain.
const W_DOMAIN: u32 = 5;
const W_SUBJECT: u32 = 2;
const W_BODY: u32 = 1;

/// Category score treated as full-strength evidence.
const STRONG_CATEGORY_SCORE: f32 = 7.0;
/// Confidence ceiling for a proposal whose runner-up is too close.
const AMBIGUOUS_CATEGORY_CAP: f32 = 0.45;

/// Links in the body snippet at which link density counts as a junk signal.
const LINK_DENSITY_THRESHOLD: usize = 3;
/// Shannon entropy (bits/char) above which a sender local part looks generated.
const LOCAL_PART_ENTROPY_THRESHOLD: f64 = 3.2;
const LOCAL_PART_ENTROPY_MIN_LEN: usize = 8;

const CONVERSATION_CONFIDENCE: f32 = 0.95;
const UNCERTAIN_CONFIDENCE: f32 = 0.4;

/// Which normalized field a rule matches against.
#[derive(Debug, Clone, Copy)]
pub enum RuleField {
    Sender,
    LocalPart,
    Domain,
    Subject,
    Body,
}

impl RuleField {
    fn value<'a>(&self, ctx: &'a NormalizedContext) -> &'a str {
        match self {
            Self::Sender => &ctx.sender,
            Self::LocalPart => ctx.local_part(),
            Self::Domain => &ctx.domain,
            Self::Subject => &ctx.subject,
            Self::Body => &ctx.body,
        }
    }
}

/// A single weighted junk signal with a compiled regex.
#[derive(Debug, Clone)]
pub struct JunkRule {
    pub regex: Regex,
    pub field: RuleField,
    pub weight: u32,
    pub reason: String,
}

/// Rule-based scorer for junk, category and priority.
pub struct HeuristicScorer {
    junk_rules: Vec<JunkRule>,
    scam_lexicon: Regex,
    promo_lexicon: Regex,
    unsubscribe: Regex,
    link: Regex,
    reply_subject: Regex,
    quoted_body: Regex,
    question: Regex,
    action_request: Regex,
    deadline: Regex,
    no_response_needed: Regex,
    thresholds: ThresholdConfig,
}

impl HeuristicScorer {
    /// Create a scorer with the default rule set.
    pub fn new(thresholds: ThresholdConfig) -> Self {
        let junk_rules = vec![
            JunkRule {
                regex: Regex::new(
                    r"(?i)^(offers?|deals?|promo(tions?)?|marketing|newsletters?|sales|rewards?|winners?|prizes?)\b",
                )
                .unwrap(),
                field: RuleField::LocalPart,
                weight: 1,
                reason: "promotional sender".into(),
            },
            JunkRule {
                regex: Regex::new(
                    r"(?i)\.(biz|xyz|top|click|loan|win|bid|buzz|icu|rest|gq|tk|ml)$",
                )
                .unwrap(),
                field: RuleField::Domain,
                weight: 2,
                reason: "suspicious top-level domain".into(),
            },
            JunkRule {
                regex: Regex::new(r"(?i)(^|[.\-])[a-z]*\d+[a-z]+[a-z\d]*([.\-]|$)").unwrap(),
                field: RuleField::Domain,
                weight: 1,
                reason: "random-looking domain label".into(),
            },
            JunkRule {
                regex: Regex::new(r"(?i)^(mailer[\-_]?daemon|bulk|blast)@").unwrap(),
                field: RuleField::Sender,
                weight: 1,
                reason: "bulk mail sender".into(),
            },
            JunkRule {
                regex: Regex::new(r"!").unwrap(),
                field: RuleField::Subject,
                weight: 1,
                reason: "exclamation in subject".into(),
            },
            JunkRule {
                regex: Regex::new(r"\b[A-Z]{4,}\b").unwrap(),
                field: RuleField::Subject,
                weight: 1,
                reason: "shouting in subject".into(),
            },
            JunkRule {
                regex: Regex::new(r"(?i)\b(verify your account|confirm your password|account (has been )?suspended)\b").unwrap(),
                field: RuleField::Body,
                weight: 3,
                reason: "credential phishing phrase".into(),
            },
        ];

        Self {
            junk_rules,
            scam_lexicon: Regex::new(
                r"(?i)\b(winner|you('ve| have)? won|prize|lottery|jackpot|congratulations|claim (your|now)|act now|risk[- ]free|100% free|free gift|cash bonus|wire transfer|bitcoin|crypto|casino|viagra|inheritance|beneficiary)\b",
            )
            .unwrap(),
            promo_lexicon: Regex::new(
                r"(?i)(\d+\s?% off|\bsale\b|\bdiscounts?\b|\bcoupons?\b|promo code|shop now|buy now|order now|limited time|exclusive (deal|offer)|special offer|free shipping|deal of the day)",
            )
            .unwrap(),
            unsubscribe: Regex::new(
                r"(?i)(\bunsubscribe\b|manage your subscription|email preferences|opt[- ]?out)",
            )
            .unwrap(),
            link: Regex::new(r"(?i)https?://[^\s]+").unwrap(),
            reply_subject: Regex::new(r"(?i)^\s*(re|fwd?|aw|sv)\s*(\[\d+\])?\s*:").unwrap(),
            quoted_body: Regex::new(
                r"(?im)(^\s*>|^on .{1,120} wrote:\s*$|-----\s*original message\s*-----|^-{5,}\s*forwarded message)",
            )
            .unwrap(),
            question: Regex::new(r#"[\w)]\s*\?+["')]*(\s|$)"#).unwrap(),
            action_request: Regex::new(
                r"(?i)\b(can you|could you|would you|will you|please (review|approve|confirm|sign|send|respond|reply|advise|check)|let me know|action required|need your (input|approval|feedback|signature|help)|awaiting your|rsvp|approve|sign off)\b",
            )
            .unwrap(),
            deadline: Regex::new(
                r"(?i)\b(by (monday|tuesday|wednesday|thursday|friday|saturday|sunday|tomorrow|today|tonight|eod|cob|noon|end of (the )?(day|week))|deadline|due (date|by|on|today|tomorrow)|asap|urgent(ly)?|time[- ]sensitive)\b",
            )
            .unwrap(),
            no_response_needed: Regex::new(
                r"(?i)(no (action|reply|response) (is )?(required|needed)|do not reply|don't reply|for your (information|records)|\bfyi\b|this is an automated|automatically generated)",
            )
            .unwrap(),
            thresholds,
        }
    }

    // ── Junk ────────────────────────────────────────────────────────

    /// Score junk evidence.
    ///
    /// Above `junk_high_score` ⇒ junk with high confidence, at or below
    /// `junk_low_score` ⇒ not junk with high confidence, anything between is
    /// an uncertain "not junk" left for later stages.
    pub fn junk(&self, ctx: &NormalizedContext) -> Decision<bool> {
        if let Some(marker) = self.conversation_marker(ctx) {
            debug!(sender = %ctx.sender, marker, "Conversation marker, not junk");
            return Decision::proposed(
                false,
                CONVERSATION_CONFIDENCE,
                DecisionSource::Heuristic,
                format!("conversation marker: {marker}"),
            );
        }

        let mut score = 0u32;
        let mut reasons: Vec<String> = Vec::new();

        for rule in &self.junk_rules {
            if rule.regex.is_match(rule.field.value(ctx)) {
                score += rule.weight;
                reasons.push(rule.reason.clone());
            }
        }

        let scam = distinct_hits(&self.scam_lexicon, &ctx.subject).min(3) * 2
            + distinct_hits(&self.scam_lexicon, &ctx.body).min(3);
        let promo = distinct_hits(&self.promo_lexicon, &ctx.subject).min(2) * 2
            + distinct_hits(&self.promo_lexicon, &ctx.body).min(2);
        if scam > 0 {
            score += scam;
            reasons.push(format!("scam lexicon (+{scam})"));
        }
        if promo > 0 {
            score += promo;
            reasons.push(format!("promotional lexicon (+{promo})"));
        }

        if self.unsubscribe.is_match(&ctx.body) || self.unsubscribe.is_match(&ctx.subject) {
            if scam + promo > 0 {
                score += 3;
                reasons.push("unsubscribe with promotional content".into());
            } else {
                score += 1;
                reasons.push("unsubscribe footer".into());
            }
        }

        let links = self.link.find_iter(&ctx.body).count();
        if links >= LINK_DENSITY_THRESHOLD {
            score += 2;
            reasons.push(format!("{links} links in body"));
        }

        let local = ctx.local_part();
        if local.chars().count() >= LOCAL_PART_ENTROPY_MIN_LEN
            && local.chars().any(|c| c.is_ascii_digit())
            && shannon_entropy(local) >= LOCAL_PART_ENTROPY_THRESHOLD
        {
            score += 2;
            reasons.push("high-entropy sender local part".into());
        }

        let rationale = if reasons.is_empty() {
            format!("junk score {score}")
        } else {
            format!("junk score {score}: {}", reasons.join(", "))
        };
        debug!(sender = %ctx.sender, score, "Junk heuristic scored");

        let high = self.thresholds.junk_high_score;
        let low = self.thresholds.junk_low_score;
        if score >= high {
            let confidence = (0.80 + 0.03 * (score - high) as f32).min(0.99);
            Decision::proposed(true, confidence, DecisionSource::Heuristic, rationale)
        } else if score <= low {
            let confidence = 0.90 - 0.05 * score as f32;
            Decision::proposed(false, confidence, DecisionSource::Heuristic, rationale)
        } else {
            Decision::proposed(false, UNCERTAIN_CONFIDENCE, DecisionSource::Heuristic, rationale)
                .mark_ambiguous()
        }
    }

    fn conversation_marker(&self, ctx: &NormalizedContext) -> Option<&'static str> {
        if self.reply_subject.is_match(&ctx.subject) {
            Some("reply/forward subject")
        } else if self.quoted_body.is_match(&ctx.body) {
            Some("quoted text")
        } else {
            None
        }
    }

    // ── Category ────────────────────────────────────────────────────

    /// Weighted keyword match of every candidate category.
    pub fn category(
        &self,
        ctx: &NormalizedContext,
        inventory: &CategoryInventory,
    ) -> Decision<String> {
        let from_compact = compact(&format!("{} {}", ctx.sender_display, ctx.local_part()));
        let domain_compact = compact(&ctx.domain);
        let subject = ctx.subject.to_lowercase();
        let body = ctx.body.to_lowercase();

        let mut scored: Vec<(&str, u32, Vec<&'static str>)> = inventory
            .keyword_candidates()
            .filter_map(|name| {
                let needle = name.to_lowercase();
                let needle_compact = compact(name);
                if needle_compact.is_empty() {
                    return None;
                }
                let mut score = 0;
                let mut hits = Vec::new();
                if ctx.sender_display.contains(&needle) || from_compact.contains(&needle_compact) {
                    score += W_FROM;
                    hits.push("sender");
                }
                if domain_compact.contains(&needle_compact) {
                    score += W_DOMAIN;
                    hits.push("domain");
                }
                if subject.contains(&needle) {
                    score += W_SUBJECT;
                    hits.push("subject");
                }
                if body.contains(&needle) {
                    score += W_BODY;
                    hits.push("body");
                }
                (score > 0).then_some((name, score, hits))
            })
            .collect();

        // Stable sort keeps inventory order among equal scores.
        scored.sort_by(|a, b| b.1.cmp(&a.1));

        let Some((top_name, top_score, hits)) = scored.first() else {
            return Decision::unresolved(DecisionSource::Heuristic, "no category keyword matched");
        };
        if *top_score < self.thresholds.min_category_score {
            return Decision::unresolved(
                DecisionSource::Heuristic,
                format!(
                    "best keyword match {top_name} scored {top_score}, below {}",
                    self.thresholds.min_category_score
                ),
            );
        }

        let runner_up = scored.get(1).map(|(_, s, _)| *s).unwrap_or(0);
        let margin = top_score - runner_up;
        let strength = (*top_score as f32 / STRONG_CATEGORY_SCORE).min(1.0);
        let margin_factor =
            (margin as f32 / (2 * self.thresholds.min_category_margin).max(1) as f32).min(1.0);
        let mut confidence = 0.5 + 0.45 * strength * margin_factor;

        let rationale = format!(
            "keyword score {top_score} ({}), margin {margin}",
            hits.join("+")
        );
        debug!(
            category = %top_name,
            score = top_score,
            margin,
            "Category heuristic scored"
        );

        if margin < self.thresholds.min_category_margin {
            confidence = confidence.min(AMBIGUOUS_CATEGORY_CAP);
            return Decision::proposed(
                top_name.to_string(),
                confidence,
                DecisionSource::Heuristic,
                rationale,
            )
            .mark_ambiguous();
        }
        Decision::proposed(top_name.to_string(), confidence, DecisionSource::Heuristic, rationale)
    }

    // ── Priority ────────────────────────────────────────────────────

    /// Response-needed evidence ⇒ high; its absence ⇒ normal; both ⇒ uncertain.
    pub fn priority(&self, ctx: &NormalizedContext) -> Decision<Priority> {
        // URL query strings are not questions
        let text = format!("{}\n{}", ctx.subject, ctx.body);
        let text = self.link.replace_all(&text, " ");

        let mut signals = Vec::new();
        if self.question.is_match(&text) {
            signals.push("question");
        }
        if self.action_request.is_match(&text) {
            signals.push("action request");
        }
        if self.deadline.is_match(&text) {
            signals.push("deadline");
        }
        let automated = ctx.local_part().replace(['-', '_', '.'], "").starts_with("noreply")
            || self.no_response_needed.is_match(&text);

        match (signals.len(), automated) {
            (0, true) => Decision::proposed(
                Priority::Normal,
                0.9,
                DecisionSource::Heuristic,
                "no response expected",
            ),
            (0, false) => Decision::proposed(
                Priority::Normal,
                0.8,
                DecisionSource::Heuristic,
                "no response-needed signal",
            ),
            (_, true) => Decision::proposed(
                Priority::Normal,
                UNCERTAIN_CONFIDENCE,
                DecisionSource::Heuristic,
                format!("mixed signals: {} but marked no-response", signals.join(", ")),
            )
            .mark_ambiguous(),
            (n, false) => Decision::proposed(
                Priority::High,
                0.55 + 0.15 * (n - 1) as f32,
                DecisionSource::Heuristic,
                format!("response needed: {}", signals.join(", ")),
            ),
        }
    }
}

/// Number of distinct (case-folded) matches of `regex` in `text`.
fn distinct_hits(regex: &Regex, text: &str) -> u32 {
    regex
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect::<HashSet<_>>()
        .len() as u32
}

/// Lower-cased alphanumerics only.
fn compact(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn shannon_entropy(s: &str) -> f64 {
    let chars: Vec<char> = s.chars().collect();
    if chars.is_empty() {
        return 0.0;
    }
    let mut counts = std::collections::HashMap::new();
    for c in &chars {
        *counts.entry(c).or_insert(0usize) += 1;
    }
    let len = chars.len() as f64;
    counts
        .values()
        .map(|&n| {
            let p = n as f64 / len;
            -p * p.log2()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::EmailRecord;

    fn scorer() -> HeuristicScorer {
        HeuristicScorer::new(ThresholdConfig::default())
    }

    fn ctx(from: &str, subject: &str, body: &str) -> NormalizedContext {
        NormalizedContext::from_record(&EmailRecord::new("d", from, subject, body), 280)
    }

    fn inventory() -> CategoryInventory {
        CategoryInventory::new(["Inbox", "ADT", "Banking", "Travel", "Junk", "Archive"]).unwrap()
    }

    #[test]
    fn prize_scam_is_confident_junk() {
        let d = scorer().junk(&ctx(
            "offers@totally-random-x7z.biz",
            "You are a WINNER! Claim your prize now",
            "",
        ));
        assert_eq!(d.label, Some(true));
        assert!(d.confidence >= 0.8, "confidence {}", d.confidence);
    }

    #[test]
    fn plain_invoice_is_confidently_not_junk() {
        let d = scorer().junk(&ctx("billing@adt.com", "Your ADT invoice", "Your invoice is attached."));
        assert_eq!(d.label, Some(false));
        assert!(d.confidence >= 0.8);
        assert!(!d.ambiguous);
    }

    #[test]
    fn reply_marker_short_circuits_promotional_lexicon() {
        let d = scorer().junk(&ctx(
            "deals@shop-x9.biz",
            "Re: WINNER prize claim",
            "50% off! unsubscribe",
        ));
        assert_eq!(d.label, Some(false));
        assert_eq!(d.confidence, CONVERSATION_CONFIDENCE);
    }

    #[test]
    fn quoted_text_short_circuits() {
        let d = scorer().junk(&ctx(
            "friend@example.com",
            "Free gift",
            "Sounds good.\n\nOn Tue, Mar 3, Alice wrote:\n> are you in?",
        ));
        assert_eq!(d.label, Some(false));
    }

    #[test]
    fn unsubscribe_alone_is_not_junk() {
        let d = scorer().junk(&ctx(
            "updates@service.com",
            "Product update",
            "New features shipped.\n\nUnsubscribe from these emails.",
        ));
        assert_eq!(d.label, Some(false));
    }

    #[test]
    fn unsubscribe_with_promotion_scores_higher_than_alone() {
        let plain = scorer().junk(&ctx("news@store.com", "Weekly news", "Read more. Unsubscribe"));
        let promo = scorer().junk(&ctx(
            "news@store.com",
            "Weekly news",
            "Shop now, 40% off everything. Unsubscribe",
        ));
        assert!(promo.label == Some(true) || promo.ambiguous);
        assert_eq!(plain.label, Some(false));
        assert!(!plain.ambiguous);
    }

    #[test]
    fn middle_band_is_uncertain() {
        // sale (promo subject +2) + exclamation (+1) = 3, between low 2 and high 6
        let d = scorer().junk(&ctx("team@store.com", "Spring sale!", "See the new arrivals."));
        assert!(d.ambiguous);
        assert_eq!(d.confidence, UNCERTAIN_CONFIDENCE);
    }

    #[test]
    fn category_matches_sender_domain() {
        let d = scorer().category(
            &ctx("billing@adt.com", "Your ADT invoice", "Monthly statement"),
            &inventory(),
        );
        assert_eq!(d.label.as_deref(), Some("ADT"));
        assert!(d.confidence >= 0.9);
        assert!(!d.ambiguous);
    }

    #[test]
    fn category_below_threshold_is_unresolved() {
        // subject-only match scores 2 < 3
        let d = scorer().category(&ctx("someone@example.com", "Travel plans", ""), &inventory());
        assert!(!d.is_resolved());
    }

    #[test]
    fn category_close_runner_up_is_ambiguous() {
        let d = scorer().category(
            &ctx("someone@example.com", "Banking and Travel", "banking travel"),
            &inventory(),
        );
        assert!(d.ambiguous);
        assert!(d.confidence <= AMBIGUOUS_CATEGORY_CAP);
    }

    #[test]
    fn category_never_proposes_reserved_names() {
        let d = scorer().category(
            &ctx("junk@archive.com", "Junk archive inbox", "junk archive inbox"),
            &inventory(),
        );
        assert!(!d.is_resolved());
    }

    #[test]
    fn priority_fires_on_request_with_deadline() {
        let d = scorer().priority(&ctx("boss@company.com", "Can you approve this by Friday?", ""));
        assert_eq!(d.label, Some(Priority::High));
        assert!(d.confidence >= 0.75);
    }

    #[test]
    fn priority_single_signal_is_weak() {
        let d = scorer().priority(&ctx("pal@example.com", "Lunch?", ""));
        assert_eq!(d.label, Some(Priority::High));
        assert!(d.confidence < 0.75);
    }

    #[test]
    fn priority_ignores_question_marks_inside_links() {
        let d = scorer().priority(&ctx(
            "digest@news.example",
            "Your weekly digest",
            "Read this issue online: https://news.example/digest?issue=42&ref=mail",
        ));
        assert_eq!(d.label, Some(Priority::Normal));
        assert!(!d.ambiguous);
    }

    #[test]
    fn priority_question_ending_a_sentence_still_counts() {
        let d = scorer().priority(&ctx(
            "pal@example.com",
            "Weekend",
            "Are you around on Saturday? See https://maps.example/?q=park",
        ));
        assert_eq!(d.label, Some(Priority::High));
    }

    #[test]
    fn priority_absent_signal_is_normal() {
        let d = scorer().priority(&ctx("billing@adt.com", "Your ADT invoice", "Attached."));
        assert_eq!(d.label, Some(Priority::Normal));
        assert!(d.confidence >= 0.75);
    }

    #[test]
    fn priority_mixed_signal_is_uncertain() {
        let d = scorer().priority(&ctx(
            "no-reply@bank.com",
            "Can you confirm?",
            "This is an automated message.",
        ));
        assert!(d.ambiguous);
        assert_eq!(d.label, Some(Priority::Normal));
    }

    #[test]
    fn entropy_of_repeated_chars_is_zero() {
        assert_eq!(shannon_entropy("aaaa"), 0.0);
        assert!(shannon_entropy("x7q9zk2m4p") > LOCAL_PART_ENTROPY_THRESHOLD);
    }
}
