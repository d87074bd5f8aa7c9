//! # Evidence Scorer
//!
//! Turns the evidence gathered by one reasoning-loop execution into a numeric
//! confidence and an [`Decision`]:
//!
//! ```text
//! score = 0.6 * top1 + 0.4 * mean(top-k) + min(0.05 * valid_citations, 0.15)
//! ```
//!
//! Document scores are clamped to `[0, 1]` and non-finite scores are ignored.
//! A trusted tool result always yields [`Decision::Answer`]; otherwise the
//! score is compared against the abstain and warn thresholds. An abstention
//! replaces the draft with [`REFUSAL_TEMPLATE`] and attaches no sources.

use serde::Deserialize;
use verity_core::types::{Decision, EvidenceBundle, RetrievedDoc, Source};

/// Fixed reply used whenever the evidence is too weak to answer.
pub const REFUSAL_TEMPLATE: &str = "I don't have enough verified information to answer that \
     reliably. Could you share a bit more detail, or ask our team directly? I'd rather say so \
     than guess.";

const TOP1_WEIGHT: f32 = 0.6;
const MEAN_WEIGHT: f32 = 0.4;

/// Thresholds and weights of the uncertainty policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvidencePolicy {
    pub abstain_threshold: f32,
    pub warn_threshold: f32,
    /// Number of documents averaged into the score.
    pub top_k: usize,
    pub citation_bonus: f32,
    pub max_citation_bonus: f32,
}

impl Default for EvidencePolicy {
    fn default() -> Self {
        Self {
            abstain_threshold: 0.35,
            warn_threshold: 0.55,
            top_k: 3,
            citation_bonus: 0.05,
            max_citation_bonus: 0.15,
        }
    }
}

/// Result of gating a draft answer.
#[derive(Debug, Clone, PartialEq)]
pub struct GatedAnswer {
    /// The draft, or [`REFUSAL_TEMPLATE`] on abstention.
    pub answer: String,
    pub score: f32,
    pub decision: Decision,
    pub sources: Vec<Source>,
}

/// Stateless scorer applying an [`EvidencePolicy`].
#[derive(Debug, Clone, Default)]
pub struct EvidenceScorer {
    policy: EvidencePolicy,
}

impl EvidenceScorer {
    #[must_use]
    pub fn new(policy: EvidencePolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &EvidencePolicy {
        &self.policy
    }

    /// Numeric score and decision for a bundle.
    #[must_use]
    pub fn score(&self, bundle: &EvidenceBundle) -> (f32, Decision) {
        let score = self.numeric_score(bundle);
        (score, self.decide(score, bundle.trusted_tools_used))
    }

    /// Gate a draft answer. Informational statements are exempt and always
    /// answered.
    #[must_use]
    pub fn gate(&self, draft: String, bundle: &EvidenceBundle, informational: bool) -> GatedAnswer {
        let (score, mut decision) = self.score(bundle);
        if informational {
            decision = Decision::Answer;
        }

        if decision == Decision::Abstain {
            tracing::info!(score, "evidence below abstain threshold, withholding draft");
            return GatedAnswer {
                answer: REFUSAL_TEMPLATE.to_string(),
                score,
                decision,
                sources: vec![],
            };
        }

        tracing::debug!(score, ?decision, "evidence scored");
        GatedAnswer { answer: draft, score, decision, sources: self.select_sources(bundle) }
    }

    fn numeric_score(&self, bundle: &EvidenceBundle) -> f32 {
        let ranked = ranked_scores(&bundle.retrieved_docs);
        let Some(&top1) = ranked.first() else {
            return 0.0;
        };
        let k = self.policy.top_k.max(1).min(ranked.len());
        let mean = ranked[..k].iter().sum::<f32>() / k as f32;

        let cited = valid_citations(bundle).len() as f32;
        let bonus = (cited * self.policy.citation_bonus).min(self.policy.max_citation_bonus);

        (TOP1_WEIGHT * top1 + MEAN_WEIGHT * mean + bonus).clamp(0.0, 1.0)
    }

    fn decide(&self, score: f32, trusted_tools_used: bool) -> Decision {
        if trusted_tools_used {
            Decision::Answer
        } else if score < self.policy.abstain_threshold {
            Decision::Abstain
        } else if score < self.policy.warn_threshold {
            Decision::Warn
        } else {
            Decision::Answer
        }
    }

    /// Validly cited documents, else the top-k documents at or above the
    /// abstain threshold.
    fn select_sources(&self, bundle: &EvidenceBundle) -> Vec<Source> {
        let cited = valid_citations(bundle);
        if !cited.is_empty() {
            return cited.into_iter().map(to_source).collect();
        }

        let mut docs: Vec<&RetrievedDoc> = bundle
            .retrieved_docs
            .iter()
            .filter(|d| d.score.is_finite() && d.score >= self.policy.abstain_threshold)
            .collect();
        docs.sort_by(|a, b| b.score.total_cmp(&a.score));
        docs.into_iter().take(self.policy.top_k.max(1)).map(to_source).collect()
    }
}

fn ranked_scores(docs: &[RetrievedDoc]) -> Vec<f32> {
    let mut scores: Vec<f32> =
        docs.iter().filter(|d| d.score.is_finite()).map(|d| d.score.clamp(0.0, 1.0)).collect();
    scores.sort_by(|a, b| b.total_cmp(a));
    scores
}

/// Cited ids that match a retrieved document, in citation order, without repeats.
fn valid_citations(bundle: &EvidenceBundle) -> Vec<&RetrievedDoc> {
    let mut out: Vec<&RetrievedDoc> = Vec::new();
    for id in &bundle.citations {
        if let Some(doc) = bundle.retrieved_docs.iter().find(|d| &d.id == id)
            && !out.iter().any(|d| d.id == doc.id)
        {
            out.push(doc);
        }
    }
    out
}

fn to_source(doc: &RetrievedDoc) -> Source {
    Source { reference: doc.id.clone(), content: doc.content.clone(), score: doc.score }
}
