//! Domain calibrator: a pure lookup of the query and the reasoner's analysis
//! against the [`DomainKnowledge`] snapshot.
//!
//! Notes come out in a fixed order (corrections, then prices, then team) and
//! each knowledge entry contributes at most one note.

use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use verity_core::types::Source;

use super::reasoner::ReasonerOutput;
use crate::knowledge::DomainKnowledge;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    Correction,
    Price,
    Team,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationNote {
    pub kind: NoteKind,
    pub text: String,
    /// Id of the knowledge entry the note came from.
    pub source_id: String,
}

impl CalibrationNote {
    /// Notes are verified facts and are attached with full confidence.
    #[must_use]
    pub fn to_source(&self) -> Source {
        Source { reference: self.source_id.clone(), content: self.text.clone(), score: 1.0 }
    }
}

pub struct DomainCalibrator {
    knowledge: Arc<DomainKnowledge>,
    corrections: Vec<(Regex, usize)>,
}

impl std::fmt::Debug for DomainCalibrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainCalibrator")
            .field("corrections", &self.corrections.len())
            .field("services", &self.knowledge.services.len())
            .field("team", &self.knowledge.team.len())
            .finish()
    }
}

impl DomainCalibrator {
    /// Compiles the correction patterns up front.
    pub fn new(knowledge: Arc<DomainKnowledge>) -> Result<Self, regex::Error> {
        let corrections = knowledge
            .corrections
            .iter()
            .enumerate()
            .map(|(i, rule)| Regex::new(&format!("(?i){}", rule.pattern)).map(|re| (re, i)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { knowledge, corrections })
    }

    #[must_use]
    pub fn knowledge(&self) -> &DomainKnowledge {
        &self.knowledge
    }

    pub fn calibrate(&self, query: &str, analysis: &ReasonerOutput) -> Vec<CalibrationNote> {
        let text = format!("{query}\n{}", analysis.render());
        let mut notes: Vec<CalibrationNote> = Vec::new();
        let mut push = |note: CalibrationNote| {
            if !notes.iter().any(|n| n.source_id == note.source_id) {
                notes.push(note);
            }
        };

        for (re, idx) in &self.corrections {
            if re.is_match(&text) {
                let rule = &self.knowledge.corrections[*idx];
                push(CalibrationNote {
                    kind: NoteKind::Correction,
                    text: rule.text.clone(),
                    source_id: rule.id.clone(),
                });
            }
        }
        for service in self.knowledge.services_mentioned(&text) {
            push(CalibrationNote {
                kind: NoteKind::Price,
                text: service.price_line(),
                source_id: service.id.clone(),
            });
        }
        for member in self.knowledge.team_mentioned(&text) {
            push(CalibrationNote {
                kind: NoteKind::Team,
                text: member.summary_line(),
                source_id: member.id.clone(),
            });
        }

        tracing::debug!(notes = notes.len(), "calibration complete");
        notes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{CorrectionRule, fixtures};

    fn calibrator() -> DomainCalibrator {
        DomainCalibrator::new(Arc::new(fixtures::sample())).unwrap()
    }

    #[test]
    fn notes_are_ordered_by_kind() {
        let analysis = ReasonerOutput {
            key_points: vec!["Start with a free SEO audit".into()],
            ..ReasonerOutput::default()
        };
        let notes = calibrator().calibrate("Who handles technical SEO?", &analysis);
        let kinds: Vec<NoteKind> = notes.iter().map(|n| n.kind).collect();
        assert_eq!(kinds, vec![NoteKind::Correction, NoteKind::Price, NoteKind::Team]);
        assert_eq!(notes[1].text, "SEO audit: from 1,200 USD per project");
    }

    #[test]
    fn repeated_mentions_yield_one_note() {
        let analysis = ReasonerOutput {
            estimated_costs: vec!["SEO audit around 1,000 USD".into(), "seo review".into()],
            ..ReasonerOutput::default()
        };
        let notes = calibrator().calibrate("price of an SEO audit", &analysis);
        assert_eq!(notes.iter().filter(|n| n.source_id == "seo-audit").count(), 1);
    }

    #[test]
    fn unrelated_query_yields_nothing() {
        let notes = calibrator().calibrate("What's the weather?", &ReasonerOutput::default());
        assert!(notes.is_empty());
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let mut kb = fixtures::sample();
        kb.corrections.push(CorrectionRule { id: "bad".into(), pattern: "(".into(), text: String::new() });
        assert!(DomainCalibrator::new(Arc::new(kb)).is_err());
    }

    #[test]
    fn notes_become_full_confidence_sources() {
        let notes = calibrator().calibrate("website design", &ReasonerOutput::default());
        let source = notes[0].to_source();
        assert_eq!(source.reference, "web-design");
        assert!((source.score - 1.0).abs() < f32::EPSILON);
    }
}
