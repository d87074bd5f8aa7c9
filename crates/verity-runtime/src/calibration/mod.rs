//! # Calibration Pipeline
//!
//! `reasoner → calibrator → synthesizer`, each stage bracketed by
//! `phase{started}` / `phase{complete}` events.
//!
//! - the reasoner runs under a keepalive timer and never fails;
//! - the calibrator is a pure lookup against [`DomainKnowledge`];
//! - `metadata` is sent before the synthesizer starts so its tokens stream
//!   live; a synthesizer failure surfaces as [`AgentError::Pipeline`].
//!
//! [`DomainKnowledge`]: crate::knowledge::DomainKnowledge

pub mod calibrator;
pub mod reasoner;
pub mod synthesizer;

use std::time::Duration;

use verity_core::{
    error::AgentError,
    ports::EventSink,
    types::{
        AgentEvent, Decision, MemoryFact, PhaseStatus, PipelinePhase, ResponseMetadata,
        ResponseRoute, Source, TokenUsage, Turn,
    },
};

pub use self::{
    calibrator::{CalibrationNote, DomainCalibrator, NoteKind},
    reasoner::{FALLBACK_QUALITY, PrimaryReasoner, ReasonerOutput},
    synthesizer::{SynthesisConfig, SynthesisOutcome, ToneSynthesizer, WordBand},
};
use crate::stream::{StreamEmitter, with_keepalive};

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub struct CalibratedAnswer {
    pub answer: String,
    pub sources: Vec<Source>,
    pub decision: Decision,
    pub score: f32,
    pub notes: Vec<CalibrationNote>,
    pub usage: TokenUsage,
    pub reasoner_fallback: bool,
}

/// Inputs borrowed from the query for one pipeline run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineInput<'a> {
    pub query: &'a str,
    pub history: &'a [Turn],
    pub memory_facts: &'a [MemoryFact],
    pub model: Option<&'a str>,
}

#[derive(Debug)]
pub struct CalibrationPipeline {
    reasoner: PrimaryReasoner,
    calibrator: DomainCalibrator,
    synthesizer: ToneSynthesizer,
    keepalive: Duration,
}

impl CalibrationPipeline {
    #[must_use]
    pub fn new(
        reasoner: PrimaryReasoner,
        calibrator: DomainCalibrator,
        synthesizer: ToneSynthesizer,
        keepalive: Duration,
    ) -> Self {
        Self { reasoner, calibrator, synthesizer: synthesizer.with_keepalive(keepalive), keepalive }
    }

    #[must_use]
    pub fn calibrator(&self) -> &DomainCalibrator {
        &self.calibrator
    }

    pub async fn run(
        &self,
        input: PipelineInput<'_>,
        emitter: &mut StreamEmitter,
        events: &dyn EventSink,
    ) -> Result<CalibratedAnswer, AgentError> {
        let mut usage = TokenUsage::default();

        phase(emitter, events, PipelinePhase::Reasoner, PhaseStatus::Started);
        let (analysis, reasoner_usage) = with_keepalive(
            emitter,
            PipelinePhase::Reasoner.as_str(),
            self.keepalive,
            self.reasoner.reason(input.query, input.history, input.memory_facts, input.model, events),
        )
        .await;
        usage.add(&reasoner_usage);
        phase(emitter, events, PipelinePhase::Reasoner, PhaseStatus::Complete);

        phase(emitter, events, PipelinePhase::Calibrator, PhaseStatus::Started);
        let notes = self.calibrator.calibrate(input.query, &analysis);
        phase(emitter, events, PipelinePhase::Calibrator, PhaseStatus::Complete);

        let decision = if analysis.fallback && notes.is_empty() {
            tracing::info!("reasoner fell back and no calibration note matched, warning");
            Decision::Warn
        } else {
            Decision::Answer
        };
        let sources: Vec<Source> = notes.iter().map(CalibrationNote::to_source).collect();
        let score = analysis.quality_score;
        events.emit(AgentEvent::EvidenceScored { score, decision });

        emitter.metadata(ResponseMetadata {
            sources: sources.clone(),
            decision,
            score,
            route: ResponseRoute::Calibrated,
            calibration_notes: notes.len(),
            quality_score: Some(analysis.quality_score),
        });

        phase(emitter, events, PipelinePhase::Synthesizer, PhaseStatus::Started);
        let synthesis = self
            .synthesizer
            .synthesize(input.query, &analysis, &notes, input.model, emitter, events)
            .await
            .map_err(|err| AgentError::Pipeline(format!("synthesizer failed: {err}")))?;
        usage.add(&synthesis.usage);
        phase(emitter, events, PipelinePhase::Synthesizer, PhaseStatus::Complete);

        Ok(CalibratedAnswer {
            answer: synthesis.answer,
            sources,
            decision,
            score,
            notes,
            usage,
            reasoner_fallback: analysis.fallback,
        })
    }
}

fn phase(
    emitter: &mut StreamEmitter,
    events: &dyn EventSink,
    phase: PipelinePhase,
    status: PhaseStatus,
) {
    tracing::debug!(phase = phase.as_str(), ?status, "pipeline phase");
    emitter.phase(phase, status);
    events.emit(AgentEvent::PhaseChanged { phase, status });
}
