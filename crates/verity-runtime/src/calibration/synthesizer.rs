//! Tone synthesizer: the only streaming stage of the calibration pipeline.
//!
//! Tokens are forwarded to the [`StreamEmitter`] as they arrive. The answer
//! is held to a word band: past `max_words` the stream is cut at the cap,
//! below `min_words` one expansion call is made and its text appended.
//! Every upstream await is covered by the stage heartbeat.

use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use serde::Deserialize;
use verity_core::{
    error::AgentError,
    ports::{EventSink, LlmPort},
    types::{AgentEvent, LlmRequest, LlmStreamChunk, Message, PipelinePhase, Role, TokenUsage},
};

use super::{calibrator::CalibrationNote, reasoner::ReasonerOutput};
use crate::{
    retry::{RetryPolicy, complete_with_retry, stream_with_retry},
    stream::{Heartbeat, StreamEmitter},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub min_words: usize,
    pub max_words: usize,
    /// Product voice description injected into the system prompt.
    pub voice: String,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            min_words: 60,
            max_words: 350,
            voice: "Warm, plain-spoken and practical. Address the reader directly, \
                    avoid jargon, end with a concrete next step."
                .to_string(),
        }
    }
}

/// Inclusive word-count bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordBand {
    pub min: usize,
    pub max: usize,
}

impl WordBand {
    #[must_use]
    pub fn count(text: &str) -> usize {
        text.split_whitespace().count()
    }

    /// Prefix of `text` ending right after the `max`-th word.
    #[must_use]
    pub fn truncate<'a>(&self, text: &'a str) -> &'a str {
        let mut words = 0;
        let mut in_word = false;
        for (i, c) in text.char_indices() {
            if c.is_whitespace() {
                if in_word && words == self.max {
                    return &text[..i];
                }
                in_word = false;
            } else if !in_word {
                in_word = true;
                words += 1;
            }
        }
        text
    }
}

#[derive(Debug, Clone)]
pub struct SynthesisOutcome {
    pub answer: String,
    pub usage: TokenUsage,
    pub truncated: bool,
    pub expanded: bool,
}

pub struct ToneSynthesizer {
    llm: Arc<dyn LlmPort>,
    model: String,
    retry: RetryPolicy,
    config: SynthesisConfig,
    keepalive: Duration,
}

impl std::fmt::Debug for ToneSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToneSynthesizer")
            .field("model", &self.model)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ToneSynthesizer {
    #[must_use]
    pub fn new(
        llm: Arc<dyn LlmPort>,
        model: impl Into<String>,
        retry: RetryPolicy,
        config: SynthesisConfig,
    ) -> Self {
        Self { llm, model: model.into(), retry, config, keepalive: Duration::ZERO }
    }

    /// Keepalive interval for the stage; zero disables it.
    #[must_use]
    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = interval;
        self
    }

    #[must_use]
    pub fn band(&self) -> WordBand {
        WordBand { min: self.config.min_words, max: self.config.max_words.max(1) }
    }

    fn system_prompt(&self, analysis: &ReasonerOutput, notes: &[CalibrationNote]) -> String {
        let band = self.band();
        let mut prompt = format!(
            "You write the final reply to a client.\nVoice: {}\n\
             Length: between {} and {} words. Plain prose, no JSON.\n",
            self.config.voice, band.min, band.max
        );
        if !notes.is_empty() {
            prompt.push_str(
                "\nVerified facts. They override anything in the analysis; \
                 keep figures exactly as written:\n",
            );
            for note in notes {
                prompt.push_str("- ");
                prompt.push_str(&note.text);
                prompt.push('\n');
            }
        }
        let rendered = analysis.render();
        if !rendered.is_empty() {
            prompt.push_str("\nInternal analysis:\n");
            prompt.push_str(&rendered);
        }
        prompt
    }

    /// Stream the final answer into `emitter`.
    ///
    /// A failure to open the stream or a mid-stream error ends the stage with
    /// [`AgentError::Llm`]; tokens already sent stay sent. Past the word cap
    /// no more tokens are emitted, but the stream is drained so that its
    /// usage is still counted.
    pub async fn synthesize(
        &self,
        query: &str,
        analysis: &ReasonerOutput,
        notes: &[CalibrationNote],
        model: Option<&str>,
        emitter: &mut StreamEmitter,
        events: &dyn EventSink,
    ) -> Result<SynthesisOutcome, AgentError> {
        let model = model.unwrap_or(&self.model);
        let band = self.band();
        let base_messages = vec![
            Message::new(Role::System, self.system_prompt(analysis, notes)),
            Message::new(Role::User, query),
        ];
        let request =
            LlmRequest { model: model.to_string(), messages: base_messages.clone(), tools: vec![] };

        let mut heartbeat = Heartbeat::new(PipelinePhase::Synthesizer.as_str(), self.keepalive);

        events.emit(AgentEvent::LlmCallStarted { model: model.to_string() });
        let mut stream = heartbeat
            .guard(emitter, stream_with_retry(self.llm.as_ref(), request, &self.retry, events))
            .await?;

        let mut answer = String::new();
        let mut usage = TokenUsage::default();
        let mut truncated = false;
        while let Some(chunk) = heartbeat.guard(emitter, stream.next()).await {
            match chunk? {
                LlmStreamChunk::TextDelta(_) if truncated => {}
                LlmStreamChunk::TextDelta(delta) => {
                    let emitted = answer.len();
                    answer.push_str(&delta);
                    if WordBand::count(&answer) > band.max {
                        let keep = band.truncate(&answer).len();
                        if keep > emitted {
                            emitter.token(&answer[emitted..keep]);
                        }
                        answer.truncate(keep.max(emitted));
                        truncated = true;
                        tracing::debug!(max_words = band.max, "synthesis truncated at word cap");
                        continue;
                    }
                    emitter.token(delta);
                    heartbeat.reset();
                }
                LlmStreamChunk::Done { usage: u } => usage.add(&u),
            }
        }
        events.emit(AgentEvent::LlmCallCompleted { usage: usage.clone() });

        let mut expanded = false;
        if !truncated && WordBand::count(&answer) < band.min {
            tracing::debug!(
                words = WordBand::count(&answer),
                min_words = band.min,
                "synthesis below word floor, expanding"
            );
            let mut messages = base_messages;
            messages.push(Message::new(Role::Assistant, answer.clone()));
            messages.push(Message::new(
                Role::User,
                format!(
                    "Continue the reply so that it reaches at least {} words in total. \
                     Do not repeat what was already said.",
                    band.min
                ),
            ));
            let request = LlmRequest { model: model.to_string(), messages, tools: vec![] };
            let expansion = heartbeat
                .guard(emitter, complete_with_retry(self.llm.as_ref(), request, &self.retry, events))
                .await;
            match expansion {
                Ok(response) => {
                    usage.add(&response.usage);
                    let addition = response.content.trim();
                    if !addition.is_empty() {
                        let emitted = answer.len();
                        if !answer.is_empty() && !answer.ends_with(char::is_whitespace) {
                            answer.push(' ');
                        }
                        answer.push_str(addition);
                        let keep = band.truncate(&answer).len();
                        answer.truncate(keep);
                        if keep > emitted {
                            emitter.token(&answer[emitted..]);
                        }
                        expanded = true;
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "expansion call failed, keeping short answer");
                }
            }
        }

        Ok(SynthesisOutcome { answer: answer.trim_end().to_string(), usage, truncated, expanded })
    }
}

#[cfg(test)]
mod tests {
    use verity_core::{
        error::LlmError,
        types::{AgentEventStream, Decision, LlmResponse, ResponseMetadata, ResponseRoute, StreamEvent},
    };

    use super::*;
    use crate::test_support::{CollectingSink, DelayedLlm, SequentialLlm, usage};

    fn synthesizer(llm: Arc<SequentialLlm>, min_words: usize, max_words: usize) -> ToneSynthesizer {
        ToneSynthesizer::new(
            llm,
            "writer",
            RetryPolicy { max_attempts: 1, base_delay_ms: 1, fallback_model: None },
            SynthesisConfig { min_words, max_words, ..SynthesisConfig::default() },
        )
    }

    fn metadata() -> ResponseMetadata {
        ResponseMetadata {
            sources: vec![],
            decision: Decision::Answer,
            score: 1.0,
            route: ResponseRoute::Calibrated,
            calibration_notes: 0,
            quality_score: None,
        }
    }

    async fn tokens(mut emitter: StreamEmitter, stream: AgentEventStream) -> String {
        emitter.done("s".into(), 0);
        drop(emitter);
        stream
            .filter_map(|e| async move {
                match e {
                    StreamEvent::Token { text } => Some(text),
                    _ => None,
                }
            })
            .collect::<Vec<_>>()
            .await
            .concat()
    }

    #[test]
    fn truncate_cuts_after_the_last_allowed_word() {
        let band = WordBand { min: 0, max: 3 };
        assert_eq!(band.truncate("one  two\nthree four"), "one  two\nthree");
        assert_eq!(band.truncate("one two"), "one two");
        assert_eq!(band.truncate("one two three"), "one two three");
    }

    #[tokio::test]
    async fn over_long_output_is_cut_at_the_cap() {
        let llm = Arc::new(SequentialLlm::from_contents(vec!["a b c d e f g h"]));
        let (mut emitter, stream) = StreamEmitter::channel();
        emitter.metadata(metadata());
        let out = synthesizer(llm.clone(), 1, 5)
            .synthesize("q", &ReasonerOutput::default(), &[], None, &mut emitter, &CollectingSink::default())
            .await
            .unwrap();
        assert!(out.truncated);
        assert_eq!(out.answer, "a b c d e");
        assert_eq!(tokens(emitter, stream).await.trim_end(), "a b c d e");
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn usage_is_counted_after_the_cap() {
        let llm = Arc::new(SequentialLlm::from_results(vec![Ok(LlmResponse {
            usage: usage(40, 8),
            ..LlmResponse::text("a b c d e f g h")
        })]));
        let sink = CollectingSink::default();
        let mut emitter = StreamEmitter::detached();
        let out = synthesizer(llm, 1, 3)
            .synthesize("q", &ReasonerOutput::default(), &[], None, &mut emitter, &sink)
            .await
            .unwrap();
        assert!(out.truncated);
        assert_eq!(out.answer, "a b c");
        assert_eq!(out.usage, usage(40, 8));
        assert_eq!(
            sink.count(|e| matches!(e, AgentEvent::LlmCallCompleted { usage: u } if *u == usage(40, 8))),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_stream_open_sends_keepalives() {
        let llm = Arc::new(DelayedLlm {
            inner: SequentialLlm::from_contents(vec!["one two three"]),
            delay: std::time::Duration::from_secs(35),
        });
        let synthesizer = ToneSynthesizer::new(
            llm,
            "writer",
            RetryPolicy { max_attempts: 1, base_delay_ms: 1, fallback_model: None },
            SynthesisConfig { min_words: 1, max_words: 50, ..SynthesisConfig::default() },
        )
        .with_keepalive(Duration::from_secs(10));
        let (mut emitter, stream) = StreamEmitter::channel();
        emitter.metadata(metadata());
        synthesizer
            .synthesize("q", &ReasonerOutput::default(), &[], None, &mut emitter, &CollectingSink::default())
            .await
            .unwrap();
        emitter.done("s".into(), 0);
        drop(emitter);

        let events: Vec<StreamEvent> = stream.collect().await;
        let keepalives: Vec<(&str, u64)> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Keepalive { phase, elapsed_seconds } => Some((phase.as_str(), *elapsed_seconds)),
                _ => None,
            })
            .collect();
        assert_eq!(keepalives, vec![("synthesizer", 10), ("synthesizer", 20), ("synthesizer", 30)]);
        let first_token = events.iter().position(|e| e.kind() == "token").unwrap();
        assert!(events[first_token..].iter().all(|e| e.kind() != "keepalive"));
    }

    #[tokio::test]
    async fn short_output_triggers_one_expansion() {
        let llm = Arc::new(SequentialLlm::from_contents(vec!["Short answer.", "More detail follows here."]));
        let (mut emitter, stream) = StreamEmitter::channel();
        emitter.metadata(metadata());
        let out = synthesizer(llm.clone(), 5, 50)
            .synthesize("q", &ReasonerOutput::default(), &[], None, &mut emitter, &CollectingSink::default())
            .await
            .unwrap();
        assert!(out.expanded);
        assert_eq!(out.answer, "Short answer. More detail follows here.");
        assert_eq!(tokens(emitter, stream).await, "Short answer. More detail follows here.");
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn notes_are_injected_as_verified_facts() {
        let llm = Arc::new(SequentialLlm::from_contents(vec!["one two three four five six"]));
        let notes = vec![CalibrationNote {
            kind: crate::calibration::calibrator::NoteKind::Price,
            text: "SEO audit: from 1,200 USD per project".into(),
            source_id: "seo-audit".into(),
        }];
        let mut emitter = StreamEmitter::detached();
        synthesizer(llm.clone(), 1, 50)
            .synthesize("price?", &ReasonerOutput::default(), &notes, None, &mut emitter, &CollectingSink::default())
            .await
            .unwrap();
        let system = &llm.requests()[0].messages[0].content;
        assert!(system.contains("Verified facts"));
        assert!(system.contains("1,200 USD"));
    }

    #[tokio::test]
    async fn stream_open_failure_is_an_error() {
        let llm = Arc::new(SequentialLlm::from_results(vec![Err(LlmError::permanent("bad key"))]));
        let mut emitter = StreamEmitter::detached();
        let err = synthesizer(llm, 1, 50)
            .synthesize("q", &ReasonerOutput::default(), &[], None, &mut emitter, &CollectingSink::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Llm(_)));
    }

    #[tokio::test]
    async fn failed_expansion_keeps_the_short_answer() {
        let llm = Arc::new(SequentialLlm::from_results(vec![
            Ok(LlmResponse::text("Brief.")),
            Err(LlmError::permanent("quota")),
        ]));
        let mut emitter = StreamEmitter::detached();
        let out = synthesizer(llm, 10, 50)
            .synthesize("q", &ReasonerOutput::default(), &[], None, &mut emitter, &CollectingSink::default())
            .await
            .unwrap();
        assert!(!out.expanded);
        assert_eq!(out.answer, "Brief.");
    }
}
