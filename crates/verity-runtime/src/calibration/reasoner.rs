//! Primary reasoner: one structured analysis call.
//!
//! The model returns a JSON object with the key points, warnings, legal
//! references, cost estimates and next steps for the query. Any failure
//! (retries exhausted, permanent error, unparseable output) yields a
//! deterministic skeleton flagged as a fallback instead of an error.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use verity_core::{
    ports::{EventSink, LlmPort},
    types::{AgentEvent, LlmRequest, MemoryFact, Message, Role, TokenUsage, Turn},
};

use crate::{
    action::{extract_object, strip_code_fences},
    prompt::{MAX_HISTORY_TURNS, history_messages, memory_block},
    retry::{RetryPolicy, complete_with_retry},
};

/// Quality assigned to the templated skeleton.
pub const FALLBACK_QUALITY: f32 = 0.3;

const REASONER_INSTRUCTIONS: &str = r#"You are a senior consultant preparing an internal analysis.
Analyse the user's question and respond with exactly one JSON object:
{
  "key_points": ["..."],
  "warnings": ["..."],
  "legal_refs": ["..."],
  "estimated_costs": ["..."],
  "steps": ["..."],
  "quality_score": 0.0-1.0
}
Be concrete. Leave a list empty rather than guessing. quality_score is your
confidence in the analysis."#;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonerOutput {
    pub key_points: Vec<String>,
    pub warnings: Vec<String>,
    pub legal_refs: Vec<String>,
    pub estimated_costs: Vec<String>,
    pub steps: Vec<String>,
    pub quality_score: f32,
    /// Set when the skeleton replaced a real analysis.
    #[serde(skip)]
    pub fallback: bool,
}

impl ReasonerOutput {
    /// Deterministic skeleton used when the reasoner is unavailable.
    #[must_use]
    pub fn fallback(query: &str) -> Self {
        Self {
            key_points: vec![format!("The request concerns: {}", query.trim())],
            warnings: vec![
                "This answer was prepared without the detailed analysis step; \
                 specifics should be confirmed with our team."
                    .to_string(),
            ],
            legal_refs: vec![],
            estimated_costs: vec![],
            steps: vec![
                "Share your goals, timeline and budget.".to_string(),
                "Our team confirms scope and pricing in a short call.".to_string(),
            ],
            quality_score: FALLBACK_QUALITY,
            fallback: true,
        }
    }

    fn is_empty(&self) -> bool {
        self.key_points.is_empty()
            && self.warnings.is_empty()
            && self.legal_refs.is_empty()
            && self.estimated_costs.is_empty()
            && self.steps.is_empty()
    }

    /// Sectioned plain-text rendering used in prompts and for matching.
    #[must_use]
    pub fn render(&self) -> String {
        let sections: [(&str, &Vec<String>); 5] = [
            ("Key points", &self.key_points),
            ("Warnings", &self.warnings),
            ("Legal references", &self.legal_refs),
            ("Estimated costs", &self.estimated_costs),
            ("Next steps", &self.steps),
        ];
        let mut out = String::new();
        for (title, items) in sections {
            if items.is_empty() {
                continue;
            }
            out.push_str(title);
            out.push_str(":\n");
            for item in items {
                out.push_str("- ");
                out.push_str(item);
                out.push('\n');
            }
        }
        out
    }
}

/// Parse the reasoner's JSON. Empty analyses count as unparseable.
pub(crate) fn parse_reasoner_output(content: &str) -> Option<ReasonerOutput> {
    let candidate = extract_object(strip_code_fences(content));
    let mut output: ReasonerOutput = serde_json::from_str(candidate).ok()?;
    if output.is_empty() {
        return None;
    }
    output.quality_score =
        if output.quality_score.is_finite() { output.quality_score.clamp(0.0, 1.0) } else { 0.0 };
    Some(output)
}

pub struct PrimaryReasoner {
    llm: Arc<dyn LlmPort>,
    model: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for PrimaryReasoner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimaryReasoner").field("model", &self.model).finish_non_exhaustive()
    }
}

impl PrimaryReasoner {
    #[must_use]
    pub fn new(llm: Arc<dyn LlmPort>, model: impl Into<String>, retry: RetryPolicy) -> Self {
        Self { llm, model: model.into(), retry }
    }

    /// Never fails: errors degrade to [`ReasonerOutput::fallback`].
    pub async fn reason(
        &self,
        query: &str,
        history: &[Turn],
        memory_facts: &[MemoryFact],
        model: Option<&str>,
        events: &dyn EventSink,
    ) -> (ReasonerOutput, TokenUsage) {
        let model = model.unwrap_or(&self.model);
        let mut system = REASONER_INSTRUCTIONS.to_string();
        let memory = memory_block(memory_facts);
        if !memory.is_empty() {
            system.push_str("\n\n");
            system.push_str(&memory);
        }

        let mut messages = vec![Message::new(Role::System, system)];
        messages.extend(history_messages(history, MAX_HISTORY_TURNS));
        messages.push(Message::new(Role::User, query));
        let request = LlmRequest { model: model.to_string(), messages, tools: vec![] };

        events.emit(AgentEvent::LlmCallStarted { model: model.to_string() });
        match complete_with_retry(self.llm.as_ref(), request, &self.retry, events).await {
            Ok(response) => {
                events.emit(AgentEvent::LlmCallCompleted { usage: response.usage.clone() });
                match parse_reasoner_output(&response.content) {
                    Some(output) => (output, response.usage),
                    None => {
                        tracing::warn!("reasoner output unparseable, using skeleton");
                        (ReasonerOutput::fallback(query), response.usage)
                    }
                }
            }
            Err(err) => {
                tracing::warn!(%err, "reasoner unavailable, using skeleton");
                events.emit(AgentEvent::Error { error: err.to_string() });
                (ReasonerOutput::fallback(query), TokenUsage::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use verity_core::error::LlmError;

    use super::*;
    use crate::test_support::{CollectingSink, SequentialLlm};

    fn reasoner(llm: SequentialLlm) -> PrimaryReasoner {
        PrimaryReasoner::new(
            Arc::new(llm),
            "primary",
            RetryPolicy { max_attempts: 2, base_delay_ms: 1, fallback_model: None },
        )
    }

    #[tokio::test]
    async fn parses_structured_analysis() {
        let llm = SequentialLlm::from_contents(vec![
            r#"```json
{"key_points": ["Needs a new website"], "estimated_costs": ["4,500 USD"], "quality_score": 1.7}
```"#,
        ]);
        let (output, _) =
            reasoner(llm).reason("new site?", &[], &[], None, &CollectingSink::default()).await;
        assert!(!output.fallback);
        assert_eq!(output.key_points, vec!["Needs a new website"]);
        assert!((output.quality_score - 1.0).abs() < f32::EPSILON);
        assert!(output.render().contains("Estimated costs:\n- 4,500 USD"));
    }

    #[tokio::test]
    async fn unparseable_output_falls_back() {
        let llm = SequentialLlm::from_contents(vec!["I think you need a website."]);
        let (output, _) =
            reasoner(llm).reason("new site?", &[], &[], None, &CollectingSink::default()).await;
        assert!(output.fallback);
        assert!((output.quality_score - FALLBACK_QUALITY).abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fall_back() {
        let llm = SequentialLlm::from_results(vec![
            Err(LlmError::transient("502")),
            Err(LlmError::transient("502")),
        ]);
        let sink = CollectingSink::default();
        let (output, usage) = reasoner(llm).reason("audit?", &[], &[], None, &sink).await;
        assert!(output.fallback);
        assert_eq!(usage.total(), 0);
        assert_eq!(sink.count(|e| matches!(e, AgentEvent::LlmCallRetried { .. })), 1);
    }

    #[test]
    fn empty_json_counts_as_unparseable() {
        assert!(parse_reasoner_output("{}").is_none());
        assert!(parse_reasoner_output(r#"{"steps": ["call us"]}"#).is_some());
    }
}
