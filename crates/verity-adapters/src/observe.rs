//! # Tracing Event Sink
//!
//! Tracing event sink: implements [`EventSink`] via the `tracing` crate.
//!
//! Events are emitted at these levels:
//! - `INFO`: query lifecycle, LLM and tool calls, pipeline phases
//! - `WARN`: retries, tool errors, non-answer decisions
//! - `ERROR`: query failures
//!
//! ## Output Format
//!
//! ```text
//! INFO query started session_id="s-1" mode=Calibrated
//! INFO pipeline phase phase="reasoner" status=Started
//! INFO evidence scored score=0.82 decision=Answer
//! ```
//!
//! ## Feature Flag
//!
//! This module is only available when the `observe-tracing` feature is enabled (default).

use verity_core::{
    ports::EventSink,
    types::{AgentEvent, Decision},
};

/// Event sink that emits [`AgentEvent`]s as structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl TracingEventSink {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for TracingEventSink {
    fn emit(&self, event: AgentEvent) {
        match event {
            AgentEvent::QueryStarted { session_id, mode } => {
                tracing::info!(session_id = ?session_id, ?mode, "query started");
            }
            AgentEvent::ShortCircuited { route } => {
                tracing::info!(?route, "query short-circuited");
            }
            AgentEvent::LlmCallStarted { model } => {
                tracing::info!(model = %model, "LLM call started");
            }
            AgentEvent::LlmCallCompleted { usage } => {
                tracing::info!(
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    total_tokens = usage.total(),
                    "LLM call completed",
                );
            }
            AgentEvent::LlmCallRetried { attempt, error } => {
                tracing::warn!(attempt, error = %error, "LLM call retried");
            }
            AgentEvent::ToolCallStarted { name } => {
                tracing::info!(tool = %name, "tool call started");
            }
            AgentEvent::ToolCallCompleted { name, is_error, trusted } => {
                if is_error {
                    tracing::warn!(tool = %name, "tool call completed with error");
                } else {
                    tracing::info!(tool = %name, trusted, "tool call completed");
                }
            }
            AgentEvent::EvidenceScored { score, decision } => match decision {
                Decision::Answer => tracing::info!(score, ?decision, "evidence scored"),
                Decision::Warn | Decision::Abstain => {
                    tracing::warn!(score, ?decision, "evidence scored below threshold");
                }
            },
            AgentEvent::PhaseChanged { phase, status } => {
                tracing::info!(phase = phase.as_str(), ?status, "pipeline phase");
            }
            AgentEvent::QueryCompleted { route, decision, elapsed_ms } => {
                tracing::info!(?route, ?decision, elapsed_ms, "query completed");
            }
            AgentEvent::Error { error } => {
                tracing::error!(error = %error, "query failed");
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
