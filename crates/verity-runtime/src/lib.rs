//! # Verity Runtime
//!
//! Orchestration layer of the Verity assistant.
//!
//! ## Overview
//!
//! This crate turns a user query into a grounded answer:
//!
//! - **Gates**: greeting filter and recall gate short-circuit trivial queries
//! - **Session context**: session-scoped history and per-user memory facts
//! - **Reasoning loop**: ReAct engine over a [`ToolRegistry`](tools::ToolRegistry)
//! - **Evidence policy**: answer / warn / abstain from retrieval scores
//! - **Calibration pipeline**: reasoner → domain calibrator → tone synthesizer
//! - **Streaming protocol**: ordered events with keepalive heartbeats
//!
//! This crate depends **only** on [`verity_core`] port traits, never on concrete adapters.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │            AssistantRuntime (trait)              │
//! ├──────────────────────────────────────────────────┤
//! │  ┌────────┐  ┌───────┐  ┌──────────┐  ┌────────┐ │
//! │  │Context │→ │Gates  │→ │ReAct or  │→ │Stream  │ │
//! │  │Manager │  │       │  │Pipeline  │  │Emitter │ │
//! │  └────────┘  └───────┘  └──────────┘  └────────┘ │
//! └──────────────────────────────────────────────────┘
//!          ↓ uses ports from verity_core
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use verity_runtime::{AssistantRuntime, RuntimeBootstrap, RuntimeBuilder};
//! use verity_core::ports::{ConversationStore, EventSink, LlmPort, ToolPort};
//!
//! fn create_runtime(
//!     llm: Arc<dyn LlmPort>,
//!     tools: Arc<dyn ToolPort>,
//!     store: Arc<dyn ConversationStore>,
//!     events: Arc<dyn EventSink>,
//! ) -> Result<Arc<dyn AssistantRuntime>, verity_core::AgentError> {
//!     RuntimeBuilder::new()
//!         .with_llm(llm)
//!         .with_tools(tools)
//!         .with_store(store)
//!         .with_events(events)
//!         .with_default_model("openai:gpt-4o-mini")
//!         .build()
//! }
//! ```

pub mod action;
pub mod calibration;
pub mod context;
pub mod evidence;
pub mod gates;
pub mod knowledge;
pub mod prompt;
pub mod react;
pub mod retry;
pub mod stream;
pub mod tooling;
pub mod tools;

mod orchestrator;
#[cfg(test)]
mod test_support;

use std::{sync::Arc, time::Duration};

pub use verity_core as core;
use verity_core::{
    error::AgentError,
    ports::{ConversationStore, EventSink, LlmPort, ToolPort},
    types::{AgentEvent, AgentEventStream, QueryRequest, QueryResponse, RuntimeHealth, TurnPolicy},
};

use crate::{
    calibration::{
        CalibrationPipeline, DomainCalibrator, PrimaryReasoner, SynthesisConfig, ToneSynthesizer,
    },
    context::SessionContextManager,
    evidence::{EvidencePolicy, EvidenceScorer},
    gates::{GreetingFilter, RecallGate},
    knowledge::DomainKnowledge,
    orchestrator::{Orchestrator, run_to_completion},
    retry::RetryPolicy,
    stream::StreamEmitter,
};
pub use stream::to_sse_frame;
pub use tooling::{NoOpToolPort, TimeoutToolLayer, ToolLayer};

// ── Bootstrap / Builder ───────────────────────────────────────────────

/// Bootstrap contract for producing an [`AssistantRuntime`].
pub trait RuntimeBootstrap: Send {
    /// Consume the builder and produce a ready-to-use runtime.
    fn build(self) -> Result<Arc<dyn AssistantRuntime>, AgentError>
    where
        Self: Sized;
}

/// Event sink used when the composition root does not provide one.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: AgentEvent) {}
}

/// Trait-first runtime builder used by composition roots.
#[derive(Default)]
pub struct RuntimeBuilder {
    llm: Option<Arc<dyn LlmPort>>,
    tools: Option<Arc<dyn ToolPort>>,
    store: Option<Arc<dyn ConversationStore>>,
    events: Option<Arc<dyn EventSink>>,
    default_model: Option<String>,
    fallback_model: Option<String>,
    policy: TurnPolicy,
    evidence: EvidencePolicy,
    greeting: Option<GreetingFilter>,
    recall: Option<RecallGate>,
    knowledge: Option<Arc<DomainKnowledge>>,
    synthesis: SynthesisConfig,
    tool_timeouts: Option<TimeoutToolLayer>,
    tool_layers: Vec<Arc<dyn ToolLayer>>,
}

impl std::fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("has_llm", &self.llm.is_some())
            .field("has_tools", &self.tools.is_some())
            .field("has_store", &self.store.is_some())
            .field("has_events", &self.events.is_some())
            .field("default_model", &self.default_model)
            .field("fallback_model", &self.fallback_model)
            .field("policy", &self.policy)
            .field("has_knowledge", &self.knowledge.is_some())
            .field("tool_timeouts", &self.tool_timeouts)
            .field("tool_layers", &self.tool_layers.len())
            .finish()
    }
}

impl RuntimeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_llm(mut self, llm: Arc<dyn LlmPort>) -> Self {
        self.llm = Some(llm);
        self
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Arc<dyn ToolPort>) -> Self {
        self.tools = Some(tools);
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn with_default_model(mut self, default_model: impl Into<String>) -> Self {
        self.default_model = Some(default_model.into());
        self
    }

    /// Alternate model tried once after retries against the primary fail.
    #[must_use]
    pub fn with_fallback_model(mut self, fallback_model: impl Into<String>) -> Self {
        self.fallback_model = Some(fallback_model.into());
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: TurnPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_evidence_policy(mut self, evidence: EvidencePolicy) -> Self {
        self.evidence = evidence;
        self
    }

    #[must_use]
    pub fn with_greeting_filter(mut self, greeting: GreetingFilter) -> Self {
        self.greeting = Some(greeting);
        self
    }

    #[must_use]
    pub fn with_recall_gate(mut self, recall: RecallGate) -> Self {
        self.recall = Some(recall);
        self
    }

    /// Domain knowledge enables the calibration pipeline.
    #[must_use]
    pub fn with_knowledge(mut self, knowledge: Arc<DomainKnowledge>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    #[must_use]
    pub fn with_synthesis(mut self, synthesis: SynthesisConfig) -> Self {
        self.synthesis = synthesis;
        self
    }

    /// Per-tool deadlines. Without this every call is bounded by
    /// `policy.tool_timeout_ms`.
    #[must_use]
    pub fn with_tool_timeouts(mut self, timeouts: TimeoutToolLayer) -> Self {
        self.tool_timeouts = Some(timeouts);
        self
    }

    /// Extra decorator applied outside the timeout layer, in insertion order.
    #[must_use]
    pub fn add_tool_layer(mut self, layer: Arc<dyn ToolLayer>) -> Self {
        self.tool_layers.push(layer);
        self
    }

    fn into_runtime(self) -> Result<Arc<dyn AssistantRuntime>, AgentError> {
        let llm = self.llm.ok_or_else(|| AgentError::Config("missing LLM port".to_string()))?;
        let store = self
            .store
            .ok_or_else(|| AgentError::Config("missing conversation store".to_string()))?;
        let default_model = self
            .default_model
            .ok_or_else(|| AgentError::Config("missing default model".to_string()))?;
        let events = self.events.unwrap_or_else(|| Arc::new(NoOpEventSink) as Arc<dyn EventSink>);

        let greeting = match self.greeting {
            Some(greeting) => greeting,
            None => GreetingFilter::with_defaults().map_err(invalid_pattern)?,
        };
        let recall = match self.recall {
            Some(recall) => recall,
            None => RecallGate::with_defaults().map_err(invalid_pattern)?,
        };

        let tools: Arc<dyn ToolPort> =
            self.tools.unwrap_or_else(|| Arc::new(NoOpToolPort) as Arc<dyn ToolPort>);
        let timeouts = self
            .tool_timeouts
            .unwrap_or_else(|| TimeoutToolLayer::new(self.policy.tool_timeout_ms));
        let mut tools = timeouts.wrap(tools);
        for layer in self.tool_layers {
            tools = layer.wrap(tools);
        }

        let retry = RetryPolicy::from_turn_policy(&self.policy, self.fallback_model);
        let pipeline = match self.knowledge.filter(|kb| !kb.is_empty()) {
            Some(knowledge) => Some(CalibrationPipeline::new(
                PrimaryReasoner::new(llm.clone(), default_model.clone(), retry.clone()),
                DomainCalibrator::new(knowledge).map_err(invalid_pattern)?,
                ToneSynthesizer::new(llm.clone(), default_model.clone(), retry.clone(), self.synthesis),
                Duration::from_millis(self.policy.keepalive_interval_ms),
            )),
            None => None,
        };

        let orchestrator = Orchestrator {
            llm,
            tools,
            events,
            context: SessionContextManager::new(store),
            default_model,
            policy: self.policy,
            retry,
            scorer: EvidenceScorer::new(self.evidence),
            greeting,
            recall,
            pipeline,
        };
        tracing::debug!(?orchestrator, "runtime assembled");
        Ok(Arc::new(DefaultAssistantRuntime { inner: Arc::new(orchestrator) }))
    }
}

fn invalid_pattern(err: regex::Error) -> AgentError {
    AgentError::Config(format!("invalid trigger pattern: {err}"))
}

impl RuntimeBootstrap for RuntimeBuilder {
    fn build(self) -> Result<Arc<dyn AssistantRuntime>, AgentError>
    where
        Self: Sized,
    {
        self.into_runtime()
    }
}

// ── Runtime Trait ────────────────────────────────────────────────────

/// The primary API for answering queries.
#[async_trait::async_trait]
pub trait AssistantRuntime: Send + Sync {
    /// Answer a query (blocking until complete).
    async fn query(&self, req: QueryRequest) -> Result<QueryResponse, AgentError>;

    /// Answer a query as a stream of wire events ending in `done` or `error`.
    async fn query_stream(&self, req: QueryRequest) -> Result<AgentEventStream, AgentError>;

    /// Check runtime health.
    async fn health(&self) -> RuntimeHealth;
}

// ── Default Implementation ───────────────────────────────────────────

/// Default runtime composing the port traits via `Arc<dyn ...>`.
pub struct DefaultAssistantRuntime {
    inner: Arc<Orchestrator>,
}

impl std::fmt::Debug for DefaultAssistantRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultAssistantRuntime").field("inner", &self.inner).finish()
    }
}

#[async_trait::async_trait]
impl AssistantRuntime for DefaultAssistantRuntime {
    async fn query(&self, req: QueryRequest) -> Result<QueryResponse, AgentError> {
        let mut emitter = StreamEmitter::detached();
        self.inner.execute(req, &mut emitter).await
    }

    async fn query_stream(&self, req: QueryRequest) -> Result<AgentEventStream, AgentError> {
        let (emitter, stream) = StreamEmitter::channel();
        tokio::spawn(run_to_completion(self.inner.clone(), req, emitter));
        Ok(stream)
    }

    async fn health(&self) -> RuntimeHealth {
        self.inner.health().await
    }
}

// ── Tests ────────────────────────────────────────────────────────────
