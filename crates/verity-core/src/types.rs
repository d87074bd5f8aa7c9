//! # Domain Types
//!
//! Domain types for the Verity orchestrator.
//!
//! - **Conversation**: `Session`, `Turn`, `Speaker`, `Source`, `MemoryFact`
//! - **Query**: `QueryRequest`, `QueryResponse`, `QueryMode`, `ResponseRoute`
//! - **Reasoning**: `ReasoningStep`, `ToolCall`, `ToolOutput`, `EvidenceBundle`, `Decision`
//! - **Pipeline**: `PipelinePhase`, `PhaseStatus`
//! - **Streaming**: `StreamEvent`, `ResponseMetadata`, `AgentEventStream`
//! - **LLM**: `LlmRequest`, `LlmResponse`, `LlmStream`, `LlmStreamChunk`, `Message`, `Role`
//! - **Policy**: `TurnPolicy`, `GuardReason`
//! - **Observability**: `AgentEvent`, `RuntimeHealth`
//!
//! Conversation and streaming types implement `Serialize`/`Deserialize` since
//! they cross the storage and wire boundaries.

use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Identifiers ──────────────────────────────────────────────────────

/// Opaque session identifier.
pub type SessionId = String;

/// Opaque user identifier.
pub type UserId = String;

/// Cancellation token (re-export for convenience).
pub type CancelToken = tokio_util::sync::CancellationToken;

// ── Conversation ─────────────────────────────────────────────────────

/// Author of a persisted turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

/// A document that contributed to an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Document identifier in the index (or calibration entry id).
    pub reference: String,
    pub content: String,
    pub score: f32,
}

/// One persisted message. Immutable once appended to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Speaker,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sources: Vec<Source>,
}

impl Turn {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Speaker::User, content: content.into(), timestamp: Utc::now(), sources: vec![] }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>, sources: Vec<Source>) -> Self {
        Self { role: Speaker::Assistant, content: content.into(), timestamp: Utc::now(), sources }
    }
}

/// A conversation scoped to one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub history: Vec<Turn>,
    pub created_at: DateTime<Utc>,
}

/// Long-term fact about a user, independent of any session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFact {
    pub user_id: UserId,
    pub key: String,
    pub value: String,
    pub confidence: f32,
}

// ── Query ────────────────────────────────────────────────────────────

/// Route chosen by the (external) query classifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    /// Tool-using reasoning loop.
    #[default]
    React,
    /// Reasoner → calibrator → synthesizer pipeline.
    Calibrated,
}

/// Input to the runtime.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// User message content.
    pub text: String,
    /// Session to continue. `None` falls back to the user's most recent session.
    pub session_id: Option<SessionId>,
    pub user_id: UserId,
    /// History supplied by stateless callers; used only when storage has none.
    pub history: Vec<Turn>,
    pub mode: QueryMode,
    /// Model override. `None` uses the runtime default.
    pub model: Option<String>,
    /// Optional cancellation handle.
    pub cancel_token: Option<CancelToken>,
}

impl QueryRequest {
    #[must_use]
    pub fn new(text: impl Into<String>, user_id: impl Into<UserId>) -> Self {
        Self {
            text: text.into(),
            session_id: None,
            user_id: user_id.into(),
            history: Vec::new(),
            mode: QueryMode::React,
            model: None,
            cancel_token: None,
        }
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: QueryMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Which path produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseRoute {
    Greeting,
    Recall,
    Reasoning,
    Calibrated,
}

/// Synchronous query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub decision: Decision,
    pub score: f32,
    pub route: ResponseRoute,
    pub session_id: SessionId,
    pub steps: Vec<ReasoningStep>,
    pub usage: TokenUsage,
    pub execution_time_ms: u64,
}

// ── Reasoning ────────────────────────────────────────────────────────

/// A request to call a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    /// Stamped by the tool registry from the tool descriptor.
    #[serde(default)]
    pub trusted: bool,
}

impl ToolCall {
    #[must_use]
    pub fn new(tool_name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self { tool_name: tool_name.into(), arguments, trusted: false }
    }
}

/// A document returned by the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDoc {
    pub id: String,
    pub content: String,
    pub score: f32,
}

/// Result of a tool invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Human-readable observation fed back to the model.
    pub observation: String,
    /// Authoritative output; exempts the answer from abstention.
    pub trusted: bool,
    /// Retrieved documents contributing to the evidence score.
    #[serde(default)]
    pub documents: Vec<RetrievedDoc>,
    /// Exact structured result that fully answers the request.
    #[serde(default)]
    pub conclusive: bool,
}

impl ToolOutput {
    #[must_use]
    pub fn text(observation: impl Into<String>) -> Self {
        Self { observation: observation.into(), ..Self::default() }
    }

    #[must_use]
    pub fn with_documents(mut self, documents: Vec<RetrievedDoc>) -> Self {
        self.documents = documents;
        self
    }

    #[must_use]
    pub fn conclusive(mut self) -> Self {
        self.conclusive = true;
        self
    }
}

/// One think/act/observe cycle of the reasoning loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub step_index: u32,
    pub thought: String,
    pub action: Option<ToolCall>,
    pub observation: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Evidence accumulated across the steps of one loop execution.
#[derive(Debug, Clone, Default)]
pub struct EvidenceBundle {
    pub retrieved_docs: Vec<RetrievedDoc>,
    pub trusted_tools_used: bool,
    /// Document ids the model cited in its final answer.
    pub citations: Vec<String>,
}

impl EvidenceBundle {
    /// Fold one tool output into the bundle. Failed calls contribute nothing.
    pub fn absorb(&mut self, output: &ToolOutput) {
        self.trusted_tools_used |= output.trusted;
        for doc in &output.documents {
            if !self.retrieved_docs.iter().any(|existing| existing.id == doc.id) {
                self.retrieved_docs.push(doc.clone());
            }
        }
    }
}

/// Outcome of the uncertainty policy. Terminal once emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Answer,
    /// Answer returned but flagged as low confidence.
    Warn,
    /// Draft withheld; the refusal template is returned instead.
    Abstain,
}

// ── Calibration Pipeline ─────────────────────────────────────────────

/// Stage of the calibration pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Reasoner,
    Calibrator,
    Synthesizer,
}

impl PipelinePhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reasoner => "reasoner",
            Self::Calibrator => "calibrator",
            Self::Synthesizer => "synthesizer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Started,
    Complete,
}

// ── Streaming Protocol ───────────────────────────────────────────────

/// Payload of the single `metadata` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub sources: Vec<Source>,
    pub decision: Decision,
    pub score: f32,
    pub route: ResponseRoute,
    #[serde(default)]
    pub calibration_notes: usize,
    #[serde(default)]
    pub quality_score: Option<f32>,
}

/// Wire event: `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    Phase { phase: PipelinePhase, status: PhaseStatus },
    Keepalive { phase: String, elapsed_seconds: u64 },
    Metadata(ResponseMetadata),
    Token { text: String },
    Error { message: String },
    Done { session_id: SessionId, execution_time_ms: u64 },
}

impl StreamEvent {
    /// Wire name of the event type.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Phase { .. } => "phase",
            Self::Keepalive { .. } => "keepalive",
            Self::Metadata(_) => "metadata",
            Self::Token { .. } => "token",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    /// `done` and `error` close the stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Decode one wire event. Unknown or malformed events yield `None` so
    /// older clients keep working when new event types are introduced.
    #[must_use]
    pub fn from_wire(json: &str) -> Option<Self> {
        const KNOWN: &[&str] = &["phase", "keepalive", "metadata", "token", "error", "done"];
        let value: serde_json::Value = serde_json::from_str(json).ok()?;
        let kind = value.get("type").and_then(serde_json::Value::as_str)?;
        if !KNOWN.contains(&kind) {
            return None;
        }
        serde_json::from_value(value).ok()
    }
}

/// Streaming result of `query_stream`.
pub type AgentEventStream = Pin<Box<dyn futures_core::Stream<Item = StreamEvent> + Send>>;

// ── Action Protocol ──────────────────────────────────────────────────

/// Provider-neutral action the LLM can emit inside the reasoning loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentAction {
    Final {
        content: String,
        #[serde(default)]
        citations: Vec<String>,
        #[serde(default)]
        thought: String,
    },
    ToolCall {
        name: String,
        arguments: serde_json::Value,
        #[serde(default)]
        thought: String,
    },
}

// ── Tool Types ───────────────────────────────────────────────────────

/// Description of an available tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool identifier (e.g. `"pricing_lookup"`).
    pub id: String,
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: serde_json::Value,
    /// Whether results are authoritative.
    pub trusted: bool,
}

// ── LLM Types ────────────────────────────────────────────────────────

/// An LLM inference request (internal representation).
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// Available tools (may be empty).
    pub tools: Vec<ToolDescriptor>,
}

/// An LLM inference response (internal representation).
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
    /// Native tool calls emitted by providers that support structured calls.
    pub tool_calls: Vec<ToolCall>,
}

impl LlmResponse {
    /// Plain text response with no usage accounting.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: TokenUsage::default(),
            finish_reason: FinishReason::Stop,
            tool_calls: Vec::new(),
        }
    }
}

/// A streaming LLM response.
pub type LlmStream =
    Pin<Box<dyn futures_core::Stream<Item = Result<LlmStreamChunk, crate::LlmError>> + Send>>;

/// Single chunk in a streaming response.
#[derive(Debug, Clone)]
pub enum LlmStreamChunk {
    TextDelta(String),
    Done { usage: TokenUsage },
}

/// Declares what an LLM adapter supports at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmCapabilities {
    pub native_tool_calling: bool,
    pub streaming: bool,
}

impl Default for LlmCapabilities {
    fn default() -> Self {
        Self { native_tool_calling: false, streaming: true }
    }
}

/// A single message sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// Prompt role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl From<Speaker> for Role {
    fn from(speaker: Speaker) -> Self {
        match speaker {
            Speaker::User => Self::User,
            Speaker::Assistant => Self::Assistant,
        }
    }
}

// ── Usage / Finish ───────────────────────────────────────────────────

/// Token usage counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    #[must_use]
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: &Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Why an LLM call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCall,
    Length,
}

// ── Guard / Policy ───────────────────────────────────────────────────

/// Why the loop guard stopped the reasoning loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardReason {
    MaxSteps,
    QueryTimeout,
}

/// Limits applied to one query.
#[derive(Debug, Clone)]
pub struct TurnPolicy {
    /// Hard cap on think cycles in the reasoning loop.
    pub max_steps: u32,
    pub tool_timeout_ms: u64,
    /// Budget for the whole query, short-circuits included.
    pub query_timeout_ms: u64,
    /// Attempts per model call, first attempt included.
    pub llm_max_attempts: u32,
    pub llm_retry_base_ms: u64,
    pub keepalive_interval_ms: u64,
    /// Stop the loop as soon as a trusted tool returns a conclusive result.
    pub early_exit: bool,
}

impl Default for TurnPolicy {
    fn default() -> Self {
        Self {
            max_steps: 6,
            tool_timeout_ms: 15_000,
            query_timeout_ms: 90_000,
            llm_max_attempts: 3,
            llm_retry_base_ms: 500,
            keepalive_interval_ms: 10_000,
            early_exit: true,
        }
    }
}

// ── Observability Types ──────────────────────────────────────────────

/// An event emitted during query execution for observability.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    QueryStarted { session_id: Option<SessionId>, mode: QueryMode },
    ShortCircuited { route: ResponseRoute },
    LlmCallStarted { model: String },
    LlmCallCompleted { usage: TokenUsage },
    LlmCallRetried { attempt: u32, error: String },
    ToolCallStarted { name: String },
    ToolCallCompleted { name: String, is_error: bool, trusted: bool },
    EvidenceScored { score: f32, decision: Decision },
    PhaseChanged { phase: PipelinePhase, status: PhaseStatus },
    QueryCompleted { route: ResponseRoute, decision: Decision, elapsed_ms: u64 },
    Error { error: String },
}

// ── Health ────────────────────────────────────────────────────────────

/// Runtime health status.
#[derive(Debug, Clone)]
pub struct RuntimeHealth {
    pub status: HealthStatus,
    pub tools_registered: usize,
    pub calibration_ready: bool,
}

/// Overall health state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}
