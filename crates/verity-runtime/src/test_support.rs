//! Hand-written port mocks shared by the unit tests of this crate.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use verity_core::{
    error::{LlmError, StoreError, ToolError},
    ports::{ConversationStore, EventSink, LlmPort, ToolPort, VectorSearchPort},
    types::{
        AgentEvent, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, MemoryFact,
        RetrievedDoc, SessionId, TokenUsage, ToolCall, ToolDescriptor, ToolOutput, Turn, UserId,
    },
};

// ── LLM ──────────────────────────────────────────────────────────────

/// LLM mock that returns queued responses in order and records requests.
///
/// `complete_stream` replays the next queued response as word-sized deltas.
pub(crate) struct SequentialLlm {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl SequentialLlm {
    pub(crate) fn from_contents(contents: Vec<&str>) -> Self {
        Self::from_results(contents.into_iter().map(|c| Ok(LlmResponse::text(c))).collect())
    }

    pub(crate) fn from_results(results: Vec<Result<LlmResponse, LlmError>>) -> Self {
        Self { responses: Mutex::new(results.into()), requests: Mutex::new(Vec::new()) }
    }

    pub(crate) fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub(crate) fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn next(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap_or_else(|p| p.into_inner()).push(req);
        let mut q = self.responses.lock().unwrap_or_else(|p| p.into_inner());
        q.pop_front()
            .unwrap_or_else(|| Ok(LlmResponse::text(r#"{"type": "final", "content": "fallback"}"#)))
    }
}

#[async_trait::async_trait]
impl LlmPort for SequentialLlm {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.next(req)
    }

    async fn complete_stream(&self, req: LlmRequest) -> Result<LlmStream, LlmError> {
        let response = self.next(req)?;
        let mut chunks: Vec<Result<LlmStreamChunk, LlmError>> = response
            .content
            .split_inclusive(' ')
            .map(|w| Ok(LlmStreamChunk::TextDelta(w.to_string())))
            .collect();
        chunks.push(Ok(LlmStreamChunk::Done { usage: response.usage }));
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }
}

/// [`SequentialLlm`] that waits `delay` before answering each call.
pub(crate) struct DelayedLlm {
    pub(crate) inner: SequentialLlm,
    pub(crate) delay: std::time::Duration,
}

#[async_trait::async_trait]
impl LlmPort for DelayedLlm {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        tokio::time::sleep(self.delay).await;
        self.inner.complete(req).await
    }

    async fn complete_stream(&self, req: LlmRequest) -> Result<LlmStream, LlmError> {
        tokio::time::sleep(self.delay).await;
        self.inner.complete_stream(req).await
    }
}

/// LLM whose calls never complete.
pub(crate) struct HangingLlm;

#[async_trait::async_trait]
impl LlmPort for HangingLlm {
    async fn complete(&self, _req: LlmRequest) -> Result<LlmResponse, LlmError> {
        std::future::pending().await
    }

    async fn complete_stream(&self, _req: LlmRequest) -> Result<LlmStream, LlmError> {
        std::future::pending().await
    }
}

/// Scripted model outputs are leaked so they mix freely with literals.
pub(crate) fn tool_call_json(name: &str, arguments: serde_json::Value) -> &'static str {
    leak(serde_json::json!({"type": "tool_call", "name": name, "arguments": arguments}).to_string())
}

pub(crate) fn final_json(content: &str, citations: &[&str]) -> &'static str {
    leak(serde_json::json!({"type": "final", "content": content, "citations": citations}).to_string())
}

fn leak(s: String) -> &'static str {
    Box::leak(s.into_boxed_str())
}

// ── Tools ────────────────────────────────────────────────────────────

pub(crate) fn descriptor(id: &str, trusted: bool) -> ToolDescriptor {
    ToolDescriptor {
        id: id.to_string(),
        description: format!("{id} tool"),
        input_schema: serde_json::json!({"type": "object"}),
        trusted,
    }
}

/// Tool port mock with queued call results.
pub(crate) struct MockToolPort {
    tools: Vec<ToolDescriptor>,
    results: Mutex<VecDeque<Result<ToolOutput, ToolError>>>,
    calls: Mutex<Vec<ToolCall>>,
}

impl MockToolPort {
    pub(crate) fn new(tools: Vec<ToolDescriptor>, results: Vec<Result<ToolOutput, ToolError>>) -> Self {
        Self { tools, results: Mutex::new(results.into()), calls: Mutex::new(Vec::new()) }
    }

    pub(crate) fn empty() -> Self {
        Self::new(vec![], vec![])
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[async_trait::async_trait]
impl ToolPort for MockToolPort {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        Ok(self.tools.clone())
    }

    async fn execute(&self, call: ToolCall) -> Result<ToolOutput, ToolError> {
        let trusted = self.tools.iter().any(|t| t.id == call.tool_name && t.trusted);
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).push(call);
        let mut q = self.results.lock().unwrap_or_else(|p| p.into_inner());
        q.pop_front()
            .unwrap_or_else(|| Ok(ToolOutput::text("default")))
            .map(|out| ToolOutput { trusted, ..out })
    }
}

/// Tool port whose calls never complete.
pub(crate) struct HangingToolPort {
    pub(crate) tools: Vec<ToolDescriptor>,
}

#[async_trait::async_trait]
impl ToolPort for HangingToolPort {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        Ok(self.tools.clone())
    }

    async fn execute(&self, _call: ToolCall) -> Result<ToolOutput, ToolError> {
        std::future::pending().await
    }
}

/// Index returning the same documents for every query.
pub(crate) struct FixedIndex {
    pub(crate) docs: Vec<RetrievedDoc>,
}

#[async_trait::async_trait]
impl VectorSearchPort for FixedIndex {
    async fn search(
        &self,
        _query: &str,
        _collection: &str,
        k: usize,
    ) -> Result<Vec<RetrievedDoc>, ToolError> {
        Ok(self.docs.iter().take(k).cloned().collect())
    }
}

pub(crate) fn doc(id: &str, content: &str, score: f32) -> RetrievedDoc {
    RetrievedDoc { id: id.to_string(), content: content.to_string(), score }
}

// ── Store ────────────────────────────────────────────────────────────

/// Simple in-memory conversation store.
#[derive(Default)]
pub(crate) struct MemoryStore {
    sessions: Mutex<HashMap<SessionId, (String, Vec<Turn>)>>,
    recency: Mutex<Vec<(String, SessionId)>>,
    facts: Mutex<Vec<MemoryFact>>,
}

impl MemoryStore {
    pub(crate) fn with_facts(facts: Vec<MemoryFact>) -> Self {
        Self { facts: Mutex::new(facts), ..Self::default() }
    }

    pub(crate) fn history(&self, session_id: &str) -> Vec<Turn> {
        let sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        sessions.get(session_id).map(|(_, turns)| turns.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl ConversationStore for MemoryStore {
    async fn get_history(&self, session_id: &SessionId) -> Result<Vec<Turn>, StoreError> {
        Ok(self.history(session_id))
    }

    async fn session_owner(&self, session_id: &SessionId) -> Result<Option<UserId>, StoreError> {
        let sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        Ok(sessions.get(session_id).map(|(owner, _)| owner.clone()))
    }

    async fn latest_session(&self, user_id: &str) -> Result<Option<SessionId>, StoreError> {
        let recency = self.recency.lock().unwrap_or_else(|p| p.into_inner());
        Ok(recency.iter().rev().find(|(u, _)| u == user_id).map(|(_, s)| s.clone()))
    }

    async fn get_memory_facts(&self, _user_id: &str) -> Result<Vec<MemoryFact>, StoreError> {
        // Returns every fact so that callers are forced to filter by user.
        Ok(self.facts.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    async fn append_turn(
        &self,
        session_id: &SessionId,
        user_id: &str,
        turn: Turn,
    ) -> Result<(), StoreError> {
        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(session_id.clone())
            .or_insert_with(|| (user_id.to_string(), Vec::new()))
            .1
            .push(turn);
        self.recency
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((user_id.to_string(), session_id.clone()));
        Ok(())
    }
}

// ── Events ───────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct CollectingSink {
    events: Mutex<Vec<AgentEvent>>,
}

impl CollectingSink {
    pub(crate) fn count(&self, pred: impl Fn(&AgentEvent) -> bool) -> usize {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: AgentEvent) {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).push(event);
    }
}

pub(crate) fn usage(prompt: u32, completion: u32) -> TokenUsage {
    TokenUsage { prompt_tokens: prompt, completion_tokens: completion }
}
