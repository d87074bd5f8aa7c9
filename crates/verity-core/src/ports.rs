//! Hexagonal port traits for the Verity orchestrator.
//!
//! Adapters implement these boundaries; the runtime only ever sees
//! `Arc<dyn Port>`. All async traits use `async_trait` for dyn-compatibility.

use crate::{
    error::{LlmError, StoreError, ToolError},
    types::{
        AgentEvent, LlmCapabilities, LlmRequest, LlmResponse, LlmStream, MemoryFact,
        RetrievedDoc, SessionId, ToolCall, ToolDescriptor, ToolOutput, Turn, UserId,
    },
};

// ── LLM Port ─────────────────────────────────────────────────────────

/// Port for LLM inference (complete and stream).
#[async_trait::async_trait]
pub trait LlmPort: Send + Sync {
    /// Runtime capability declaration for dispatch decisions.
    fn capabilities(&self) -> LlmCapabilities {
        LlmCapabilities::default()
    }

    /// Run a non-streaming inference call.
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Run a streaming inference call.
    async fn complete_stream(&self, req: LlmRequest) -> Result<LlmStream, LlmError>;
}

// ── Tool Port ────────────────────────────────────────────────────────

/// Port for tool discovery and execution.
#[async_trait::async_trait]
pub trait ToolPort: Send + Sync {
    /// List all available tools.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError>;

    /// Execute a tool call and return its output.
    async fn execute(&self, call: ToolCall) -> Result<ToolOutput, ToolError>;
}

// ── Vector Search ────────────────────────────────────────────────────

/// Port for similarity search over the document index.
#[async_trait::async_trait]
pub trait VectorSearchPort: Send + Sync {
    /// Return at most `k` documents from `collection`, best match first.
    async fn search(
        &self,
        query: &str,
        collection: &str,
        k: usize,
    ) -> Result<Vec<RetrievedDoc>, ToolError>;
}

// ── Conversation Store ───────────────────────────────────────────────

/// Port for conversation persistence.
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    /// Turns of a session, oldest first. Unknown sessions yield an empty list.
    async fn get_history(&self, session_id: &SessionId) -> Result<Vec<Turn>, StoreError>;

    /// User who created `session_id`; `None` for a session that does not exist.
    async fn session_owner(&self, session_id: &SessionId) -> Result<Option<UserId>, StoreError>;

    /// Most recently active session of a user, if any.
    async fn latest_session(&self, user_id: &str) -> Result<Option<SessionId>, StoreError>;

    /// Long-term facts about a user.
    async fn get_memory_facts(&self, user_id: &str) -> Result<Vec<MemoryFact>, StoreError>;

    /// Append one turn, creating the session on first write.
    async fn append_turn(
        &self,
        session_id: &SessionId,
        user_id: &str,
        turn: Turn,
    ) -> Result<(), StoreError>;
}

// ── Event Sink ───────────────────────────────────────────────────────

/// Port for emitting observability events (fire-and-forget).
pub trait EventSink: Send + Sync {
    /// Emit an agent event. Must not block.
    fn emit(&self, event: AgentEvent);
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use super::*;
    use crate::types::{FinishReason, TokenUsage};

    // ── Mock LLM ─────────────────────────────────────────────────

    struct MockLlm {
        response: LlmResponse,
    }

    #[async_trait::async_trait]
    impl LlmPort for MockLlm {
        async fn complete(&self, _req: LlmRequest) -> Result<LlmResponse, LlmError> {
            Ok(self.response.clone())
        }

        async fn complete_stream(&self, _req: LlmRequest) -> Result<LlmStream, LlmError> {
            Err(LlmError::permanent("streaming not implemented in mock"))
        }
    }

    // ── Mock Tool Port ───────────────────────────────────────────

    struct MockToolPort {
        tools: Vec<ToolDescriptor>,
    }

    #[async_trait::async_trait]
    impl ToolPort for MockToolPort {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
            Ok(self.tools.clone())
        }

        async fn execute(&self, call: ToolCall) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text(format!("called {}", call.tool_name)))
        }
    }

    // ── Mock Search ──────────────────────────────────────────────

    struct MockSearch;

    #[async_trait::async_trait]
    impl VectorSearchPort for MockSearch {
        async fn search(
            &self,
            _query: &str,
            _collection: &str,
            k: usize,
        ) -> Result<Vec<RetrievedDoc>, ToolError> {
            let docs = (0..5)
                .map(|i| RetrievedDoc {
                    id: format!("doc-{i}"),
                    content: String::new(),
                    score: 1.0 - i as f32 * 0.1,
                })
                .take(k)
                .collect();
            Ok(docs)
        }
    }

    // ── Mock Conversation Store ──────────────────────────────────

    #[derive(Default)]
    struct MockStore {
        sessions: Mutex<HashMap<SessionId, Vec<Turn>>>,
        owners: Mutex<HashMap<SessionId, UserId>>,
    }

    #[async_trait::async_trait]
    impl ConversationStore for MockStore {
        async fn get_history(&self, session_id: &SessionId) -> Result<Vec<Turn>, StoreError> {
            Ok(self.sessions.lock().unwrap().get(session_id).cloned().unwrap_or_default())
        }

        async fn session_owner(&self, session_id: &SessionId) -> Result<Option<UserId>, StoreError> {
            Ok(self.owners.lock().unwrap().get(session_id).cloned())
        }

        async fn latest_session(&self, _user_id: &str) -> Result<Option<SessionId>, StoreError> {
            Ok(self.sessions.lock().unwrap().keys().next().cloned())
        }

        async fn get_memory_facts(&self, _user_id: &str) -> Result<Vec<MemoryFact>, StoreError> {
            Ok(vec![])
        }

        async fn append_turn(
            &self,
            session_id: &SessionId,
            user_id: &str,
            turn: Turn,
        ) -> Result<(), StoreError> {
            self.owners
                .lock()
                .unwrap()
                .entry(session_id.clone())
                .or_insert_with(|| user_id.to_string());
            self.sessions.lock().unwrap().entry(session_id.clone()).or_default().push(turn);
            Ok(())
        }
    }

    // ── Mock Event Sink ──────────────────────────────────────────

    #[derive(Default)]
    struct MockEventSink {
        events: Mutex<Vec<AgentEvent>>,
    }

    impl EventSink for MockEventSink {
        fn emit(&self, event: AgentEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    // ── Tests ────────────────────────────────────────────────────

    #[tokio::test]
    async fn llm_port_complete() {
        let llm: Arc<dyn LlmPort> = Arc::new(MockLlm {
            response: LlmResponse {
                content: "Hello!".into(),
                usage: TokenUsage { prompt_tokens: 10, completion_tokens: 5 },
                finish_reason: FinishReason::Stop,
                tool_calls: vec![],
            },
        });

        let req = LlmRequest { model: "test-model".into(), messages: vec![], tools: vec![] };

        let resp = llm.complete(req).await.unwrap();
        assert_eq!(resp.content, "Hello!");
        assert_eq!(resp.usage.total(), 15);
        assert!(!llm.capabilities().native_tool_calling);
    }

    #[tokio::test]
    async fn tool_port_list_and_execute() {
        let tools: Arc<dyn ToolPort> = Arc::new(MockToolPort {
            tools: vec![ToolDescriptor {
                id: "calculator".into(),
                description: "Arithmetic".into(),
                input_schema: serde_json::json!({}),
                trusted: true,
            }],
        });

        let listed = tools.list_tools().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].trusted);

        let output = tools
            .execute(ToolCall::new("calculator", serde_json::json!({"expression": "1+1"})))
            .await
            .unwrap();
        assert_eq!(output.observation, "called calculator");
    }

    #[tokio::test]
    async fn vector_search_respects_k() {
        let search: Arc<dyn VectorSearchPort> = Arc::new(MockSearch);
        let docs = search.search("pricing", "kb", 3).await.unwrap();
        assert_eq!(docs.len(), 3);
        assert!(docs[0].score >= docs[1].score);
    }

    #[tokio::test]
    async fn conversation_store_appends_in_order() {
        let store: Arc<dyn ConversationStore> = Arc::new(MockStore::default());
        let id = "session-1".to_string();
        assert!(store.get_history(&id).await.unwrap().is_empty());

        store.append_turn(&id, "u1", Turn::user("hello")).await.unwrap();
        store.append_turn(&id, "u1", Turn::assistant("hi there", vec![])).await.unwrap();

        let history = store.get_history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hello");
        assert_eq!(store.latest_session("u1").await.unwrap().as_deref(), Some("session-1"));
        assert_eq!(store.session_owner(&id).await.unwrap().as_deref(), Some("u1"));
        assert!(store.session_owner(&"unknown".to_string()).await.unwrap().is_none());
    }

    #[test]
    fn event_sink_collect() {
        let sink = MockEventSink::default();
        sink.emit(AgentEvent::ToolCallStarted { name: "calculator".into() });
        sink.emit(AgentEvent::Error { error: "boom".into() });

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
    }
}
