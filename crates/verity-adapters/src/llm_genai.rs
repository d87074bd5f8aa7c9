//! # GenAi LLM Adapter
//!
//! GenAi LLM adapter: implements [`LlmPort`] using the `genai` crate.
//!
//! ## Overview
//!
//! The [`genai`](https://crates.io/crates/genai) client routes the model
//! string (`"openai:gpt-4o-mini"`, `"anthropic:claude-..."`, ...) to the
//! matching provider. Tool use goes through the JSON action protocol rendered
//! into the prompt, so the adapter reports no native tool calling.
//!
//! Provider failures are classified for the retry policy: rate limits,
//! timeouts, connection failures and 5xx responses are retryable; everything
//! else is permanent.
//!
//! ## Example
//!
//! ```rust,ignore
//! use verity_adapters::llm_genai::GenAiLlmAdapter;
//! use verity_core::{ports::LlmPort, types::LlmRequest};
//!
//! let adapter = GenAiLlmAdapter::new(genai::Client::default());
//! let response = adapter
//!     .complete(LlmRequest { model: "openai:gpt-4o-mini".into(), messages: vec![], tools: vec![] })
//!     .await?;
//! ```
//!
//! ## Feature Flag
//!
//! This module is only available when the `llm-genai` feature is enabled (default).

use futures_util::StreamExt;
use genai::chat::{ChatMessage, ChatOptions, ChatRequest, ChatResponse, ChatStreamEvent, Usage};
use verity_core::{
    error::LlmError,
    ports::LlmPort,
    types::{
        FinishReason, LlmCapabilities, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, Message,
        Role, TokenUsage,
    },
};

/// Adapter that delegates LLM inference to `genai::Client`.
pub struct GenAiLlmAdapter {
    client: genai::Client,
}

impl std::fmt::Debug for GenAiLlmAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenAiLlmAdapter").finish_non_exhaustive()
    }
}

impl GenAiLlmAdapter {
    #[must_use]
    pub fn new(client: genai::Client) -> Self {
        Self { client }
    }
}

// ── Mapping helpers ──────────────────────────────────────────────────

fn to_chat_message(msg: &Message) -> ChatMessage {
    match msg.role {
        Role::System => ChatMessage::system(&msg.content),
        Role::User => ChatMessage::user(&msg.content),
        Role::Assistant => ChatMessage::assistant(&msg.content),
        Role::Tool => ChatMessage::user(format!("[Tool result] {}", msg.content)),
    }
}

fn to_chat_request(req: &LlmRequest) -> ChatRequest {
    ChatRequest::new(req.messages.iter().map(to_chat_message).collect())
}

fn extract_usage(usage: &Usage) -> TokenUsage {
    TokenUsage {
        prompt_tokens: usage.prompt_tokens.unwrap_or(0).try_into().unwrap_or(0),
        completion_tokens: usage.completion_tokens.unwrap_or(0).try_into().unwrap_or(0),
    }
}

const TRANSIENT_MARKERS: &[&str] = &[
    "500",
    "502",
    "503",
    "504",
    "timeout",
    "timed out",
    "connection",
    "overloaded",
    "temporarily unavailable",
];

fn classify_error_message(msg: String) -> LlmError {
    let lower = msg.to_lowercase();
    if lower.contains("rate limit") || lower.contains("429") {
        LlmError::RateLimited
    } else if lower.contains("context length") || lower.contains("maximum context") {
        LlmError::ContextLengthExceeded
    } else if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        LlmError::transient(msg)
    } else {
        LlmError::permanent(msg)
    }
}

fn map_genai_error(err: genai::Error) -> LlmError {
    classify_error_message(err.to_string())
}

// ── LlmPort implementation ──────────────────────────────────────────

#[async_trait::async_trait]
impl LlmPort for GenAiLlmAdapter {
    fn capabilities(&self) -> LlmCapabilities {
        LlmCapabilities { native_tool_calling: false, streaming: true }
    }

    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        let chat_req = to_chat_request(&req);
        let chat_resp: ChatResponse =
            self.client.exec_chat(&req.model, chat_req, None).await.map_err(map_genai_error)?;

        Ok(LlmResponse {
            content: chat_resp.first_text().unwrap_or("").to_string(),
            usage: extract_usage(&chat_resp.usage),
            finish_reason: FinishReason::Stop,
            tool_calls: Vec::new(),
        })
    }

    async fn complete_stream(&self, req: LlmRequest) -> Result<LlmStream, LlmError> {
        let chat_req = to_chat_request(&req);
        let options = ChatOptions::default().with_capture_usage(true).with_capture_content(true);

        let chat_stream = self
            .client
            .exec_chat_stream(&req.model, chat_req, Some(&options))
            .await
            .map_err(map_genai_error)?;

        let mapped = chat_stream.stream.filter_map(|event| async move {
            match event {
                Ok(ChatStreamEvent::Chunk(chunk)) => {
                    (!chunk.content.is_empty()).then(|| Ok(LlmStreamChunk::TextDelta(chunk.content)))
                }
                Ok(ChatStreamEvent::End(end)) => {
                    let usage =
                        end.captured_usage.as_ref().map_or_else(TokenUsage::default, extract_usage);
                    Some(Ok(LlmStreamChunk::Done { usage }))
                }
                Ok(
                    ChatStreamEvent::Start
                    | ChatStreamEvent::ReasoningChunk(_)
                    | ChatStreamEvent::ThoughtSignatureChunk(_)
                    | ChatStreamEvent::ToolCallChunk(_),
                ) => None,
                Err(err) => Some(Err(match map_genai_error(err) {
                    LlmError::Provider { message, .. } => LlmError::Stream(message),
                    other => other,
                })),
            }
        });

        Ok(Box::pin(mapped))
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn adapter_is_object_safe() {
        let adapter = GenAiLlmAdapter::new(genai::Client::default());
        let port: Arc<dyn LlmPort> = Arc::new(adapter);
        assert!(!port.capabilities().native_tool_calling);
    }

    #[test]
    fn message_mapping_covers_all_roles() {
        let system = to_chat_message(&Message::new(Role::System, "sys"));
        assert_eq!(system.role, genai::chat::ChatRole::System);

        let user = to_chat_message(&Message::new(Role::User, "usr"));
        assert_eq!(user.role, genai::chat::ChatRole::User);

        let asst = to_chat_message(&Message::new(Role::Assistant, "ast"));
        assert_eq!(asst.role, genai::chat::ChatRole::Assistant);

        let tool = to_chat_message(&Message::new(Role::Tool, "result"));
        assert_eq!(tool.role, genai::chat::ChatRole::User);
    }

    #[test]
    fn chat_request_includes_all_messages() {
        let req = LlmRequest {
            model: "test-model".into(),
            messages: vec![Message::new(Role::System, "system msg"), Message::new(Role::User, "user msg")],
            tools: vec![],
        };
        assert_eq!(to_chat_request(&req).messages.len(), 2);
    }

    #[test]
    fn provider_errors_are_classified_for_retry() {
        assert!(matches!(classify_error_message("HTTP 429 Too Many Requests".into()), LlmError::RateLimited));
        assert!(classify_error_message("upstream returned 503".into()).is_retryable());
        assert!(classify_error_message("request timed out".into()).is_retryable());
        assert!(!classify_error_message("invalid api key".into()).is_retryable());
        assert!(matches!(
            classify_error_message("maximum context length is 8192 tokens".into()),
            LlmError::ContextLengthExceeded
        ));
    }
}
