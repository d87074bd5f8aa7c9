//! Error types for the Verity orchestrator.
//!
//! Abstention is deliberately absent from this module: an answer withheld for
//! lack of evidence is a [`Decision`](crate::types::Decision), not a failure.

/// Top-level orchestration error.
#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    #[error("LLM provider error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool execution error: {0}")]
    Tool(#[from] ToolError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("query timed out")]
    Timeout,

    #[error("query cancelled")]
    Cancelled,

    #[error(transparent)]
    Internal(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl AgentError {
    /// Message safe to show to an end user; internal detail stays in logs.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Timeout => "The request took too long to complete. Please try again.",
            Self::Cancelled => "The request was cancelled.",
            _ => "Something went wrong while preparing the answer. Please try again.",
        }
    }
}

/// LLM adapter errors.
#[derive(thiserror::Error, Debug)]
pub enum LlmError {
    #[error("provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("rate limited")]
    RateLimited,

    #[error("context length exceeded")]
    ContextLengthExceeded,

    #[error("stream error: {0}")]
    Stream(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl LlmError {
    /// Convenience constructor for a transient provider failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Provider { message: message.into(), retryable: true }
    }

    /// Convenience constructor for a permanent provider failure.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Provider { message: message.into(), retryable: false }
    }

    /// Whether a retry with backoff may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            Self::RateLimited | Self::Stream(_) => true,
            Self::ContextLengthExceeded | Self::Other(_) => false,
        }
    }
}

/// Tool execution errors.
#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    #[error("tool not found: {name}")]
    NotFound { name: String },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("tool execution failed: {0}")]
    Execution(String),

    #[error("tool timeout: {name}")]
    Timeout { name: String },

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Conversation store errors.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_carry_retryability() {
        assert!(LlmError::transient("502 bad gateway").is_retryable());
        assert!(!LlmError::permanent("invalid api key").is_retryable());
        assert!(LlmError::RateLimited.is_retryable());
        assert!(!LlmError::ContextLengthExceeded.is_retryable());
    }

    #[test]
    fn user_message_hides_internal_detail() {
        let err = AgentError::Llm(LlmError::permanent("secret upstream detail"));
        assert!(!err.user_message().contains("secret"));
        assert!(AgentError::Timeout.user_message().contains("too long"));
    }
}
