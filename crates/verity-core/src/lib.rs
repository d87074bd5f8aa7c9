//! Verity Core: domain types and port traits
//!
//! This crate defines the hexagonal boundary of the Verity orchestrator:
//! domain types, error types, and the port traits that adapters implement
//! (LLM inference, tool execution, vector search, conversation storage and
//! observability).
//!
//! **No concrete implementations live here**, only contracts.

// ── Modules ──────────────────────────────────────────────────────────

pub mod error;
pub mod ports;
pub mod types;

// ── Re-exports ───────────────────────────────────────────────────────

pub use error::{AgentError, LlmError, StoreError, ToolError};
pub use ports::{ConversationStore, EventSink, LlmPort, ToolPort, VectorSearchPort};
pub use types::*;
