//! Verity Adapter Implementations
//!
//! Adapters for `verity-core` port traits:
//! - `llm-genai`: LLM adapter via `genai` crate
//! - `observe-tracing`: Event sink via `tracing` crate
//! - in-memory conversation store backed by `scc`
//! - in-memory term-vector search index

pub use verity_core as core;

#[cfg(feature = "llm-genai")]
pub mod llm_genai;

pub mod search_memory;
pub mod store_memory;

#[cfg(feature = "observe-tracing")]
pub mod observe;
