//! # Tool Registry
//!
//! Local tools behind the [`ToolPort`] boundary.
//!
//! ## Overview
//!
//! A [`ToolRegistry`] is built once at startup from a list of [`Tool`]s and is
//! immutable afterwards, so it can be shared read-only by every query. It
//! routes `execute` calls by tool id and stamps the `trusted` flag from the
//! tool's own descriptor; callers cannot claim trust for an output.
//!
//! Built-in tools:
//!
//! | id | trusted | backing |
//! |---|---|---|
//! | `vector_search` | no | [`VectorSearchPort`](verity_core::ports::VectorSearchPort) |
//! | `pricing_lookup` | yes | service catalogue |
//! | `team_lookup` | yes | team directory |
//! | `calculator` | yes | arithmetic evaluator |

pub mod calculator;
pub mod catalog;
pub mod search;

use std::sync::Arc;

pub use calculator::CalculatorTool;
pub use catalog::{PricingLookupTool, TeamLookupTool};
pub use search::VectorSearchTool;
use verity_core::{
    error::ToolError,
    ports::ToolPort,
    types::{ToolCall, ToolDescriptor, ToolOutput},
};

/// A single locally implemented tool.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    async fn invoke(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError>;
}

/// Immutable id → tool routing table.
#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<(ToolDescriptor, Arc<dyn Tool>)>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&str> = self.entries.iter().map(|(d, _)| d.id.as_str()).collect();
        f.debug_struct("ToolRegistry").field("tools", &ids).finish()
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. A later tool with the same id replaces the earlier one.
    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        let descriptor = tool.descriptor();
        self.entries.retain(|(d, _)| d.id != descriptor.id);
        self.entries.push((descriptor, tool));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find(&self, id: &str) -> Option<&(ToolDescriptor, Arc<dyn Tool>)> {
        self.entries.iter().find(|(d, _)| d.id == id)
    }
}

#[async_trait::async_trait]
impl ToolPort for ToolRegistry {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        Ok(self.entries.iter().map(|(d, _)| d.clone()).collect())
    }

    async fn execute(&self, call: ToolCall) -> Result<ToolOutput, ToolError> {
        let (descriptor, tool) = self
            .find(&call.tool_name)
            .ok_or_else(|| ToolError::NotFound { name: call.tool_name.clone() })?;

        let mut output = tool.invoke(call.arguments).await?;
        output.trusted = descriptor.trusted;
        Ok(output)
    }
}

/// Extract a required, non-empty string argument.
pub(crate) fn required_str<'a>(
    arguments: &'a serde_json::Value,
    field: &str,
) -> Result<&'a str, ToolError> {
    arguments
        .get(field)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing string field '{field}'")))
}
