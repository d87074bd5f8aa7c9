//! Decorators and fallbacks around [`ToolPort`].

use std::{collections::HashMap, sync::Arc, time::Duration};

use verity_core::{
    error::ToolError,
    ports::ToolPort,
    types::{ToolCall, ToolDescriptor, ToolOutput},
};

/// Decorator-style wrapper for [`ToolPort`] implementations.
pub trait ToolLayer: Send + Sync {
    fn wrap(&self, inner: Arc<dyn ToolPort>) -> Arc<dyn ToolPort>;
}

/// Used when no tools are configured: advertises nothing, rejects every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpToolPort;

#[async_trait::async_trait]
impl ToolPort for NoOpToolPort {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        Ok(vec![])
    }

    async fn execute(&self, call: ToolCall) -> Result<ToolOutput, ToolError> {
        Err(ToolError::NotFound { name: call.tool_name })
    }
}

/// Bounds every call by a deadline; individual tools may get their own.
#[derive(Debug, Clone, Default)]
pub struct TimeoutToolLayer {
    default_ms: u64,
    overrides: HashMap<String, u64>,
}

impl TimeoutToolLayer {
    #[must_use]
    pub fn new(default_ms: u64) -> Self {
        Self { default_ms, overrides: HashMap::new() }
    }

    #[must_use]
    pub fn with_override(mut self, tool: impl Into<String>, timeout_ms: u64) -> Self {
        self.overrides.insert(tool.into(), timeout_ms);
        self
    }
}

impl ToolLayer for TimeoutToolLayer {
    fn wrap(&self, inner: Arc<dyn ToolPort>) -> Arc<dyn ToolPort> {
        Arc::new(TimeoutToolPort { inner, limits: self.clone() })
    }
}

struct TimeoutToolPort {
    inner: Arc<dyn ToolPort>,
    limits: TimeoutToolLayer,
}

#[async_trait::async_trait]
impl ToolPort for TimeoutToolPort {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        self.inner.list_tools().await
    }

    async fn execute(&self, call: ToolCall) -> Result<ToolOutput, ToolError> {
        let name = call.tool_name.clone();
        let ms = self.limits.overrides.get(&name).copied().unwrap_or(self.limits.default_ms);
        tokio::time::timeout(Duration::from_millis(ms), self.inner.execute(call))
            .await
            .unwrap_or_else(|_| {
                tracing::warn!(tool = %name, timeout_ms = ms, "tool call timed out");
                Err(ToolError::Timeout { name })
            })
    }
}
