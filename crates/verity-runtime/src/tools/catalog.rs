//! Trusted lookups over the [`DomainKnowledge`] snapshot: service prices and
//! the team directory.

use std::sync::Arc;

use serde_json::json;
use verity_core::{
    error::ToolError,
    types::{ToolDescriptor, ToolOutput},
};

use super::{Tool, required_str};
use crate::knowledge::DomainKnowledge;

pub const PRICING_TOOL: &str = "pricing_lookup";
pub const TEAM_TOOL: &str = "team_lookup";

#[derive(Debug, Clone)]
pub struct PricingLookupTool {
    knowledge: Arc<DomainKnowledge>,
}

impl PricingLookupTool {
    #[must_use]
    pub fn new(knowledge: Arc<DomainKnowledge>) -> Self {
        Self { knowledge }
    }
}

#[async_trait::async_trait]
impl Tool for PricingLookupTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            id: PRICING_TOOL.to_string(),
            description: "Look up the official starting price of a service by name.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"service": {"type": "string"}},
                "required": ["service"]
            }),
            trusted: true,
        }
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let service = required_str(&arguments, "service")?;
        let hits = self.knowledge.find_services(service);
        if hits.is_empty() {
            return Err(ToolError::Execution(format!("no service in the catalogue matches '{service}'")));
        }

        let lines: Vec<String> = hits.iter().map(|s| s.price_line()).collect();
        let output = ToolOutput::text(lines.join("\n"));
        Ok(if hits.len() == 1 { output.conclusive() } else { output })
    }
}

#[derive(Debug, Clone)]
pub struct TeamLookupTool {
    knowledge: Arc<DomainKnowledge>,
}

impl TeamLookupTool {
    #[must_use]
    pub fn new(knowledge: Arc<DomainKnowledge>) -> Self {
        Self { knowledge }
    }
}

#[async_trait::async_trait]
impl Tool for TeamLookupTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            id: TEAM_TOOL.to_string(),
            description: "Find team members by name, role or specialty.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }),
            trusted: true,
        }
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let query = required_str(&arguments, "query")?;
        let hits = self.knowledge.find_team(query);
        if hits.is_empty() {
            return Err(ToolError::Execution(format!("no team member matches '{query}'")));
        }
        let lines: Vec<String> = hits.iter().map(|m| m.summary_line()).collect();
        Ok(ToolOutput::text(lines.join("\n")))
    }
}
