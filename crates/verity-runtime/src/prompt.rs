//! # Prompt Builder
//!
//! Assembles [`LlmRequest`]s for the reasoning loop and the recall path.
//!
//! A reasoning request is laid out as:
//!
//! 1. **System message**: instructions, action schema, tool signatures and
//!    known facts about the user
//! 2. **Session history**: most recent turns of the resolved session only
//! 3. **Query**: the current user message
//! 4. **Step transcript**: one assistant/tool message pair per executed step

use verity_core::types::{
    LlmRequest, MemoryFact, Message, ReasoningStep, Role, ToolDescriptor, Turn,
};

/// Maximum number of history turns placed into a prompt.
pub(crate) const MAX_HISTORY_TURNS: usize = 20;

const REACT_INSTRUCTIONS: &str = "\
You are the assistant of a digital services agency. Answer questions about our \
services, prices, team and the user's project. Think step by step. Use tools for \
facts: prices and team details must come from the lookup tools, general knowledge \
from the knowledge base search. Never invent prices, names or numbers. If the \
tools do not give you the answer, say you are not sure.";

const FORCED_FINAL_INSTRUCTIONS: &str = "\
You have no tool steps left. Using only the observations above, respond now with \
a final action. If the observations do not answer the question, say so plainly.";

const RECALL_INSTRUCTIONS: &str = "\
Answer the user's question using only the conversation so far. Quote names, \
numbers and amounts exactly as they were written. If the conversation does not \
contain the answer, say you don't have that information yet.";

/// Sent after output that could not be parsed as an action.
pub(crate) const CORRECTIVE_REPROMPT: &str = "\
Your response was not a valid action. Respond with exactly one JSON object \
matching the required schema and nothing else.";

/// Options controlling which schema sections are rendered.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PromptBuildOptions {
    pub include_action_schema: bool,
    pub include_tool_schema: bool,
}

impl Default for PromptBuildOptions {
    fn default() -> Self {
        Self { include_action_schema: true, include_tool_schema: true }
    }
}

/// Everything a reasoning-loop prompt is built from.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReactPromptInput<'a> {
    pub query: &'a str,
    pub history: &'a [Turn],
    pub memory_facts: &'a [MemoryFact],
    pub steps: &'a [ReasoningStep],
    pub tools: &'a [ToolDescriptor],
}

pub(crate) fn action_schema_prompt() -> &'static str {
    r#"Respond with exactly one JSON object and no extra text.
To call a tool:
{"type": "tool_call", "name": "<tool id>", "arguments": {...}, "thought": "<why>"}
To answer:
{"type": "final", "content": "<answer>", "citations": ["<document id>", ...], "thought": "<why>"}
Cite only document ids returned by the knowledge base search."#
}

/// Renders tool names, descriptions, and input schemas as a text block.
///
/// Returns an empty string when no tools are available.
pub(crate) fn tool_schema_block(tools: &[ToolDescriptor]) -> String {
    if tools.is_empty() {
        return String::new();
    }

    let mut buf = String::from("Available tools:\n");
    for tool in tools {
        let trust = if tool.trusted { " (authoritative)" } else { "" };
        buf.push_str(&format!(
            "\n- {}{trust}: {}\n  Input schema: {}\n",
            tool.id,
            tool.description,
            serde_json::to_string(&tool.input_schema).unwrap_or_default(),
        ));
    }
    buf
}

pub(crate) fn memory_block(facts: &[MemoryFact]) -> String {
    if facts.is_empty() {
        return String::new();
    }
    let mut buf = String::from("Known facts about this user:\n");
    for fact in facts {
        buf.push_str(&format!("- {}: {}\n", fact.key, fact.value));
    }
    buf
}

/// Keeps the most recent `max` turns as prompt messages.
pub(crate) fn history_messages(history: &[Turn], max: usize) -> Vec<Message> {
    let skip = history.len().saturating_sub(max);
    history[skip..].iter().map(|t| Message::new(t.role.into(), t.content.clone())).collect()
}

fn transcript_messages(steps: &[ReasoningStep]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(steps.len() * 2);
    for step in steps {
        let Some(action) = &step.action else {
            continue;
        };
        let call = serde_json::json!({
            "type": "tool_call",
            "name": action.tool_name,
            "arguments": action.arguments,
            "thought": step.thought,
        });
        messages.push(Message::new(Role::Assistant, call.to_string()));
        let observation = step.observation.as_deref().unwrap_or("(no observation)");
        messages.push(Message::new(Role::Tool, format!("Observation: {observation}")));
    }
    messages
}

fn join_sections(sections: &[&str]) -> String {
    sections.iter().filter(|s| !s.trim().is_empty()).copied().collect::<Vec<_>>().join("\n\n")
}

/// One cycle of the reasoning loop.
pub(crate) fn build_react_request(
    model: &str,
    input: ReactPromptInput<'_>,
    options: PromptBuildOptions,
) -> LlmRequest {
    let schema = if options.include_action_schema { action_schema_prompt() } else { "" };
    let tool_block =
        if options.include_tool_schema { tool_schema_block(input.tools) } else { String::new() };
    let memory = memory_block(input.memory_facts);
    let system = join_sections(&[REACT_INSTRUCTIONS, schema, tool_block.as_str(), memory.as_str()]);

    let mut messages = vec![Message::new(Role::System, system)];
    messages.extend(history_messages(input.history, MAX_HISTORY_TURNS));
    messages.push(Message::new(Role::User, input.query));
    messages.extend(transcript_messages(input.steps));

    LlmRequest { model: model.to_string(), messages, tools: input.tools.to_vec() }
}

/// The single tool-less call made when the step budget is exhausted.
pub(crate) fn build_forced_final_request(model: &str, input: ReactPromptInput<'_>) -> LlmRequest {
    let mut request = build_react_request(
        model,
        ReactPromptInput { tools: &[], ..input },
        PromptBuildOptions { include_action_schema: true, include_tool_schema: false },
    );
    request.messages.push(Message::new(Role::User, FORCED_FINAL_INSTRUCTIONS));
    request
}

/// Single call answering from the session history, no tools.
pub(crate) fn build_recall_request(
    model: &str,
    query: &str,
    history: &[Turn],
    memory_facts: &[MemoryFact],
) -> LlmRequest {
    let memory = memory_block(memory_facts);
    let mut transcript = String::from("Conversation so far:\n");
    for turn in &history[history.len().saturating_sub(MAX_HISTORY_TURNS)..] {
        let who = match turn.role {
            verity_core::types::Speaker::User => "User",
            verity_core::types::Speaker::Assistant => "Assistant",
        };
        transcript.push_str(&format!("{who}: {}\n", turn.content));
    }
    let system = join_sections(&[RECALL_INSTRUCTIONS, memory.as_str(), transcript.as_str()]);

    LlmRequest {
        model: model.to_string(),
        messages: vec![Message::new(Role::System, system), Message::new(Role::User, query)],
        tools: vec![],
    }
}
