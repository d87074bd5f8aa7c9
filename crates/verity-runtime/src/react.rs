//! # Reasoning Loop
//!
//! ReAct engine: `THINKING → (ACTING → OBSERVING)* → FINAL | ABSTAIN | ERROR`.
//!
//! ## Overview
//!
//! Each cycle sends the prompt (instructions, tool signatures, history, query
//! and the running step transcript) to the model and parses one action:
//!
//! 1. **Tool call**: executed through the tool port, whose timeout layer owns
//!    the per-tool deadline; the observation (or
//!    `"tool failed: <reason>"`) is appended as a new [`ReasoningStep`].
//! 2. **Final**: the draft and its citations leave the loop.
//!
//! ## Termination
//!
//! The [`LoopGuard`] caps model calls at `max_steps`. When the cap is hit a
//! single tool-less call asks for a final answer; if that fails too, a digest
//! of the gathered observations becomes the draft. A trusted tool returning a
//! conclusive result ends the loop early with its observation as the draft.
//!
//! Whatever the exit, the draft passes through the [`EvidenceScorer`] before
//! it is returned.

use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use verity_core::{
    error::{AgentError, ToolError},
    ports::{EventSink, LlmPort, ToolPort},
    types::{
        AgentAction, AgentEvent, EvidenceBundle, GuardReason, LlmResponse, MemoryFact, Message,
        ReasoningStep, Role, TokenUsage, ToolCall, ToolDescriptor, ToolOutput, Turn, TurnPolicy,
    },
};

use crate::{
    action::parse_action,
    evidence::{EvidenceScorer, GatedAnswer},
    gates::is_informational_statement,
    prompt::{
        CORRECTIVE_REPROMPT, PromptBuildOptions, ReactPromptInput, build_forced_final_request,
        build_react_request,
    },
    retry::{RetryPolicy, complete_with_retry},
    stream::{StreamEmitter, with_keepalive},
};

const KEEPALIVE_STAGE: &str = "reasoning";

/// Consecutive unparseable outputs tolerated before the raw text is used.
const MAX_PARSE_FAILURES: u32 = 2;

/// Guarantees loop termination by counting model calls against the step
/// budget and checking the query deadline.
#[derive(Debug)]
pub struct LoopGuard {
    max_steps: u32,
    steps: u32,
    deadline: Option<Instant>,
}

impl LoopGuard {
    #[must_use]
    pub fn new(max_steps: u32, deadline: Option<Instant>) -> Self {
        Self { max_steps: max_steps.max(1), steps: 0, deadline }
    }

    #[must_use]
    pub fn can_continue(&self) -> bool {
        self.steps < self.max_steps && !self.timed_out()
    }

    pub fn record_step(&mut self) {
        self.steps += 1;
    }

    #[must_use]
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Only meaningful when [`can_continue`](Self::can_continue) returns `false`.
    #[must_use]
    pub fn reason(&self) -> GuardReason {
        if self.timed_out() { GuardReason::QueryTimeout } else { GuardReason::MaxSteps }
    }

    fn timed_out(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Ports and policies the loop runs against.
#[derive(Clone, Copy)]
pub(crate) struct ReactDeps<'a> {
    pub llm: &'a dyn LlmPort,
    pub tools: &'a dyn ToolPort,
    pub events: &'a dyn EventSink,
    pub retry: &'a RetryPolicy,
    pub scorer: &'a EvidenceScorer,
    pub policy: &'a TurnPolicy,
}

/// Per-query input of the loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReactInput<'a> {
    pub query: &'a str,
    pub model: &'a str,
    pub history: &'a [Turn],
    pub memory_facts: &'a [MemoryFact],
    pub deadline: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct ReactOutcome {
    pub gated: GatedAnswer,
    pub steps: Vec<ReasoningStep>,
    pub usage: TokenUsage,
    pub early_exit: bool,
}

struct Draft {
    content: String,
    early_exit: bool,
}

/// Run the loop for one query.
pub(crate) async fn run_react(
    deps: ReactDeps<'_>,
    input: ReactInput<'_>,
    emitter: &mut StreamEmitter,
) -> Result<ReactOutcome, AgentError> {
    let tools = deps.tools.list_tools().await?;
    let native = deps.llm.capabilities().native_tool_calling;
    let options = PromptBuildOptions { include_action_schema: true, include_tool_schema: !native };
    let keepalive = Duration::from_millis(deps.policy.keepalive_interval_ms);

    let mut guard = LoopGuard::new(deps.policy.max_steps, input.deadline);
    let mut steps: Vec<ReasoningStep> = Vec::new();
    let mut bundle = EvidenceBundle::default();
    let mut usage = TokenUsage::default();
    let mut correction: Vec<Message> = Vec::new();
    let mut parse_failures: u32 = 0;

    let draft = loop {
        if !guard.can_continue() {
            break forced_final(deps, input, &tools, &steps, &guard, &mut bundle, &mut usage, emitter)
                .await;
        }

        let mut request = build_react_request(input.model, prompt_input(input, &steps, &tools), options);
        request.messages.extend(correction.iter().cloned());

        deps.events.emit(AgentEvent::LlmCallStarted { model: input.model.to_string() });
        let response = with_keepalive(
            emitter,
            KEEPALIVE_STAGE,
            keepalive,
            complete_with_retry(deps.llm, request, deps.retry, deps.events),
        )
        .await?;
        guard.record_step();
        usage.add(&response.usage);
        deps.events.emit(AgentEvent::LlmCallCompleted { usage: response.usage.clone() });

        match next_action(&response, native) {
            Ok(AgentAction::Final { content, citations, thought }) => {
                bundle.citations = citations;
                steps.push(step(steps.len(), thought, None, None));
                break Draft { content, early_exit: false };
            }
            Ok(AgentAction::ToolCall { name, arguments, thought }) => {
                parse_failures = 0;
                correction.clear();

                let call = ToolCall::new(name, arguments);
                let (call, result) = execute_tool(deps, call, keepalive, emitter).await;
                let observation = match &result {
                    Ok(output) => output.observation.clone(),
                    Err(err) => format!("tool failed: {err}"),
                };
                steps.push(step(steps.len(), thought, Some(call), Some(observation.clone())));

                if let Ok(output) = result {
                    bundle.absorb(&output);
                    if deps.policy.early_exit && output.trusted && output.conclusive {
                        tracing::info!(step = steps.len(), "conclusive trusted result, ending loop early");
                        break Draft { content: observation, early_exit: true };
                    }
                }
            }
            Err(err) => {
                parse_failures += 1;
                if parse_failures >= MAX_PARSE_FAILURES {
                    tracing::warn!(%err, "model output unparseable after re-prompt, using raw text");
                    steps.push(step(steps.len(), String::new(), None, None));
                    break Draft { content: response.content.trim().to_string(), early_exit: false };
                }
                tracing::debug!(%err, "unparseable action, re-prompting");
                correction = vec![
                    Message::new(Role::Assistant, response.content.clone()),
                    Message::new(Role::User, CORRECTIVE_REPROMPT),
                ];
            }
        }
    };

    let informational = is_informational_statement(input.query);
    let gated = deps.scorer.gate(draft.content, &bundle, informational);
    deps.events.emit(AgentEvent::EvidenceScored { score: gated.score, decision: gated.decision });

    Ok(ReactOutcome { gated, steps, usage, early_exit: draft.early_exit })
}

fn prompt_input<'a>(
    input: ReactInput<'a>,
    steps: &'a [ReasoningStep],
    tools: &'a [ToolDescriptor],
) -> ReactPromptInput<'a> {
    ReactPromptInput {
        query: input.query,
        history: input.history,
        memory_facts: input.memory_facts,
        steps,
        tools,
    }
}

fn next_action(
    response: &LlmResponse,
    native: bool,
) -> Result<AgentAction, crate::action::ActionParseError> {
    if native && let Some(call) = response.tool_calls.first() {
        return Ok(AgentAction::ToolCall {
            name: call.tool_name.clone(),
            arguments: call.arguments.clone(),
            thought: response.content.clone(),
        });
    }
    parse_action(&response.content)
}

async fn execute_tool(
    deps: ReactDeps<'_>,
    mut call: ToolCall,
    keepalive: Duration,
    emitter: &mut StreamEmitter,
) -> (ToolCall, Result<ToolOutput, ToolError>) {
    let name = call.tool_name.clone();
    deps.events.emit(AgentEvent::ToolCallStarted { name: name.clone() });

    let result =
        with_keepalive(emitter, KEEPALIVE_STAGE, keepalive, deps.tools.execute(call.clone())).await;

    let trusted = result.as_ref().is_ok_and(|o| o.trusted);
    if let Err(err) = &result {
        tracing::warn!(tool = %name, %err, "tool call failed");
    }
    deps.events.emit(AgentEvent::ToolCallCompleted { name, is_error: result.is_err(), trusted });
    call.trusted = trusted;
    (call, result)
}

#[expect(clippy::too_many_arguments, reason = "internal helper sharing loop state")]
async fn forced_final(
    deps: ReactDeps<'_>,
    input: ReactInput<'_>,
    tools: &[ToolDescriptor],
    steps: &[ReasoningStep],
    guard: &LoopGuard,
    bundle: &mut EvidenceBundle,
    usage: &mut TokenUsage,
    emitter: &mut StreamEmitter,
) -> Draft {
    let reason = guard.reason();
    tracing::info!(?reason, steps = guard.steps(), "reasoning budget exhausted");

    if reason == GuardReason::MaxSteps {
        let request = build_forced_final_request(input.model, prompt_input(input, steps, tools));
        deps.events.emit(AgentEvent::LlmCallStarted { model: input.model.to_string() });
        let keepalive = Duration::from_millis(deps.policy.keepalive_interval_ms);
        let response = with_keepalive(
            emitter,
            KEEPALIVE_STAGE,
            keepalive,
            complete_with_retry(deps.llm, request, deps.retry, deps.events),
        )
        .await;

        match response {
            Ok(response) => {
                usage.add(&response.usage);
                deps.events.emit(AgentEvent::LlmCallCompleted { usage: response.usage.clone() });
                if let Ok(AgentAction::Final { content, citations, .. }) = parse_action(&response.content) {
                    bundle.citations = citations;
                    return Draft { content, early_exit: false };
                }
                tracing::warn!("forced final call did not return a final action");
            }
            Err(err) => tracing::warn!(%err, "forced final call failed"),
        }
    }

    Draft { content: evidence_digest(steps), early_exit: false }
}

/// Plain summary of every successful observation.
fn evidence_digest(steps: &[ReasoningStep]) -> String {
    let observations: Vec<&str> = steps
        .iter()
        .filter_map(|s| s.observation.as_deref())
        .filter(|o| !o.starts_with("tool failed:"))
        .collect();
    if observations.is_empty() {
        return String::new();
    }
    let mut digest = String::from("Here is what I found:");
    for observation in observations {
        digest.push_str("\n- ");
        digest.push_str(observation);
    }
    digest
}

fn step(
    index: usize,
    thought: String,
    action: Option<ToolCall>,
    observation: Option<String>,
) -> ReasoningStep {
    ReasoningStep {
        step_index: u32::try_from(index).unwrap_or(u32::MAX),
        thought,
        action,
        observation,
        timestamp: Utc::now(),
    }
}
