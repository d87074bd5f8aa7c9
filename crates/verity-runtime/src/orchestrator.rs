//! # Query Orchestrator
//!
//! Drives one query from context loading to persistence:
//!
//! ```text
//! load context → greeting? → recall? → route (react | calibrated) → persist → respond
//! ```
//!
//! The whole query runs under `query_timeout_ms` and the caller's
//! cancellation token. Every event reaches the caller through the query's
//! [`StreamEmitter`]; the non-streaming path uses a detached one.

use std::{sync::Arc, time::Duration};

use tokio::time::Instant;
use verity_core::{
    error::AgentError,
    ports::{EventSink, LlmPort, ToolPort},
    types::{
        AgentEvent, Decision, HealthStatus, QueryMode, QueryRequest, QueryResponse,
        ReasoningStep, ResponseMetadata, ResponseRoute, RuntimeHealth, Source, TokenUsage, Turn,
        TurnPolicy,
    },
};

use crate::{
    calibration::{CalibrationPipeline, PipelineInput},
    context::{SessionContext, SessionContextManager},
    evidence::EvidenceScorer,
    gates::{GreetingFilter, RecallGate},
    prompt::build_recall_request,
    react::{ReactDeps, ReactInput, run_react},
    retry::{RetryPolicy, complete_with_retry},
    stream::{StreamEmitter, with_keepalive},
};

const RECALL_STAGE: &str = "recall";

/// Shared, immutable per-runtime state.
pub(crate) struct Orchestrator {
    pub llm: Arc<dyn LlmPort>,
    pub tools: Arc<dyn ToolPort>,
    pub events: Arc<dyn EventSink>,
    pub context: SessionContextManager,
    pub default_model: String,
    pub policy: TurnPolicy,
    pub retry: RetryPolicy,
    pub scorer: EvidenceScorer,
    pub greeting: GreetingFilter,
    pub recall: RecallGate,
    pub pipeline: Option<CalibrationPipeline>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("default_model", &self.default_model)
            .field("policy", &self.policy)
            .field("calibration", &self.pipeline.is_some())
            .finish_non_exhaustive()
    }
}

/// Answer produced by one route, before persistence.
struct Reply {
    answer: String,
    sources: Vec<Source>,
    decision: Decision,
    score: f32,
    route: ResponseRoute,
    steps: Vec<ReasoningStep>,
    usage: TokenUsage,
    /// The route already sent `metadata` and its tokens.
    streamed: bool,
}

impl Reply {
    fn canned(answer: impl Into<String>, route: ResponseRoute) -> Self {
        Self {
            answer: answer.into(),
            sources: vec![],
            decision: Decision::Answer,
            score: 1.0,
            route,
            steps: vec![],
            usage: TokenUsage::default(),
            streamed: false,
        }
    }
}

impl Orchestrator {
    /// Run one query under the query deadline and the cancellation token.
    pub(crate) async fn execute(
        &self,
        req: QueryRequest,
        emitter: &mut StreamEmitter,
    ) -> Result<QueryResponse, AgentError> {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.policy.query_timeout_ms);
        let cancel = req.cancel_token.clone();

        let bounded = async {
            match tokio::time::timeout_at(deadline, self.execute_inner(req, started, deadline, emitter))
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(timeout_ms = self.policy.query_timeout_ms, "query timed out");
                    Err(AgentError::Timeout)
                }
            }
        };

        let result = match cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => {
                    tracing::info!("query cancelled by caller");
                    Err(AgentError::Cancelled)
                }
                result = bounded => result,
            },
            None => bounded.await,
        };

        if let Err(err) = &result {
            self.events.emit(AgentEvent::Error { error: err.to_string() });
        }
        result
    }

    async fn execute_inner(
        &self,
        req: QueryRequest,
        started: Instant,
        deadline: Instant,
        emitter: &mut StreamEmitter,
    ) -> Result<QueryResponse, AgentError> {
        let query = req.text.trim();
        let model = req.model.as_deref().unwrap_or(&self.default_model);
        self.events.emit(AgentEvent::QueryStarted { session_id: req.session_id.clone(), mode: req.mode });

        let ctx = self.context.load(req.session_id.as_deref(), &req.user_id, &req.history).await?;

        let reply = if let Some(greeting) = self.greeting.check(query) {
            tracing::info!(session_id = %ctx.session_id, "greeting short-circuit");
            self.events.emit(AgentEvent::ShortCircuited { route: ResponseRoute::Greeting });
            Reply::canned(greeting, ResponseRoute::Greeting)
        } else if self.recall.is_recall(query) && !ctx.history.is_empty() {
            tracing::info!(session_id = %ctx.session_id, turns = ctx.history.len(), "recall short-circuit");
            self.events.emit(AgentEvent::ShortCircuited { route: ResponseRoute::Recall });
            self.answer_from_history(query, model, &ctx, emitter).await?
        } else {
            if self.recall.is_recall(query) {
                tracing::debug!("recall phrasing without history, routing normally");
            }
            self.route(req.mode, query, model, &ctx, deadline, emitter).await?
        };

        if !reply.streamed {
            emitter.metadata(ResponseMetadata {
                sources: reply.sources.clone(),
                decision: reply.decision,
                score: reply.score,
                route: reply.route,
                calibration_notes: 0,
                quality_score: None,
            });
            for word in reply.answer.split_inclusive(' ') {
                emitter.token(word);
            }
        }

        if let Err(err) = self
            .context
            .record_exchange(
                &ctx.session_id,
                &req.user_id,
                Turn::user(query),
                Turn::assistant(reply.answer.clone(), reply.sources.clone()),
            )
            .await
        {
            tracing::warn!(%err, session_id = %ctx.session_id, "failed to persist exchange");
        }

        let execution_time_ms = started.elapsed().as_millis() as u64;
        self.events.emit(AgentEvent::QueryCompleted {
            route: reply.route,
            decision: reply.decision,
            elapsed_ms: execution_time_ms,
        });

        Ok(QueryResponse {
            answer: reply.answer,
            sources: reply.sources,
            decision: reply.decision,
            score: reply.score,
            route: reply.route,
            session_id: ctx.session_id,
            steps: reply.steps,
            usage: reply.usage,
            execution_time_ms,
        })
    }

    async fn answer_from_history(
        &self,
        query: &str,
        model: &str,
        ctx: &SessionContext,
        emitter: &mut StreamEmitter,
    ) -> Result<Reply, AgentError> {
        let request = build_recall_request(model, query, &ctx.history, &ctx.memory_facts);
        self.events.emit(AgentEvent::LlmCallStarted { model: model.to_string() });
        let response = with_keepalive(
            emitter,
            RECALL_STAGE,
            self.keepalive_interval(),
            complete_with_retry(self.llm.as_ref(), request, &self.retry, self.events.as_ref()),
        )
        .await?;
        self.events.emit(AgentEvent::LlmCallCompleted { usage: response.usage.clone() });

        let mut reply = Reply::canned(response.content.trim(), ResponseRoute::Recall);
        reply.usage = response.usage;
        Ok(reply)
    }

    async fn route(
        &self,
        mode: QueryMode,
        query: &str,
        model: &str,
        ctx: &SessionContext,
        deadline: Instant,
        emitter: &mut StreamEmitter,
    ) -> Result<Reply, AgentError> {
        if mode == QueryMode::Calibrated {
            if let Some(pipeline) = &self.pipeline {
                let input = PipelineInput {
                    query,
                    history: &ctx.history,
                    memory_facts: &ctx.memory_facts,
                    model: Some(model),
                };
                let out = pipeline.run(input, emitter, self.events.as_ref()).await?;
                return Ok(Reply {
                    answer: out.answer,
                    sources: out.sources,
                    decision: out.decision,
                    score: out.score,
                    route: ResponseRoute::Calibrated,
                    steps: vec![],
                    usage: out.usage,
                    streamed: true,
                });
            }
            tracing::warn!("calibrated mode requested without domain knowledge, using reasoning loop");
        }

        let deps = ReactDeps {
            llm: self.llm.as_ref(),
            tools: self.tools.as_ref(),
            events: self.events.as_ref(),
            retry: &self.retry,
            scorer: &self.scorer,
            policy: &self.policy,
        };
        let input = ReactInput {
            query,
            model,
            history: &ctx.history,
            memory_facts: &ctx.memory_facts,
            deadline: Some(deadline),
        };
        let outcome = run_react(deps, input, emitter).await?;
        Ok(Reply {
            answer: outcome.gated.answer,
            sources: outcome.gated.sources,
            decision: outcome.gated.decision,
            score: outcome.gated.score,
            route: ResponseRoute::Reasoning,
            steps: outcome.steps,
            usage: outcome.usage,
            streamed: false,
        })
    }

    pub(crate) async fn health(&self) -> RuntimeHealth {
        let calibration_ready = self.pipeline.is_some();
        match self.tools.list_tools().await {
            Ok(tools) => RuntimeHealth {
                status: if tools.is_empty() { HealthStatus::Degraded } else { HealthStatus::Healthy },
                tools_registered: tools.len(),
                calibration_ready,
            },
            Err(err) => {
                tracing::warn!(%err, "tool listing failed during health check");
                RuntimeHealth { status: HealthStatus::Unhealthy, tools_registered: 0, calibration_ready }
            }
        }
    }

    fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.policy.keepalive_interval_ms)
    }
}

/// Drive `execute` and close the stream with exactly one terminal event.
pub(crate) async fn run_to_completion(
    orchestrator: Arc<Orchestrator>,
    req: QueryRequest,
    mut emitter: StreamEmitter,
) {
    match orchestrator.execute(req, &mut emitter).await {
        Ok(response) => emitter.done(response.session_id, response.execution_time_ms),
        Err(err) => {
            tracing::warn!(%err, "query failed");
            emitter.error(err.user_message());
        }
    }
}
