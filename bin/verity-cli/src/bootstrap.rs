use std::sync::Arc;

use eyre::WrapErr;
use verity_adapters::{
    core::{
        ports::{ConversationStore, EventSink, LlmPort, ToolPort, VectorSearchPort},
        types::TurnPolicy,
    },
    observe::TracingEventSink,
    search_memory::InMemoryVectorIndex,
    store_memory::InMemoryConversationStore,
};
use verity_runtime::{
    AssistantRuntime, RuntimeBootstrap, RuntimeBuilder, TimeoutToolLayer,
    gates::{DEFAULT_GREETING_PATTERNS, DEFAULT_GREETING_REPLY, GreetingFilter, RecallGate, TriggerSet},
    knowledge::DomainKnowledge,
    tools::{CalculatorTool, PricingLookupTool, TeamLookupTool, ToolRegistry, VectorSearchTool},
};

use crate::config::{
    RuntimeConfig, TriggersConfig, VerityConfig, load_knowledge, resolve_relative,
};

/// Build the runtime from a loaded config. `config_path` anchors relative data paths.
pub(crate) fn build_runtime(
    cfg: &VerityConfig,
    config_path: &str,
) -> eyre::Result<Arc<dyn AssistantRuntime>> {
    let client = genai::Client::default();
    let llm: Arc<dyn LlmPort> = Arc::new(verity_adapters::llm_genai::GenAiLlmAdapter::new(client));

    let knowledge = match cfg.knowledge.as_ref() {
        Some(kb) => {
            let path = resolve_relative(config_path, &kb.path);
            let knowledge = load_knowledge(&path)
                .wrap_err_with(|| format!("failed to load knowledge from '{}'", path.display()))?;
            Some(Arc::new(knowledge))
        }
        None => None,
    };

    let index = build_index(cfg, config_path)?;
    let tools = build_tool_registry(index, knowledge.as_ref());
    let store: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::new());
    let events: Arc<dyn EventSink> = Arc::new(TracingEventSink::new());
    let policy = build_policy(&cfg.runtime);

    let mut timeouts = TimeoutToolLayer::new(policy.tool_timeout_ms);
    for (tool, ms) in &cfg.runtime.tool_timeouts {
        timeouts = timeouts.with_override(tool.clone(), *ms);
    }

    let mut builder = RuntimeBuilder::new()
        .with_llm(llm)
        .with_tools(tools)
        .with_store(store)
        .with_events(events)
        .with_default_model(cfg.runtime.default_model.clone())
        .with_policy(policy)
        .with_evidence_policy(cfg.evidence.clone())
        .with_synthesis(cfg.synthesis.clone())
        .with_tool_timeouts(timeouts);

    if let Some(fallback) = &cfg.runtime.fallback_model {
        builder = builder.with_fallback_model(fallback.clone());
    }
    if let Some(greeting) = build_greeting_filter(&cfg.triggers)? {
        builder = builder.with_greeting_filter(greeting);
    }
    if let Some(recall) = build_recall_gate(&cfg.triggers)? {
        builder = builder.with_recall_gate(recall);
    }
    if let Some(knowledge) = knowledge {
        builder = builder.with_knowledge(knowledge);
    }

    builder.build().wrap_err("failed to build runtime")
}

fn build_index(
    cfg: &VerityConfig,
    config_path: &str,
) -> eyre::Result<Option<(Arc<dyn VectorSearchPort>, String, usize)>> {
    let Some(corpus) = cfg.corpus.as_ref() else {
        return Ok(None);
    };
    let path = resolve_relative(config_path, &corpus.path);
    let json = std::fs::read_to_string(&path)
        .wrap_err_with(|| format!("failed to read corpus '{}'", path.display()))?;
    let index = InMemoryVectorIndex::new()
        .with_json(corpus.collection.clone(), &json)
        .wrap_err_with(|| format!("invalid corpus '{}'", path.display()))?;
    tracing::info!(documents = index.len(&corpus.collection), collection = %corpus.collection, "corpus indexed");
    Ok(Some((Arc::new(index), corpus.collection.clone(), corpus.top_k)))
}

pub(crate) fn build_tool_registry(
    index: Option<(Arc<dyn VectorSearchPort>, String, usize)>,
    knowledge: Option<&Arc<DomainKnowledge>>,
) -> Arc<dyn ToolPort> {
    let mut registry = ToolRegistry::new().with_tool(Arc::new(CalculatorTool));
    if let Some((index, collection, top_k)) = index {
        registry = registry.with_tool(Arc::new(VectorSearchTool::new(index, collection, top_k)));
    }
    if let Some(knowledge) = knowledge {
        if !knowledge.services.is_empty() {
            registry = registry.with_tool(Arc::new(PricingLookupTool::new(knowledge.clone())));
        }
        if !knowledge.team.is_empty() {
            registry = registry.with_tool(Arc::new(TeamLookupTool::new(knowledge.clone())));
        }
    }
    tracing::debug!(?registry, "tool registry built");
    Arc::new(registry)
}

pub(crate) fn build_policy(runtime: &RuntimeConfig) -> TurnPolicy {
    let defaults = TurnPolicy::default();
    TurnPolicy {
        max_steps: runtime.max_steps.unwrap_or(defaults.max_steps),
        query_timeout_ms: runtime.query_timeout_ms.unwrap_or(defaults.query_timeout_ms),
        tool_timeout_ms: runtime.tool_timeout_ms.unwrap_or(defaults.tool_timeout_ms),
        keepalive_interval_ms: runtime
            .keepalive_interval_ms
            .unwrap_or(defaults.keepalive_interval_ms),
        llm_max_attempts: runtime.llm_max_attempts.unwrap_or(defaults.llm_max_attempts).max(1),
        ..defaults
    }
}

/// `None` keeps the runtime's built-in greeting filter.
pub(crate) fn build_greeting_filter(triggers: &TriggersConfig) -> eyre::Result<Option<GreetingFilter>> {
    if triggers.greeting.is_none() && triggers.greeting_reply.is_none() {
        return Ok(None);
    }
    let patterns = match &triggers.greeting {
        Some(patterns) => TriggerSet::new(patterns),
        None => TriggerSet::new(DEFAULT_GREETING_PATTERNS),
    }
    .wrap_err("invalid greeting pattern")?;
    let reply = triggers.greeting_reply.as_deref().unwrap_or(DEFAULT_GREETING_REPLY);
    Ok(Some(GreetingFilter::new(patterns, reply)))
}

pub(crate) fn build_recall_gate(triggers: &TriggersConfig) -> eyre::Result<Option<RecallGate>> {
    let Some(patterns) = &triggers.recall else {
        return Ok(None);
    };
    let set = TriggerSet::new(patterns).wrap_err("invalid recall pattern")?;
    Ok(Some(RecallGate::new(set)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use verity_runtime::{calibration::SynthesisConfig, evidence::EvidencePolicy};

    use super::*;

    fn minimal_config() -> VerityConfig {
        VerityConfig {
            runtime: RuntimeConfig {
                default_model: "openai:gpt-4o-mini".to_string(),
                fallback_model: None,
                max_steps: None,
                query_timeout_ms: None,
                tool_timeout_ms: None,
                keepalive_interval_ms: None,
                llm_max_attempts: None,
                tool_timeouts: HashMap::new(),
            },
            evidence: EvidencePolicy::default(),
            triggers: TriggersConfig::default(),
            synthesis: SynthesisConfig::default(),
            knowledge: None,
            corpus: None,
        }
    }

    #[test]
    fn policy_overrides_apply_over_defaults() {
        let mut cfg = minimal_config();
        cfg.runtime.max_steps = Some(3);
        cfg.runtime.llm_max_attempts = Some(0);

        let policy = build_policy(&cfg.runtime);
        assert_eq!(policy.max_steps, 3);
        assert_eq!(policy.llm_max_attempts, 1);
        assert_eq!(policy.query_timeout_ms, TurnPolicy::default().query_timeout_ms);
    }

    #[test]
    fn default_triggers_keep_builtin_gates() {
        let triggers = TriggersConfig::default();
        assert!(build_greeting_filter(&triggers).unwrap().is_none());
        assert!(build_recall_gate(&triggers).unwrap().is_none());
    }

    #[test]
    fn custom_greeting_reply_keeps_default_patterns() {
        let triggers = TriggersConfig {
            greeting: None,
            recall: None,
            greeting_reply: Some("Welcome!".into()),
        };
        let filter = build_greeting_filter(&triggers).unwrap().unwrap();
        assert_eq!(filter.check("hello"), Some("Welcome!"));
    }

    #[test]
    fn invalid_recall_pattern_is_rejected() {
        let triggers =
            TriggersConfig { greeting: None, recall: Some(vec!["(unclosed".into()]), greeting_reply: None };
        let err = build_recall_gate(&triggers).err().map(|e| e.to_string()).unwrap_or_default();
        assert!(err.contains("invalid recall pattern"));
    }

    #[tokio::test]
    async fn registry_only_exposes_configured_tools() {
        let tools = build_tool_registry(None, None);
        let ids: Vec<String> = tools.list_tools().await.unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["calculator".to_string()]);

        let knowledge = Arc::new(DomainKnowledge {
            corrections: vec![],
            services: vec![],
            team: vec![verity_runtime::knowledge::TeamMember {
                id: "t1".into(),
                name: "Lan".into(),
                role: "Tax lead".into(),
                specialties: vec![],
                contact: None,
            }],
        });
        let tools = build_tool_registry(None, Some(&knowledge));
        assert_eq!(tools.list_tools().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn runtime_builds_from_bundled_sample() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/verity.toml");
        let cfg = crate::config::load_config(path).unwrap();
        let runtime = build_runtime(&cfg, path).unwrap();
        let health = runtime.health().await;
        assert!(health.calibration_ready);
        assert_eq!(health.tools_registered, 4);
    }
}
