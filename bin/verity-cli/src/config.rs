//! Configuration types for the CLI, loaded from `verity.toml`.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use verity_runtime::{
    calibration::SynthesisConfig, evidence::EvidencePolicy, knowledge::DomainKnowledge,
};

/// Top-level CLI configuration.
#[derive(Debug, Deserialize)]
pub(crate) struct VerityConfig {
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub evidence: EvidencePolicy,
    #[serde(default)]
    pub triggers: TriggersConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    pub knowledge: Option<KnowledgeConfig>,
    pub corpus: Option<CorpusConfig>,
}

/// Core runtime settings. Unset values keep the runtime defaults.
#[derive(Debug, Deserialize)]
pub(crate) struct RuntimeConfig {
    /// Default model identifier (e.g. `"openai:gpt-4o-mini"`).
    pub default_model: String,
    /// Tried once after retries against the default model fail.
    pub fallback_model: Option<String>,
    pub max_steps: Option<u32>,
    pub query_timeout_ms: Option<u64>,
    pub tool_timeout_ms: Option<u64>,
    pub keepalive_interval_ms: Option<u64>,
    pub llm_max_attempts: Option<u32>,
    /// Per-tool timeout overrides keyed by tool id.
    #[serde(default)]
    pub tool_timeouts: HashMap<String, u64>,
}

/// Pattern overrides for the greeting and recall gates.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct TriggersConfig {
    pub greeting: Option<Vec<String>>,
    pub recall: Option<Vec<String>>,
    pub greeting_reply: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct KnowledgeConfig {
    /// TOML file with `corrections`, `services` and `team` tables.
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CorpusConfig {
    /// JSON array of `{id, content}` documents.
    pub path: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_collection() -> String {
    "kb".to_string()
}

const fn default_top_k() -> usize {
    5
}

/// Load configuration from a TOML file at the given path.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub(crate) fn load_config(path: &str) -> eyre::Result<VerityConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(true))
        .build()?;
    let cfg: VerityConfig = settings.try_deserialize()?;
    Ok(cfg)
}

/// Load the domain knowledge file.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub(crate) fn load_knowledge(path: &Path) -> eyre::Result<DomainKnowledge> {
    let settings =
        config::Config::builder().add_source(config::File::from(path).required(true)).build()?;
    Ok(settings.try_deserialize()?)
}

/// Resolve `path` against the directory holding the config file.
pub(crate) fn resolve_relative(config_path: &str, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    Path::new(config_path).parent().map_or_else(|| path.to_path_buf(), |dir| dir.join(path))
}

// ── Tests ────────────────────────────────────────────────────────────
