//! Configuration loading, validation, and management for mnemo.
//!
//! Loads configuration from `~/.mnemo/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use mnemo_core::memory::DecayConfig;
use mnemo_core::provider::ProviderCapabilities;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.mnemo/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key used when a provider entry has none of its own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Endpoint used when no `[[providers]]` are configured
    #[serde(default = "default_api_url")]
    pub default_api_url: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Orchestration loop limits
    #[serde(default)]
    pub agent: ReActConfig,

    /// Context assembly budget and retrieval limits
    #[serde(default)]
    pub context: ContextConfig,

    /// Memory hierarchy configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Circuit breaker and fallback policy
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Ordered provider chain; the first entry is tried first
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Accurate token count cache
    #[serde(default)]
    pub token_cache: TokenCacheConfig,
}

fn default_api_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_api_url", &self.default_api_url)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("agent", &self.agent)
            .field("context", &self.context)
            .field("memory", &self.memory)
            .field("resilience", &self.resilience)
            .field("providers", &self.providers)
            .field("token_cache", &self.token_cache)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

// ── Orchestration loop ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReActConfig {
    /// Maximum tool rounds per turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,

    /// Wall-clock limit for a whole turn
    #[serde(default = "default_total_timeout_ms")]
    pub total_timeout_ms: u64,

    /// Forward deltas as they arrive (false = one message per round)
    #[serde(default = "default_true")]
    pub streaming_enabled: bool,

    /// Ask the provider for a session summary on end
    #[serde(default = "default_true")]
    pub summarize_with_llm: bool,
}

fn default_max_iterations() -> u32 {
    15
}
fn default_tool_timeout_ms() -> u64 {
    30_000
}
fn default_total_timeout_ms() -> u64 {
    300_000
}

impl ReActConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_millis(self.total_timeout_ms)
    }
}

impl Default for ReActConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tool_timeout_ms: default_tool_timeout_ms(),
            total_timeout_ms: default_total_timeout_ms(),
            streaming_enabled: true,
            summarize_with_llm: true,
        }
    }
}

// ── Context assembly ──────────────────────────────────────────────────────

/// One of the eight fixed budget slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetSlot {
    SystemPrompt,
    StreamBuffer,
    WorkingMemory,
    SemanticSearch,
    GraphTraversal,
    SessionArchive,
    MetaMemory,
    ToolDefinitions,
}

impl BudgetSlot {
    pub const ALL: [BudgetSlot; 8] = [
        Self::SystemPrompt,
        Self::StreamBuffer,
        Self::WorkingMemory,
        Self::SemanticSearch,
        Self::GraphTraversal,
        Self::SessionArchive,
        Self::MetaMemory,
        Self::ToolDefinitions,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SystemPrompt => "system_prompt",
            Self::StreamBuffer => "stream_buffer",
            Self::WorkingMemory => "working_memory",
            Self::SemanticSearch => "semantic_search",
            Self::GraphTraversal => "graph_traversal",
            Self::SessionArchive => "session_archive",
            Self::MetaMemory => "meta_memory",
            Self::ToolDefinitions => "tool_definitions",
        }
    }
}

impl std::fmt::Display for BudgetSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-slot token ceilings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextBudget {
    pub system_prompt: usize,
    pub stream_buffer: usize,
    pub working_memory: usize,
    pub semantic_search: usize,
    pub graph_traversal: usize,
    pub session_archive: usize,
    pub meta_memory: usize,
    pub tool_definitions: usize,
}

impl ContextBudget {
    pub fn get(&self, slot: BudgetSlot) -> usize {
        match slot {
            BudgetSlot::SystemPrompt => self.system_prompt,
            BudgetSlot::StreamBuffer => self.stream_buffer,
            BudgetSlot::WorkingMemory => self.working_memory,
            BudgetSlot::SemanticSearch => self.semantic_search,
            BudgetSlot::GraphTraversal => self.graph_traversal,
            BudgetSlot::SessionArchive => self.session_archive,
            BudgetSlot::MetaMemory => self.meta_memory,
            BudgetSlot::ToolDefinitions => self.tool_definitions,
        }
    }

    pub fn total(&self) -> usize {
        BudgetSlot::ALL.iter().map(|s| self.get(*s)).sum()
    }
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            system_prompt: 4_000,
            stream_buffer: 8_000,
            working_memory: 16_000,
            semantic_search: 16_000,
            graph_traversal: 8_000,
            session_archive: 12_000,
            meta_memory: 4_000,
            tool_definitions: 8_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub budget: ContextBudget,

    /// Hard ceiling checked by the accurate pre-flight count
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Base instructions placed at the top of every prompt
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default = "default_stream_events")]
    pub stream_events: usize,

    #[serde(default = "default_semantic_limit")]
    pub semantic_limit: usize,

    #[serde(default = "default_graph_depth")]
    pub graph_depth: usize,

    #[serde(default = "default_archive_sessions")]
    pub archive_sessions: usize,

    #[serde(default = "default_hot_memories")]
    pub hot_memories: usize,
}

fn default_max_context_tokens() -> usize {
    128_000
}
fn default_system_prompt() -> String {
    "You are a helpful assistant with long-term memory. Use the remembered context \
     below when it is relevant, and call tools when you need more information."
        .into()
}
fn default_stream_events() -> usize {
    20
}
fn default_semantic_limit() -> usize {
    10
}
fn default_graph_depth() -> usize {
    2
}
fn default_archive_sessions() -> usize {
    3
}
fn default_hot_memories() -> usize {
    5
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget: ContextBudget::default(),
            max_context_tokens: default_max_context_tokens(),
            system_prompt: default_system_prompt(),
            stream_events: default_stream_events(),
            semantic_limit: default_semantic_limit(),
            graph_depth: default_graph_depth(),
            archive_sessions: default_archive_sessions(),
            hot_memories: default_hot_memories(),
        }
    }
}

// ── Memory ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Turns held per user before the oldest is evicted
    #[serde(default = "default_working_memory_cap")]
    pub working_memory_cap: usize,

    /// Events kept by the stream buffer trim
    #[serde(default = "default_stream_max_len")]
    pub stream_max_len: usize,

    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,

    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,

    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    /// Combined score at or above which consolidation merges instead of inserting
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f64,

    #[serde(default)]
    pub decay: DecayConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

fn default_working_memory_cap() -> usize {
    20
}
fn default_stream_max_len() -> usize {
    1_000
}
fn default_vector_weight() -> f64 {
    0.7
}
fn default_keyword_weight() -> f64 {
    0.3
}
fn default_embedding_dimensions() -> usize {
    256
}
fn default_dedup_threshold() -> f64 {
    0.85
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            working_memory_cap: default_working_memory_cap(),
            stream_max_len: default_stream_max_len(),
            vector_weight: default_vector_weight(),
            keyword_weight: default_keyword_weight(),
            embedding_dimensions: default_embedding_dimensions(),
            dedup_threshold: default_dedup_threshold(),
            decay: DecayConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

/// Background sweep schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub decay_interval_secs: u64,
    pub consolidation_interval_secs: u64,
    pub consolidation_batch_size: usize,
    /// Failed attempts after which a session is left out of consolidation
    pub consolidation_max_attempts: u32,
    pub prune_interval_secs: u64,
    pub pattern_retention_days: u32,
    pub stream_trim_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            decay_interval_secs: 3_600,
            consolidation_interval_secs: 900,
            consolidation_batch_size: 10,
            consolidation_max_attempts: 3,
            prune_interval_secs: 86_400,
            pattern_retention_days: 30,
            stream_trim_interval_secs: 300,
        }
    }
}

// ── Resilience ────────────────────────────────────────────────────────────

/// What the fallback chain does with chunks from a provider that later fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverMode {
    /// Forward every chunk as it arrives; a partial answer may precede the
    /// next provider's full answer.
    #[default]
    Eager,
    /// Hold a provider's chunks until its stream completes; discard them if
    /// it fails mid-stream.
    Buffered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Consecutive failures before a breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long an open breaker rejects calls
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    #[serde(default)]
    pub failover_mode: FailoverMode,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_ms() -> u64 {
    60_000
}

impl ResilienceConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
            failover_mode: FailoverMode::default(),
        }
    }
}

// ── Providers ─────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Name used in logs and chain-exhaustion errors
    pub name: String,

    pub api_url: String,

    /// Falls back to the top-level `api_key`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Falls back to `default_model`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub capabilities: ProviderCapabilities,
}

fn default_provider_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenCacheConfig {
    #[serde(default = "default_token_cache_capacity")]
    pub capacity: usize,

    /// Entries older than this are recounted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

fn default_token_cache_capacity() -> usize {
    10_000
}

impl Default for TokenCacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_token_cache_capacity(),
            ttl_secs: None,
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from the default path (~/.mnemo/config.toml).
    ///
    /// Environment variables override the file:
    /// - `MNEMO_API_KEY`
    /// - `MNEMO_MODEL`
    /// - `MNEMO_API_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("MNEMO_API_KEY") {
            self.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("MNEMO_MODEL") {
            self.default_model = model;
        }
        if let Ok(url) = std::env::var("MNEMO_API_URL") {
            self.default_api_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".mnemo")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be > 0".into(),
            ));
        }

        for slot in BudgetSlot::ALL {
            if self.context.budget.get(slot) == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "context.budget.{slot} must be > 0"
                )));
            }
        }

        let weights = self.memory.vector_weight + self.memory.keyword_weight;
        if self.memory.vector_weight < 0.0
            || self.memory.keyword_weight < 0.0
            || (weights - 1.0).abs() > 1e-6
        {
            return Err(ConfigError::ValidationError(
                "memory.vector_weight + memory.keyword_weight must sum to 1.0".into(),
            ));
        }

        if self.memory.working_memory_cap == 0 {
            return Err(ConfigError::ValidationError(
                "memory.working_memory_cap must be > 0".into(),
            ));
        }

        let decay = &self.memory.decay;
        let rates = [
            decay.base_rate,
            decay.fact_multiplier,
            decay.preference_multiplier,
            decay.insight_multiplier,
            decay.conversation_multiplier,
            decay.k_access,
            decay.k_relation,
            decay.k_channel,
        ];
        if rates.iter().any(|r| !r.is_finite() || *r < 0.0) {
            return Err(ConfigError::ValidationError(
                "memory.decay rates and constants must be finite and >= 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&decay.min_retention)
            || !(0.0..=1.0).contains(&decay.delete_threshold)
        {
            return Err(ConfigError::ValidationError(
                "memory.decay.min_retention and delete_threshold must be within [0, 1]".into(),
            ));
        }
        if decay.recency_boost < 1.0 {
            return Err(ConfigError::ValidationError(
                "memory.decay.recency_boost must be >= 1.0".into(),
            ));
        }

        if self.resilience.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "resilience.failure_threshold must be > 0".into(),
            ));
        }

        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "every [[providers]] entry needs a name".into(),
                ));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (top-level or on any provider).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some() || self.providers.iter().any(|p| p.api_key.is_some())
    }

    /// Generate a default config TOML string (for `config --init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_api_url: default_api_url(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            agent: ReActConfig::default(),
            context: ContextConfig::default(),
            memory: MemoryConfig::default(),
            resilience: ResilienceConfig::default(),
            providers: Vec::new(),
            token_cache: TokenCacheConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_iterations, 15);
        assert_eq!(config.agent.tool_timeout_ms, 30_000);
        assert_eq!(config.agent.total_timeout_ms, 300_000);
        assert!(config.agent.streaming_enabled);
        assert_eq!(config.resilience.failure_threshold, 5);
        assert_eq!(config.resilience.cooldown_ms, 60_000);
    }

    #[test]
    fn default_budget_sums_to_76k() {
        assert_eq!(ContextBudget::default().total(), 76_000);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_model, config.default_model);
        assert_eq!(parsed.context.budget, config.context.budget);
        assert_eq!(parsed.memory.decay, config.memory.decay);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_budget_slot_rejected() {
        let mut config = AppConfig::default();
        config.context.budget.graph_traversal = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("graph_traversal"));
    }

    #[test]
    fn hybrid_weights_must_sum_to_one() {
        let mut config = AppConfig::default();
        config.memory.vector_weight = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn decay_ranges_validated() {
        let mut config = AppConfig::default();
        config.memory.decay.min_retention = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.memory.decay.base_rate = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_threshold_and_iterations_rejected() {
        let mut config = AppConfig::default();
        config.resilience.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.agent.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        let config = result.unwrap();
        assert_eq!(config.default_model, "anthropic/claude-sonnet-4");
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("[agent]"));
        assert!(toml_str.contains("max_iterations = 15"));
        assert!(toml_str.contains("failure_threshold = 5"));
    }

    #[test]
    fn provider_chain_parsing() {
        let toml_str = r#"
default_model = "gpt-4o"

[resilience]
failure_threshold = 3
failover_mode = "buffered"

[[providers]]
name = "primary"
api_url = "https://api.openai.com/v1"
api_key = "sk-primary"

[[providers]]
name = "backup"
api_url = "http://localhost:11434/v1"
model = "llama3"
timeout_secs = 30

[providers.capabilities]
supports_tools = false
supports_vision = false
supports_thinking = false
supports_streaming = true
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].name, "primary");
        assert_eq!(config.providers[0].timeout_secs, 120);
        assert_eq!(config.providers[1].model.as_deref(), Some("llama3"));
        assert!(!config.providers[1].capabilities.supports_tools);
        assert_eq!(config.resilience.failure_threshold, 3);
        assert_eq!(config.resilience.failover_mode, FailoverMode::Buffered);
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let toml_str = r#"
[context.budget]
semantic_search = 20000

[memory.decay]
base_rate = 0.01
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.context.budget.semantic_search, 20_000);
        assert_eq!(config.context.budget.system_prompt, 4_000);
        assert_eq!(config.memory.decay.base_rate, 0.01);
        assert_eq!(config.memory.decay.min_retention, 0.1);
    }

    #[test]
    fn load_from_file_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_temperature = 3.5").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn load_from_file_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[agent\nmax_iterations = ").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = AppConfig {
            api_key: Some("sk-very-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
