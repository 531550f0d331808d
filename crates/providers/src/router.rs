//! Provider router — builds the fallback chain from configuration.
//!
//! Every `[[providers]]` entry becomes one breaker-guarded link in config
//! order. With no entries, a single link is built from `default_api_url`.

use std::sync::Arc;
use std::time::Duration;

use mnemo_config::{AppConfig, ProviderConfig};
use mnemo_core::provider::LlmProvider;
use tracing::info;

use crate::circuit_breaker::CircuitBreaker;
use crate::fallback::{ChainEntry, FallbackChain};
use crate::openai_compat::OpenAiCompatProvider;

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> Option<&'static str> {
    Some(match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1",
        "openai" => "https://api.openai.com/v1",
        "ollama" => "http://localhost:11434/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "fireworks" => "https://api.fireworks.ai/inference/v1",
        "vllm" => "http://localhost:8000/v1",
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1",
        _ => return None,
    })
}

/// Build one provider from its config entry.
pub fn build_provider(entry: &ProviderConfig, config: &AppConfig) -> OpenAiCompatProvider {
    let api_key = entry
        .api_key
        .clone()
        .or_else(|| config.api_key.clone())
        .unwrap_or_default();

    let base_url = if entry.api_url.trim().is_empty() {
        default_base_url(&entry.name)
            .unwrap_or(config.default_api_url.as_str())
            .to_string()
    } else {
        entry.api_url.clone()
    };

    OpenAiCompatProvider::new(&entry.name, base_url, api_key)
        .with_timeout(Duration::from_secs(entry.timeout_secs))
        .with_capabilities(entry.capabilities)
}

/// Build the fallback chain described by `config`.
pub fn build_chain(config: &AppConfig) -> FallbackChain {
    let mut chain = FallbackChain::new("main").with_mode(config.resilience.failover_mode);

    let entries = if config.providers.is_empty() {
        vec![ProviderConfig {
            name: "default".into(),
            api_url: config.default_api_url.clone(),
            api_key: None,
            model: None,
            timeout_secs: 120,
            capabilities: Default::default(),
        }]
    } else {
        config.providers.clone()
    };

    for entry in &entries {
        let provider: Arc<dyn LlmProvider> = Arc::new(build_provider(entry, config));
        let breaker = Arc::new(CircuitBreaker::from_config(&entry.name, &config.resilience));
        let mut link = ChainEntry::new(provider, breaker)
            .with_timeout(Duration::from_secs(entry.timeout_secs));
        if let Some(model) = &entry.model {
            link = link.with_model(model);
        }
        chain = chain.add(link);
    }

    info!(
        providers = chain.len(),
        mode = ?config.resilience.failover_mode,
        "Provider chain ready"
    );
    chain
}
