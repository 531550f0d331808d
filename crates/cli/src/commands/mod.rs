pub mod chat;
pub mod config_cmd;
pub mod health;
pub mod maintain;

use mnemo_agent::Orchestrator;
use mnemo_config::AppConfig;
use mnemo_core::memory::MemoryLayers;
use mnemo_core::provider::LlmProvider;
use mnemo_memory::{ConsolidationEngine, Maintenance};
use std::sync::Arc;

/// Everything a command needs, wired from configuration.
pub struct Runtime {
    pub config: AppConfig,
    pub layers: MemoryLayers,
    pub provider: Arc<dyn LlmProvider>,
    pub engine: Orchestrator,
}

impl Runtime {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: AppConfig) -> Self {
        let layers = mnemo_memory::in_memory_layers(&config.memory);
        let provider: Arc<dyn LlmProvider> = Arc::new(mnemo_providers::build_chain(&config));
        let engine = Orchestrator::from_config(&config, layers.clone(), provider.clone());
        Self {
            config,
            layers,
            provider,
            engine,
        }
    }

    pub fn maintenance(&self) -> Maintenance {
        let engine = ConsolidationEngine::new(
            self.provider.clone(),
            &self.config.default_model,
            self.layers.episodic.clone(),
            self.layers.semantic.clone(),
        )
        .with_dedup_threshold(self.config.memory.dedup_threshold)
        .with_batch_size(self.config.memory.maintenance.consolidation_batch_size)
        .with_max_attempts(self.config.memory.maintenance.consolidation_max_attempts);

        Maintenance::new(self.layers.clone(), self.config.memory.clone())
            .with_consolidation(Arc::new(engine))
    }
}
