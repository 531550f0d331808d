//! Background maintenance — decay, consolidation, pattern pruning, stream trim.
//!
//! Each sweep runs on its own interval inside one spawned task, fully
//! detached from the request path. A failed sweep is logged and the next tick
//! runs as usual.

use mnemo_config::MemoryConfig;
use mnemo_core::memory::{DecayRunStats, MemoryLayers};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::consolidation::{ConsolidationEngine, ConsolidationReport};

/// What one full maintenance pass did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub decay: Option<DecayRunStats>,
    pub consolidation: Option<ConsolidationReport>,
    pub patterns_pruned: usize,
    pub stream_trimmed: usize,
}

/// Runs the memory sweeps, once or on a schedule.
#[derive(Clone)]
pub struct Maintenance {
    layers: MemoryLayers,
    consolidation: Option<Arc<ConsolidationEngine>>,
    config: MemoryConfig,
}

/// Handle to a running scheduler. Dropping it does not stop the task; call
/// [`MaintenanceHandle::shutdown`].
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Signal the scheduler to stop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Maintenance task ended abnormally");
        }
    }
}

impl Maintenance {
    pub fn new(layers: MemoryLayers, config: MemoryConfig) -> Self {
        Self {
            layers,
            consolidation: None,
            config,
        }
    }

    pub fn with_consolidation(mut self, engine: Arc<ConsolidationEngine>) -> Self {
        self.consolidation = Some(engine);
        self
    }

    /// Set each memory's connection count to the number of graph relations
    /// touching the entities it names. Returns how many memories changed.
    pub async fn refresh_connections(&self) -> usize {
        let memories = match self.layers.semantic.list().await {
            Ok(memories) => memories,
            Err(e) => {
                warn!(error = %e, "Could not list memories for connection refresh");
                return 0;
            }
        };

        let conceptual = &self.layers.conceptual;
        let mut changed = 0;
        for memory in memories {
            let entities = match conceptual.match_entities(&memory.content, usize::MAX).await {
                Ok(entities) => entities,
                Err(e) => {
                    warn!(memory_id = %memory.id, error = %e, "Entity match failed");
                    continue;
                }
            };
            let mut degree = 0usize;
            for entity in &entities {
                match conceptual.degree(&entity.id).await {
                    Ok(d) => degree += d,
                    Err(e) => warn!(entity_id = %entity.id, error = %e, "Degree lookup failed"),
                }
            }
            let count = u32::try_from(degree).unwrap_or(u32::MAX);
            if count == memory.connection_count {
                continue;
            }
            match self.layers.semantic.set_connection_count(&memory.id, count).await {
                Ok(()) => changed += 1,
                Err(e) => warn!(memory_id = %memory.id, error = %e, "Connection count update failed"),
            }
        }
        debug!(changed, "Memory connection counts refreshed");
        changed
    }

    /// Refresh connection counts, then decay every memory.
    pub async fn run_decay(&self) -> Option<DecayRunStats> {
        self.refresh_connections().await;
        match self.layers.semantic.decay(&self.config.decay).await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(error = %e, "Decay sweep failed");
                None
            }
        }
    }

    pub async fn run_consolidation(&self) -> Option<ConsolidationReport> {
        let engine = self.consolidation.as_ref()?;
        match engine.run().await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Consolidation sweep failed");
                None
            }
        }
    }

    pub async fn run_prune(&self) -> usize {
        let days = self.config.maintenance.pattern_retention_days;
        match self.layers.meta.prune_old_patterns(days).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Meta pattern prune failed");
                0
            }
        }
    }

    pub async fn run_trim(&self) -> usize {
        match self.layers.stream.trim(self.config.stream_max_len).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Stream trim failed");
                0
            }
        }
    }

    /// Run every sweep once, in order.
    pub async fn run_once(&self) -> MaintenanceReport {
        let report = MaintenanceReport {
            decay: self.run_decay().await,
            consolidation: self.run_consolidation().await,
            patterns_pruned: self.run_prune().await,
            stream_trimmed: self.run_trim().await,
        };
        info!(
            patterns_pruned = report.patterns_pruned,
            stream_trimmed = report.stream_trimmed,
            "Maintenance pass complete"
        );
        report
    }

    /// Start the background scheduler.
    pub fn start(self) -> MaintenanceHandle {
        let (tx, mut rx) = watch::channel(false);
        let sched = self.config.maintenance.clone();

        let task = tokio::spawn(async move {
            let ticker = |secs: u64| {
                let period = Duration::from_secs(secs.max(1));
                let mut t = interval_at(Instant::now() + period, period);
                t.set_missed_tick_behavior(MissedTickBehavior::Skip);
                t
            };
            let mut decay = ticker(sched.decay_interval_secs);
            let mut consolidate = ticker(sched.consolidation_interval_secs);
            let mut prune = ticker(sched.prune_interval_secs);
            let mut trim = ticker(sched.stream_trim_interval_secs);

            info!("Memory maintenance scheduler started");
            loop {
                tokio::select! {
                    _ = decay.tick() => { self.run_decay().await; }
                    _ = consolidate.tick() => { self.run_consolidation().await; }
                    _ = prune.tick() => {
                        let n = self.run_prune().await;
                        debug!(pruned = n, "Meta prune tick");
                    }
                    _ = trim.tick() => {
                        let n = self.run_trim().await;
                        debug!(trimmed = n, "Stream trim tick");
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            info!("Memory maintenance scheduler stopped");
                            return;
                        }
                    }
                }
            }
        });

        MaintenanceHandle { shutdown: tx, task }
    }
}
