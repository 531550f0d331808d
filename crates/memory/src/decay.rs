//! Importance decay calculator.
//!
//! A memory's importance fades exponentially with time since it was last
//! touched. Repeated access, graph connections and mentions across several
//! channels slow the fade; the original importance is always the ceiling and
//! `min_retention * importance` the floor.
//!
//! Decay is computed from the original importance on every pass, not from the
//! previous decayed value, so running the sweep twice at the same instant
//! yields the same result.

use chrono::{DateTime, Utc};
use mnemo_core::memory::{DecayConfig, Memory, MemoryType};

/// Everything the calculator needs to know about one memory.
#[derive(Debug, Clone, PartialEq)]
pub struct DecayInput {
    pub importance: f64,
    pub memory_type: MemoryType,
    pub access_count: u32,
    pub connection_count: u32,
    /// Distinct channels the memory was mentioned in.
    pub channel_mentions: usize,
    /// Hours since the memory was last accessed; drives the exponent.
    pub hours_elapsed: f64,
    /// Hours since the memory was created.
    pub age_hours: f64,
    pub last_accessed_hours_ago: f64,
}

fn hours_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    ((later - earlier).num_milliseconds() as f64 / 3_600_000.0).max(0.0)
}

impl DecayInput {
    pub fn from_memory(memory: &Memory, now: DateTime<Utc>) -> Self {
        let since_access = hours_between(memory.last_accessed, now);
        Self {
            importance: memory.importance,
            memory_type: memory.memory_type,
            access_count: memory.access_count,
            connection_count: memory.connection_count,
            channel_mentions: memory.channel_count(),
            hours_elapsed: since_access,
            age_hours: hours_between(memory.created_at, now),
            last_accessed_hours_ago: since_access,
        }
    }
}

/// Decayed importance for one memory. Pure; no I/O, no shared state.
pub fn decay(input: &DecayInput, config: &DecayConfig) -> f64 {
    let importance = input.importance;
    if importance <= 0.0 {
        return 0.0;
    }

    let type_multiplier = config.type_multiplier(input.memory_type);
    let stability = 1.0 + config.k_access * (1.0 + input.access_count as f64).ln();
    let resistance = (input.connection_count as f64 * config.k_relation).min(1.0);
    let channel_boost = 1.0 / (1.0 + config.k_channel * input.channel_mentions as f64);

    let effective_rate =
        config.base_rate * type_multiplier * channel_boost / stability * (1.0 - resistance);

    let mut decayed = importance * (-effective_rate * input.hours_elapsed.max(0.0)).exp();

    // Old but recently used memories get a bounded boost.
    if input.age_hours > config.recency_age_threshold_hours
        && input.last_accessed_hours_ago < config.recency_access_threshold_hours
    {
        decayed = (decayed * config.recency_boost).min(importance);
    }

    decayed.max(config.min_retention * importance).min(importance)
}

/// Element-wise [`decay`]. `decay_batch(xs)[i] == decay(&xs[i])` for every `i`.
pub fn decay_batch(inputs: &[DecayInput], config: &DecayConfig) -> Vec<f64> {
    inputs.iter().map(|input| decay(input, config)).collect()
}

/// Deletion policy, applied by the sweep rather than the calculator.
pub fn should_delete(decayed_importance: f64, config: &DecayConfig) -> bool {
    decayed_importance < config.delete_threshold
}
