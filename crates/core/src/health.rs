//! Component health reporting and worst-of aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Health of a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// The outcome of one `health_check()` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub state: HealthState,
    pub latency_ms: Option<u64>,
    pub message: Option<String>,
    pub last_checked: DateTime<Utc>,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self::with_state(HealthState::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_state(HealthState::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_state(HealthState::Unhealthy, Some(message.into()))
    }

    fn with_state(state: HealthState, message: Option<String>) -> Self {
        Self {
            state,
            latency_ms: None,
            message,
            last_checked: Utc::now(),
        }
    }

    /// Attach a measured latency.
    pub fn with_latency(mut self, latency: std::time::Duration) -> Self {
        self.latency_ms = Some(latency.as_millis() as u64);
        self
    }
}

/// Combined health of several components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub state: HealthState,
    pub components: BTreeMap<String, ComponentHealth>,
    pub checked_at: DateTime<Utc>,
}

/// Combine named health checks into one worst-of status.
///
/// Any unhealthy component makes the whole unhealthy, else any degraded
/// component makes it degraded. A check that failed outright counts as
/// unhealthy, with the failure reason as its message.
pub fn aggregate<E, I>(checks: I) -> HealthStatus
where
    E: std::fmt::Display,
    I: IntoIterator<Item = (String, Result<ComponentHealth, E>)>,
{
    let mut components = BTreeMap::new();
    let mut worst = HealthState::Healthy;

    for (name, outcome) in checks {
        let health = match outcome {
            Ok(h) => h,
            Err(e) => ComponentHealth::unhealthy(e.to_string()),
        };
        worst = worst.max(health.state);
        components.insert(name, health);
    }

    HealthStatus {
        state: worst,
        components,
        checked_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(state: HealthState) -> Result<ComponentHealth, String> {
        Ok(ComponentHealth::with_state(state, None))
    }

    #[test]
    fn all_healthy() {
        let status = aggregate(vec![
            ("a".to_string(), ok(HealthState::Healthy)),
            ("b".to_string(), ok(HealthState::Healthy)),
        ]);
        assert_eq!(status.state, HealthState::Healthy);
        assert_eq!(status.components.len(), 2);
    }

    #[test]
    fn degraded_wins_over_healthy() {
        let status = aggregate(vec![
            ("a".to_string(), ok(HealthState::Healthy)),
            ("b".to_string(), ok(HealthState::Degraded)),
        ]);
        assert_eq!(status.state, HealthState::Degraded);
    }

    #[test]
    fn unhealthy_wins_over_everything() {
        let status = aggregate(vec![
            ("a".to_string(), ok(HealthState::Degraded)),
            ("b".to_string(), ok(HealthState::Unhealthy)),
            ("c".to_string(), ok(HealthState::Healthy)),
        ]);
        assert_eq!(status.state, HealthState::Unhealthy);
    }

    #[test]
    fn rejected_check_is_unhealthy_with_reason() {
        let status = aggregate(vec![
            ("store".to_string(), ok(HealthState::Healthy)),
            ("db".to_string(), Err("connection refused".to_string())),
        ]);
        assert_eq!(status.state, HealthState::Unhealthy);
        let db = &status.components["db"];
        assert_eq!(db.state, HealthState::Unhealthy);
        assert_eq!(db.message.as_deref(), Some("connection refused"));
    }

    #[test]
    fn empty_is_healthy() {
        let status = aggregate(Vec::<(String, Result<ComponentHealth, String>)>::new());
        assert_eq!(status.state, HealthState::Healthy);
    }
}
