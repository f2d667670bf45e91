//! Component health reporting

use serde::{Deserialize, Serialize};

/// Health level for a component or the whole service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    /// Working normally
    Healthy,
    /// Functional with issues worth surfacing
    Degraded,
    /// Not functional
    Unhealthy,
}

impl HealthLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthLevel::Healthy => "healthy",
            HealthLevel::Degraded => "degraded",
            HealthLevel::Unhealthy => "unhealthy",
        }
    }
}

/// One component's contribution to the service health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub level: HealthLevel,
    /// Sampling latency when the check performed I/O
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: HealthLevel::Healthy,
            latency_ms: None,
            message: None,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: HealthLevel::Degraded,
            latency_ms: None,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: HealthLevel::Unhealthy,
            latency_ms: None,
            message: Some(message.into()),
        }
    }
}

/// Combine component levels: unhealthy if any fail, else degraded if any
/// warn, else healthy.
pub fn aggregate_health(components: &[ComponentHealth]) -> HealthLevel {
    let mut level = HealthLevel::Healthy;
    for component in components {
        match component.level {
            HealthLevel::Unhealthy => return HealthLevel::Unhealthy,
            HealthLevel::Degraded => level = HealthLevel::Degraded,
            HealthLevel::Healthy => {}
        }
    }
    level
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_rule() {
        assert_eq!(aggregate_health(&[]), HealthLevel::Healthy);
        assert_eq!(
            aggregate_health(&[ComponentHealth::healthy("a"), ComponentHealth::healthy("b")]),
            HealthLevel::Healthy
        );
        assert_eq!(
            aggregate_health(&[
                ComponentHealth::healthy("a"),
                ComponentHealth::degraded("b", "slow"),
            ]),
            HealthLevel::Degraded
        );
        assert_eq!(
            aggregate_health(&[
                ComponentHealth::degraded("a", "slow"),
                ComponentHealth::unhealthy("b", "down"),
            ]),
            HealthLevel::Unhealthy
        );
    }
}
