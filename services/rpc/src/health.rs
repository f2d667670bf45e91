//! HealthService@1.0.0

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use pv_types::{aggregate_health, ComponentHealth, CoreError, HealthLevel};

/// Anything that can report per-component health. Implemented by the
/// pipeline's health probe; the indirection keeps this crate free of a
/// dependency on the supervisor.
#[async_trait]
pub trait HealthSource: Send + Sync {
    async fn components(&self) -> Vec<ComponentHealth>;
}

/// Service health endpoint over a pluggable probe.
pub struct HealthService {
    source: Arc<dyn HealthSource>,
    version: String,
    started_at: Instant,
}

impl HealthService {
    pub fn new(source: Arc<dyn HealthSource>, version: impl Into<String>) -> Self {
        Self {
            source,
            version: version.into(),
            started_at: Instant::now(),
        }
    }

    /// Full health report with per-component checks.
    pub async fn check(&self) -> Result<Value, CoreError> {
        let started = Instant::now();
        let components = self.source.components().await;
        let overall = aggregate_health(&components);

        let mut checks = Map::new();
        for component in &components {
            let mut entry = Map::new();
            entry.insert("status".to_string(), json!(component.level));
            if let Some(latency) = component.latency_ms {
                entry.insert("latency".to_string(), json!(latency));
            }
            if let Some(message) = &component.message {
                entry.insert("message".to_string(), json!(message));
            }
            checks.insert(component.name.clone(), Value::Object(entry));
        }

        Ok(json!({
            "status": overall,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "uptime": self.started_at.elapsed().as_secs(),
            "version": self.version,
            "checks": checks,
            "latency": started.elapsed().as_millis() as u64,
        }))
    }

    /// Liveness: the process is up.
    pub fn live(&self) -> Value {
        json!({ "status": "up" })
    }

    /// Readiness: up unless some component reports unhealthy.
    pub async fn ready(&self) -> Value {
        let components = self.source.components().await;
        match aggregate_health(&components) {
            HealthLevel::Unhealthy => {
                let failing: Vec<&str> = components
                    .iter()
                    .filter(|c| c.level == HealthLevel::Unhealthy)
                    .map(|c| c.name.as_str())
                    .collect();
                json!({
                    "status": "down",
                    "message": format!("unhealthy components: {}", failing.join(", ")),
                })
            }
            _ => json!({ "status": "up", "message": "ready" }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(Vec<ComponentHealth>);

    #[async_trait]
    impl HealthSource for FixedSource {
        async fn components(&self) -> Vec<ComponentHealth> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn check_reports_components_and_overall_status() {
        let service = HealthService::new(
            Arc::new(FixedSource(vec![
                ComponentHealth::healthy("database"),
                ComponentHealth::degraded("binance:feed", "no trades for 90s"),
            ])),
            "1.0.0",
        );
        let report = service.check().await.unwrap();
        assert_eq!(report["status"], "degraded");
        assert_eq!(report["checks"]["database"]["status"], "healthy");
        assert_eq!(
            report["checks"]["binance:feed"]["message"],
            "no trades for 90s"
        );
        assert_eq!(report["version"], "1.0.0");
    }

    #[tokio::test]
    async fn ready_goes_down_on_unhealthy_component() {
        let service = HealthService::new(
            Arc::new(FixedSource(vec![ComponentHealth::unhealthy(
                "redis", "ping failed",
            )])),
            "1.0.0",
        );
        let ready = service.ready().await;
        assert_eq!(ready["status"], "down");
        assert!(ready["message"].as_str().unwrap().contains("redis"));
    }

    #[tokio::test]
    async fn live_is_always_up() {
        let service = HealthService::new(Arc::new(FixedSource(vec![])), "1.0.0");
        assert_eq!(service.live()["status"], "up");
    }
}
