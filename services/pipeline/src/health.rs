//! Pipeline health probe
//!
//! Samples every worker plus the database and Redis into the component
//! list the health service aggregates. Store checks are real round trips
//! (`SELECT 1`, `PING`) with their latency attached.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use sqlx::PgPool;

use aggregator_service::{CbrRateSource, StreamAggregator};
use collector_service::AnyCollector;
use pv_types::ComponentHealth;
use rpc_service::HealthSource;

/// Samples all pipeline components on demand.
pub struct HealthProbe {
    collectors: Vec<Arc<AnyCollector>>,
    aggregator: Arc<StreamAggregator>,
    fiat: Arc<CbrRateSource>,
    pool: PgPool,
    redis: ConnectionManager,
}

impl HealthProbe {
    pub fn new(
        collectors: Vec<Arc<AnyCollector>>,
        aggregator: Arc<StreamAggregator>,
        fiat: Arc<CbrRateSource>,
        pool: PgPool,
        redis: ConnectionManager,
    ) -> Self {
        Self {
            collectors,
            aggregator,
            fiat,
            pool,
            redis,
        }
    }

    async fn check_database(&self) -> ComponentHealth {
        let started = Instant::now();
        let mut component = match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => ComponentHealth::healthy("database"),
            Err(err) => ComponentHealth::unhealthy("database", err.to_string()),
        };
        component.latency_ms = Some(started.elapsed().as_millis() as u64);
        component
    }

    async fn check_redis(&self) -> ComponentHealth {
        let started = Instant::now();
        let mut conn = self.redis.clone();
        let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        let mut component = match result {
            Ok(_) => ComponentHealth::healthy("redis"),
            Err(err) => ComponentHealth::unhealthy("redis", err.to_string()),
        };
        component.latency_ms = Some(started.elapsed().as_millis() as u64);
        component
    }
}

#[async_trait]
impl HealthSource for HealthProbe {
    async fn components(&self) -> Vec<ComponentHealth> {
        let mut components = Vec::with_capacity(self.collectors.len() + 4);

        components.push(self.check_database().await);
        components.push(self.check_redis().await);
        components.push(self.fiat.health().await);

        let (_, aggregator_checks) = self.aggregator.health_check();
        components.extend(aggregator_checks);

        for collector in &self.collectors {
            components.extend(collector.health_check().checks);
        }

        components
    }
}
