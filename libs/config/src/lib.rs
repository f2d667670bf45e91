//! # Priceverse Configuration
//!
//! Nested configuration for every service in the pipeline, loaded from an
//! optional TOML file and overridden by environment variables with the
//! `PRICEVERSE` prefix and `__` as the nesting separator, e.g.
//! `PRICEVERSE_AGGREGATION__WINDOW_SIZE=30000`.
//!
//! Every field carries a serde default so a process with no file and no
//! environment still starts with a usable development configuration.

use std::path::Path;

use anyhow::{Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Root configuration shared by the pipeline binary and the RPC server.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub logging: LoggingSection,
    pub database: DatabaseSection,
    pub redis: RedisSection,
    pub exchanges: ExchangesSection,
    pub aggregation: AggregationSection,
    pub cbr: CbrSection,
    pub retention: RetentionSection,
    pub alerts: AlertsSection,
    pub api: ApiSection,
}

/// RPC server bind and identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppSection {
    pub host: String,
    pub port: u16,
    /// Reported in alert payloads and health responses
    pub environment: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            environment: "development".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSection {
    /// tracing env-filter directive, e.g. `info` or `priceverse=debug`
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Postgres connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub dialect: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub ssl: bool,
    #[serde(alias = "sslRejectUnauthorized")]
    pub ssl_reject_unauthorized: bool,
    pub pool: PoolSection,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            dialect: "postgres".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            database: "priceverse".to_string(),
            user: "priceverse".to_string(),
            password: String::new(),
            ssl: false,
            ssl_reject_unauthorized: true,
            pool: PoolSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolSection {
    pub min: u32,
    pub max: u32,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self { min: 1, max: 10 }
    }
}

/// Redis connection settings (streams, buffer, cache, pub/sub).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisSection {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
}

impl Default for RedisSection {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
        }
    }
}

impl RedisSection {
    /// Connection URL in the `redis://` scheme.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => {
                format!("redis://:{}@{}:{}/{}", password, self.host, self.port, self.db)
            }
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// Which of the six venues run collectors.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExchangesSection {
    pub enabled: Vec<String>,
}

impl Default for ExchangesSection {
    fn default() -> Self {
        Self {
            enabled: ["binance", "coinbase", "kraken", "kucoin", "okx", "bybit"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Stream aggregator knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregationSection {
    /// Tick interval in milliseconds
    pub interval: u64,
    /// Trailing VWAP window in milliseconds
    #[serde(alias = "windowSize")]
    pub window_size: u64,
    /// Base pairs to aggregate
    pub pairs: Vec<String>,
    /// Consumption-loop circuit-breaker threshold
    #[serde(alias = "maxConsecutiveErrors")]
    pub max_consecutive_errors: u32,
}

impl Default for AggregationSection {
    fn default() -> Self {
        Self {
            interval: 10_000,
            window_size: 30_000,
            pairs: ["btc-usd", "eth-usd", "xmr-usd"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_consecutive_errors: 10,
        }
    }
}

/// Central Bank fiat-rate source.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CbrSection {
    pub url: String,
    /// Seconds a fetched rate stays fresh
    #[serde(alias = "cacheTtl")]
    pub cache_ttl: u64,
    #[serde(alias = "retryAttempts")]
    pub retry_attempts: u32,
    /// Milliseconds between fetch retries
    #[serde(alias = "retryDelay")]
    pub retry_delay: u64,
    /// Rate used before the first successful fetch; `None` disables
    /// RUB derivation until the source succeeds
    #[serde(alias = "fallbackRate")]
    pub fallback_rate: Option<f64>,
}

impl Default for CbrSection {
    fn default() -> Self {
        Self {
            url: "https://www.cbr-xml-daily.ru/daily_json.js".to_string(),
            cache_ttl: 3600,
            retry_attempts: 3,
            retry_delay: 5000,
            fallback_rate: Some(90.0),
        }
    }
}

/// Retention sweeper policy; a zero day count means keep forever.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetentionSection {
    pub enabled: bool,
    #[serde(alias = "priceHistoryDays")]
    pub price_history_days: u32,
    #[serde(alias = "candles5minDays")]
    pub candles_5min_days: u32,
    #[serde(alias = "candles1hourDays")]
    pub candles_1hour_days: u32,
    #[serde(alias = "candles1dayDays")]
    pub candles_1day_days: u32,
    /// Six-field cron expression, local time
    #[serde(alias = "cleanupSchedule")]
    pub cleanup_schedule: String,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            enabled: true,
            price_history_days: 7,
            candles_5min_days: 30,
            candles_1hour_days: 365,
            candles_1day_days: 0,
            cleanup_schedule: "0 0 3 * * *".to_string(),
        }
    }
}

/// Alert sink and trigger thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertsSection {
    pub enabled: bool,
    #[serde(alias = "webhookUrl")]
    pub webhook_url: Option<String>,
    pub thresholds: AlertThresholds,
}

impl Default for AlertsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            thresholds: AlertThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Seconds a collector may stay disconnected before a warning
    #[serde(alias = "collectorDisconnectSecs")]
    pub collector_disconnect_secs: u64,
    /// Aggregator consecutive errors before a critical alert
    #[serde(alias = "aggregatorConsecutiveErrors")]
    pub aggregator_consecutive_errors: u32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            collector_disconnect_secs: 300,
            aggregator_consecutive_errors: 5,
        }
    }
}

/// Boundary knobs for the RPC surface.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiSection {
    #[serde(alias = "rateLimit")]
    pub rate_limit: RateLimitSection,
    pub cache: CacheSection,
    pub streaming: StreamingSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub enabled: bool,
    /// Sliding window length in milliseconds
    #[serde(alias = "windowMs")]
    pub window_ms: u64,
    /// Maximum requests per window
    #[serde(alias = "maxRequests")]
    pub max_requests: u32,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 60_000,
            max_requests: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSection {
    /// Seconds a cached price stays servable
    #[serde(alias = "priceTtlSecs")]
    pub price_ttl_secs: u64,
    /// Age beyond which a cached price counts as a miss
    #[serde(alias = "staleAfterSecs")]
    pub stale_after_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            price_ttl_secs: 60,
            stale_after_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamingSection {
    /// Milliseconds without a message before a subscriber is closed
    #[serde(alias = "idleTimeout")]
    pub idle_timeout_ms: u64,
    /// Bounded subscriber queue; the oldest entry is dropped on overflow
    #[serde(alias = "maxQueueSize")]
    pub max_queue_size: usize,
}

impl Default for StreamingSection {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 60_000,
            max_queue_size: 1000,
        }
    }
}

impl AppConfig {
    /// Load configuration: file (optional) < environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(File::from(path).required(true));
        } else {
            builder = builder.add_source(File::with_name("config/priceverse").required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("PRICEVERSE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("failed to build configuration")?;
        config
            .try_deserialize()
            .context("failed to deserialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_runnable() {
        let config = AppConfig::default();
        assert_eq!(config.aggregation.interval, 10_000);
        assert_eq!(config.aggregation.window_size, 30_000);
        assert_eq!(config.aggregation.max_consecutive_errors, 10);
        assert_eq!(config.retention.price_history_days, 7);
        assert_eq!(config.retention.candles_1day_days, 0);
        assert_eq!(config.api.rate_limit.max_requests, 100);
        assert_eq!(config.api.streaming.max_queue_size, 1000);
        assert_eq!(config.exchanges.enabled.len(), 6);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("priceverse.toml");
        fs::write(
            &path,
            r#"
[app]
port = 9000

[aggregation]
windowSize = 45000
pairs = ["btc-usd"]

[retention]
candles5minDays = 14
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.app.port, 9000);
        assert_eq!(config.aggregation.window_size, 45_000);
        assert_eq!(config.aggregation.pairs, vec!["btc-usd"]);
        assert_eq!(config.retention.candles_5min_days, 14);
        // Untouched sections keep their defaults.
        assert_eq!(config.redis.port, 6379);
    }

    #[test]
    fn redis_url_includes_password_when_set() {
        let mut redis = RedisSection::default();
        assert_eq!(redis.url(), "redis://localhost:6379/0");
        redis.password = Some("hunter2".to_string());
        assert_eq!(redis.url(), "redis://:hunter2@localhost:6379/0");
    }
}
