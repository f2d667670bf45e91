//! Central Bank fiat-rate source
//!
//! Fetches the daily USD→RUB quote on a fixed cadence and keeps the last
//! known value readable without blocking. Single writer, many readers: the
//! refresh loop owns the write side, everyone else takes snapshots. A rate
//! is *stale* once its age exceeds twice the cache TTL and *fallback* when
//! the source has never succeeded in this process.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pv_config::CbrSection;
use pv_types::{ComponentHealth, CoreError, FiatRate, RateStatus};

struct RateState {
    rate: Decimal,
    fetched_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

struct CbrInner {
    http: reqwest::Client,
    url: String,
    cache_ttl: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
    state: RwLock<RateState>,
}

impl CbrInner {
    async fn refresh(&self) -> Result<(), CoreError> {
        let mut last_err = None;
        for attempt in 1..=self.retry_attempts {
            match self.fetch_once().await {
                Ok(rate) => {
                    let mut state = self.state.write().await;
                    state.rate = rate;
                    state.fetched_at = Some(Utc::now());
                    state.consecutive_failures = 0;
                    info!(%rate, "fiat rate refreshed");
                    return Ok(());
                }
                Err(err) => {
                    debug!(attempt, %err, "fiat rate fetch failed");
                    last_err = Some(err);
                    if attempt < self.retry_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        let mut state = self.state.write().await;
        state.consecutive_failures += 1;
        warn!(
            failures = state.consecutive_failures,
            "fiat rate refresh exhausted retries, keeping last value"
        );
        Err(last_err.unwrap_or(CoreError::ServiceUnavailable {
            detail: "fiat rate fetch failed".to_string(),
        }))
    }

    async fn fetch_once(&self) -> Result<Decimal, CoreError> {
        let unavailable = |detail: String| CoreError::ServiceUnavailable { detail };

        let body: Value = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|err| unavailable(format!("cbr request failed: {err}")))?
            .error_for_status()
            .map_err(|err| unavailable(format!("cbr returned error status: {err}")))?
            .json()
            .await
            .map_err(|err| unavailable(format!("cbr response was not json: {err}")))?;

        let value = body
            .pointer("/Valute/USD/Value")
            .and_then(Value::as_f64)
            .ok_or_else(|| unavailable("cbr response missing Valute.USD.Value".to_string()))?;
        let rate = Decimal::try_from(value)
            .map_err(|_| unavailable(format!("cbr rate not representable: {value}")))?;
        if rate <= Decimal::ZERO {
            return Err(unavailable(format!("cbr returned non-positive rate: {rate}")));
        }
        Ok(rate)
    }
}

/// The CBR USD→RUB rate with fresh/stale/fallback semantics.
pub struct CbrRateSource {
    inner: Arc<CbrInner>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CbrRateSource {
    pub fn new(config: &CbrSection) -> Self {
        let fallback = config
            .fallback_rate
            .and_then(|rate| Decimal::try_from(rate).ok())
            .unwrap_or(Decimal::ZERO);
        let (stop_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(CbrInner {
                http: reqwest::Client::new(),
                url: config.url.clone(),
                cache_ttl: Duration::from_secs(config.cache_ttl.max(1)),
                retry_attempts: config.retry_attempts.max(1),
                retry_delay: Duration::from_millis(config.retry_delay),
                state: RwLock::new(RateState {
                    rate: fallback,
                    fetched_at: None,
                    consecutive_failures: 0,
                }),
            }),
            stop_tx,
            task: Mutex::new(None),
        }
    }

    /// Current snapshot. Never blocks on the network; readers tolerate
    /// stale and fallback values so RUB derivation keeps working through
    /// source outages.
    pub async fn get_rate(&self) -> FiatRate {
        let state = self.inner.state.read().await;
        let status = match state.fetched_at {
            None => RateStatus::Fallback,
            Some(fetched_at) => {
                let age = Utc::now() - fetched_at;
                if age.num_seconds() > 2 * self.inner.cache_ttl.as_secs() as i64 {
                    RateStatus::Stale
                } else {
                    RateStatus::Fresh
                }
            }
        };
        FiatRate {
            rate: state.rate,
            fetched_at: state.fetched_at,
            status,
            consecutive_failures: state.consecutive_failures,
        }
    }

    /// Fetch the quote once, with the configured retry budget.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        self.inner.refresh().await
    }

    /// Start the refresh loop: one immediate fetch, then every cache TTL.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return;
        }
        self.stop_tx.send_replace(false);

        let inner = Arc::clone(&self.inner);
        let mut stop_rx = self.stop_tx.subscribe();
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(inner.cache_ttl);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let _ = inner.refresh().await;
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }));
        info!("fiat rate refresher started");
    }

    /// Stop the refresh loop.
    pub async fn stop(&self) {
        self.stop_tx.send_replace(true);
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        info!("fiat rate refresher stopped");
    }

    /// Health contribution: degraded when stale, unhealthy when the
    /// process has only ever seen the fallback and fetches keep failing.
    pub async fn health(&self) -> ComponentHealth {
        let rate = self.get_rate().await;
        match rate.status {
            RateStatus::Fresh => ComponentHealth::healthy("fiat_rate"),
            RateStatus::Stale => ComponentHealth::degraded(
                "fiat_rate",
                format!(
                    "rate is stale ({} consecutive failures)",
                    rate.consecutive_failures
                ),
            ),
            RateStatus::Fallback if rate.consecutive_failures == 0 => {
                ComponentHealth::degraded("fiat_rate", "no fetch has completed yet")
            }
            RateStatus::Fallback => ComponentHealth::unhealthy(
                "fiat_rate",
                format!(
                    "source never succeeded, {} consecutive failures",
                    rate.consecutive_failures
                ),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_with(config: CbrSection) -> CbrRateSource {
        CbrRateSource::new(&config)
    }

    #[tokio::test]
    async fn starts_in_fallback_with_configured_rate() {
        let source = source_with(CbrSection::default());
        let rate = source.get_rate().await;
        assert_eq!(rate.status, RateStatus::Fallback);
        assert!(rate.is_usable());
        assert_eq!(rate.rate, Decimal::from(90));
    }

    #[tokio::test]
    async fn missing_fallback_disables_derivation() {
        let source = source_with(CbrSection {
            fallback_rate: None,
            ..CbrSection::default()
        });
        let rate = source.get_rate().await;
        assert_eq!(rate.status, RateStatus::Fallback);
        assert!(!rate.is_usable());
    }

    #[tokio::test]
    async fn staleness_follows_double_ttl() {
        let source = source_with(CbrSection {
            cache_ttl: 10,
            ..CbrSection::default()
        });
        {
            let mut state = source.inner.state.write().await;
            state.rate = Decimal::from(95);
            state.fetched_at = Some(Utc::now() - chrono::Duration::seconds(15));
        }
        assert_eq!(source.get_rate().await.status, RateStatus::Fresh);
        {
            let mut state = source.inner.state.write().await;
            state.fetched_at = Some(Utc::now() - chrono::Duration::seconds(25));
        }
        let rate = source.get_rate().await;
        assert_eq!(rate.status, RateStatus::Stale);
        // The stale value is still served for derivation.
        assert!(rate.is_usable());
        assert_eq!(rate.rate, Decimal::from(95));
    }

    #[tokio::test]
    async fn fallback_health_degrades_then_fails() {
        let source = source_with(CbrSection::default());
        assert_eq!(
            source.health().await.level,
            pv_types::HealthLevel::Degraded
        );
        {
            let mut state = source.inner.state.write().await;
            state.consecutive_failures = 3;
        }
        assert_eq!(
            source.health().await.level,
            pv_types::HealthLevel::Unhealthy
        );
    }
}
