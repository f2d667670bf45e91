//! Stream aggregator: venue logs in, canonical prices out
//!
//! Two concurrent loops share the same state:
//!
//! - **Consumption** drains every venue log through one consumer group,
//!   inserts each trade into the per-pair buffer and acknowledges the
//!   entry. A consecutive-error counter circuit-breaks the loop at the
//!   configured threshold; a clean minute resets it.
//! - **Tick** fires on the aggregation interval: per base pair it evicts
//!   everything older than the trailing window, computes the VWAP over
//!   what remains, persists the canonical row, derives the RUB pair from
//!   the fiat rate, and caches + broadcasts both payloads.
//!
//! `event_time` on emitted rows is the aggregator's wall clock, not the
//! newest trade time; downstream consumers rely on the monotone series key.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pv_storage::{with_retry, PriceHistoryRepository};
use pv_streams::{PriceCache, TradeBuffer, VenueLog};
use pv_types::{
    aggregate_health, ComponentHealth, CoreError, HealthLevel, Pair, PricePayload, PriceRecord,
    Venue,
};

use crate::cbr::CbrRateSource;
use crate::vwap::{compute_vwap, union_sources};

/// Consumer group shared by every aggregator instance.
pub const CONSUMER_GROUP: &str = "aggregator";

const READ_COUNT: usize = 100;
const READ_BLOCK_MS: usize = 1000;
const ERROR_RESET_WINDOW: Duration = Duration::from_secs(60);

/// Aggregator tunables.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Tick interval
    pub tick_interval: Duration,
    /// Trailing VWAP window
    pub window: Duration,
    /// Base pairs to aggregate
    pub pairs: Vec<Pair>,
    /// Consumption-loop circuit-breaker threshold
    pub max_consecutive_errors: u32,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            window: Duration::from_secs(30),
            pairs: Pair::BASE.to_vec(),
            max_consecutive_errors: 10,
        }
    }
}

/// Liveness counters exposed for health.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatorStats {
    pub running: bool,
    pub consumer_id: String,
    pub consecutive_errors: u32,
    pub last_successful_tick: Option<chrono::DateTime<Utc>>,
    pub total_ticks: u64,
}

#[derive(Default)]
struct AggregatorShared {
    running: AtomicBool,
    consecutive_errors: AtomicU32,
    last_error_ms: AtomicI64,
    last_tick_ms: AtomicI64,
    total_ticks: AtomicU64,
}

/// The volume-weighted aggregation worker.
pub struct StreamAggregator {
    log: VenueLog,
    buffer: TradeBuffer,
    cache: PriceCache,
    prices: PriceHistoryRepository,
    fiat: Arc<CbrRateSource>,
    config: AggregatorConfig,
    consumer_id: String,
    shared: Arc<AggregatorShared>,
    stop_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamAggregator {
    pub fn new(
        log: VenueLog,
        buffer: TradeBuffer,
        cache: PriceCache,
        prices: PriceHistoryRepository,
        fiat: Arc<CbrRateSource>,
        config: AggregatorConfig,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            log,
            buffer,
            cache,
            prices,
            fiat,
            config,
            consumer_id: format!("agg-{}", Uuid::new_v4().simple()),
            shared: Arc::new(AggregatorShared::default()),
            stop_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Create consumer groups and spawn the consumption and tick loops.
    ///
    /// Restartable: a circuit-broken run (one loop dead, the other alive)
    /// is quiesced before the fresh loops launch.
    pub async fn start(self: &Arc<Self>) -> Result<(), CoreError> {
        let fully_running = {
            let tasks = self.tasks.lock().await;
            self.shared.running.load(Ordering::Relaxed)
                && !tasks.is_empty()
                && tasks.iter().all(|t| !t.is_finished())
        };
        if fully_running {
            debug!("stream aggregator already running");
            return Ok(());
        }
        self.stop().await?;

        let mut tasks = self.tasks.lock().await;
        self.stop_tx.send_replace(false);

        for venue in Venue::EXCHANGES {
            self.log.create_group(venue, CONSUMER_GROUP).await?;
        }

        self.shared.running.store(true, Ordering::Relaxed);
        self.shared.consecutive_errors.store(0, Ordering::Relaxed);

        let consume = Arc::clone(self);
        let consume_stop = self.stop_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            consume.consumption_loop(consume_stop).await;
        }));

        let tick = Arc::clone(self);
        let tick_stop = self.stop_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            tick.tick_loop(tick_stop).await;
        }));

        info!(consumer_id = %self.consumer_id, "stream aggregator started");
        Ok(())
    }

    /// Stop both loops and wait for them to exit.
    pub async fn stop(&self) -> Result<(), CoreError> {
        self.stop_tx.send_replace(true);
        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            if handle.await.is_err() {
                warn!("aggregator task panicked during stop");
            }
        }
        self.shared.running.store(false, Ordering::Relaxed);
        info!("stream aggregator stopped");
        Ok(())
    }

    /// Current liveness counters.
    pub fn stats(&self) -> AggregatorStats {
        let last_tick_ms = self.shared.last_tick_ms.load(Ordering::Relaxed);
        AggregatorStats {
            running: self.shared.running.load(Ordering::Relaxed),
            consumer_id: self.consumer_id.clone(),
            consecutive_errors: self.shared.consecutive_errors.load(Ordering::Relaxed),
            last_successful_tick: if last_tick_ms > 0 {
                Utc.timestamp_millis_opt(last_tick_ms).single()
            } else {
                None
            },
            total_ticks: self.shared.total_ticks.load(Ordering::Relaxed),
        }
    }

    /// Health: unhealthy when stopped or circuit-broken, degraded when no
    /// tick has succeeded within three intervals.
    pub fn health_check(&self) -> (HealthLevel, Vec<ComponentHealth>) {
        let stats = self.stats();
        let mut checks = Vec::with_capacity(2);

        if !stats.running {
            checks.push(ComponentHealth::unhealthy("aggregator:loop", "not running"));
        } else if stats.consecutive_errors >= self.config.max_consecutive_errors {
            checks.push(ComponentHealth::unhealthy(
                "aggregator:loop",
                format!("{} consecutive errors", stats.consecutive_errors),
            ));
        } else {
            checks.push(ComponentHealth::healthy("aggregator:loop"));
        }

        let tick_deadline = 3 * self.config.tick_interval;
        let tick_ok = stats
            .last_successful_tick
            .map(|t| (Utc::now() - t).to_std().unwrap_or_default() <= tick_deadline)
            // A fresh aggregator has not ticked yet; give it the same grace.
            .unwrap_or(stats.total_ticks == 0);
        if tick_ok {
            checks.push(ComponentHealth::healthy("aggregator:tick"));
        } else {
            checks.push(ComponentHealth::degraded(
                "aggregator:tick",
                "no successful tick within three intervals",
            ));
        }

        (aggregate_health(&checks), checks)
    }

    async fn consumption_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        info!(consumer_id = %self.consumer_id, "consumption loop running");
        loop {
            if *stop_rx.borrow() {
                break;
            }

            let mut iteration_failed = false;
            for venue in Venue::EXCHANGES {
                if *stop_rx.borrow() {
                    break;
                }
                if let Err(err) = self.drain_venue(venue).await {
                    warn!(venue = %venue, %err, "venue log read failed");
                    iteration_failed = true;
                }
            }

            if iteration_failed {
                self.shared
                    .last_error_ms
                    .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
                let errors = self.shared.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
                if errors >= self.config.max_consecutive_errors {
                    error!(
                        errors,
                        "consumption loop circuit breaker tripped, shutting down"
                    );
                    self.shared.running.store(false, Ordering::Relaxed);
                    break;
                }
                let backoff = consumption_backoff(errors);
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = stop_rx.changed() => {}
                }
            } else {
                // A clean minute closes the error window.
                let last_error = self.shared.last_error_ms.load(Ordering::Relaxed);
                if last_error > 0
                    && Utc::now().timestamp_millis() - last_error
                        > ERROR_RESET_WINDOW.as_millis() as i64
                {
                    self.shared.consecutive_errors.store(0, Ordering::Relaxed);
                    self.shared.last_error_ms.store(0, Ordering::Relaxed);
                }
            }
        }
        info!("consumption loop exited");
    }

    /// Read one batch from a venue log: buffer each trade, then ack.
    /// Entries whose insert fails stay unacked for redelivery.
    async fn drain_venue(&self, venue: Venue) -> Result<(), CoreError> {
        let entries = self
            .log
            .read_group(venue, CONSUMER_GROUP, &self.consumer_id, READ_COUNT, READ_BLOCK_MS)
            .await?;

        for entry in entries {
            match entry.trade {
                Some(trade) => {
                    self.buffer.insert(&trade).await?;
                    self.log.ack(venue, CONSUMER_GROUP, &entry.id).await?;
                }
                // Malformed entries cannot be retried into correctness.
                None => self.log.ack(venue, CONSUMER_GROUP, &entry.id).await?,
            }
        }
        Ok(())
    }

    async fn tick_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await; // immediate first tick is not wanted

        info!(interval_ms = self.config.tick_interval.as_millis() as u64, "tick loop running");
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }

            for pair in &self.config.pairs {
                if let Err(err) = self.tick_pair(*pair).await {
                    // One pair's failure never stops the others.
                    warn!(pair = %pair, %err, "aggregation tick failed for pair");
                }
            }

            self.shared
                .last_tick_ms
                .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
            self.shared.total_ticks.fetch_add(1, Ordering::Relaxed);
        }
        info!("tick loop exited");
    }

    /// One pair's aggregation pass.
    async fn tick_pair(&self, pair: Pair) -> Result<(), CoreError> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let window_start = now_ms - self.config.window.as_millis() as i64;

        // Evict before use: nothing older than the window may contribute.
        self.buffer.evict_before(pair, window_start).await?;
        let trades = self.buffer.range(pair, window_start, now_ms).await?;

        let Some(outcome) = compute_vwap(&trades) else {
            debug!(pair = %pair, "empty window, skipping tick");
            return Ok(());
        };

        let record = PriceRecord::new(pair, outcome.price, now, outcome.sources.clone(), outcome.volume);
        with_retry("price_history.insert", || self.prices.insert(&record)).await?;

        let mut payloads = vec![PricePayload::from(&record)];

        // Derive the RUB pair whenever a positive rate is available,
        // whether fresh, stale or fallback.
        let rate = self.fiat.get_rate().await;
        if rate.is_usable() {
            if let Some(rub_record) = derive_rub_record(&record, rate.rate) {
                with_retry("price_history.insert", || self.prices.insert(&rub_record)).await?;
                payloads.push(PricePayload::from(&rub_record));
            }
        } else {
            debug!(pair = %pair, "no usable fiat rate, skipping rub derivation");
        }

        for payload in &payloads {
            if let Err(err) = self.cache.publish(payload).await {
                // Cache and broadcast are best-effort; the row is durable.
                warn!(pair = %payload.pair, %err, "price cache publish failed");
            }
        }
        Ok(())
    }
}

/// Derive the RUB row from a base-pair record: same emission time, price
/// multiplied by the fiat rate, sources extended with the fiat source.
fn derive_rub_record(record: &PriceRecord, rate: rust_decimal::Decimal) -> Option<PriceRecord> {
    let rub_pair = record.pair.rub_counterpart()?;
    Some(PriceRecord::new(
        rub_pair,
        record.price * rate,
        record.event_time,
        union_sources(&record.sources, Venue::Cbr.as_str()),
        record.volume,
    ))
}

/// `min(2^(errors−1) × 1s, 30s)`.
fn consumption_backoff(errors: u32) -> Duration {
    let exp = 2_u64.saturating_pow(errors.saturating_sub(1).min(16));
    Duration::from_secs(exp.min(30))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn consumption_backoff_series() {
        assert_eq!(consumption_backoff(1), Duration::from_secs(1));
        assert_eq!(consumption_backoff(2), Duration::from_secs(2));
        assert_eq!(consumption_backoff(3), Duration::from_secs(4));
        assert_eq!(consumption_backoff(5), Duration::from_secs(16));
        assert_eq!(consumption_backoff(6), Duration::from_secs(30));
        assert_eq!(consumption_backoff(20), Duration::from_secs(30));
    }

    #[test]
    fn rub_derivation_multiplies_and_tags_cbr() {
        let record = PriceRecord::new(
            Pair::BtcUsd,
            dec!(100),
            Utc::now(),
            vec!["binance".to_string(), "kraken".to_string()],
            dec!(2),
        );
        let rub = derive_rub_record(&record, dec!(95.5)).unwrap();
        assert_eq!(rub.pair, Pair::BtcRub);
        assert_eq!(rub.price, dec!(9550.0));
        assert_eq!(rub.sources, vec!["binance", "kraken", "cbr"]);
        // Both rows share the emission timestamp.
        assert_eq!(rub.event_time, record.event_time);
        assert_eq!(rub.volume, record.volume);
    }

    #[test]
    fn derived_pairs_do_not_derive_again() {
        let record = PriceRecord::new(
            Pair::BtcRub,
            dec!(9550),
            Utc::now(),
            vec!["cbr".to_string()],
            dec!(2),
        );
        assert!(derive_rub_record(&record, dec!(95.5)).is_none());
    }
}
