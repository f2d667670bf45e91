//! Priceverse pipeline binary
//!
//! Composition root: load configuration, open the stores, wire every
//! component through explicit constructors, hand the workers to the
//! supervisor and run until a shutdown signal.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use aggregator_service::{
    AggregatorConfig, CbrRateSource, OhlcvAggregator, StreamAggregator,
};
use collector_service::{AnyCollector, CollectorConfig};
use pipeline_service::workers::{
    AggregatorWorker, AlertWorker, BridgeWorker, CollectorWorker, FiatWorker, RpcWorker,
    SchedulerWorker,
};
use pipeline_service::{
    AlertManager, HealthProbe, RestartTracker, RetentionSweeper, Schedule, ScheduleRegistry,
    Supervisor,
};
use pv_config::AppConfig;
use pv_storage::{CandleRepository, PriceHistoryRepository};
use pv_streams::{PriceCache, SlidingWindowLimiter, TradeBuffer, VenueLog};
use pv_types::{Pair, Resolution, Venue};
use rpc_service::{
    ChartsService, HealthService, PriceBroadcaster, PricesService, RpcContext, RpcServer,
};

// Stop ranks: lower stops first. The mandated order is OHLCV scheduler,
// stream aggregator, collectors, fiat rate, transports.
const STOP_SCHEDULER: u32 = 0;
const STOP_AGGREGATOR: u32 = 1;
const STOP_COLLECTORS: u32 = 2;
const STOP_FIAT: u32 = 3;
const STOP_TRANSPORTS: u32 = 4;

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(()) => 0,
        Err(err) => {
            error!(%err, "pipeline terminated with error");
            1
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<()> {
    let config = AppConfig::load(None).context("configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    info!(environment = %config.app.environment, "priceverse pipeline starting");

    // Stores.
    let redis_url = config.redis.url();
    let redis_conn = pv_streams::connect(&redis_url).await.context("redis")?;
    let redis_client = redis::Client::open(redis_url.as_str()).context("redis client")?;
    let pool = pv_storage::connect_pool(
        &database_url(&config),
        config.database.pool.min,
        config.database.pool.max,
    )
    .await
    .context("postgres")?;

    // Repositories and shared Redis surfaces. The aggregator's consumer
    // reads block up to a second, so it gets its own connection instead of
    // sharing the multiplexed one with cache and limiter traffic.
    let prices_repo = PriceHistoryRepository::new(pool.clone());
    let candles_repo = CandleRepository::new(pool.clone());
    let venue_log = VenueLog::new(redis_conn.clone());
    let consumer_log = VenueLog::new(pv_streams::connect(&redis_url).await.context("redis")?);
    let buffer = TradeBuffer::new(redis_conn.clone());
    let cache = PriceCache::new(
        redis_conn.clone(),
        config.api.cache.price_ttl_secs,
        config.api.cache.stale_after_secs,
    );

    // Aggregation pairs from configuration; derived pairs never aggregate.
    let pairs = parse_pairs(&config.aggregation.pairs)?;

    // Core workers.
    let fiat = Arc::new(CbrRateSource::new(&config.cbr));
    let aggregator = Arc::new(StreamAggregator::new(
        consumer_log,
        buffer,
        cache.clone(),
        prices_repo.clone(),
        Arc::clone(&fiat),
        AggregatorConfig {
            tick_interval: Duration::from_millis(config.aggregation.interval),
            window: Duration::from_millis(config.aggregation.window_size),
            pairs: pairs.clone(),
            max_consecutive_errors: config.aggregation.max_consecutive_errors,
        },
    ));
    let ohlcv = Arc::new(OhlcvAggregator::new(
        pool.clone(),
        prices_repo.clone(),
        candles_repo.clone(),
        Pair::ALL.to_vec(),
    ));

    // Collectors for the enabled venues.
    let mut collectors = Vec::new();
    for name in &config.exchanges.enabled {
        let venue: Venue = name.parse().context("exchanges.enabled")?;
        let collector = AnyCollector::build(
            venue,
            &pairs,
            venue_log.clone(),
            CollectorConfig::default(),
        )
        .map_err(|err| anyhow::anyhow!("collector for {venue}: {err}"))?;
        collectors.push(Arc::new(collector));
    }

    // Scheduling: candle boundaries plus retention.
    let sweeper = Arc::new(RetentionSweeper::new(
        prices_repo.clone(),
        candles_repo.clone(),
        config.retention.clone(),
    ));
    let registry = build_schedules(
        Arc::clone(&ohlcv),
        Arc::clone(&sweeper),
        &config.retention.cleanup_schedule,
        config.retention.enabled,
    )?;

    // RPC surface.
    let broadcaster = Arc::new(PriceBroadcaster::new(
        config.api.streaming.max_queue_size,
        Duration::from_millis(config.api.streaming.idle_timeout_ms),
    ));
    let probe = Arc::new(HealthProbe::new(
        collectors.clone(),
        Arc::clone(&aggregator),
        Arc::clone(&fiat),
        pool.clone(),
        redis_conn.clone(),
    ));
    let limiter = config.api.rate_limit.enabled.then(|| {
        SlidingWindowLimiter::new(
            redis_conn.clone(),
            config.api.rate_limit.window_ms,
            config.api.rate_limit.max_requests,
        )
    });
    let rpc_server = Arc::new(RpcServer::new(
        RpcContext {
            prices: PricesService::new(cache, prices_repo.clone()),
            charts: ChartsService::new(candles_repo.clone()),
            health: HealthService::new(probe, env!("CARGO_PKG_VERSION")),
            broadcaster: Arc::clone(&broadcaster),
            limiter,
        },
        SocketAddr::new(
            config.app.host.parse().context("app.host")?,
            config.app.port,
        ),
    ));

    let alerts = AlertManager::new(
        config.alerts.clone(),
        config.app.environment.clone(),
        collectors.clone(),
        Arc::clone(&aggregator),
        Arc::clone(&fiat),
    );

    // Supervision: registration order is start order.
    let mut supervisor = Supervisor::new();
    supervisor.register(Arc::new(FiatWorker::new(Arc::clone(&fiat))), STOP_FIAT);
    supervisor.register(
        Arc::new(AggregatorWorker::new(Arc::clone(&aggregator))),
        STOP_AGGREGATOR,
    );
    supervisor.register(Arc::new(SchedulerWorker::new(registry)), STOP_SCHEDULER);
    for collector in &collectors {
        supervisor.register(
            Arc::new(CollectorWorker::new(Arc::clone(collector))),
            STOP_COLLECTORS,
        );
    }
    supervisor.register(
        Arc::new(BridgeWorker::new(Arc::clone(&broadcaster), redis_client)),
        STOP_TRANSPORTS,
    );
    supervisor.register(Arc::new(AlertWorker::new(alerts)), STOP_TRANSPORTS);
    supervisor.register(Arc::new(RpcWorker::new(rpc_server)), STOP_TRANSPORTS);

    supervisor
        .start_all()
        .await
        .map_err(|err| anyhow::anyhow!("startup failed: {err}"))?;

    // Restart policy: the consumption loop can circuit-break itself, so
    // the aggregator gets a bounded restart budget before it is declared
    // terminally failed.
    let (monitor_stop_tx, monitor_stop_rx) = tokio::sync::watch::channel(false);
    spawn_aggregator_monitor(Arc::clone(&aggregator), monitor_stop_rx);

    tokio::signal::ctrl_c().await.context("signal handler")?;
    info!("shutdown signal received");
    monitor_stop_tx.send_replace(true);
    supervisor.stop_all().await;
    Ok(())
}

fn spawn_aggregator_monitor(
    aggregator: Arc<StreamAggregator>,
    mut stop_rx: tokio::sync::watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut tracker = RestartTracker::default();
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if aggregator.stats().running {
                        continue;
                    }
                    if tracker.admit() {
                        warn!("stream aggregator is down, restarting");
                        if let Err(err) = aggregator.start().await {
                            error!(%err, "stream aggregator restart failed");
                        }
                    } else {
                        error!("stream aggregator terminally failed, giving up");
                        break;
                    }
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });
}

fn database_url(config: &AppConfig) -> String {
    let db = &config.database;
    let ssl = if db.ssl { "?sslmode=require" } else { "" };
    format!(
        "postgres://{}:{}@{}:{}/{}{}",
        db.user, db.password, db.host, db.port, db.database, ssl
    )
}

fn parse_pairs(names: &[String]) -> Result<Vec<Pair>> {
    let mut pairs = Vec::with_capacity(names.len());
    for name in names {
        let pair: Pair = name.parse().context("aggregation.pairs")?;
        if !pair.is_base() {
            anyhow::bail!("aggregation.pairs must list base pairs, got {pair}");
        }
        pairs.push(pair);
    }
    Ok(pairs)
}

fn build_schedules(
    ohlcv: Arc<OhlcvAggregator>,
    sweeper: Arc<RetentionSweeper>,
    cleanup_schedule: &str,
    retention_enabled: bool,
) -> Result<Arc<ScheduleRegistry>> {
    let mut registry = ScheduleRegistry::new();

    let candle_jobs = [
        (Resolution::FiveMin, "candles:5min", "0 */5 * * * *"),
        (Resolution::OneHour, "candles:1hour", "0 0 * * * *"),
        (Resolution::OneDay, "candles:1day", "0 0 0 * * *"),
    ];
    for (resolution, name, cron) in candle_jobs {
        let ohlcv = Arc::clone(&ohlcv);
        registry
            .register(name, Schedule::Cron(cron.to_string()), move || {
                let ohlcv = Arc::clone(&ohlcv);
                async move {
                    if let Err(err) = ohlcv.run_resolution(resolution, chrono::Utc::now()).await {
                        error!(resolution = %resolution, %err, "candle roll-up run failed");
                    }
                }
            })
            .map_err(|err| anyhow::anyhow!("schedule registration: {err}"))?;
    }

    if retention_enabled {
        registry
            .register(
                "retention:cleanup",
                Schedule::Cron(cleanup_schedule.to_string()),
                move || {
                    let sweeper = Arc::clone(&sweeper);
                    async move { sweeper.sweep().await }
                },
            )
            .map_err(|err| anyhow::anyhow!("schedule registration: {err}"))?;
    }

    Ok(Arc::new(registry))
}
