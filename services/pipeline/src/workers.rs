//! Lifecyclable adapters over the pipeline components
//!
//! The supervisor speaks one trait; these wrappers bind it to each
//! component's own start/stop surface and map component errors into the
//! shared taxonomy.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

use aggregator_service::{CbrRateSource, StreamAggregator};
use collector_service::AnyCollector;
use pv_types::CoreError;
use rpc_service::{PriceBroadcaster, RpcServer};

use crate::alerts::AlertManager;
use crate::scheduler::ScheduleRegistry;
use crate::supervisor::Lifecyclable;

/// The CBR refresh loop.
pub struct FiatWorker {
    source: Arc<CbrRateSource>,
}

impl FiatWorker {
    pub fn new(source: Arc<CbrRateSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Lifecyclable for FiatWorker {
    fn name(&self) -> &str {
        "fiat-rate"
    }

    async fn start(&self) -> Result<(), CoreError> {
        self.source.start().await;
        Ok(())
    }

    async fn stop(&self) -> Result<(), CoreError> {
        self.source.stop().await;
        Ok(())
    }
}

/// The stream aggregator's two loops.
pub struct AggregatorWorker {
    aggregator: Arc<StreamAggregator>,
}

impl AggregatorWorker {
    pub fn new(aggregator: Arc<StreamAggregator>) -> Self {
        Self { aggregator }
    }
}

#[async_trait]
impl Lifecyclable for AggregatorWorker {
    fn name(&self) -> &str {
        "stream-aggregator"
    }

    async fn start(&self) -> Result<(), CoreError> {
        self.aggregator.start().await
    }

    async fn stop(&self) -> Result<(), CoreError> {
        self.aggregator.stop().await
    }
}

/// One venue collector.
pub struct CollectorWorker {
    collector: Arc<AnyCollector>,
    name: String,
}

impl CollectorWorker {
    pub fn new(collector: Arc<AnyCollector>) -> Self {
        let name = format!("collector:{}", collector.venue());
        Self { collector, name }
    }
}

#[async_trait]
impl Lifecyclable for CollectorWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), CoreError> {
        self.collector.start().await.map_err(collector_error)
    }

    async fn stop(&self) -> Result<(), CoreError> {
        self.collector.stop().await.map_err(collector_error)
    }
}

fn collector_error(err: collector_service::CollectorError) -> CoreError {
    CoreError::Internal {
        detail: err.to_string(),
    }
}

/// The schedule registry driving OHLCV roll-ups and retention.
pub struct SchedulerWorker {
    registry: Arc<ScheduleRegistry>,
}

impl SchedulerWorker {
    pub fn new(registry: Arc<ScheduleRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Lifecyclable for SchedulerWorker {
    fn name(&self) -> &str {
        "ohlcv-scheduler"
    }

    async fn start(&self) -> Result<(), CoreError> {
        self.registry.start().await
    }

    async fn stop(&self) -> Result<(), CoreError> {
        self.registry.stop().await
    }
}

/// The periodic alert scan.
pub struct AlertWorker {
    manager: Arc<AlertManager>,
}

impl AlertWorker {
    pub fn new(manager: Arc<AlertManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Lifecyclable for AlertWorker {
    fn name(&self) -> &str {
        "alert-manager"
    }

    async fn start(&self) -> Result<(), CoreError> {
        self.manager.start().await;
        Ok(())
    }

    async fn stop(&self) -> Result<(), CoreError> {
        self.manager.stop().await;
        Ok(())
    }
}

/// The Redis pub/sub → broadcast bridge feeding `streamPrices`.
pub struct BridgeWorker {
    broadcaster: Arc<PriceBroadcaster>,
    client: redis::Client,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeWorker {
    pub fn new(broadcaster: Arc<PriceBroadcaster>, client: redis::Client) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            broadcaster,
            client,
            stop_tx,
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Lifecyclable for BridgeWorker {
    fn name(&self) -> &str {
        "price-bridge"
    }

    async fn start(&self) -> Result<(), CoreError> {
        self.stop_tx.send_replace(false);
        let broadcaster = Arc::clone(&self.broadcaster);
        let client = self.client.clone();
        let stop_rx = self.stop_tx.subscribe();
        *self.task.lock().await = Some(tokio::spawn(async move {
            if let Err(err) = broadcaster.run_redis_bridge(client, stop_rx).await {
                warn!(%err, "price bridge exited with error");
            }
        }));
        Ok(())
    }

    async fn stop(&self) -> Result<(), CoreError> {
        self.stop_tx.send_replace(true);
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        Ok(())
    }
}

/// The RPC HTTP server.
pub struct RpcWorker {
    server: Arc<RpcServer>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RpcWorker {
    pub fn new(server: Arc<RpcServer>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            server,
            stop_tx,
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Lifecyclable for RpcWorker {
    fn name(&self) -> &str {
        "rpc-server"
    }

    async fn start(&self) -> Result<(), CoreError> {
        self.stop_tx.send_replace(false);
        let server = Arc::clone(&self.server);
        let stop_rx = self.stop_tx.subscribe();
        *self.task.lock().await = Some(tokio::spawn(async move {
            if let Err(err) = server.serve(stop_rx).await {
                warn!(%err, "rpc server exited with error");
            }
        }));
        Ok(())
    }

    async fn stop(&self) -> Result<(), CoreError> {
        self.stop_tx.send_replace(true);
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        Ok(())
    }
}
