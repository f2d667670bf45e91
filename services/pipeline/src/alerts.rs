//! Condition-based alerting
//!
//! A 30-second scan evaluates three conditions: a collector disconnected
//! past the threshold, the aggregator's consecutive errors at or above
//! critical, and an unhealthy fiat rate. Alerts are idempotent per alert
//! id, so an active condition never re-notifies; clearing a condition
//! sends a resolution notice and drops it from the active set.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use aggregator_service::{CbrRateSource, StreamAggregator};
use collector_service::AnyCollector;
use pv_config::AlertsSection;
use pv_types::HealthLevel;

const SCAN_INTERVAL: Duration = Duration::from_secs(30);

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

/// One alert condition, keyed by `id` while active.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub severity: Severity,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub message: String,
    pub metadata: Value,
}

/// Scans pipeline state and notifies a webhook sink.
pub struct AlertManager {
    config: AlertsSection,
    service: String,
    environment: String,
    http: reqwest::Client,
    collectors: Vec<Arc<AnyCollector>>,
    aggregator: Arc<StreamAggregator>,
    fiat: Arc<CbrRateSource>,
    active: DashMap<String, Alert>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AlertManager {
    pub fn new(
        config: AlertsSection,
        environment: impl Into<String>,
        collectors: Vec<Arc<AnyCollector>>,
        aggregator: Arc<StreamAggregator>,
        fiat: Arc<CbrRateSource>,
    ) -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            service: "priceverse".to_string(),
            environment: environment.into(),
            http: reqwest::Client::new(),
            collectors,
            aggregator,
            fiat,
            active: DashMap::new(),
            stop_tx,
            task: Mutex::new(None),
        })
    }

    /// Start the periodic scan.
    pub async fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            info!("alerting disabled by configuration");
            return;
        }
        let mut task = self.task.lock().await;
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return;
        }
        self.stop_tx.send_replace(false);

        let manager = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(SCAN_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => manager.scan().await,
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }));
        info!("alert manager started");
    }

    /// Stop the scan loop.
    pub async fn stop(&self) {
        self.stop_tx.send_replace(true);
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        info!("alert manager stopped");
    }

    /// Evaluate all conditions once.
    pub async fn scan(&self) {
        let disconnect_threshold = self.config.thresholds.collector_disconnect_secs as i64;
        for collector in &self.collectors {
            let venue = collector.venue();
            let stats = collector.stats();
            let id = format!("collector_disconnected:{venue}");
            let down_for = stats
                .disconnected_since
                .map(|t| (Utc::now() - t).num_seconds())
                .unwrap_or(0);
            let firing = !stats.connected && down_for > disconnect_threshold;
            self.transition(
                firing,
                Alert {
                    id,
                    severity: Severity::Warning,
                    alert_type: "collector_disconnected".to_string(),
                    message: format!("collector {venue} disconnected for {down_for}s"),
                    metadata: json!({
                        "venue": venue.as_str(),
                        "disconnected_seconds": down_for,
                        "reconnect_attempts": stats.reconnect_attempts,
                    }),
                },
            )
            .await;
        }

        let stats = self.aggregator.stats();
        let critical_errors = self.config.thresholds.aggregator_consecutive_errors;
        self.transition(
            stats.consecutive_errors >= critical_errors,
            Alert {
                id: "aggregator_consecutive_errors".to_string(),
                severity: Severity::Critical,
                alert_type: "aggregator_errors".to_string(),
                message: format!(
                    "stream aggregator has {} consecutive errors",
                    stats.consecutive_errors
                ),
                metadata: json!({
                    "consecutive_errors": stats.consecutive_errors,
                    "consumer_id": stats.consumer_id,
                }),
            },
        )
        .await;

        let fiat_health = self.fiat.health().await;
        self.transition(
            fiat_health.level == HealthLevel::Unhealthy,
            Alert {
                id: "fiat_rate_unhealthy".to_string(),
                severity: Severity::Warning,
                alert_type: "fiat_rate".to_string(),
                message: fiat_health
                    .message
                    .unwrap_or_else(|| "fiat rate source unhealthy".to_string()),
                metadata: json!({}),
            },
        )
        .await;
    }

    /// Fire or clear one condition, keeping notifications idempotent.
    async fn transition(&self, firing: bool, alert: Alert) {
        if firing {
            if self.active.contains_key(&alert.id) {
                debug!(id = %alert.id, "alert already active, not re-notifying");
                return;
            }
            warn!(id = %alert.id, severity = ?alert.severity, "alert firing: {}", alert.message);
            self.notify(&alert, false).await;
            self.active.insert(alert.id.clone(), alert);
        } else if let Some((_, cleared)) = self.active.remove(&alert.id) {
            info!(id = %cleared.id, "alert condition cleared");
            self.notify(&cleared, true).await;
        }
    }

    async fn notify(&self, alert: &Alert, resolved: bool) {
        let Some(url) = &self.config.webhook_url else {
            return;
        };
        let payload = json!({
            "id": alert.id,
            "severity": alert.severity,
            "type": alert.alert_type,
            "message": if resolved {
                format!("resolved: {}", alert.message)
            } else {
                alert.message.clone()
            },
            "timestamp": Utc::now().to_rfc3339(),
            "metadata": alert.metadata,
            "service": self.service,
            "environment": self.environment,
            "resolved": resolved,
        });

        if let Err(err) = self.http.post(url).json(&payload).send().await {
            // Alert delivery is best-effort; the condition stays tracked.
            warn!(id = %alert.id, %err, "alert webhook delivery failed");
        }
    }

    /// Active alert ids, for diagnostics.
    pub fn active_ids(&self) -> Vec<String> {
        self.active.iter().map(|entry| entry.key().clone()).collect()
    }
}
