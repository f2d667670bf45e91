//! Generic venue collector
//!
//! Owns one venue's live session: connect with a deadline, optional
//! welcome/subscribe handshake, the inbound message loop, keep-alive
//! pings, and exponential-backoff reconnection. Every normalized trade is
//! appended to the venue's event log; the collector never touches the
//! aggregation buffer directly.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use pv_streams::VenueLog;
use pv_types::{aggregate_health, ComponentHealth, HealthLevel};

use crate::circuit_breaker::ReconnectBreaker;
use crate::error::{CollectorError, Result};
use crate::venues::VenueFeed;

/// Tunables for the connection loop.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Socket connect and handshake deadline
    pub connect_timeout: Duration,
    /// Base reconnect backoff
    pub base_backoff: Duration,
    /// Backoff cap
    pub max_backoff: Duration,
    /// Attempts before the collector stays down
    pub max_reconnect_attempts: u32,
    /// Trade silence before the feed reports degraded
    pub degraded_after: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            degraded_after: Duration::from_secs(60),
        }
    }
}

/// Liveness counters exposed for health and alerting.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorStats {
    pub connected: bool,
    pub trades_received: u64,
    pub error_count: u64,
    /// Wall clock of the last normalized trade
    pub last_trade_wallclock: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    /// Wall clock the connection was lost; `None` while connected
    pub disconnected_since: Option<DateTime<Utc>>,
}

/// Health report for one collector.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorHealth {
    pub level: HealthLevel,
    pub checks: Vec<ComponentHealth>,
}

#[derive(Default)]
struct SharedCounters {
    connected: AtomicBool,
    trades_received: AtomicU64,
    error_count: AtomicU64,
    last_trade_ms: AtomicI64,
    reconnect_attempts: AtomicU32,
    disconnected_since_ms: AtomicI64,
}

impl SharedCounters {
    fn mark_connected(&self) {
        self.connected.store(true, Ordering::Relaxed);
        self.disconnected_since_ms.store(0, Ordering::Relaxed);
    }

    fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::Relaxed)
            || self.disconnected_since_ms.load(Ordering::Relaxed) == 0
        {
            self.disconnected_since_ms
                .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        }
    }
}

/// How a live session ended.
enum SessionEnd {
    /// Stop was requested; leave the loop
    Stopped,
    /// Connection lost; schedule a reconnect
    Disconnected,
}

/// One venue's supervised collector.
pub struct Collector<F: VenueFeed> {
    feed: Arc<F>,
    log: VenueLog,
    config: CollectorConfig,
    shared: Arc<SharedCounters>,
    breaker: Arc<ReconnectBreaker>,
    stop_tx: watch::Sender<bool>,
    force_reconnect: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<F: VenueFeed> Collector<F> {
    pub fn new(feed: F, log: VenueLog, config: CollectorConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            feed: Arc::new(feed),
            log,
            config,
            shared: Arc::new(SharedCounters::default()),
            breaker: Arc::new(ReconnectBreaker::default()),
            stop_tx,
            force_reconnect: Arc::new(Notify::new()),
            task: Mutex::new(None),
        }
    }

    /// Begin the connection loop. Idempotent while running and after a
    /// `stop()`: a finished task is simply replaced.
    pub async fn start(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                debug!(venue = %self.feed.venue(), "collector already running");
                return Ok(());
            }
        }

        self.stop_tx.send_replace(false);
        self.shared.reconnect_attempts.store(0, Ordering::Relaxed);

        let feed = Arc::clone(&self.feed);
        let log = self.log.clone();
        let config = self.config.clone();
        let shared = Arc::clone(&self.shared);
        let breaker = Arc::clone(&self.breaker);
        let stop_rx = self.stop_tx.subscribe();
        let force_reconnect = Arc::clone(&self.force_reconnect);

        *task = Some(tokio::spawn(async move {
            run_loop(feed, log, config, shared, breaker, stop_rx, force_reconnect).await;
        }));
        info!(venue = %self.feed.venue(), "collector started");
        Ok(())
    }

    /// Request a graceful close and wait for the loop to exit.
    pub async fn stop(&self) -> Result<()> {
        self.stop_tx.send_replace(true);
        if let Some(handle) = self.task.lock().await.take() {
            if handle.await.is_err() {
                warn!(venue = %self.feed.venue(), "collector task panicked during stop");
            }
        }
        self.shared.mark_disconnected();
        info!(venue = %self.feed.venue(), "collector stopped");
        Ok(())
    }

    /// Force a reconnect, guarded by the circuit breaker.
    pub async fn reconnect(&self) -> Result<()> {
        if !self.breaker.should_attempt().await {
            return Err(CollectorError::CircuitBreakerOpen {
                venue: self.feed.venue(),
            });
        }
        self.force_reconnect.notify_one();
        Ok(())
    }

    /// Current liveness counters.
    pub fn stats(&self) -> CollectorStats {
        let last_trade_ms = self.shared.last_trade_ms.load(Ordering::Relaxed);
        let disconnected_ms = self.shared.disconnected_since_ms.load(Ordering::Relaxed);
        CollectorStats {
            connected: self.shared.connected.load(Ordering::Relaxed),
            trades_received: self.shared.trades_received.load(Ordering::Relaxed),
            error_count: self.shared.error_count.load(Ordering::Relaxed),
            last_trade_wallclock: timestamp_opt(last_trade_ms),
            reconnect_attempts: self.shared.reconnect_attempts.load(Ordering::Relaxed),
            disconnected_since: timestamp_opt(disconnected_ms),
        }
    }

    /// Health report: unhealthy when disconnected, degraded when the feed
    /// has been silent past the threshold.
    pub fn health_check(&self) -> CollectorHealth {
        let stats = self.stats();
        let venue = self.feed.venue();
        let mut checks = Vec::with_capacity(2);

        if stats.connected {
            checks.push(ComponentHealth::healthy(format!("{venue}:connection")));
        } else {
            checks.push(ComponentHealth::unhealthy(
                format!("{venue}:connection"),
                "not connected",
            ));
        }

        let silent_for = stats
            .last_trade_wallclock
            .map(|t| (Utc::now() - t).num_seconds());
        match silent_for {
            Some(secs) if secs > self.config.degraded_after.as_secs() as i64 => {
                checks.push(ComponentHealth::degraded(
                    format!("{venue}:feed"),
                    format!("no trades for {secs}s"),
                ));
            }
            _ => checks.push(ComponentHealth::healthy(format!("{venue}:feed"))),
        }

        CollectorHealth {
            level: aggregate_health(&checks),
            checks,
        }
    }

    /// The venue this collector serves.
    pub fn venue(&self) -> pv_types::Venue {
        self.feed.venue()
    }
}

fn timestamp_opt(ms: i64) -> Option<DateTime<Utc>> {
    if ms <= 0 {
        None
    } else {
        Utc.timestamp_millis_opt(ms).single()
    }
}

async fn run_loop<F: VenueFeed>(
    feed: Arc<F>,
    log: VenueLog,
    config: CollectorConfig,
    shared: Arc<SharedCounters>,
    breaker: Arc<ReconnectBreaker>,
    mut stop_rx: watch::Receiver<bool>,
    force_reconnect: Arc<Notify>,
) {
    let venue = feed.venue();
    loop {
        if *stop_rx.borrow() {
            break;
        }

        let session = run_session(
            &*feed,
            &log,
            &config,
            &shared,
            &mut stop_rx,
            &force_reconnect,
        )
        .await;

        shared.mark_disconnected();
        match session {
            Ok(SessionEnd::Stopped) => break,
            Ok(SessionEnd::Disconnected) => {
                breaker.on_success().await;
            }
            Err(err) => {
                shared.error_count.fetch_add(1, Ordering::Relaxed);
                breaker.on_failure().await;
                warn!(venue = %venue, %err, "collector session failed");
            }
        }

        let attempts = shared.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        if attempts >= config.max_reconnect_attempts {
            error!(
                venue = %venue,
                attempts,
                "max reconnection attempts exceeded, collector staying down"
            );
            break;
        }

        let backoff = reconnect_backoff(&config, attempts);
        info!(venue = %venue, attempt = attempts, backoff_ms = backoff.as_millis() as u64, "scheduling reconnect");
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
}

/// `min(2^attempts × base, max)`.
fn reconnect_backoff(config: &CollectorConfig, attempts: u32) -> Duration {
    let exp = 2_u64.saturating_pow(attempts.min(16));
    let ms = config
        .base_backoff
        .as_millis()
        .saturating_mul(exp as u128)
        .min(config.max_backoff.as_millis());
    Duration::from_millis(ms as u64)
}

async fn run_session<F: VenueFeed>(
    feed: &F,
    log: &VenueLog,
    config: &CollectorConfig,
    shared: &SharedCounters,
    stop_rx: &mut watch::Receiver<bool>,
    force_reconnect: &Notify,
) -> Result<SessionEnd> {
    let venue = feed.venue();
    let spec = feed.connect_spec().await?;

    let (ws, _) = timeout(config.connect_timeout, connect_async(&spec.url))
        .await
        .map_err(|_| CollectorError::ConnectionTimeout {
            venue,
            timeout_ms: config.connect_timeout.as_millis() as u64,
        })?
        .map_err(|err| CollectorError::ConnectionFailed {
            venue,
            reason: err.to_string(),
        })?;
    let (mut sink, mut stream) = ws.split();

    // Venues with a session handshake must greet us before we subscribe.
    if feed.requires_welcome() {
        let deadline = tokio::time::Instant::now() + config.connect_timeout;
        loop {
            let frame = next_frame_before(&mut stream, deadline, venue).await?;
            match frame {
                Message::Text(text) if feed.is_welcome(&text) => break,
                Message::Text(text) => {
                    debug!(venue = %venue, frame = %text, "ignoring pre-welcome frame");
                }
                Message::Ping(data) => {
                    sink.send(Message::Pong(data)).await?;
                }
                _ => {}
            }
        }
    }

    for payload in feed.subscribe_messages() {
        sink.send(Message::Text(payload)).await?;
    }

    shared.mark_connected();
    shared.reconnect_attempts.store(0, Ordering::Relaxed);
    info!(venue = %venue, "connected and subscribed");

    let mut ping_timer = spec.ping_interval.map(tokio::time::interval);
    if let Some(timer) = ping_timer.as_mut() {
        timer.tick().await; // first tick completes immediately
    }

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Stopped);
                }
            }
            _ = force_reconnect.notified() => {
                info!(venue = %venue, "manual reconnect requested");
                let _ = sink.send(Message::Close(None)).await;
                return Ok(SessionEnd::Disconnected);
            }
            _ = tick(&mut ping_timer) => {
                if let Some(payload) = feed.ping_message() {
                    sink.send(Message::Text(payload)).await?;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = feed.control_reply(&text) {
                        sink.send(Message::Text(reply)).await?;
                        continue;
                    }
                    if feed.is_subscribe_ack(&text) {
                        debug!(venue = %venue, "subscription acknowledged");
                        continue;
                    }
                    handle_frame(feed, log, shared, &text).await;
                }
                Some(Ok(Message::Ping(data))) => {
                    sink.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(CollectorError::ConnectionClosed {
                        venue,
                        reason: frame.map(|f| f.reason.to_string()),
                    });
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    shared.error_count.fetch_add(1, Ordering::Relaxed);
                    return Err(CollectorError::WebSocket(err));
                }
                None => {
                    return Err(CollectorError::ConnectionClosed { venue, reason: None });
                }
            }
        }
    }
}

async fn tick(timer: &mut Option<tokio::time::Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_frame_before<S>(
    stream: &mut S,
    deadline: tokio::time::Instant,
    venue: pv_types::Venue,
) -> Result<Message>
where
    S: StreamExt<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    match tokio::time::timeout_at(deadline, stream.next()).await {
        Ok(Some(Ok(frame))) => Ok(frame),
        Ok(Some(Err(err))) => Err(CollectorError::WebSocket(err)),
        Ok(None) => Err(CollectorError::HandshakeFailed {
            venue,
            reason: "stream ended before welcome".to_string(),
        }),
        Err(_) => Err(CollectorError::HandshakeFailed {
            venue,
            reason: "welcome frame timed out".to_string(),
        }),
    }
}

/// Parse one text frame and append any trades to the venue log.
///
/// Parse failures never kill the connection: the frame is dropped at debug
/// level, mirroring how venues interleave heartbeats and notices with data.
async fn handle_frame<F: VenueFeed>(
    feed: &F,
    log: &VenueLog,
    shared: &SharedCounters,
    text: &str,
) {
    let venue = feed.venue();
    match feed.parse_frame(text) {
        Ok(trades) => {
            for trade in trades {
                shared.trades_received.fetch_add(1, Ordering::Relaxed);
                shared
                    .last_trade_ms
                    .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
                if let Err(err) = log.append(&trade).await {
                    shared.error_count.fetch_add(1, Ordering::Relaxed);
                    warn!(venue = %venue, %err, "venue log append failed");
                }
            }
        }
        Err(err) => {
            debug!(venue = %venue, %err, "dropping unparseable frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CollectorConfig {
        CollectorConfig::default()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = config();
        assert_eq!(reconnect_backoff(&config, 1), Duration::from_secs(2));
        assert_eq!(reconnect_backoff(&config, 2), Duration::from_secs(4));
        assert_eq!(reconnect_backoff(&config, 3), Duration::from_secs(8));
        assert_eq!(reconnect_backoff(&config, 4), Duration::from_secs(16));
        // 2^5 = 32s exceeds the cap.
        assert_eq!(reconnect_backoff(&config, 5), Duration::from_secs(30));
        assert_eq!(reconnect_backoff(&config, 30), Duration::from_secs(30));
    }
}
