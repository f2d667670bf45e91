//! Worker lifecycle supervision
//!
//! Workers implement [`Lifecyclable`] and register with the supervisor in
//! dependency order. Startup walks that order and unwinds on failure;
//! shutdown follows explicit stop ranks so the OHLCV scheduler quiesces
//! before the stream aggregator, which quiesces before the collectors,
//! with transports last. Every `stop()` is awaited under a hard cap; a
//! worker that blows the cap is abandoned and logged as an unclean exit.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{error, info, warn};

use pv_types::CoreError;

/// Hard cap on a single worker's stop.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(8);

/// A supervised worker.
#[async_trait]
pub trait Lifecyclable: Send + Sync {
    fn name(&self) -> &str;
    async fn start(&self) -> Result<(), CoreError>;
    async fn stop(&self) -> Result<(), CoreError>;
}

struct Registration {
    worker: Arc<dyn Lifecyclable>,
    stop_rank: u32,
    registered_at: usize,
}

/// Starts workers in registration order, stops them by stop rank.
#[derive(Default)]
pub struct Supervisor {
    registrations: Vec<Registration>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker. Start order is registration order; stop order is
    /// ascending `stop_rank`, ties broken by reverse registration.
    pub fn register(&mut self, worker: Arc<dyn Lifecyclable>, stop_rank: u32) {
        let registered_at = self.registrations.len();
        self.registrations.push(Registration {
            worker,
            stop_rank,
            registered_at,
        });
    }

    /// Start every worker in order. On failure the already-started prefix
    /// is stopped in reverse before the error surfaces.
    pub async fn start_all(&self) -> Result<(), CoreError> {
        for (index, registration) in self.registrations.iter().enumerate() {
            let name = registration.worker.name().to_string();
            info!(worker = %name, "starting worker");
            if let Err(err) = registration.worker.start().await {
                error!(worker = %name, %err, "worker failed to start, unwinding");
                for started in self.registrations[..index].iter().rev() {
                    Self::stop_one(started.worker.as_ref()).await;
                }
                return Err(err);
            }
        }
        info!(count = self.registrations.len(), "all workers started");
        Ok(())
    }

    /// Stop every worker in stop-rank order with the hard cap applied.
    pub async fn stop_all(&self) {
        let mut order: Vec<&Registration> = self.registrations.iter().collect();
        order.sort_by(|a, b| {
            a.stop_rank
                .cmp(&b.stop_rank)
                .then(b.registered_at.cmp(&a.registered_at))
        });

        for registration in order {
            Self::stop_one(registration.worker.as_ref()).await;
        }
        info!("shutdown complete");
    }

    async fn stop_one(worker: &dyn Lifecyclable) {
        let name = worker.name().to_string();
        info!(worker = %name, "stopping worker");
        match tokio::time::timeout(STOP_TIMEOUT, worker.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(worker = %name, %err, "worker stop returned an error"),
            Err(_) => {
                // The worker is abandoned; its task keeps running until
                // process exit.
                error!(worker = %name, cap_secs = STOP_TIMEOUT.as_secs(), "unclean exit: stop exceeded hard cap");
            }
        }
    }
}

/// Sliding-window restart budget for worker-isolated processes.
#[derive(Debug)]
pub struct RestartTracker {
    max_restarts: usize,
    window: Duration,
    restarts: VecDeque<Instant>,
    terminally_failed: bool,
}

impl RestartTracker {
    /// Defaults: 5 restarts per 60s window.
    pub fn new(max_restarts: usize, window: Duration) -> Self {
        Self {
            max_restarts,
            window,
            restarts: VecDeque::new(),
            terminally_failed: false,
        }
    }

    /// Whether another restart is admitted right now. Exceeding the budget
    /// marks the worker terminally failed; the supervisor gives up on it.
    pub fn admit(&mut self) -> bool {
        self.admit_at(Instant::now())
    }

    fn admit_at(&mut self, now: Instant) -> bool {
        if self.terminally_failed {
            return false;
        }
        while let Some(oldest) = self.restarts.front() {
            if now.duration_since(*oldest) > self.window {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
        if self.restarts.len() >= self.max_restarts {
            self.terminally_failed = true;
            return false;
        }
        self.restarts.push_back(now);
        true
    }

    pub fn is_terminally_failed(&self) -> bool {
        self.terminally_failed
    }
}

impl Default for RestartTracker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingWorker {
        name: String,
        record: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Lifecyclable for RecordingWorker {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&self) -> Result<(), CoreError> {
            self.record
                .lock()
                .unwrap()
                .push(format!("start:{}", self.name));
            Ok(())
        }

        async fn stop(&self) -> Result<(), CoreError> {
            self.record
                .lock()
                .unwrap()
                .push(format!("stop:{}", self.name));
            Ok(())
        }
    }

    fn worker(name: &str, record: &Arc<Mutex<Vec<String>>>) -> Arc<RecordingWorker> {
        Arc::new(RecordingWorker {
            name: name.to_string(),
            record: Arc::clone(record),
        })
    }

    #[tokio::test]
    async fn stop_follows_ranks_not_reverse_registration() {
        let record = Arc::new(Mutex::new(Vec::new()));
        let mut supervisor = Supervisor::new();
        // Registration order is start order: fiat, aggregators,
        // collectors, rpc. Stop ranks enforce: scheduler/ohlcv first,
        // stream aggregator, collectors, fiat, transports last.
        supervisor.register(worker("fiat", &record), 3);
        supervisor.register(worker("ohlcv-scheduler", &record), 0);
        supervisor.register(worker("stream-aggregator", &record), 1);
        supervisor.register(worker("collector:binance", &record), 2);
        supervisor.register(worker("rpc", &record), 4);

        supervisor.start_all().await.unwrap();
        supervisor.stop_all().await;

        let record = record.lock().unwrap().clone();
        let stops: Vec<&String> = record.iter().filter(|e| e.starts_with("stop:")).collect();
        assert_eq!(
            stops,
            vec![
                "stop:ohlcv-scheduler",
                "stop:stream-aggregator",
                "stop:collector:binance",
                "stop:fiat",
                "stop:rpc",
            ]
        );
        // Start order is registration order.
        assert_eq!(record[0], "start:fiat");
        assert_eq!(record[4], "start:rpc");
    }

    #[tokio::test]
    async fn failed_start_unwinds_started_prefix() {
        struct FailingWorker;
        #[async_trait]
        impl Lifecyclable for FailingWorker {
            fn name(&self) -> &str {
                "failing"
            }
            async fn start(&self) -> Result<(), CoreError> {
                Err(CoreError::Internal {
                    detail: "boom".into(),
                })
            }
            async fn stop(&self) -> Result<(), CoreError> {
                Ok(())
            }
        }

        let record = Arc::new(Mutex::new(Vec::new()));
        let mut supervisor = Supervisor::new();
        supervisor.register(worker("first", &record), 0);
        supervisor.register(Arc::new(FailingWorker), 1);
        assert!(supervisor.start_all().await.is_err());
        assert_eq!(
            record.lock().unwrap().clone(),
            vec!["start:first", "stop:first"]
        );
    }

    #[test]
    fn restart_budget_is_a_sliding_window() {
        let mut tracker = RestartTracker::new(5, Duration::from_secs(60));
        for _ in 0..5 {
            assert!(tracker.admit());
        }
        assert!(!tracker.admit());
        assert!(tracker.is_terminally_failed());
        // Terminal failure is sticky.
        assert!(!tracker.admit());
    }

    #[test]
    fn restarts_outside_the_window_do_not_count() {
        let mut tracker = RestartTracker::new(2, Duration::from_millis(50));
        let base = Instant::now();
        assert!(tracker.admit_at(base));
        assert!(tracker.admit_at(base + Duration::from_millis(10)));
        // Both earlier restarts have aged out of the window.
        assert!(tracker.admit_at(base + Duration::from_millis(200)));
        assert!(!tracker.is_terminally_failed());
    }
}
