//! Circuit breaker guarding explicit reconnect requests
//!
//! Automatic reconnection already backs off exponentially; this breaker
//! protects the *manual* reconnect path. Five consecutive failures within
//! the tracking window open the circuit and force a cooldown before
//! another attempt is admitted.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Attempts pass through
    Closed,
    /// Attempts are rejected until the cooldown elapses
    Open,
}

/// Configuration for the reconnect breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Window in which failures must accumulate to count as consecutive
    pub failure_window: Duration,
    /// Cooldown once open
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failures: u32,
    window_start: Option<Instant>,
    opened_at: Option<Instant>,
}

/// Thread-safe reconnect circuit breaker.
pub struct ReconnectBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl ReconnectBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                window_start: None,
                opened_at: None,
            }),
        }
    }

    /// Whether an attempt is admitted right now. An open breaker closes
    /// itself once the cooldown has elapsed.
    pub async fn should_attempt(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if cooled_down {
                    inner.state = BreakerState::Closed;
                    inner.failures = 0;
                    inner.window_start = None;
                    tracing::info!("reconnect breaker cooldown elapsed, closing");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful reconnect.
    pub async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.failures = 0;
        inner.window_start = None;
        inner.state = BreakerState::Closed;
    }

    /// Record a failed reconnect; may open the breaker.
    pub async fn on_failure(&self) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        // Failures outside the window restart the consecutive count.
        let in_window = inner
            .window_start
            .map(|start| now.duration_since(start) <= self.config.failure_window)
            .unwrap_or(false);
        if !in_window {
            inner.failures = 0;
            inner.window_start = Some(now);
        }

        inner.failures += 1;
        if inner.failures >= self.config.failure_threshold {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(now);
            tracing::warn!(failures = inner.failures, "reconnect breaker opened");
        }
    }

    /// Current state.
    pub async fn state(&self) -> BreakerState {
        self.inner.lock().await.state
    }
}

impl Default for ReconnectBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = ReconnectBreaker::default();
        for _ in 0..4 {
            breaker.on_failure().await;
            assert_eq!(breaker.state().await, BreakerState::Closed);
        }
        breaker.on_failure().await;
        assert_eq!(breaker.state().await, BreakerState::Open);
        assert!(!breaker.should_attempt().await);
    }

    #[tokio::test]
    async fn success_resets_the_count() {
        let breaker = ReconnectBreaker::default();
        for _ in 0..4 {
            breaker.on_failure().await;
        }
        breaker.on_success().await;
        breaker.on_failure().await;
        assert_eq!(breaker.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn cooldown_readmits_attempts() {
        let breaker = ReconnectBreaker::new(BreakerConfig {
            failure_threshold: 1,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_millis(10),
        });
        breaker.on_failure().await;
        assert!(!breaker.should_attempt().await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(breaker.should_attempt().await);
        assert_eq!(breaker.state().await, BreakerState::Closed);
    }
}
