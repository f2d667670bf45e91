//! Live price streaming
//!
//! The aggregator broadcasts every emitted price on Redis pub/sub; the
//! [`PriceBroadcaster`] bridges those channels into an in-process
//! `tokio::sync::broadcast` ring of bounded capacity. A lagging subscriber
//! loses the oldest messages (with a warning), never the newest, and a
//! subscriber that sees nothing within the idle timeout is closed with
//! `STREAM_TIMEOUT`. Client aborts surface as `STREAM_ABORTED`.

use std::collections::HashSet;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use pv_types::{CoreError, Pair, PricePayload};

/// Fan-out hub for canonical price payloads.
pub struct PriceBroadcaster {
    sender: broadcast::Sender<PricePayload>,
    idle_timeout: Duration,
}

impl PriceBroadcaster {
    /// `capacity` bounds each subscriber's queue; overflow drops the
    /// oldest entries.
    pub fn new(capacity: usize, idle_timeout: Duration) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            idle_timeout,
        }
    }

    /// Publish a payload to all subscribers. Returns the receiver count.
    pub fn publish(&self, payload: PricePayload) -> usize {
        // Send only fails when no subscriber exists, which is fine.
        self.sender.send(payload).unwrap_or(0)
    }

    /// Subscribe to a set of pairs with the given abort signal.
    pub fn subscribe(&self, pairs: Vec<Pair>, abort: watch::Receiver<bool>) -> PriceStream {
        PriceStream {
            receiver: self.sender.subscribe(),
            pairs: pairs.into_iter().collect(),
            idle_timeout: self.idle_timeout,
            abort,
            abort_closed: false,
        }
    }

    /// Forward Redis `price:*` pub/sub messages into the hub until the
    /// stop signal fires. Runs as its own task in the composition root.
    pub async fn run_redis_bridge(
        &self,
        client: redis::Client,
        mut stop_rx: watch::Receiver<bool>,
    ) -> Result<(), CoreError> {
        let conn = client
            .get_async_connection()
            .await
            .map_err(|err| CoreError::Redis {
                detail: err.to_string(),
            })?;
        let mut pubsub = conn.into_pubsub();
        pubsub
            .psubscribe("price:*")
            .await
            .map_err(|err| CoreError::Redis {
                detail: err.to_string(),
            })?;

        info!("price broadcast bridge subscribed to price:*");
        let mut messages = pubsub.on_message();
        loop {
            tokio::select! {
                message = messages.next() => {
                    let Some(message) = message else {
                        return Err(CoreError::Redis {
                            detail: "pub/sub stream ended".to_string(),
                        });
                    };
                    let body: String = match message.get_payload() {
                        Ok(body) => body,
                        Err(err) => {
                            warn!(%err, "unreadable pub/sub payload");
                            continue;
                        }
                    };
                    match serde_json::from_str::<PricePayload>(&body) {
                        Ok(payload) => {
                            self.publish(payload);
                        }
                        Err(err) => warn!(%err, "unparseable price payload on pub/sub"),
                    }
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        info!("price broadcast bridge stopping");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// One subscriber's view of the price stream.
pub struct PriceStream {
    receiver: broadcast::Receiver<PricePayload>,
    pairs: HashSet<Pair>,
    idle_timeout: Duration,
    abort: watch::Receiver<bool>,
    // A dropped abort sender means no abort can ever arrive; the idle
    // timeout remains the only terminator.
    abort_closed: bool,
}

impl PriceStream {
    /// Next matching payload.
    ///
    /// Returns `STREAM_TIMEOUT` after the idle timeout without any
    /// message, and `STREAM_ABORTED` when the abort signal fires or the
    /// hub shuts down.
    pub async fn next(&mut self) -> Result<PricePayload, CoreError> {
        loop {
            let recv = tokio::time::timeout(self.idle_timeout, self.receiver.recv());
            tokio::select! {
                result = recv => match result {
                    Err(_) => return Err(CoreError::StreamTimeout),
                    Ok(Err(broadcast::error::RecvError::Closed)) => {
                        return Err(CoreError::StreamAborted);
                    }
                    Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                        warn!(skipped, "price stream subscriber lagged, dropping oldest");
                        continue;
                    }
                    Ok(Ok(payload)) => {
                        if self.pairs.is_empty() || self.pairs.contains(&payload.pair) {
                            return Ok(payload);
                        }
                        debug!(pair = %payload.pair, "filtered payload for subscriber");
                        continue;
                    }
                },
                changed = self.abort.changed(), if !self.abort_closed => {
                    match changed {
                        Ok(()) if *self.abort.borrow() => {
                            return Err(CoreError::StreamAborted);
                        }
                        Ok(()) => {}
                        Err(_) => self.abort_closed = true,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn payload(pair: Pair) -> PricePayload {
        PricePayload {
            pair,
            price: dec!(45000),
            timestamp: Utc::now(),
        }
    }

    fn no_abort() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        std::mem::forget(tx);
        rx
    }

    #[tokio::test]
    async fn delivers_matching_pairs_only() {
        let hub = PriceBroadcaster::new(16, Duration::from_secs(1));
        let mut stream = hub.subscribe(vec![Pair::BtcUsd], no_abort());
        hub.publish(payload(Pair::EthUsd));
        hub.publish(payload(Pair::BtcUsd));
        let received = stream.next().await.unwrap();
        assert_eq!(received.pair, Pair::BtcUsd);
    }

    #[tokio::test]
    async fn idle_timeout_surfaces_stream_timeout() {
        let hub = PriceBroadcaster::new(16, Duration::from_millis(20));
        let mut stream = hub.subscribe(vec![Pair::BtcUsd], no_abort());
        let err = stream.next().await.unwrap_err();
        assert_eq!(err, CoreError::StreamTimeout);
    }

    #[tokio::test]
    async fn abort_signal_closes_the_stream() {
        let hub = PriceBroadcaster::new(16, Duration::from_secs(5));
        let (abort_tx, abort_rx) = watch::channel(false);
        let mut stream = hub.subscribe(vec![Pair::BtcUsd], abort_rx);
        abort_tx.send_replace(true);
        let err = stream.next().await.unwrap_err();
        assert_eq!(err, CoreError::StreamAborted);
    }

    #[tokio::test]
    async fn lagged_subscriber_drops_oldest_and_continues() {
        let hub = PriceBroadcaster::new(2, Duration::from_secs(1));
        let mut stream = hub.subscribe(vec![], no_abort());
        // Overflow the two-slot ring; the oldest messages are dropped.
        for _ in 0..5 {
            hub.publish(payload(Pair::BtcUsd));
        }
        let received = stream.next().await.unwrap();
        assert_eq!(received.pair, Pair::BtcUsd);
    }

    #[tokio::test]
    async fn empty_pair_filter_receives_everything() {
        let hub = PriceBroadcaster::new(16, Duration::from_secs(1));
        let mut stream = hub.subscribe(vec![], no_abort());
        hub.publish(payload(Pair::XmrRub));
        assert_eq!(stream.next().await.unwrap().pair, Pair::XmrRub);
    }
}
