//! Per-venue append-only trade logs
//!
//! Each venue owns one stream under `trades:{venue}`. Collectors are the
//! only appenders for their venue; the aggregator reads every venue log
//! through a single consumer group, so delivery is per-venue FIFO and
//! at-least-once. The aggregator tolerates redelivery because the VWAP is
//! idempotent over a time window.

use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

use pv_types::{CoreError, Pair, Trade, Venue};

use crate::redis_error;

/// One delivered log entry awaiting acknowledgement.
///
/// `trade` is `None` for a malformed entry; the caller still acks it so the
/// log cannot wedge on bad data.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Stream entry id, e.g. `1700000000000-0`
    pub id: String,
    pub trade: Option<Trade>,
}

/// Producer/consumer handle for the venue trade streams.
#[derive(Clone)]
pub struct VenueLog {
    conn: ConnectionManager,
}

impl VenueLog {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn stream_key(venue: Venue) -> String {
        format!("trades:{venue}")
    }

    /// Append a normalized trade to its venue's stream.
    pub async fn append(&self, trade: &Trade) -> Result<String, CoreError> {
        let mut conn = self.conn.clone();
        let key = Self::stream_key(trade.venue);
        let fields: [(&str, String); 5] = [
            ("pair", trade.pair.as_str().to_string()),
            ("price", trade.price.to_string()),
            ("volume", trade.volume.to_string()),
            ("event_time", trade.event_time_ms.to_string()),
            ("trade_id", trade.venue_trade_id.clone()),
        ];
        conn.xadd(key, "*", &fields).await.map_err(redis_error)
    }

    /// Create the consumer group on a venue stream, creating the stream if
    /// missing. A pre-existing group is not an error.
    pub async fn create_group(&self, venue: Venue, group: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let key = Self::stream_key(venue);
        match conn
            .xgroup_create_mkstream::<_, _, _, ()>(key, group, "$")
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if err.to_string().contains("BUSYGROUP") => Ok(()),
            Err(err) => Err(redis_error(err)),
        }
    }

    /// Read up to `count` undelivered entries for this consumer, blocking
    /// at most `block_ms`. The bounded block keeps shutdown responsive.
    pub async fn read_group(
        &self,
        venue: Venue,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: usize,
    ) -> Result<Vec<LogEntry>, CoreError> {
        let mut conn = self.conn.clone();
        let key = Self::stream_key(venue);
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms);

        let reply: StreamReadReply = conn
            .xread_options(&[key], &[">"], &options)
            .await
            .map_err(redis_error)?;

        let mut entries = Vec::new();
        for stream in reply.keys {
            for id in stream.ids {
                let trade = match Self::parse_entry(venue, &id) {
                    Ok(trade) => Some(trade),
                    Err(err) => {
                        tracing::warn!(
                            venue = %venue,
                            entry = %id.id,
                            %err,
                            "skipping malformed log entry"
                        );
                        None
                    }
                };
                entries.push(LogEntry { id: id.id, trade });
            }
        }
        Ok(entries)
    }

    /// Acknowledge a delivered entry.
    pub async fn ack(&self, venue: Venue, group: &str, entry_id: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let key = Self::stream_key(venue);
        conn.xack(key, group, &[entry_id]).await.map_err(redis_error)
    }

    fn parse_entry(venue: Venue, id: &redis::streams::StreamId) -> Result<Trade, CoreError> {
        let field = |name: &str| -> Result<String, CoreError> {
            id.get::<String>(name).ok_or_else(|| CoreError::Redis {
                detail: format!("log entry {} missing field {name}", id.id),
            })
        };

        let pair: Pair = field("pair")?.parse()?;
        let price = field("price")?
            .parse()
            .map_err(|_| CoreError::InvalidParams {
                detail: format!("unparseable price in log entry {}", id.id),
            })?;
        let volume = field("volume")?
            .parse()
            .map_err(|_| CoreError::InvalidParams {
                detail: format!("unparseable volume in log entry {}", id.id),
            })?;
        let event_time_ms = field("event_time")?
            .parse()
            .map_err(|_| CoreError::InvalidParams {
                detail: format!("unparseable event time in log entry {}", id.id),
            })?;
        let venue_trade_id = field("trade_id")?;

        Trade::new(venue, pair, price, volume, event_time_ms, venue_trade_id)
    }
}
