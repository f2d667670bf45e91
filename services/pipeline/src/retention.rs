//! Retention sweeping
//!
//! Deletes rows older than each table's TTL on the configured cron. A
//! zero TTL means keep forever. Table sweeps are independent: one
//! failure is logged and the rest proceed.

use chrono::{Duration, Utc};
use tracing::{info, warn};

use pv_config::RetentionSection;
use pv_storage::{CandleRepository, PriceHistoryRepository};
use pv_types::Resolution;

/// Periodic TTL enforcement over the history tables.
pub struct RetentionSweeper {
    prices: PriceHistoryRepository,
    candles: CandleRepository,
    config: RetentionSection,
}

impl RetentionSweeper {
    pub fn new(
        prices: PriceHistoryRepository,
        candles: CandleRepository,
        config: RetentionSection,
    ) -> Self {
        Self {
            prices,
            candles,
            config,
        }
    }

    fn candle_ttl_days(&self, resolution: Resolution) -> u32 {
        match resolution {
            Resolution::FiveMin => self.config.candles_5min_days,
            Resolution::OneHour => self.config.candles_1hour_days,
            Resolution::OneDay => self.config.candles_1day_days,
        }
    }

    /// Run one sweep across all tables.
    pub async fn sweep(&self) {
        if !self.config.enabled {
            return;
        }
        let now = Utc::now();

        if self.config.price_history_days > 0 {
            let cutoff = now - Duration::days(self.config.price_history_days as i64);
            match self.prices.delete_older_than(cutoff).await {
                Ok(deleted) => info!(deleted, table = "price_history", "retention sweep"),
                Err(err) => warn!(table = "price_history", %err, "retention sweep failed"),
            }
        }

        for resolution in Resolution::ALL {
            let ttl_days = self.candle_ttl_days(resolution);
            if ttl_days == 0 {
                continue; // keep forever
            }
            let cutoff = now - Duration::days(ttl_days as i64);
            match self.candles.delete_older_than(resolution, cutoff).await {
                Ok(deleted) => {
                    info!(deleted, table = %format!("price_history_{resolution}"), "retention sweep");
                }
                Err(err) => {
                    warn!(table = %format!("price_history_{resolution}"), %err, "retention sweep failed");
                }
            }
        }
    }
}
