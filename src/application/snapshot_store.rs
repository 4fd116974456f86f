//! Shared holder for the latest portfolio and market snapshots.
//!
//! Readers clone an Arc and work on an immutable snapshot; writers swap the
//! pointer. An epoch counter increments on every portfolio update so long
//! running consumers (stress runs) can detect they are working on stale
//! state.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::debug;

use crate::domain::errors::EngineError;
use crate::domain::market::{MarketSnapshot, ReturnAccumulator};
use crate::domain::portfolio::PortfolioSnapshot;

const DEFAULT_RETURN_WINDOW: usize = 250;

#[derive(Debug, Clone, Copy)]
struct DailyAnchor {
    date: NaiveDate,
    start_equity: Decimal,
}

pub struct SnapshotStore {
    portfolio: RwLock<Arc<PortfolioSnapshot>>,
    market: RwLock<Arc<MarketSnapshot>>,
    high_water_mark: RwLock<Decimal>,
    daily: RwLock<DailyAnchor>,
    accumulator: Mutex<ReturnAccumulator>,
    epoch_tx: watch::Sender<u64>,
}

impl SnapshotStore {
    pub fn new(initial: PortfolioSnapshot) -> Self {
        Self::with_return_window(initial, DEFAULT_RETURN_WINDOW)
    }

    pub fn with_return_window(initial: PortfolioSnapshot, return_window: usize) -> Self {
        let timestamp = initial.timestamp;
        let equity = initial.total_value;
        let (epoch_tx, _) = watch::channel(0);
        Self {
            portfolio: RwLock::new(Arc::new(initial)),
            market: RwLock::new(Arc::new(MarketSnapshot::empty(timestamp))),
            high_water_mark: RwLock::new(equity),
            daily: RwLock::new(DailyAnchor {
                date: timestamp.date_naive(),
                start_equity: equity,
            }),
            accumulator: Mutex::new(ReturnAccumulator::new(return_window)),
            epoch_tx,
        }
    }

    /// Install a new portfolio snapshot, advancing the high-water mark and
    /// the daily session anchor as needed. Bumps the epoch so in-flight
    /// stress runs against the previous snapshot can abandon their work.
    pub async fn update_portfolio(&self, snapshot: PortfolioSnapshot) {
        let equity = snapshot.total_value;
        let date = snapshot.timestamp.date_naive();

        {
            let mut hwm = self.high_water_mark.write().await;
            if equity > *hwm {
                *hwm = equity;
            }
        }
        {
            let mut daily = self.daily.write().await;
            if daily.date != date {
                debug!(date = %date, equity = %equity, "New trading day, resetting daily anchor");
                *daily = DailyAnchor {
                    date,
                    start_equity: equity,
                };
            }
        }

        *self.portfolio.write().await = Arc::new(snapshot);
        self.epoch_tx.send_modify(|epoch| *epoch += 1);
    }

    pub async fn update_market(&self, snapshot: MarketSnapshot) {
        *self.market.write().await = Arc::new(snapshot);
    }

    /// Fold a batch of observed prices into the rolling return histories and
    /// publish the refreshed market snapshot. Feeds that only see raw ticks
    /// use this instead of assembling a snapshot themselves.
    pub async fn update_prices(
        &self,
        timestamp: DateTime<Utc>,
        prices: HashMap<String, Decimal>,
    ) {
        let snapshot = {
            let mut accumulator = self.accumulator.lock().await;
            for (symbol, price) in &prices {
                accumulator.record_price(symbol, *price);
            }
            accumulator.snapshot(timestamp, prices)
        };
        self.update_market(snapshot).await;
    }

    pub async fn portfolio(&self) -> Arc<PortfolioSnapshot> {
        self.portfolio.read().await.clone()
    }

    pub async fn market(&self) -> Arc<MarketSnapshot> {
        self.market.read().await.clone()
    }

    pub async fn high_water_mark(&self) -> Decimal {
        *self.high_water_mark.read().await
    }

    /// Loss since session start as a positive fraction; gains yield zero
    pub async fn daily_loss_pct(&self) -> f64 {
        let daily = *self.daily.read().await;
        if daily.start_equity <= Decimal::ZERO {
            return 0.0;
        }
        let current = self.portfolio.read().await.total_value;
        ((daily.start_equity - current) / daily.start_equity)
            .to_f64()
            .unwrap_or(0.0)
            .max(0.0)
    }

    pub async fn snapshot_age_ms(&self, now: DateTime<Utc>) -> u64 {
        let snapshot = self.portfolio.read().await;
        (now - snapshot.timestamp).num_milliseconds().max(0) as u64
    }

    /// Authorization-path guard: refuse to decide on data older than the
    /// configured staleness limit.
    pub async fn ensure_fresh(&self, now: DateTime<Utc>, limit_ms: u64) -> Result<(), EngineError> {
        let age_ms = self.snapshot_age_ms(now).await;
        if age_ms > limit_ms {
            return Err(EngineError::StaleSnapshot {
                age_ms,
                limit_ms,
            });
        }
        Ok(())
    }

    pub fn current_epoch(&self) -> u64 {
        *self.epoch_tx.borrow()
    }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.epoch_tx.subscribe()
    }
}
