use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Immutable market state at a timestamp: latest prices plus rolling
/// per-symbol return histories (oldest first).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub timestamp: DateTime<Utc>,
    pub prices: HashMap<String, Decimal>,
    pub returns: HashMap<String, Vec<f64>>,
}

impl MarketSnapshot {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            prices: HashMap::new(),
            returns: HashMap::new(),
        }
    }

    pub fn price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(symbol).copied()
    }

    /// Number of return observations available for `symbol`
    pub fn observations(&self, symbol: &str) -> usize {
        self.returns.get(symbol).map(|r| r.len()).unwrap_or(0)
    }

    /// Align the return histories of `symbols` on their common tail.
    /// Returns one row per observation (oldest first), one column per symbol,
    /// or None if any symbol has no history at all.
    pub fn aligned_returns(&self, symbols: &[String]) -> Option<Vec<Vec<f64>>> {
        if symbols.is_empty() {
            return Some(Vec::new());
        }
        let series: Vec<&Vec<f64>> = symbols
            .iter()
            .map(|s| self.returns.get(s))
            .collect::<Option<Vec<_>>>()?;

        let n = series.iter().map(|s| s.len()).min().unwrap_or(0);
        if n == 0 {
            return None;
        }

        let rows = (0..n)
            .map(|t| {
                series
                    .iter()
                    .map(|s| s[s.len() - n + t])
                    .collect::<Vec<f64>>()
            })
            .collect();
        Some(rows)
    }
}

/// Accumulates price ticks from upstream feeds into rolling log-return
/// windows; `snapshot()` publishes an immutable MarketSnapshot.
#[derive(Debug)]
pub struct ReturnAccumulator {
    window: usize,
    last_prices: HashMap<String, f64>,
    returns: HashMap<String, VecDeque<f64>>,
}

impl ReturnAccumulator {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            last_prices: HashMap::new(),
            returns: HashMap::new(),
        }
    }

    /// Record an observed price; pushes a log return once a prior price exists.
    pub fn record_price(&mut self, symbol: &str, price: Decimal) {
        let Some(price) = price.to_f64() else { return };
        if price <= 0.0 {
            return;
        }
        if let Some(&last) = self.last_prices.get(symbol) {
            if last > 0.0 {
                let history = self.returns.entry(symbol.to_string()).or_default();
                history.push_back((price / last).ln());
                while history.len() > self.window {
                    history.pop_front();
                }
            }
        }
        self.last_prices.insert(symbol.to_string(), price);
    }

    pub fn snapshot(&self, timestamp: DateTime<Utc>, prices: HashMap<String, Decimal>) -> MarketSnapshot {
        MarketSnapshot {
            timestamp,
            prices,
            returns: self
                .returns
                .iter()
                .map(|(s, r)| (s.clone(), r.iter().copied().collect()))
                .collect(),
        }
    }
}
