use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::errors::EngineError;

/// A single open position, owned exclusively by its PortfolioSnapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub mark_price: Decimal,
    pub cost_basis: Decimal,
    pub exchange: String,
}

impl Position {
    pub fn market_value(&self) -> Decimal {
        self.quantity * self.mark_price
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        (self.mark_price - self.cost_basis) * self.quantity
    }
}

/// Immutable portfolio state at a timestamp. Mutation happens only by
/// publishing a whole new snapshot (copy-on-write), so concurrent readers
/// never observe a torn state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cash: Decimal,
    pub positions: HashMap<String, Position>,
    pub total_value: Decimal,
}

impl PortfolioSnapshot {
    /// Build a snapshot, enforcing the consistency invariant:
    /// cash + sum of position market values must equal the reported total
    /// within `epsilon` (relative tolerance).
    pub fn new(
        timestamp: DateTime<Utc>,
        cash: Decimal,
        positions: HashMap<String, Position>,
        reported_total: Decimal,
        epsilon: f64,
    ) -> Result<Self, EngineError> {
        let computed: Decimal = cash + positions.values().map(|p| p.market_value()).sum::<Decimal>();

        let diff = (computed - reported_total).abs().to_f64().unwrap_or(f64::MAX);
        let scale = reported_total.abs().to_f64().unwrap_or(0.0).max(1.0);
        if diff / scale > epsilon {
            return Err(EngineError::InconsistentSnapshot {
                reported: reported_total,
                computed,
            });
        }

        Ok(Self {
            timestamp,
            cash,
            positions,
            total_value: reported_total,
        })
    }

    /// Empty portfolio with only cash
    pub fn all_cash(timestamp: DateTime<Utc>, cash: Decimal) -> Self {
        Self {
            timestamp,
            cash,
            positions: HashMap::new(),
            total_value: cash,
        }
    }

    pub fn positions_value(&self) -> Decimal {
        self.positions.values().map(|p| p.market_value()).sum()
    }

    /// Sum of absolute position values (shorts count positive)
    pub fn gross_exposure(&self) -> Decimal {
        self.positions.values().map(|p| p.market_value().abs()).sum()
    }

    /// Gross exposure over equity, 0 for an empty or worthless portfolio
    pub fn leverage(&self) -> f64 {
        if self.total_value <= Decimal::ZERO {
            return 0.0;
        }
        (self.gross_exposure() / self.total_value).to_f64().unwrap_or(0.0)
    }

    pub fn position_quantity(&self, symbol: &str) -> Decimal {
        self.positions
            .get(symbol)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO)
    }

    /// Position weight as a fraction of total equity
    pub fn weight(&self, symbol: &str) -> f64 {
        if self.total_value <= Decimal::ZERO {
            return 0.0;
        }
        self.positions
            .get(symbol)
            .map(|p| (p.market_value() / self.total_value).to_f64().unwrap_or(0.0))
            .unwrap_or(0.0)
    }

    /// All position weights, keyed by symbol
    pub fn weights(&self) -> HashMap<String, f64> {
        self.positions
            .keys()
            .map(|s| (s.clone(), self.weight(s)))
            .collect()
    }

    pub fn largest_weight(&self) -> Option<(&str, f64)> {
        self.positions
            .keys()
            .map(|s| (s.as_str(), self.weight(s)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Market value held per exchange
    pub fn exchange_exposures(&self) -> HashMap<String, Decimal> {
        let mut exposures: HashMap<String, Decimal> = HashMap::new();
        for position in self.positions.values() {
            *exposures
                .entry(position.exchange.clone())
                .or_insert(Decimal::ZERO) += position.market_value().abs();
        }
        exposures
    }

    /// Largest per-exchange exposure as a fraction of equity
    pub fn largest_exchange_exposure(&self) -> Option<(String, f64)> {
        if self.total_value <= Decimal::ZERO {
            return None;
        }
        self.exchange_exposures()
            .into_iter()
            .map(|(ex, value)| (ex, (value / self.total_value).to_f64().unwrap_or(0.0)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}
