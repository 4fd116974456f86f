use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::collections::VecDeque;
use tracing::debug;

use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::risk::limits::RiskLimitSet;
use crate::domain::risk::metrics::RiskMetrics;
use crate::domain::types::{OrderSide, RationaleCode, SizingDecision, TradeProposal};

/// Win/loss statistics accumulated from realized trade outcomes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KellyStats {
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub sample_size: usize,
}

impl KellyStats {
    /// Full Kelly fraction f* = (b*p - q) / b where b is the payoff ratio.
    /// Negative edge or degenerate losses yield zero.
    pub fn kelly_fraction(&self) -> f64 {
        if self.avg_loss <= 0.0 || self.avg_win <= 0.0 {
            return 0.0;
        }
        let b = self.avg_win / self.avg_loss;
        let p = self.win_rate;
        let q = 1.0 - p;
        ((b * p - q) / b).max(0.0)
    }
}

/// Realized outcomes kept for the Kelly estimate. Old trades say little
/// about the current edge, and the buffer must not grow for the process
/// lifetime.
const OUTCOME_WINDOW: usize = 500;

/// Streams realized per-trade PnL into win/loss statistics over a rolling
/// window of the most recent outcomes
#[derive(Debug, Clone)]
pub struct KellyAccumulator {
    window: usize,
    outcomes: VecDeque<f64>,
}

impl Default for KellyAccumulator {
    fn default() -> Self {
        Self::new(OUTCOME_WINDOW)
    }
}

impl KellyAccumulator {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            outcomes: VecDeque::new(),
        }
    }

    pub fn record_outcome(&mut self, pnl: f64) {
        // Break-even trades carry no information
        if !pnl.is_finite() || pnl == 0.0 {
            return;
        }
        self.outcomes.push_back(pnl);
        while self.outcomes.len() > self.window {
            self.outcomes.pop_front();
        }
    }

    pub fn sample_size(&self) -> usize {
        self.outcomes.len()
    }

    pub fn stats(&self) -> Option<KellyStats> {
        let n = self.outcomes.len();
        if n == 0 {
            return None;
        }
        let (mut wins, mut win_sum, mut loss_sum) = (0usize, 0.0f64, 0.0f64);
        for &pnl in &self.outcomes {
            if pnl > 0.0 {
                wins += 1;
                win_sum += pnl;
            } else {
                loss_sum += -pnl;
            }
        }
        let losses = n - wins;
        Some(KellyStats {
            win_rate: wins as f64 / n as f64,
            avg_win: if wins == 0 { 0.0 } else { win_sum / wins as f64 },
            avg_loss: if losses == 0 { 0.0 } else { loss_sum / losses as f64 },
            sample_size: n,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SizingConfig {
    /// Fraction of full Kelly actually deployed
    pub kelly_fraction: f64,
    /// Below this many realized outcomes Kelly is skipped entirely
    pub kelly_min_samples: usize,
    /// Annualized portfolio volatility the book is steered toward
    pub target_portfolio_vol: f64,
    /// Floor for the correlation penalty multiplier
    pub min_correlation_scale: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            kelly_fraction: 0.25,
            kelly_min_samples: 30,
            target_portfolio_vol: 0.20,
            min_correlation_scale: 0.1,
        }
    }
}

/// Derive the approved quantity for a trade proposal.
///
/// Pure and synchronous: all inputs are immutable snapshots, so the same
/// proposal against the same state always yields the same decision. Never
/// returns more than was requested and never more than the hard caps allow.
pub fn size_position(
    proposal: &TradeProposal,
    snapshot: &PortfolioSnapshot,
    metrics: &RiskMetrics,
    limits: &RiskLimitSet,
    cfg: &SizingConfig,
    kelly: Option<&KellyStats>,
    mark_price: Decimal,
) -> SizingDecision {
    let mut rationale = Vec::new();
    let equity = snapshot.total_value.to_f64().unwrap_or(0.0);
    let price = mark_price.to_f64().unwrap_or(0.0);

    if equity <= 0.0 || price <= 0.0 {
        rationale.push(RationaleCode::MissingPrice);
        return SizingDecision {
            approved_quantity: Decimal::ZERO,
            max_allowed_quantity: Decimal::ZERO,
            rationale,
            limit_version: limits.version,
            decided_at: Utc::now(),
        };
    }

    let held = snapshot.position_quantity(&proposal.symbol);

    // Sells only ever reduce exposure; cap at the held quantity and skip
    // the sizing ladder entirely.
    if proposal.side == OrderSide::Sell {
        let approved = proposal.requested_quantity.min(held.max(Decimal::ZERO));
        rationale.push(RationaleCode::ReducingTrade);
        return SizingDecision {
            approved_quantity: approved.round_dp(4),
            max_allowed_quantity: held.max(Decimal::ZERO).round_dp(4),
            rationale,
            limit_version: limits.version,
            decided_at: Utc::now(),
        };
    }

    if metrics.insufficient_data || metrics.stale {
        rationale.push(RationaleCode::DegradedMetrics);
    }

    // Target position value as a fraction of equity, starting from the
    // concentration ceiling and shrinking from there.
    let mut target_fraction = limits.max_position_pct;

    // Fractional Kelly, only once enough outcomes have accrued
    match kelly {
        Some(stats) if stats.sample_size >= cfg.kelly_min_samples && !metrics.insufficient_data => {
            let f = stats.kelly_fraction() * cfg.kelly_fraction;
            if f > 0.0 {
                target_fraction = target_fraction.min(f);
                rationale.push(RationaleCode::KellySized);
            } else {
                rationale.push(RationaleCode::KellySkipped);
            }
        }
        _ => rationale.push(RationaleCode::KellySkipped),
    }

    // Volatility targeting: scale so the asset's contribution steers the
    // book toward the target annualized volatility
    let asset_vol = metrics.asset_vol(&proposal.symbol).unwrap_or(1.0).max(1e-6);
    let vol_fraction = cfg.target_portfolio_vol / asset_vol;
    if vol_fraction < target_fraction {
        target_fraction = vol_fraction;
        rationale.push(RationaleCode::VolatilityTarget);
    }

    // Correlation penalty against existing holdings
    let held_symbols: Vec<String> = snapshot
        .positions
        .keys()
        .filter(|s| s.as_str() != proposal.symbol)
        .cloned()
        .collect();
    if let Some(max_corr) = metrics
        .correlation
        .max_correlation_with(&proposal.symbol, &held_symbols)
    {
        if max_corr > 0.5 {
            let scale = (1.0 - max_corr).max(cfg.min_correlation_scale);
            target_fraction *= scale;
            rationale.push(RationaleCode::CorrelationScaled);
        }
    }

    // Hard cap: resulting position (including what is already held) must
    // stay within the concentration limit
    let held_value = (held.max(Decimal::ZERO) * mark_price).to_f64().unwrap_or(0.0);
    let max_position_value = limits.max_position_pct * equity;
    let mut allowed_value = (target_fraction * equity).min(max_position_value - held_value);
    if allowed_value < target_fraction * equity {
        rationale.push(RationaleCode::ClippedByPositionLimit);
    }

    // Hard cap: single-order notional ceiling
    if allowed_value > limits.max_order_value_usd {
        allowed_value = limits.max_order_value_usd;
        rationale.push(RationaleCode::ClippedByOrderValue);
    }

    let max_allowed_qty = Decimal::from_f64((allowed_value.max(0.0)) / price)
        .unwrap_or(Decimal::ZERO)
        .round_dp(4);
    let approved = proposal.requested_quantity.min(max_allowed_qty).max(Decimal::ZERO);

    debug!(
        symbol = %proposal.symbol,
        requested = %proposal.requested_quantity,
        approved = %approved,
        target_fraction,
        "Sized trade proposal"
    );

    SizingDecision {
        approved_quantity: approved.round_dp(4),
        max_allowed_quantity: max_allowed_qty,
        rationale,
        limit_version: limits.version,
        decided_at: Utc::now(),
    }
}
