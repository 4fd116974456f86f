use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::risk::limits::RiskLimitSet;
use crate::domain::risk::metrics::RiskMetrics;

/// A hypothetical market shock applied to the current book
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressScenario {
    pub name: String,
    pub description: String,
    /// Shock applied to symbols without a specific entry
    pub default_price_shock_pct: f64,
    /// Per-symbol overrides, e.g. stablecoins depegging less than majors
    pub price_shocks: HashMap<String, f64>,
    pub volatility_multiplier: f64,
    /// When set, all pairwise correlations are forced to this value
    pub correlation_override: Option<f64>,
}

impl StressScenario {
    pub fn shock_for(&self, symbol: &str) -> f64 {
        self.price_shocks
            .get(symbol)
            .copied()
            .unwrap_or(self.default_price_shock_pct)
    }
}

/// Scenario catalog replayed on a schedule; calibrated to historical crypto
/// drawdowns.
pub fn default_scenarios() -> Vec<StressScenario> {
    vec![
        StressScenario {
            name: "march_2020_crash".to_string(),
            description: "March 2020 style liquidity cascade: -50% across majors".to_string(),
            default_price_shock_pct: -0.50,
            price_shocks: HashMap::new(),
            volatility_multiplier: 2.0,
            correlation_override: None,
        },
        StressScenario {
            name: "black_swan".to_string(),
            description: "Black swan tail event: -75%, volatility x5, correlations to one"
                .to_string(),
            default_price_shock_pct: -0.75,
            price_shocks: HashMap::new(),
            volatility_multiplier: 5.0,
            correlation_override: Some(0.95),
        },
        StressScenario {
            name: "stablecoin_depeg".to_string(),
            description: "Quote-asset depeg: majors -30%, volatility x3".to_string(),
            default_price_shock_pct: -0.30,
            price_shocks: HashMap::new(),
            volatility_multiplier: 3.0,
            correlation_override: Some(0.8),
        },
    ]
}

#[derive(Debug, Clone, Serialize)]
pub struct StressResult {
    pub scenario: String,
    /// Immediate mark-to-market loss from the price shocks
    pub projected_pnl: Decimal,
    /// Projected loss as a fraction of current equity
    pub projected_return: f64,
    /// 99% VaR re-estimated under the scenario's volatility regime
    pub var_99_under_scenario: f64,
    /// Worst simulated path return under the scenario
    pub worst_path_return: f64,
    /// Whether post-shock equity stays above zero
    pub survives: bool,
    pub computed_at: DateTime<Utc>,
}

/// Signalled when a scenario run was abandoned because newer portfolio state
/// arrived or shutdown began.
#[derive(Debug, thiserror::Error)]
#[error("stress run cancelled")]
pub struct StressCancelled;

/// Revalue the book under a scenario and re-estimate tail risk in the
/// shocked volatility regime. Checks `cancel` between phases so a superseded
/// snapshot stops wasting cores.
pub fn run_scenario(
    scenario: &StressScenario,
    portfolio: &PortfolioSnapshot,
    metrics: &RiskMetrics,
    mc_paths: usize,
    mc_seed: u64,
    cancel: &Arc<AtomicBool>,
) -> Result<StressResult, StressCancelled> {
    if cancel.load(Ordering::Relaxed) {
        return Err(StressCancelled);
    }

    let equity = portfolio.total_value.to_f64().unwrap_or(0.0);

    // Phase 1: deterministic mark-to-market under the shocks
    let mut shocked_loss = 0.0f64;
    for (symbol, position) in &portfolio.positions {
        let value = position.market_value().to_f64().unwrap_or(0.0);
        shocked_loss += value * scenario.shock_for(symbol);
    }
    let projected_pnl = Decimal::from_f64(shocked_loss).unwrap_or(Decimal::ZERO).round_dp(2);
    let projected_return = if equity > 0.0 { shocked_loss / equity } else { 0.0 };

    if cancel.load(Ordering::Relaxed) {
        return Err(StressCancelled);
    }

    // Phase 2: Monte Carlo in the shocked regime. Daily sigma from the
    // annualized portfolio vol, inflated by the scenario multiplier and by
    // the correlation override closing diversification.
    let mut daily_sigma = metrics.portfolio_volatility / (365.0f64).sqrt();
    daily_sigma *= scenario.volatility_multiplier;
    if let Some(rho) = scenario.correlation_override {
        let current_max = metrics
            .correlation
            .max_offdiagonal()
            .map(|(_, _, v)| v)
            .unwrap_or(0.0);
        if rho > current_max {
            // Crude diversification haircut: higher common correlation
            // pushes portfolio vol toward the weighted sum of asset vols
            daily_sigma *= (1.0 + rho).sqrt();
        }
    }

    let paths = simulate_paths(projected_return, daily_sigma, mc_paths, mc_seed, cancel)?;

    let mut sorted = paths;
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = ((0.01 * sorted.len() as f64).floor() as usize).min(sorted.len().saturating_sub(1));
    let var_99_under_scenario = sorted.first().map(|_| (-sorted[idx]).max(0.0)).unwrap_or(0.0);
    let worst_path_return = sorted.first().copied().unwrap_or(0.0);

    Ok(StressResult {
        scenario: scenario.name.clone(),
        projected_pnl,
        projected_return,
        var_99_under_scenario,
        worst_path_return,
        survives: equity + shocked_loss > 0.0,
        computed_at: Utc::now(),
    })
}

fn simulate_paths(
    mu: f64,
    sigma: f64,
    paths: usize,
    seed: u64,
    cancel: &Arc<AtomicBool>,
) -> Result<Vec<f64>, StressCancelled> {
    let results: Vec<Option<f64>> = (0..paths)
        .into_par_iter()
        .map(|i| {
            // Cheap per-path check keeps cancellation latency low
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            let path_seed = seed.wrapping_add((i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
            let mut rng = StdRng::seed_from_u64(path_seed);
            let u1: f64 = rng.random::<f64>().max(1e-12);
            let u2: f64 = rng.random();
            let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
            Some(mu + sigma * z)
        })
        .collect();
    results.into_iter().collect::<Option<Vec<f64>>>().ok_or(StressCancelled)
}

/// Derive a tightened limit set from stress results.
///
/// Only ever proposes stricter values than the active set; a proposal is
/// advisory and takes effect only after explicit operator approval. Returns
/// None when every scenario is survivable with the current limits.
pub fn propose_tightening(
    results: &[StressResult],
    active: &RiskLimitSet,
) -> Option<RiskLimitSet> {
    let worst = results
        .iter()
        .filter(|r| !r.survives || r.projected_return < -active.max_drawdown_pct)
        .min_by(|a, b| a.projected_return.total_cmp(&b.projected_return))?;

    let mut proposed = active.clone();
    proposed.name = format!("{}-stress-{}", active.name, worst.scenario);
    proposed.version = active.version + 1;

    // Halve concentration and VaR headroom; tightening only, never loosening
    proposed.max_position_pct = (active.max_position_pct * 0.5).min(active.max_position_pct);
    proposed.daily_var_ceiling_pct = (active.daily_var_ceiling_pct * 0.5).min(active.daily_var_ceiling_pct);
    proposed.max_leverage = (active.max_leverage * 0.75).min(active.max_leverage).max(1.0);
    proposed.max_order_value_usd = (active.max_order_value_usd * 0.5).min(active.max_order_value_usd);

    debug_assert!(proposed.is_tightening_of(active));
    Some(proposed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use crate::domain::portfolio::Position;

    fn portfolio() -> PortfolioSnapshot {
        let mut positions = HashMap::new();
        positions.insert(
            "BTC/USDT".to_string(),
            Position {
                symbol: "BTC/USDT".to_string(),
                quantity: dec!(1),
                mark_price: dec!(40000),
                cost_basis: dec!(38000),
                exchange: "binance".to_string(),
            },
        );
        PortfolioSnapshot::new(Utc::now(), dec!(60000), positions, dec!(100000), 1e-6).unwrap()
    }

    fn metrics() -> RiskMetrics {
        let mut m = RiskMetrics::empty(Utc::now(), 0.95, 0.0);
        m.portfolio_volatility = 0.6;
        m
    }

    #[test]
    fn test_march_2020_scenario_halves_positions() {
        let cancel = Arc::new(AtomicBool::new(false));
        let scenarios = default_scenarios();
        let crash = &scenarios[0];
        let result = run_scenario(crash, &portfolio(), &metrics(), 1000, 7, &cancel).unwrap();

        // 40k position shocked -50% = -20k on 100k equity
        assert_eq!(result.projected_pnl, dec!(-20000));
        assert!((result.projected_return + 0.2).abs() < 1e-9);
        assert!(result.survives);
        assert!(result.var_99_under_scenario > 0.0);
    }

    #[test]
    fn test_black_swan_is_worse_than_crash() {
        let cancel = Arc::new(AtomicBool::new(false));
        let scenarios = default_scenarios();
        let crash = run_scenario(&scenarios[0], &portfolio(), &metrics(), 1000, 7, &cancel).unwrap();
        let swan = run_scenario(&scenarios[1], &portfolio(), &metrics(), 1000, 7, &cancel).unwrap();
        assert!(swan.projected_return < crash.projected_return);
        assert!(swan.var_99_under_scenario > crash.var_99_under_scenario);
    }

    #[test]
    fn test_cancelled_run_returns_error() {
        let cancel = Arc::new(AtomicBool::new(true));
        let scenarios = default_scenarios();
        let result = run_scenario(&scenarios[0], &portfolio(), &metrics(), 1000, 7, &cancel);
        assert!(result.is_err());
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let cancel = Arc::new(AtomicBool::new(false));
        let scenarios = default_scenarios();
        let a = run_scenario(&scenarios[1], &portfolio(), &metrics(), 2000, 11, &cancel).unwrap();
        let b = run_scenario(&scenarios[1], &portfolio(), &metrics(), 2000, 11, &cancel).unwrap();
        assert_eq!(a.var_99_under_scenario, b.var_99_under_scenario);
        assert_eq!(a.worst_path_return, b.worst_path_return);
    }

    #[test]
    fn test_proposal_only_tightens() {
        let active = RiskLimitSet::default();
        let results = vec![StressResult {
            scenario: "black_swan".to_string(),
            projected_pnl: dec!(-90000),
            projected_return: -0.9,
            var_99_under_scenario: 0.5,
            worst_path_return: -1.2,
            survives: false,
            computed_at: Utc::now(),
        }];
        let proposed = propose_tightening(&results, &active).unwrap();
        assert!(proposed.is_tightening_of(&active));
        assert_eq!(proposed.version, active.version + 1);
        assert!(proposed.max_position_pct <= active.max_position_pct);
    }

    #[test]
    fn test_no_proposal_when_survivable() {
        let active = RiskLimitSet::default();
        let results = vec![StressResult {
            scenario: "march_2020_crash".to_string(),
            projected_pnl: dec!(-5000),
            projected_return: -0.05,
            var_99_under_scenario: 0.08,
            worst_path_return: -0.15,
            survives: true,
            computed_at: Utc::now(),
        }];
        assert!(propose_tightening(&results, &active).is_none());
    }
}
