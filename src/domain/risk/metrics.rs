use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal, StudentsT};
use std::collections::HashMap;
use tracing::warn;

use crate::domain::errors::MetricError;
use crate::domain::market::MarketSnapshot;
use crate::domain::portfolio::PortfolioSnapshot;

/// Crypto markets trade every day of the year
const PERIODS_PER_YEAR: f64 = 365.0;

/// Annualized volatility assumed for assets with no usable history.
/// Deliberately punitive so degraded sizing stays small.
const DEGRADED_ASSET_VOL: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarMethod {
    Historical,
    Parametric,
    MonteCarlo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailDistribution {
    Normal,
    StudentT,
}

/// Configuration for the metric calculator. All three VaR methods honor the
/// same confidence level and holding period so results stay comparable.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub method: VarMethod,
    /// Confidence level used for the expected-shortfall and limit checks
    pub confidence: f64,
    pub holding_period_days: f64,
    /// Rolling return-history window
    pub window: usize,
    /// Below this many observations the result is degraded
    pub min_observations: usize,
    /// EWMA covariance decay factor
    pub ewma_decay: f64,
    pub mc_paths: usize,
    pub mc_seed: u64,
    pub distribution: TailDistribution,
    pub t_degrees_of_freedom: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            method: VarMethod::Historical,
            confidence: 0.95,
            holding_period_days: 1.0,
            window: 250,
            min_observations: 250,
            ewma_decay: 0.94,
            mc_paths: 10_000,
            mc_seed: 42,
            distribution: TailDistribution::Normal,
            t_degrees_of_freedom: 4.0,
        }
    }
}

/// Symmetric correlation matrix over a fixed symbol ordering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub symbols: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    pub fn identity(symbols: Vec<String>) -> Self {
        let n = symbols.len();
        let mut values = vec![vec![0.0; n]; n];
        for (i, row) in values.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self { symbols, values }
    }

    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.symbols.iter().position(|s| s == a)?;
        let j = self.symbols.iter().position(|s| s == b)?;
        Some(self.values[i][j])
    }

    /// Largest off-diagonal entry, or None for matrices smaller than 2x2
    pub fn max_offdiagonal(&self) -> Option<(String, String, f64)> {
        let n = self.symbols.len();
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..n {
            for j in (i + 1)..n {
                let v = self.values[i][j];
                if best.map(|(_, _, b)| v > b).unwrap_or(true) {
                    best = Some((i, j, v));
                }
            }
        }
        best.map(|(i, j, v)| (self.symbols[i].clone(), self.symbols[j].clone(), v))
    }

    /// Max correlation between `symbol` and any of `others`
    pub fn max_correlation_with(&self, symbol: &str, others: &[String]) -> Option<f64> {
        others
            .iter()
            .filter(|o| o.as_str() != symbol)
            .filter_map(|o| self.get(symbol, o))
            .max_by(|a, b| a.total_cmp(b))
    }

    pub fn is_symmetric(&self, tol: f64) -> bool {
        let n = self.symbols.len();
        for i in 0..n {
            for j in 0..n {
                if (self.values[i][j] - self.values[j][i]).abs() > tol {
                    return false;
                }
            }
        }
        true
    }

    pub fn has_unit_diagonal(&self, tol: f64) -> bool {
        self.values
            .iter()
            .enumerate()
            .all(|(i, row)| (row[i] - 1.0).abs() <= tol)
    }

    /// Numerically tolerant PSD check via Cholesky factorization
    pub fn is_positive_semi_definite(&self, tol: f64) -> bool {
        cholesky_psd(&self.values, tol)
    }
}

fn cholesky_psd(m: &[Vec<f64>], tol: f64) -> bool {
    let n = m.len();
    let mut l = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = m[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }
            if i == j {
                if sum < -tol {
                    return false;
                }
                l[i][j] = sum.max(0.0).sqrt();
            } else if l[j][j].abs() > tol {
                l[i][j] = sum / l[j][j];
            } else {
                l[i][j] = 0.0;
            }
        }
    }
    true
}

/// Derived, ephemeral risk statistics. Never mutated after creation; always
/// paired with the snapshot timestamp that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct RiskMetrics {
    pub timestamp: DateTime<Utc>,
    /// One-holding-period VaR as a fraction of equity
    pub var_95: f64,
    pub var_99: f64,
    /// Expected shortfall at `confidence`
    pub expected_shortfall: f64,
    pub confidence: f64,
    /// Annualized portfolio volatility
    pub portfolio_volatility: f64,
    /// Annualized per-asset volatility
    pub asset_volatility: HashMap<String, f64>,
    pub correlation: CorrelationMatrix,
    /// Decline from the equity high-water mark; never negative
    pub current_drawdown: f64,
    pub insufficient_data: bool,
    pub stale: bool,
}

impl RiskMetrics {
    /// Zero-risk metrics for an empty portfolio
    pub fn empty(timestamp: DateTime<Utc>, confidence: f64, drawdown: f64) -> Self {
        Self {
            timestamp,
            var_95: 0.0,
            var_99: 0.0,
            expected_shortfall: 0.0,
            confidence,
            portfolio_volatility: 0.0,
            asset_volatility: HashMap::new(),
            correlation: CorrelationMatrix::identity(Vec::new()),
            current_drawdown: drawdown,
            insufficient_data: false,
            stale: false,
        }
    }

    /// Worst-case placeholder used when nothing is computable. Punitive by
    /// intent: the fail-safe default is deny/restrict, never permit.
    pub fn conservative(timestamp: DateTime<Utc>, confidence: f64) -> Self {
        Self {
            timestamp,
            var_95: 1.0,
            var_99: 1.0,
            expected_shortfall: 1.0,
            confidence,
            portfolio_volatility: DEGRADED_ASSET_VOL * 5.0,
            asset_volatility: HashMap::new(),
            correlation: CorrelationMatrix::identity(Vec::new()),
            current_drawdown: 0.0,
            insufficient_data: true,
            stale: false,
        }
    }

    /// Elementwise-worst combination of two metric sets. Used to fall back to
    /// the most conservative cached metric when fresh data is degraded.
    pub fn worst_of(&self, other: &RiskMetrics) -> RiskMetrics {
        RiskMetrics {
            timestamp: self.timestamp,
            var_95: self.var_95.max(other.var_95),
            var_99: self.var_99.max(other.var_99),
            expected_shortfall: self.expected_shortfall.max(other.expected_shortfall),
            confidence: self.confidence,
            portfolio_volatility: self.portfolio_volatility.max(other.portfolio_volatility),
            asset_volatility: self.asset_volatility.clone(),
            correlation: self.correlation.clone(),
            current_drawdown: self.current_drawdown.max(other.current_drawdown),
            insufficient_data: self.insufficient_data || other.insufficient_data,
            stale: self.stale || other.stale,
        }
    }

    /// VaR at the nearest supported confidence level
    pub fn var_for_confidence(&self, confidence: f64) -> f64 {
        if confidence >= 0.97 { self.var_99 } else { self.var_95 }
    }

    pub fn asset_vol(&self, symbol: &str) -> Option<f64> {
        self.asset_volatility.get(symbol).copied()
    }
}

/// Compute the full metric set from a portfolio and market snapshot.
///
/// Returns `MetricError::InsufficientData` only when no usable return history
/// exists at all; short-but-nonempty history produces a result flagged
/// `insufficient_data` so callers can substitute cached conservative metrics.
pub fn compute_metrics(
    portfolio: &PortfolioSnapshot,
    market: &MarketSnapshot,
    high_water_mark: Decimal,
    cfg: &MetricsConfig,
) -> Result<RiskMetrics, MetricError> {
    let drawdown = drawdown_from_hwm(portfolio.total_value, high_water_mark);

    let mut symbols: Vec<String> = portfolio.positions.keys().cloned().collect();
    symbols.sort();
    if symbols.is_empty() {
        return Ok(RiskMetrics::empty(portfolio.timestamp, cfg.confidence, drawdown));
    }

    // Symbols with at least two return observations participate in the
    // statistical estimates; the rest get punitive defaults.
    let data_symbols: Vec<String> = symbols
        .iter()
        .filter(|s| market.observations(s) >= 2)
        .cloned()
        .collect();

    if data_symbols.is_empty() {
        let available = symbols.iter().map(|s| market.observations(s)).max().unwrap_or(0);
        return Err(MetricError::InsufficientData {
            available,
            required: cfg.min_observations,
        });
    }

    let mut rows = market
        .aligned_returns(&data_symbols)
        .ok_or(MetricError::InsufficientData {
            available: 0,
            required: cfg.min_observations,
        })?;
    if rows.len() > cfg.window {
        rows.drain(..rows.len() - cfg.window);
    }
    let n = rows.len();
    let insufficient = n < cfg.min_observations || data_symbols.len() < symbols.len();

    let cov = ewma_covariance(&rows, cfg.ewma_decay);

    // Per-asset annualized vols; punitive default where history is missing
    let mut asset_volatility = HashMap::new();
    for symbol in &symbols {
        let vol = data_symbols
            .iter()
            .position(|s| s == symbol)
            .map(|i| (cov[i][i].max(0.0) * PERIODS_PER_YEAR).sqrt())
            .filter(|v| *v > 0.0)
            .unwrap_or(DEGRADED_ASSET_VOL);
        asset_volatility.insert(symbol.clone(), vol);
    }

    let correlation = correlation_from_covariance(&symbols, &data_symbols, &cov);
    ensure_well_conditioned(&correlation)?;

    // Weighted portfolio return series over the symbols we have data for
    let weights: Vec<f64> = data_symbols.iter().map(|s| portfolio.weight(s)).collect();
    let portfolio_returns: Vec<f64> = rows
        .iter()
        .map(|row| row.iter().zip(&weights).map(|(r, w)| r * w).sum())
        .collect();

    let mu = mean(&portfolio_returns);
    let sigma = portfolio_sigma(&weights, &cov);
    let portfolio_volatility = sigma * PERIODS_PER_YEAR.sqrt();

    let sqrt_h = cfg.holding_period_days.max(0.0).sqrt();
    let (var_95, var_99, es) = match cfg.method {
        VarMethod::Historical => {
            let (v95, _) = empirical_var_es(&portfolio_returns, 0.95);
            let (v99, _) = empirical_var_es(&portfolio_returns, 0.99);
            let (_, es) = empirical_var_es(&portfolio_returns, cfg.confidence);
            (v95, v99, es)
        }
        VarMethod::Parametric => {
            let (v95, _) = parametric_var_es(mu, sigma, 0.95, cfg);
            let (v99, _) = parametric_var_es(mu, sigma, 0.99, cfg);
            let (_, es) = parametric_var_es(mu, sigma, cfg.confidence, cfg);
            (v95, v99, es)
        }
        VarMethod::MonteCarlo => {
            let simulated = simulate_portfolio_returns(mu, sigma, cfg.mc_paths, cfg.mc_seed);
            let (v95, _) = empirical_var_es(&simulated, 0.95);
            let (v99, _) = empirical_var_es(&simulated, 0.99);
            let (_, es) = empirical_var_es(&simulated, cfg.confidence);
            (v95, v99, es)
        }
    };

    if insufficient {
        warn!(
            observations = n,
            required = cfg.min_observations,
            covered = data_symbols.len(),
            held = symbols.len(),
            "Risk metrics degraded: insufficient return history"
        );
    }

    Ok(RiskMetrics {
        timestamp: portfolio.timestamp,
        var_95: var_95 * sqrt_h,
        var_99: var_99 * sqrt_h,
        expected_shortfall: es * sqrt_h,
        confidence: cfg.confidence,
        portfolio_volatility,
        asset_volatility,
        correlation,
        current_drawdown: drawdown,
        insufficient_data: insufficient,
        stale: false,
    })
}

pub fn drawdown_from_hwm(current: Decimal, high_water_mark: Decimal) -> f64 {
    if high_water_mark <= Decimal::ZERO {
        return 0.0;
    }
    ((high_water_mark - current) / high_water_mark)
        .to_f64()
        .unwrap_or(0.0)
        .max(0.0)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Zero-mean exponentially weighted covariance, decay `lambda`
fn ewma_covariance(rows: &[Vec<f64>], lambda: f64) -> Vec<Vec<f64>> {
    let k = rows.first().map(|r| r.len()).unwrap_or(0);
    let mut s = vec![vec![0.0f64; k]; k];
    for row in rows {
        for i in 0..k {
            for j in 0..=i {
                s[i][j] = lambda * s[i][j] + (1.0 - lambda) * row[i] * row[j];
            }
        }
    }
    for i in 0..k {
        for j in (i + 1)..k {
            s[i][j] = s[j][i];
        }
    }
    s
}

/// Correlation over all portfolio symbols; symbols without history keep an
/// identity row (unknown correlation treated as zero, diagonal one).
fn correlation_from_covariance(
    symbols: &[String],
    data_symbols: &[String],
    cov: &[Vec<f64>],
) -> CorrelationMatrix {
    let n = symbols.len();
    let mut values = vec![vec![0.0f64; n]; n];
    let index_of = |s: &String| data_symbols.iter().position(|d| d == s);

    for (i, si) in symbols.iter().enumerate() {
        values[i][i] = 1.0;
        for (j, sj) in symbols.iter().enumerate().skip(i + 1) {
            let corr = match (index_of(si), index_of(sj)) {
                (Some(a), Some(b)) => {
                    let va = cov[a][a];
                    let vb = cov[b][b];
                    if va > 0.0 && vb > 0.0 {
                        (cov[a][b] / (va.sqrt() * vb.sqrt())).clamp(-1.0, 1.0)
                    } else {
                        // Degenerate variance: treat as uncorrelated, degrade
                        // rather than crash the authorization path
                        0.0
                    }
                }
                _ => 0.0,
            };
            values[i][j] = corr;
            values[j][i] = corr;
        }
    }

    CorrelationMatrix {
        symbols: symbols.to_vec(),
        values,
    }
}

/// Guard against a degenerate correlation structure. Clamping pairwise
/// correlations can leave a matrix that is no longer positive semi-definite,
/// and downstream VaR on such a matrix is meaningless; the caller degrades
/// to conservative metrics instead.
fn ensure_well_conditioned(correlation: &CorrelationMatrix) -> Result<(), MetricError> {
    if !correlation.is_positive_semi_definite(1e-8) {
        return Err(MetricError::SingularCovariance {
            reason: "correlation matrix is not positive semi-definite".to_string(),
        });
    }
    Ok(())
}

fn portfolio_sigma(weights: &[f64], cov: &[Vec<f64>]) -> f64 {
    let k = weights.len();
    let mut acc = 0.0;
    for i in 0..k {
        for j in 0..k {
            acc += weights[i] * cov[i][j] * weights[j];
        }
    }
    acc.max(0.0).sqrt()
}

/// Empirical VaR and expected shortfall from a return sample. Losses are
/// reported as positive fractions; ES is clamped to be at least VaR so the
/// tail invariant holds even for single-element tails.
fn empirical_var_es(returns: &[f64], confidence: f64) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let idx = (((1.0 - confidence) * n as f64).floor() as usize).min(n - 1);
    let var = (-sorted[idx]).max(0.0);
    let tail = &sorted[..=idx];
    let es = (-mean(tail)).max(var);
    (var, es)
}

/// Variance–covariance VaR/ES under a Normal or Student-t tail
fn parametric_var_es(mu: f64, sigma: f64, confidence: f64, cfg: &MetricsConfig) -> (f64, f64) {
    if sigma <= 0.0 {
        return ((-mu).max(0.0), (-mu).max(0.0));
    }
    match cfg.distribution {
        TailDistribution::Normal => {
            let normal = Normal::new(0.0, 1.0).expect("standard normal is valid");
            let z = normal.inverse_cdf(confidence);
            let var = (z * sigma - mu).max(0.0);
            let es = (sigma * normal.pdf(z) / (1.0 - confidence) - mu).max(var);
            (var, es)
        }
        TailDistribution::StudentT => {
            let nu = cfg.t_degrees_of_freedom.max(2.5);
            let t = StudentsT::new(0.0, 1.0, nu).expect("valid student-t parameters");
            let q = t.inverse_cdf(confidence);
            // Standard-t has variance nu/(nu-2); rescale to unit variance
            let unit_scale = ((nu - 2.0) / nu).sqrt();
            let var = (q * unit_scale * sigma - mu).max(0.0);
            let es_std = t.pdf(q) * (nu + q * q) / ((nu - 1.0) * (1.0 - confidence));
            let es = (es_std * unit_scale * sigma - mu).max(var);
            (var, es)
        }
    }
}

/// Seeded Monte Carlo portfolio-return sample. Each path derives its own rng
/// from the base seed, so results are deterministic regardless of how rayon
/// schedules the work.
fn simulate_portfolio_returns(mu: f64, sigma: f64, paths: usize, seed: u64) -> Vec<f64> {
    (0..paths)
        .into_par_iter()
        .map(|i| {
            let path_seed = seed.wrapping_add((i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
            let mut rng = StdRng::seed_from_u64(path_seed);
            let u1: f64 = rng.random::<f64>().max(1e-12);
            let u2: f64 = rng.random();
            let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
            mu + sigma * z
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    use crate::domain::portfolio::Position;

    fn synthetic_returns(seed: u64, n: usize, vol: f64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let u1: f64 = rng.random::<f64>().max(1e-12);
                let u2: f64 = rng.random();
                vol * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
            })
            .collect()
    }

    fn two_asset_portfolio() -> PortfolioSnapshot {
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
        positions.insert(
            "ETH/USDT".to_string(),
            Position {
                symbol: "ETH/USDT".to_string(),
                quantity: dec!(10),
                mark_price: dec!(2000),
                cost_basis: dec!(2100),
                exchange: "binance".to_string(),
            },
        );
        PortfolioSnapshot::new(Utc::now(), dec!(40000), positions, dec!(100000), 1e-6).unwrap()
    }

    fn market_with_history(n: usize) -> MarketSnapshot {
        let mut market = MarketSnapshot::empty(Utc::now());
        let btc = synthetic_returns(7, n, 0.04);
        // ETH correlated with BTC plus idiosyncratic noise
        let noise = synthetic_returns(13, n, 0.02);
        let eth: Vec<f64> = btc.iter().zip(&noise).map(|(b, e)| 0.8 * b + e).collect();
        market.returns.insert("BTC/USDT".to_string(), btc);
        market.returns.insert("ETH/USDT".to_string(), eth);
        market
    }

    fn config(method: VarMethod) -> MetricsConfig {
        MetricsConfig {
            method,
            window: 250,
            min_observations: 250,
            ..MetricsConfig::default()
        }
    }

    #[test]
    fn test_expected_shortfall_dominates_var_all_methods() {
        let portfolio = two_asset_portfolio();
        let market = market_with_history(250);

        for method in [VarMethod::Historical, VarMethod::Parametric, VarMethod::MonteCarlo] {
            let metrics =
                compute_metrics(&portfolio, &market, dec!(100000), &config(method)).unwrap();
            assert!(
                metrics.expected_shortfall >= metrics.var_95,
                "{method:?}: ES {} < VaR {}",
                metrics.expected_shortfall,
                metrics.var_95
            );
            assert!(metrics.var_99 >= metrics.var_95, "{method:?}");
            assert!(!metrics.insufficient_data);
        }
    }

    #[test]
    fn test_student_t_var_fatter_than_normal() {
        let portfolio = two_asset_portfolio();
        let market = market_with_history(250);

        let normal = compute_metrics(
            &portfolio,
            &market,
            dec!(100000),
            &MetricsConfig {
                method: VarMethod::Parametric,
                ..config(VarMethod::Parametric)
            },
        )
        .unwrap();
        let student = compute_metrics(
            &portfolio,
            &market,
            dec!(100000),
            &MetricsConfig {
                method: VarMethod::Parametric,
                distribution: TailDistribution::StudentT,
                ..config(VarMethod::Parametric)
            },
        )
        .unwrap();

        // Fat tails dominate at 99%
        assert!(student.var_99 > normal.var_99);
    }

    #[test]
    fn test_monte_carlo_is_deterministic_for_fixed_seed() {
        let portfolio = two_asset_portfolio();
        let market = market_with_history(250);
        let cfg = config(VarMethod::MonteCarlo);

        let a = compute_metrics(&portfolio, &market, dec!(100000), &cfg).unwrap();
        let b = compute_metrics(&portfolio, &market, dec!(100000), &cfg).unwrap();

        assert_eq!(a.var_95, b.var_95);
        assert_eq!(a.var_99, b.var_99);
        assert_eq!(a.expected_shortfall, b.expected_shortfall);

        let other_seed = compute_metrics(
            &portfolio,
            &market,
            dec!(100000),
            &MetricsConfig { mc_seed: 99, ..cfg },
        )
        .unwrap();
        assert_ne!(a.var_95, other_seed.var_95);
    }

    #[test]
    fn test_correlation_matrix_properties() {
        let portfolio = two_asset_portfolio();
        let market = market_with_history(250);
        let metrics =
            compute_metrics(&portfolio, &market, dec!(100000), &config(VarMethod::Historical))
                .unwrap();

        let corr = &metrics.correlation;
        assert!(corr.is_symmetric(1e-12));
        assert!(corr.has_unit_diagonal(1e-12));
        assert!(corr.is_positive_semi_definite(1e-9));

        // BTC and ETH were generated correlated
        let c = corr.get("BTC/USDT", "ETH/USDT").unwrap();
        assert!(c > 0.5, "expected strong correlation, got {c}");
    }

    #[test]
    fn test_inconsistent_correlations_are_rejected() {
        // Pairwise-clamped correlations can be mutually inconsistent; such a
        // matrix fails the PSD check and metric computation must error out
        let corr = CorrelationMatrix {
            symbols: vec!["A".to_string(), "B".to_string(), "C".to_string()],
            values: vec![
                vec![1.0, 0.9, 0.9],
                vec![0.9, 1.0, -0.9],
                vec![0.9, -0.9, 1.0],
            ],
        };
        assert!(!corr.is_positive_semi_definite(1e-8));
        assert!(matches!(
            ensure_well_conditioned(&corr),
            Err(MetricError::SingularCovariance { .. })
        ));
    }

    #[test]
    fn test_short_history_flags_insufficient_data() {
        let portfolio = two_asset_portfolio();
        let market = market_with_history(5);
        let metrics =
            compute_metrics(&portfolio, &market, dec!(100000), &config(VarMethod::Historical))
                .unwrap();
        assert!(metrics.insufficient_data);
    }

    #[test]
    fn test_no_history_is_an_error() {
        let portfolio = two_asset_portfolio();
        let market = MarketSnapshot::empty(Utc::now());
        let result =
            compute_metrics(&portfolio, &market, dec!(100000), &config(VarMethod::Historical));
        assert!(matches!(result, Err(MetricError::InsufficientData { .. })));
    }

    #[test]
    fn test_empty_portfolio_has_zero_risk() {
        let portfolio = PortfolioSnapshot::all_cash(Utc::now(), dec!(50000));
        let market = MarketSnapshot::empty(Utc::now());
        let metrics =
            compute_metrics(&portfolio, &market, dec!(50000), &config(VarMethod::Historical))
                .unwrap();
        assert_eq!(metrics.var_95, 0.0);
        assert_eq!(metrics.portfolio_volatility, 0.0);
        assert!(!metrics.insufficient_data);
    }

    #[test]
    fn test_drawdown_never_negative() {
        // Current equity above the high-water mark clamps to zero
        assert_eq!(drawdown_from_hwm(dec!(110000), dec!(100000)), 0.0);
        let dd = drawdown_from_hwm(dec!(80000), dec!(100000));
        assert!((dd - 0.2).abs() < 1e-12);
        assert_eq!(drawdown_from_hwm(dec!(100), Decimal::ZERO), 0.0);
    }

    #[test]
    fn test_worst_of_takes_elementwise_max() {
        let now = Utc::now();
        let fresh = RiskMetrics {
            var_95: 0.02,
            ..RiskMetrics::empty(now, 0.95, 0.1)
        };
        let cached = RiskMetrics {
            var_95: 0.08,
            ..RiskMetrics::empty(now, 0.95, 0.05)
        };
        let worst = fresh.worst_of(&cached);
        assert_eq!(worst.var_95, 0.08);
        assert_eq!(worst.current_drawdown, 0.1);
    }
}
