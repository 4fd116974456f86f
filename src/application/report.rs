//! Risk report assembly.
//!
//! A report is a pure function of the inputs it is given: building it twice
//! from the same snapshots yields identical output and never mutates engine
//! state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::risk::breach::BreachEvent;
use crate::domain::risk::limits::RiskLimitSet;
use crate::domain::risk::metrics::RiskMetrics;
use crate::domain::risk::state::{CircuitBreakerState, TransitionRecord};
use crate::domain::risk::stress::StressResult;

/// How many recent transitions a report carries
const TRANSITION_HISTORY: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct RiskReport {
    pub generated_at: DateTime<Utc>,
    pub portfolio_value: Decimal,
    pub cash: Decimal,
    pub position_count: usize,
    pub var_95: f64,
    pub var_99: f64,
    pub expected_shortfall: f64,
    pub portfolio_volatility: f64,
    pub current_drawdown: f64,
    pub daily_loss_pct: f64,
    pub metrics_degraded: bool,
    pub breaker_state: CircuitBreakerState,
    pub open_breaches: Vec<BreachEvent>,
    pub limit_set_name: String,
    pub limit_set_version: u32,
    /// Composite 0-100 score; higher is riskier
    pub overall_risk_score: f64,
    pub recommendation: String,
    pub recent_transitions: Vec<TransitionRecord>,
    pub stress_results: Vec<StressResult>,
    pub pending_tightening: Option<String>,
}

pub struct ReportInputs<'a> {
    pub portfolio: &'a PortfolioSnapshot,
    pub metrics: &'a RiskMetrics,
    pub limits: &'a RiskLimitSet,
    pub daily_loss_pct: f64,
    pub breaker_state: CircuitBreakerState,
    pub open_breaches: Vec<BreachEvent>,
    pub transitions: &'a [TransitionRecord],
    pub stress_results: Vec<StressResult>,
    pub pending_tightening: Option<String>,
}

pub fn build_report(generated_at: DateTime<Utc>, inputs: ReportInputs<'_>) -> RiskReport {
    let score = overall_risk_score(
        inputs.portfolio,
        inputs.metrics,
        inputs.limits,
        inputs.breaker_state,
    );
    let recommendation = recommendation_for(score, inputs.breaker_state, &inputs.open_breaches);

    let mut recent: Vec<TransitionRecord> = inputs.transitions.to_vec();
    if recent.len() > TRANSITION_HISTORY {
        recent.drain(..recent.len() - TRANSITION_HISTORY);
    }

    RiskReport {
        generated_at,
        portfolio_value: inputs.portfolio.total_value,
        cash: inputs.portfolio.cash,
        position_count: inputs.portfolio.positions.len(),
        var_95: inputs.metrics.var_95,
        var_99: inputs.metrics.var_99,
        expected_shortfall: inputs.metrics.expected_shortfall,
        portfolio_volatility: inputs.metrics.portfolio_volatility,
        current_drawdown: inputs.metrics.current_drawdown,
        daily_loss_pct: inputs.daily_loss_pct,
        metrics_degraded: inputs.metrics.insufficient_data || inputs.metrics.stale,
        breaker_state: inputs.breaker_state,
        open_breaches: inputs.open_breaches,
        limit_set_name: inputs.limits.name.clone(),
        limit_set_version: inputs.limits.version,
        overall_risk_score: score,
        recommendation,
        recent_transitions: recent,
        stress_results: inputs.stress_results,
        pending_tightening: inputs.pending_tightening,
    }
}

/// Weighted utilization of the main ceilings, 0-100. Each component is the
/// observed value as a fraction of its limit, clamped at saturation.
fn overall_risk_score(
    portfolio: &PortfolioSnapshot,
    metrics: &RiskMetrics,
    limits: &RiskLimitSet,
    state: CircuitBreakerState,
) -> f64 {
    let utilization = |observed: f64, ceiling: f64| -> f64 {
        if ceiling <= 0.0 { 0.0 } else { (observed / ceiling).clamp(0.0, 1.0) }
    };

    let var_u = utilization(
        metrics.var_for_confidence(metrics.confidence),
        limits.daily_var_ceiling_pct,
    );
    let dd_u = utilization(metrics.current_drawdown, limits.max_drawdown_pct);
    let lev_u = utilization(portfolio.leverage(), limits.max_leverage);
    let conc_u = utilization(
        portfolio.largest_weight().map(|(_, w)| w).unwrap_or(0.0),
        limits.max_position_pct,
    );
    let corr_u = utilization(
        metrics
            .correlation
            .max_offdiagonal()
            .map(|(_, _, v)| v)
            .unwrap_or(0.0),
        limits.correlation_ceiling,
    );

    let mut score =
        100.0 * (0.30 * var_u + 0.25 * dd_u + 0.20 * lev_u + 0.15 * conc_u + 0.10 * corr_u);

    // A tripped breaker floors the score; the dashboard must never show
    // green while trading is restricted
    score = match state {
        CircuitBreakerState::Normal => score,
        CircuitBreakerState::Restricted => score.max(60.0),
        CircuitBreakerState::Halted => score.max(85.0),
        CircuitBreakerState::EmergencyLiquidation => 100.0,
    };
    score.clamp(0.0, 100.0)
}

fn recommendation_for(
    score: f64,
    state: CircuitBreakerState,
    open_breaches: &[BreachEvent],
) -> String {
    match state {
        CircuitBreakerState::EmergencyLiquidation => {
            return "Liquidation in progress; await completion before any action".to_string();
        }
        CircuitBreakerState::Halted => {
            return "Trading halted; investigate breaches before resuming".to_string();
        }
        _ => {}
    }
    if !open_breaches.is_empty() {
        return format!(
            "Reduce exposure: {} limit(s) currently breached",
            open_breaches.len()
        );
    }
    if score >= 75.0 {
        "High risk utilization; consider reducing position sizes".to_string()
    } else if score >= 50.0 {
        "Elevated risk utilization; avoid adding concentrated exposure".to_string()
    } else {
        "Risk within normal bounds".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn inputs<'a>(
        portfolio: &'a PortfolioSnapshot,
        metrics: &'a RiskMetrics,
        limits: &'a RiskLimitSet,
        transitions: &'a [TransitionRecord],
    ) -> ReportInputs<'a> {
        ReportInputs {
            portfolio,
            metrics,
            limits,
            daily_loss_pct: 0.01,
            breaker_state: CircuitBreakerState::Normal,
            open_breaches: Vec::new(),
            transitions,
            stress_results: Vec::new(),
            pending_tightening: None,
        }
    }

    #[test]
    fn test_report_is_idempotent() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let portfolio = PortfolioSnapshot::all_cash(at, dec!(100000));
        let metrics = RiskMetrics::empty(at, 0.95, 0.02);
        let limits = RiskLimitSet::default();
        let transitions: Vec<TransitionRecord> = Vec::new();

        let first = build_report(at, inputs(&portfolio, &metrics, &limits, &transitions));
        let second = build_report(at, inputs(&portfolio, &metrics, &limits, &transitions));

        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_cash_book_scores_low() {
        let at = Utc::now();
        let portfolio = PortfolioSnapshot::all_cash(at, dec!(100000));
        let metrics = RiskMetrics::empty(at, 0.95, 0.0);
        let limits = RiskLimitSet::default();
        let report = build_report(at, inputs(&portfolio, &metrics, &limits, &[]));

        assert!(report.overall_risk_score < 10.0);
        assert_eq!(report.recommendation, "Risk within normal bounds");
    }

    #[test]
    fn test_halted_floors_the_score() {
        let at = Utc::now();
        let portfolio = PortfolioSnapshot::all_cash(at, dec!(100000));
        let metrics = RiskMetrics::empty(at, 0.95, 0.0);
        let limits = RiskLimitSet::default();

        let mut report_inputs = inputs(&portfolio, &metrics, &limits, &[]);
        report_inputs.breaker_state = CircuitBreakerState::Halted;
        let report = build_report(at, report_inputs);

        assert!(report.overall_risk_score >= 85.0);
        assert!(report.recommendation.contains("halted"));
    }

    #[test]
    fn test_high_utilization_raises_score_and_recommendation() {
        let at = Utc::now();
        let portfolio = PortfolioSnapshot::all_cash(at, dec!(100000));
        let mut metrics = RiskMetrics::empty(at, 0.95, 0.19);
        metrics.var_95 = 0.049;
        let limits = RiskLimitSet::default();
        let report = build_report(at, inputs(&portfolio, &metrics, &limits, &[]));

        // VaR and drawdown both near their ceilings
        assert!(report.overall_risk_score > 50.0);
        assert!(report.recommendation.contains("risk utilization"));
    }

    #[test]
    fn test_transition_history_is_bounded() {
        let at = Utc::now();
        let portfolio = PortfolioSnapshot::all_cash(at, dec!(100000));
        let metrics = RiskMetrics::empty(at, 0.95, 0.0);
        let limits = RiskLimitSet::default();

        let transitions: Vec<TransitionRecord> = (0..25)
            .map(|i| TransitionRecord {
                from_state: CircuitBreakerState::Normal,
                to_state: CircuitBreakerState::Restricted,
                cause: format!("cause {i}"),
                timestamp: at,
                actor: "system".to_string(),
            })
            .collect();

        let report = build_report(at, inputs(&portfolio, &metrics, &limits, &transitions));
        assert_eq!(report.recent_transitions.len(), TRANSITION_HISTORY);
        assert_eq!(report.recent_transitions.last().unwrap().cause, "cause 24");
    }
}
