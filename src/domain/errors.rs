use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by the risk metric calculator
#[derive(Debug, Error)]
pub enum MetricError {
    #[error("Insufficient history: {available} observations, {required} required")]
    InsufficientData { available: usize, required: usize },

    #[error("Covariance matrix is singular or not positive semi-definite: {reason}")]
    SingularCovariance { reason: String },

    #[error("Metric computation exceeded budget of {budget_ms}ms")]
    Timeout { budget_ms: u64 },
}

/// Limit violations produced by the Limit Monitor and the authorization path
#[derive(Debug, Error)]
pub enum LimitViolation {
    #[error("Position concentration limit for {symbol}: {current_pct:.2}% > {max_pct:.2}%")]
    PositionConcentration {
        symbol: String,
        current_pct: f64,
        max_pct: f64,
    },

    #[error("Exchange exposure limit for {exchange}: {current_pct:.2}% > {max_pct:.2}%")]
    ExchangeExposure {
        exchange: String,
        current_pct: f64,
        max_pct: f64,
    },

    #[error("Leverage limit exceeded: {current:.2}x > {max:.2}x")]
    Leverage { current: f64, max: f64 },

    #[error("Daily VaR ceiling breached: {observed_pct:.2}% > {ceiling_pct:.2}%")]
    VarCeiling {
        observed_pct: f64,
        ceiling_pct: f64,
    },

    #[error("Maximum drawdown exceeded: {drawdown_pct:.2}% > {max_pct:.2}%")]
    DrawdownLimit { drawdown_pct: f64, max_pct: f64 },

    #[error("Daily loss limit breached: {loss_pct:.2}% > {limit_pct:.2}%")]
    DailyLoss { loss_pct: f64, limit_pct: f64 },

    #[error("Correlation ceiling between {a} and {b}: {observed:.2} > {ceiling:.2}")]
    CorrelationCeiling {
        a: String,
        b: String,
        observed: f64,
        ceiling: f64,
    },

    #[error("Order value ${value} exceeds maximum order size ${max}")]
    OrderValue { value: Decimal, max: Decimal },
}

/// Engine-level errors on the authorization and override paths
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("Snapshot is stale: age {age_ms}ms > limit {limit_ms}ms")]
    StaleSnapshot { age_ms: u64, limit_ms: u64 },

    #[error("Inconsistent snapshot: reported total {reported}, computed {computed}")]
    InconsistentSnapshot { reported: Decimal, computed: Decimal },

    #[error("Conflicting state transition: {0}")]
    TransitionConflict(String),

    #[error("Manual override denied: {0}")]
    OverrideDenied(String),

    #[error("Proposal rejected: {0}")]
    ProposalRejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_violation_formatting() {
        let violation = LimitViolation::PositionConcentration {
            symbol: "BTC/USDT".to_string(),
            current_pct: 35.5,
            max_pct: 20.0,
        };

        let msg = violation.to_string();
        assert!(msg.contains("BTC/USDT"));
        assert!(msg.contains("35.50%"));
        assert!(msg.contains("20.00%"));
    }

    #[test]
    fn test_stale_snapshot_formatting() {
        let error = EngineError::StaleSnapshot {
            age_ms: 7000,
            limit_ms: 5000,
        };

        let msg = error.to_string();
        assert!(msg.contains("7000"));
        assert!(msg.contains("5000"));
    }
}
