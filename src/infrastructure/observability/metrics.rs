//! Prometheus metrics definitions for the risk engine
//!
//! All metrics use the `rustrisk_` prefix and are read-only.

use prometheus::{
    CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;
use std::time::Instant;

use crate::domain::risk::metrics::RiskMetrics;
use crate::domain::risk::state::CircuitBreakerState;

/// Prometheus metrics for the risk engine
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Arc<Registry>,
    /// Total portfolio value in USD
    pub portfolio_value_usd: GenericGauge<AtomicF64>,
    /// One-day 95% VaR as a fraction of equity
    pub var_95: GenericGauge<AtomicF64>,
    /// One-day 99% VaR as a fraction of equity
    pub var_99: GenericGauge<AtomicF64>,
    /// Expected shortfall at the engine confidence level
    pub expected_shortfall: GenericGauge<AtomicF64>,
    /// Annualized portfolio volatility
    pub portfolio_volatility: GenericGauge<AtomicF64>,
    /// Current drawdown from the high-water mark (0-1)
    pub drawdown_current: GenericGauge<AtomicF64>,
    /// Circuit breaker state (0=normal, 1=restricted, 2=halted, 3=liquidation)
    pub breaker_state: GenericGauge<AtomicF64>,
    /// Currently open breach events
    pub open_breaches: GenericGauge<AtomicF64>,
    /// Sizing decisions by outcome
    pub decisions_total: CounterVec,
    /// Breach events by limit and severity
    pub breaches_total: CounterVec,
    /// Breaker transitions by target state
    pub transitions_total: CounterVec,
    /// Failed metric computations
    pub metric_failures_total: CounterVec,
    /// Metric computation latency in seconds
    pub metric_latency_seconds: Histogram,
}

impl EngineMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let portfolio_value_usd = Gauge::with_opts(Opts::new(
            "rustrisk_portfolio_value_usd",
            "Total portfolio value in USD",
        ))?;
        registry.register(Box::new(portfolio_value_usd.clone()))?;

        let var_95 = Gauge::with_opts(Opts::new(
            "rustrisk_var_95",
            "One-day 95% VaR as a fraction of equity",
        ))?;
        registry.register(Box::new(var_95.clone()))?;

        let var_99 = Gauge::with_opts(Opts::new(
            "rustrisk_var_99",
            "One-day 99% VaR as a fraction of equity",
        ))?;
        registry.register(Box::new(var_99.clone()))?;

        let expected_shortfall = Gauge::with_opts(Opts::new(
            "rustrisk_expected_shortfall",
            "Expected shortfall at the engine confidence level",
        ))?;
        registry.register(Box::new(expected_shortfall.clone()))?;

        let portfolio_volatility = Gauge::with_opts(Opts::new(
            "rustrisk_portfolio_volatility",
            "Annualized portfolio volatility",
        ))?;
        registry.register(Box::new(portfolio_volatility.clone()))?;

        let drawdown_current = Gauge::with_opts(Opts::new(
            "rustrisk_drawdown_current",
            "Current drawdown from the high-water mark (0-1)",
        ))?;
        registry.register(Box::new(drawdown_current.clone()))?;

        let breaker_state = Gauge::with_opts(Opts::new(
            "rustrisk_breaker_state",
            "Circuit breaker state (0=normal, 1=restricted, 2=halted, 3=liquidation)",
        ))?;
        registry.register(Box::new(breaker_state.clone()))?;

        let open_breaches = Gauge::with_opts(Opts::new(
            "rustrisk_open_breaches",
            "Currently open breach events",
        ))?;
        registry.register(Box::new(open_breaches.clone()))?;

        let decisions_total = CounterVec::new(
            Opts::new("rustrisk_decisions_total", "Sizing decisions by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(decisions_total.clone()))?;

        let breaches_total = CounterVec::new(
            Opts::new(
                "rustrisk_breaches_total",
                "Breach events by limit and severity",
            ),
            &["limit", "severity"],
        )?;
        registry.register(Box::new(breaches_total.clone()))?;

        let transitions_total = CounterVec::new(
            Opts::new(
                "rustrisk_transitions_total",
                "Breaker transitions by target state",
            ),
            &["to_state"],
        )?;
        registry.register(Box::new(transitions_total.clone()))?;

        let metric_failures_total = CounterVec::new(
            Opts::new(
                "rustrisk_metric_failures_total",
                "Failed metric computations by kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(metric_failures_total.clone()))?;

        let metric_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "rustrisk_metric_latency_seconds",
                "Metric computation latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;
        registry.register(Box::new(metric_latency_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            portfolio_value_usd,
            var_95,
            var_99,
            expected_shortfall,
            portfolio_volatility,
            drawdown_current,
            breaker_state,
            open_breaches,
            decisions_total,
            breaches_total,
            transitions_total,
            metric_failures_total,
            metric_latency_seconds,
        })
    }

    /// Constructor for contexts where registration failure is a programming
    /// error, such as tests. Each instance owns its registry, so duplicate
    /// registration cannot occur.
    pub fn new_unregistered() -> Self {
        Self::new().expect("Failed to create EngineMetrics")
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn observe_risk_metrics(&self, metrics: &RiskMetrics) {
        self.var_95.set(metrics.var_95);
        self.var_99.set(metrics.var_99);
        self.expected_shortfall.set(metrics.expected_shortfall);
        self.portfolio_volatility.set(metrics.portfolio_volatility);
        self.drawdown_current.set(metrics.current_drawdown);
    }

    pub fn set_breaker_state(&self, state: CircuitBreakerState) {
        let value = match state {
            CircuitBreakerState::Normal => 0.0,
            CircuitBreakerState::Restricted => 1.0,
            CircuitBreakerState::Halted => 2.0,
            CircuitBreakerState::EmergencyLiquidation => 3.0,
        };
        self.breaker_state.set(value);
    }

    pub fn inc_decision(&self, outcome: &str) {
        self.decisions_total.with_label_values(&[outcome]).inc();
    }

    pub fn inc_breach(&self, limit: &str, severity: &str) {
        self.breaches_total
            .with_label_values(&[limit, severity])
            .inc();
    }

    pub fn inc_transition(&self, to_state: CircuitBreakerState) {
        self.transitions_total
            .with_label_values(&[&to_state.to_string()])
            .inc();
    }

    pub fn inc_metric_failures(&self) {
        self.metric_failures_total
            .with_label_values(&["compute"])
            .inc();
    }

    pub fn inc_metric_timeouts(&self) {
        self.metric_failures_total
            .with_label_values(&["timeout"])
            .inc();
    }

    /// RAII timer feeding the metric-latency histogram
    pub fn metric_latency_timer(&self) -> LatencyTimer {
        LatencyTimer {
            start: Instant::now(),
            histogram: self.metric_latency_seconds.clone(),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new_unregistered()
    }
}

/// Records elapsed time into a histogram when dropped
pub struct LatencyTimer {
    start: Instant,
    histogram: Histogram,
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}
