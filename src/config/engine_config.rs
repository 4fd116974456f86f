//! Engine configuration parsed from environment variables: metric
//! calculation, sizing, monitoring cadence, and operational budgets.

use anyhow::{Context, Result, bail};
use std::env;

use crate::domain::risk::metrics::{MetricsConfig, TailDistribution, VarMethod};
use crate::domain::risk::sizing::SizingConfig;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Metric calculation
    pub var_method: VarMethod,
    pub var_confidence: f64,
    pub holding_period_days: f64,
    pub return_window: usize,
    pub min_observations: usize,
    pub ewma_decay: f64,
    pub mc_paths: usize,
    pub mc_seed: u64,
    pub tail_distribution: TailDistribution,
    pub t_degrees_of_freedom: f64,
    /// Wall-clock budget for one metric recomputation
    pub metric_budget_ms: u64,

    // Sizing
    pub kelly_fraction: f64,
    pub kelly_min_samples: usize,
    pub target_portfolio_vol: f64,
    pub min_correlation_scale: f64,

    // Monitoring & breaker
    pub evaluation_interval_ms: u64,
    /// Consecutive passing checks before a breach closes
    pub hysteresis_passes: u32,
    /// Warnings within the window that escalate the breaker
    pub warning_escalation_count: usize,
    pub warning_window_secs: u64,
    /// Minimum time outside the normal state before a resume is accepted
    pub resume_cooldown_secs: u64,
    /// Whether the restricted state returns to normal on its own once all
    /// breaches close
    pub auto_recover_restricted: bool,
    /// Snapshot older than this is refused on the authorization path
    pub snapshot_staleness_ms: u64,
    /// Tolerance for the reported-vs-computed total value check
    pub snapshot_epsilon: f64,

    // Stress testing
    pub stress_interval_secs: u64,
    pub stress_mc_paths: usize,

    // Persistence
    pub audit_log_path: String,
    pub limits_file_path: String,

    // Reporting
    pub report_interval_secs: u64,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let var_method = match env::var("VAR_METHOD")
            .unwrap_or_else(|_| "historical".to_string())
            .to_lowercase()
            .as_str()
        {
            "historical" => VarMethod::Historical,
            "parametric" => VarMethod::Parametric,
            "monte_carlo" | "montecarlo" => VarMethod::MonteCarlo,
            other => bail!("Unknown VAR_METHOD: {other}"),
        };

        let tail_distribution = match env::var("TAIL_DISTRIBUTION")
            .unwrap_or_else(|_| "normal".to_string())
            .to_lowercase()
            .as_str()
        {
            "normal" => TailDistribution::Normal,
            "student_t" | "studentt" | "t" => TailDistribution::StudentT,
            other => bail!("Unknown TAIL_DISTRIBUTION: {other}"),
        };

        let config = Self {
            var_method,
            var_confidence: Self::parse_f64("VAR_CONFIDENCE", 0.95)?,
            holding_period_days: Self::parse_f64("VAR_HOLDING_PERIOD_DAYS", 1.0)?,
            return_window: Self::parse_usize("RETURN_WINDOW", 250)?,
            min_observations: Self::parse_usize("MIN_OBSERVATIONS", 250)?,
            ewma_decay: Self::parse_f64("EWMA_DECAY", 0.94)?,
            mc_paths: Self::parse_usize("MC_PATHS", 10_000)?,
            mc_seed: Self::parse_u64("MC_SEED", 42)?,
            tail_distribution,
            t_degrees_of_freedom: Self::parse_f64("T_DEGREES_OF_FREEDOM", 4.0)?,
            metric_budget_ms: Self::parse_u64("METRIC_BUDGET_MS", 2_000)?,

            kelly_fraction: Self::parse_f64("KELLY_FRACTION", 0.25)?,
            kelly_min_samples: Self::parse_usize("KELLY_MIN_SAMPLES", 30)?,
            target_portfolio_vol: Self::parse_f64("TARGET_PORTFOLIO_VOL", 0.20)?,
            min_correlation_scale: Self::parse_f64("MIN_CORRELATION_SCALE", 0.1)?,

            evaluation_interval_ms: Self::parse_u64("EVALUATION_INTERVAL_MS", 1_000)?,
            hysteresis_passes: Self::parse_u32("HYSTERESIS_PASSES", 3)?,
            warning_escalation_count: Self::parse_usize("WARNING_ESCALATION_COUNT", 5)?,
            warning_window_secs: Self::parse_u64("WARNING_WINDOW_SECS", 300)?,
            resume_cooldown_secs: Self::parse_u64("RESUME_COOLDOWN_SECS", 300)?,
            auto_recover_restricted: Self::parse_bool("AUTO_RECOVER_RESTRICTED", true)?,
            snapshot_staleness_ms: Self::parse_u64("SNAPSHOT_STALENESS_MS", 5_000)?,
            snapshot_epsilon: Self::parse_f64("SNAPSHOT_EPSILON", 1e-6)?,

            stress_interval_secs: Self::parse_u64("STRESS_INTERVAL_SECS", 86_400)?,
            stress_mc_paths: Self::parse_usize("STRESS_MC_PATHS", 10_000)?,

            audit_log_path: env::var("AUDIT_LOG_PATH")
                .unwrap_or_else(|_| "data/audit.jsonl".to_string()),
            limits_file_path: env::var("LIMITS_FILE_PATH")
                .unwrap_or_else(|_| "config/limits.toml".to_string()),

            report_interval_secs: Self::parse_u64("REPORT_INTERVAL_SECS", 60)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.5..1.0).contains(&self.var_confidence) {
            bail!("VAR_CONFIDENCE must be in [0.5, 1.0): {}", self.var_confidence);
        }
        if self.holding_period_days <= 0.0 {
            bail!("VAR_HOLDING_PERIOD_DAYS must be positive: {}", self.holding_period_days);
        }
        if !(0.0..1.0).contains(&self.ewma_decay) {
            bail!("EWMA_DECAY must be in (0, 1): {}", self.ewma_decay);
        }
        if self.mc_paths == 0 {
            bail!("MC_PATHS must be positive");
        }
        if self.t_degrees_of_freedom <= 2.0 {
            bail!(
                "T_DEGREES_OF_FREEDOM must exceed 2 for finite variance: {}",
                self.t_degrees_of_freedom
            );
        }
        if !(0.0..=1.0).contains(&self.kelly_fraction) {
            bail!("KELLY_FRACTION must be in [0, 1]: {}", self.kelly_fraction);
        }
        if self.target_portfolio_vol <= 0.0 {
            bail!("TARGET_PORTFOLIO_VOL must be positive: {}", self.target_portfolio_vol);
        }
        if self.hysteresis_passes == 0 {
            bail!("HYSTERESIS_PASSES must be at least 1");
        }
        if self.evaluation_interval_ms == 0 {
            bail!("EVALUATION_INTERVAL_MS must be positive");
        }
        Ok(())
    }

    pub fn to_metrics_config(&self) -> MetricsConfig {
        MetricsConfig {
            method: self.var_method,
            confidence: self.var_confidence,
            holding_period_days: self.holding_period_days,
            window: self.return_window,
            min_observations: self.min_observations,
            ewma_decay: self.ewma_decay,
            mc_paths: self.mc_paths,
            mc_seed: self.mc_seed,
            distribution: self.tail_distribution,
            t_degrees_of_freedom: self.t_degrees_of_freedom,
        }
    }

    pub fn to_sizing_config(&self) -> SizingConfig {
        SizingConfig {
            kelly_fraction: self.kelly_fraction,
            kelly_min_samples: self.kelly_min_samples,
            target_portfolio_vol: self.target_portfolio_vol,
            min_correlation_scale: self.min_correlation_scale,
        }
    }

    fn parse_usize(key: &str, default: usize) -> Result<usize> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<usize>()
            .context(format!("Failed to parse {}", key))
    }

    fn parse_f64(key: &str, default: f64) -> Result<f64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<f64>()
            .context(format!("Failed to parse {}", key))
    }

    fn parse_u32(key: &str, default: u32) -> Result<u32> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<u32>()
            .context(format!("Failed to parse {}", key))
    }

    fn parse_u64(key: &str, default: u64) -> Result<u64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<u64>()
            .context(format!("Failed to parse {}", key))
    }

    fn parse_bool(key: &str, default: bool) -> Result<bool> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<bool>()
            .context(format!("Failed to parse {}", key))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            var_method: VarMethod::Historical,
            var_confidence: 0.95,
            holding_period_days: 1.0,
            return_window: 250,
            min_observations: 250,
            ewma_decay: 0.94,
            mc_paths: 10_000,
            mc_seed: 42,
            tail_distribution: TailDistribution::Normal,
            t_degrees_of_freedom: 4.0,
            metric_budget_ms: 2_000,
            kelly_fraction: 0.25,
            kelly_min_samples: 30,
            target_portfolio_vol: 0.20,
            min_correlation_scale: 0.1,
            evaluation_interval_ms: 1_000,
            hysteresis_passes: 3,
            warning_escalation_count: 5,
            warning_window_secs: 300,
            resume_cooldown_secs: 300,
            auto_recover_restricted: true,
            snapshot_staleness_ms: 5_000,
            snapshot_epsilon: 1e-6,
            stress_interval_secs: 86_400,
            stress_mc_paths: 10_000,
            audit_log_path: "data/audit.jsonl".to_string(),
            limits_file_path: "config/limits.toml".to_string(),
            report_interval_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_confidence_rejected() {
        let config = EngineConfig {
            var_confidence: 1.0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_low_degrees_of_freedom_rejected() {
        let config = EngineConfig {
            t_degrees_of_freedom: 2.0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metrics_config_mirrors_engine_config() {
        let engine = EngineConfig {
            var_method: VarMethod::MonteCarlo,
            mc_seed: 99,
            ..EngineConfig::default()
        };
        let metrics = engine.to_metrics_config();
        assert_eq!(metrics.method, VarMethod::MonteCarlo);
        assert_eq!(metrics.mc_seed, 99);
        assert_eq!(metrics.window, engine.return_window);
    }
}
