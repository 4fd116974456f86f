use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::errors::EngineError;

fn default_warning_ratio() -> f64 {
    0.85
}

fn default_critical_ratio() -> f64 {
    1.5
}

/// Named, versioned set of numeric ceilings. Created at configuration load,
/// replaced atomically on reconfiguration; every risk decision records the
/// version it used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimitSet {
    pub name: String,
    pub version: u32,

    /// Max single position as fraction of equity (e.g. 0.20 = 20%)
    pub max_position_pct: f64,
    /// Max exposure per exchange as fraction of equity
    pub max_exchange_exposure_pct: f64,
    /// Max gross exposure over equity
    pub max_leverage: f64,
    /// Daily VaR ceiling as fraction of equity, at the engine confidence level
    pub daily_var_ceiling_pct: f64,
    /// Max drawdown from the equity high-water mark
    pub max_drawdown_pct: f64,
    /// Max loss per day as fraction of session start equity
    pub max_daily_loss_pct: f64,
    /// Max pairwise correlation between held assets
    pub correlation_ceiling: f64,
    /// Max notional per single order, USD
    pub max_order_value_usd: f64,

    /// Fraction of a ceiling at which a warning-severity event opens
    #[serde(default = "default_warning_ratio")]
    pub warning_ratio: f64,
    /// Multiple of a ceiling at which an event becomes critical
    #[serde(default = "default_critical_ratio")]
    pub critical_ratio: f64,
}

impl RiskLimitSet {
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: String| Err(EngineError::ConfigurationInvalid(msg));

        if self.name.is_empty() {
            return invalid("limit set name must not be empty".to_string());
        }
        if self.max_position_pct <= 0.0 || self.max_position_pct > 1.0 {
            return invalid(format!("Invalid max_position_pct: {}", self.max_position_pct));
        }
        if self.max_exchange_exposure_pct <= 0.0 || self.max_exchange_exposure_pct > 1.0 {
            return invalid(format!(
                "Invalid max_exchange_exposure_pct: {}",
                self.max_exchange_exposure_pct
            ));
        }
        if self.max_leverage <= 0.0 {
            return invalid(format!("Invalid max_leverage: {}", self.max_leverage));
        }
        if self.daily_var_ceiling_pct <= 0.0 || self.daily_var_ceiling_pct > 1.0 {
            return invalid(format!(
                "Invalid daily_var_ceiling_pct: {}",
                self.daily_var_ceiling_pct
            ));
        }
        if self.max_drawdown_pct <= 0.0 || self.max_drawdown_pct > 1.0 {
            return invalid(format!("Invalid max_drawdown_pct: {}", self.max_drawdown_pct));
        }
        if self.max_daily_loss_pct <= 0.0 || self.max_daily_loss_pct > 0.5 {
            return invalid(format!(
                "Invalid max_daily_loss_pct: {}",
                self.max_daily_loss_pct
            ));
        }
        if self.correlation_ceiling <= 0.0 || self.correlation_ceiling > 1.0 {
            return invalid(format!(
                "Invalid correlation_ceiling: {}",
                self.correlation_ceiling
            ));
        }
        if self.max_order_value_usd <= 0.0 {
            return invalid(format!(
                "Invalid max_order_value_usd: {}",
                self.max_order_value_usd
            ));
        }
        if self.warning_ratio <= 0.0 || self.warning_ratio >= 1.0 {
            return invalid(format!("Invalid warning_ratio: {}", self.warning_ratio));
        }
        if self.critical_ratio <= 1.0 {
            return invalid(format!("Invalid critical_ratio: {}", self.critical_ratio));
        }
        Ok(())
    }

    /// True when every ceiling in `self` is at or below the corresponding
    /// ceiling in `other`. Stress-test proposals must satisfy this.
    pub fn is_tightening_of(&self, other: &RiskLimitSet) -> bool {
        self.max_position_pct <= other.max_position_pct
            && self.max_exchange_exposure_pct <= other.max_exchange_exposure_pct
            && self.max_leverage <= other.max_leverage
            && self.daily_var_ceiling_pct <= other.daily_var_ceiling_pct
            && self.max_drawdown_pct <= other.max_drawdown_pct
            && self.max_daily_loss_pct <= other.max_daily_loss_pct
            && self.correlation_ceiling <= other.correlation_ceiling
            && self.max_order_value_usd <= other.max_order_value_usd
    }
}

impl Default for RiskLimitSet {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            version: 1,
            max_position_pct: 0.20,
            max_exchange_exposure_pct: 0.50,
            max_leverage: 2.0,
            daily_var_ceiling_pct: 0.05,
            max_drawdown_pct: 0.20,
            max_daily_loss_pct: 0.05,
            correlation_ceiling: 0.85,
            max_order_value_usd: 100_000.0,
            warning_ratio: default_warning_ratio(),
            critical_ratio: default_critical_ratio(),
        }
    }
}

/// Shared handle to the active limit set. Readers clone the Arc and hold no
/// lock; reloads swap the pointer atomically.
#[derive(Debug)]
pub struct SharedLimits {
    inner: RwLock<Arc<RiskLimitSet>>,
}

impl SharedLimits {
    pub fn new(limits: RiskLimitSet) -> Self {
        Self {
            inner: RwLock::new(Arc::new(limits)),
        }
    }

    pub async fn get(&self) -> Arc<RiskLimitSet> {
        self.inner.read().await.clone()
    }

    pub async fn swap(&self, limits: RiskLimitSet) -> Arc<RiskLimitSet> {
        let mut guard = self.inner.write().await;
        let previous = guard.clone();
        *guard = Arc::new(limits);
        previous
    }
}
