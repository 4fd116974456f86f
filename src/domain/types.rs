use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::risk::limits::RiskLimitSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// A trade the engine is asked to authorize. Never persisted beyond the
/// decision audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeProposal {
    pub symbol: String,
    pub side: OrderSide,
    pub requested_quantity: Decimal,
    /// Limit price if known; mark price is used otherwise.
    pub requested_price: Option<Decimal>,
    pub timestamp: i64,
}

/// Machine-readable reasons attached to a SizingDecision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RationaleCode {
    KellySized,
    /// Kelly inputs absent or sample too small; volatility sizing governs
    KellySkipped,
    VolatilityTarget,
    CorrelationScaled,
    ClippedByPositionLimit,
    ClippedByOrderValue,
    ReducingTrade,
    /// Metrics were degraded (insufficient data or stale); conservative path
    DegradedMetrics,
    MissingPrice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingDecision {
    pub approved_quantity: Decimal,
    pub max_allowed_quantity: Decimal,
    pub rationale: Vec<RationaleCode>,
    /// RiskLimitSet version this decision was made under
    pub limit_version: u32,
    pub decided_at: DateTime<Utc>,
}

impl SizingDecision {
    pub fn has_rationale(&self, code: RationaleCode) -> bool {
        self.rationale.contains(&code)
    }
}

/// Severity ladder for breach events and alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Breach,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARNING"),
            Severity::Breach => write!(f, "BREACH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Abstract alert handed to the notification collaborator. The engine never
/// formats channel-specific messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub severity: Severity,
    pub message: String,
    pub context: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(severity: Severity, message: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            severity,
            message: message.into(),
            context,
            timestamp: Utc::now(),
        }
    }
}

/// Operator commands accepted by `manual_override`
#[derive(Debug, Clone)]
pub enum ManualCommand {
    /// Return to Normal after cooldown, only with no open breaches
    Resume,
    /// Force Halted from any lower state
    EmergencyStop,
    /// Halted -> EmergencyLiquidation; never triggered automatically
    Liquidate,
    /// Atomically swap the active limit set
    ReloadLimits(Box<RiskLimitSet>),
    /// Apply the pending stress-test tightening proposal
    ApproveTightening,
}

impl fmt::Display for ManualCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManualCommand::Resume => write!(f, "RESUME"),
            ManualCommand::EmergencyStop => write!(f, "EMERGENCY_STOP"),
            ManualCommand::Liquidate => write!(f, "LIQUIDATE"),
            ManualCommand::ReloadLimits(l) => write!(f, "RELOAD_LIMITS(v{})", l.version),
            ManualCommand::ApproveTightening => write!(f, "APPROVE_TIGHTENING"),
        }
    }
}
