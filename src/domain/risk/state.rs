use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating states of the circuit breaker, ordered by restrictiveness
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerState {
    /// All trading permitted
    Normal,
    /// Only risk-reducing orders permitted
    Restricted,
    /// No orders; open orders are cancelled on entry
    Halted,
    /// Forced unwinding of positions; reached only by explicit command
    EmergencyLiquidation,
}

impl CircuitBreakerState {
    /// Exposure-increasing orders are refused in any non-Normal state
    pub fn blocks_increases(&self) -> bool {
        *self != CircuitBreakerState::Normal
    }

    /// Halted and beyond refuse every order, reducing or not
    pub fn blocks_all_orders(&self) -> bool {
        *self >= CircuitBreakerState::Halted
    }

    /// Whether a direct transition to `target` is legal.
    ///
    /// Escalation moves one step at a time; recovery always lands back in
    /// Normal. EmergencyLiquidation is terminal until a manual resume.
    pub fn can_transition_to(&self, target: CircuitBreakerState) -> bool {
        use CircuitBreakerState::*;
        match (*self, target) {
            (Normal, Restricted) => true,
            (Restricted, Halted) => true,
            (Restricted, Normal) => true,
            (Halted, EmergencyLiquidation) => true,
            (Halted, Normal) => true,
            (EmergencyLiquidation, Normal) => true,
            _ => false,
        }
    }

    /// Next state when escalating one notch; saturates at Halted since
    /// liquidation is never entered automatically
    pub fn escalated(&self) -> CircuitBreakerState {
        use CircuitBreakerState::*;
        match self {
            Normal => Restricted,
            Restricted => Halted,
            Halted | EmergencyLiquidation => *self,
        }
    }
}

impl fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitBreakerState::Normal => "normal",
            CircuitBreakerState::Restricted => "restricted",
            CircuitBreakerState::Halted => "halted",
            CircuitBreakerState::EmergencyLiquidation => "emergency_liquidation",
        };
        write!(f, "{name}")
    }
}

/// Append-only record of a breaker transition, kept for reports and audit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from_state: CircuitBreakerState,
    pub to_state: CircuitBreakerState,
    pub cause: String,
    pub timestamp: DateTime<Utc>,
    /// "system" for automatic transitions, operator id for manual ones
    pub actor: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use CircuitBreakerState::*;

    #[test]
    fn test_ordering_by_restrictiveness() {
        assert!(Normal < Restricted);
        assert!(Restricted < Halted);
        assert!(Halted < EmergencyLiquidation);
    }

    #[test]
    fn test_blocking_rules() {
        assert!(!Normal.blocks_increases());
        assert!(Restricted.blocks_increases());
        assert!(!Restricted.blocks_all_orders());
        assert!(Halted.blocks_all_orders());
        assert!(EmergencyLiquidation.blocks_all_orders());
    }

    #[test]
    fn test_no_state_skipping_on_escalation() {
        assert!(!Normal.can_transition_to(Halted));
        assert!(!Normal.can_transition_to(EmergencyLiquidation));
        assert!(!Restricted.can_transition_to(EmergencyLiquidation));
        assert_eq!(Normal.escalated(), Restricted);
        assert_eq!(Restricted.escalated(), Halted);
        assert_eq!(Halted.escalated(), Halted);
    }

    #[test]
    fn test_recovery_paths() {
        assert!(Restricted.can_transition_to(Normal));
        assert!(Halted.can_transition_to(Normal));
        assert!(EmergencyLiquidation.can_transition_to(Normal));
        assert!(!Halted.can_transition_to(Restricted));
        assert!(!EmergencyLiquidation.can_transition_to(Halted));
    }
}
