//! Continuous limit evaluation with hysteresis.
//!
//! Each cycle re-derives metrics, checks every configured ceiling, advances
//! the per-limit breach trackers, and feeds the circuit breaker. Breach
//! open/close events go to the audit trail and the alert sink; the breaker
//! decides what, if anything, changes state.

use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::application::circuit_breaker::CircuitBreakerHandle;
use crate::application::metrics_service::MetricsService;
use crate::application::snapshot_store::SnapshotStore;
use crate::domain::errors::LimitViolation;
use crate::domain::ports::NotificationService;
use crate::domain::risk::breach::{BreachEvent, LimitTracker, TrackerUpdate, classify};
use crate::domain::risk::limits::{RiskLimitSet, SharedLimits};
use crate::domain::risk::metrics::RiskMetrics;
use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::types::{Alert, Severity};
use crate::infrastructure::audit_log::{AuditLog, AuditRecord};
use crate::infrastructure::observability::EngineMetrics;

pub const LIMIT_POSITION_CONCENTRATION: &str = "position_concentration";
pub const LIMIT_EXCHANGE_EXPOSURE: &str = "exchange_exposure";
pub const LIMIT_LEVERAGE: &str = "max_leverage";
pub const LIMIT_DAILY_VAR: &str = "daily_var";
pub const LIMIT_DRAWDOWN: &str = "max_drawdown";
pub const LIMIT_DAILY_LOSS: &str = "daily_loss";
pub const LIMIT_CORRELATION: &str = "correlation_ceiling";

const ALL_LIMITS: [&str; 7] = [
    LIMIT_POSITION_CONCENTRATION,
    LIMIT_EXCHANGE_EXPOSURE,
    LIMIT_LEVERAGE,
    LIMIT_DAILY_VAR,
    LIMIT_DRAWDOWN,
    LIMIT_DAILY_LOSS,
    LIMIT_CORRELATION,
];

struct LimitCheck {
    name: &'static str,
    observed: f64,
    threshold: f64,
    violation: LimitViolation,
}

pub struct LimitMonitor {
    store: Arc<SnapshotStore>,
    metrics_service: Arc<MetricsService>,
    limits: Arc<SharedLimits>,
    breaker: CircuitBreakerHandle,
    notifier: Arc<dyn NotificationService>,
    audit: Arc<AuditLog>,
    observability: Arc<EngineMetrics>,
    trackers: Mutex<HashMap<&'static str, LimitTracker>>,
}

impl LimitMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SnapshotStore>,
        metrics_service: Arc<MetricsService>,
        limits: Arc<SharedLimits>,
        breaker: CircuitBreakerHandle,
        notifier: Arc<dyn NotificationService>,
        audit: Arc<AuditLog>,
        observability: Arc<EngineMetrics>,
        hysteresis_passes: u32,
        recovered_breaches: Vec<BreachEvent>,
    ) -> Self {
        let mut trackers: HashMap<&'static str, LimitTracker> = ALL_LIMITS
            .iter()
            .map(|name| (*name, LimitTracker::new(*name, hysteresis_passes)))
            .collect();

        // Breaches replayed from the audit trail keep their identity and
        // close through the ordinary hysteresis path once conditions clear
        for event in recovered_breaches {
            match ALL_LIMITS.iter().find(|name| **name == event.limit_name) {
                Some(name) => {
                    if let Some(tracker) = trackers.get_mut(*name) {
                        tracker.restore(event);
                    }
                }
                None => warn!(
                    limit = %event.limit_name,
                    "Recovered breach references an unknown limit; dropping it"
                ),
            }
        }

        Self {
            store,
            metrics_service,
            limits,
            breaker,
            notifier,
            audit,
            observability,
            trackers: Mutex::new(trackers),
        }
    }

    /// One full evaluation cycle: recompute metrics, check all limits,
    /// advance trackers, signal the breaker.
    pub async fn evaluate_once(&self) {
        let metrics = self.metrics_service.recompute().await;
        let portfolio = self.store.portfolio().await;
        let limits = self.limits.get().await;
        let daily_loss = self.store.daily_loss_pct().await;

        let checks = build_checks(&portfolio, &metrics, &limits, daily_loss);
        let now = Utc::now();

        let mut trackers = self.trackers.lock().await;
        for check in checks {
            let severity = classify(
                check.observed,
                check.threshold,
                limits.warning_ratio,
                limits.critical_ratio,
            );
            let Some(tracker) = trackers.get_mut(check.name) else {
                continue;
            };
            let update = tracker.observe(check.observed, check.threshold, severity, now);
            let Some(update) = update else { continue };

            let open_count = trackers.values().filter(|t| t.open_event().is_some()).count();
            match update {
                TrackerUpdate::Opened(event) => {
                    self.observability.inc_breach(&event.limit_name, &event.severity.to_string());
                    self.observability.open_breaches.set(open_count as f64);
                    if let Err(err) =
                        self.audit.append(&AuditRecord::BreachOpened { event: event.clone() }).await
                    {
                        error!(error = %err, "Failed to audit breach open");
                    }
                    let alert = Alert::new(
                        event.severity,
                        check.violation.to_string(),
                        json!({
                            "limit": event.limit_name,
                            "observed": event.observed_value,
                            "threshold": event.threshold,
                        }),
                    );
                    if let Err(err) = self.notifier.emit_alert(alert).await {
                        error!(error = %err, "Failed to deliver breach alert");
                    }
                    self.breaker
                        .report_breach(event.severity, check.violation.to_string(), open_count)
                        .await;
                }
                TrackerUpdate::StillFailing(event) => {
                    // Re-signal so repeated critical failures keep walking
                    // the breaker ladder and warnings keep accumulating
                    self.breaker
                        .report_breach(event.severity, check.violation.to_string(), open_count)
                        .await;
                }
                TrackerUpdate::Closed(event) => {
                    self.observability.open_breaches.set(open_count as f64);
                    if let Err(err) =
                        self.audit.append(&AuditRecord::BreachClosed { event: event.clone() }).await
                    {
                        error!(error = %err, "Failed to audit breach close");
                    }
                    let alert = Alert::new(
                        Severity::Warning,
                        format!("Breach of {} resolved", event.limit_name),
                        json!({ "limit": event.limit_name }),
                    );
                    if let Err(err) = self.notifier.emit_alert(alert).await {
                        error!(error = %err, "Failed to deliver resolution alert");
                    }
                    self.breaker.report_resolved(open_count).await;
                }
            }
        }
        debug!("Limit evaluation cycle complete");
    }

    pub async fn open_breaches(&self) -> Vec<crate::domain::risk::breach::BreachEvent> {
        self.trackers
            .lock()
            .await
            .values()
            .filter_map(|t| t.open_event().cloned())
            .collect()
    }
}

fn build_checks(
    portfolio: &PortfolioSnapshot,
    metrics: &RiskMetrics,
    limits: &RiskLimitSet,
    daily_loss: f64,
) -> Vec<LimitCheck> {
    let mut checks = Vec::with_capacity(ALL_LIMITS.len());

    let (symbol, weight) = portfolio
        .largest_weight()
        .map(|(s, w)| (s.to_string(), w))
        .unwrap_or_else(|| ("none".to_string(), 0.0));
    checks.push(LimitCheck {
        name: LIMIT_POSITION_CONCENTRATION,
        observed: weight,
        threshold: limits.max_position_pct,
        violation: LimitViolation::PositionConcentration {
            symbol,
            current_pct: weight * 100.0,
            max_pct: limits.max_position_pct * 100.0,
        },
    });

    let (exchange, exposure) = portfolio
        .largest_exchange_exposure()
        .unwrap_or_else(|| ("none".to_string(), 0.0));
    checks.push(LimitCheck {
        name: LIMIT_EXCHANGE_EXPOSURE,
        observed: exposure,
        threshold: limits.max_exchange_exposure_pct,
        violation: LimitViolation::ExchangeExposure {
            exchange,
            current_pct: exposure * 100.0,
            max_pct: limits.max_exchange_exposure_pct * 100.0,
        },
    });

    let leverage = portfolio.leverage();
    checks.push(LimitCheck {
        name: LIMIT_LEVERAGE,
        observed: leverage,
        threshold: limits.max_leverage,
        violation: LimitViolation::Leverage {
            current: leverage,
            max: limits.max_leverage,
        },
    });

    let var = metrics.var_for_confidence(metrics.confidence);
    checks.push(LimitCheck {
        name: LIMIT_DAILY_VAR,
        observed: var,
        threshold: limits.daily_var_ceiling_pct,
        violation: LimitViolation::VarCeiling {
            observed_pct: var * 100.0,
            ceiling_pct: limits.daily_var_ceiling_pct * 100.0,
        },
    });

    checks.push(LimitCheck {
        name: LIMIT_DRAWDOWN,
        observed: metrics.current_drawdown,
        threshold: limits.max_drawdown_pct,
        violation: LimitViolation::DrawdownLimit {
            drawdown_pct: metrics.current_drawdown * 100.0,
            max_pct: limits.max_drawdown_pct * 100.0,
        },
    });

    checks.push(LimitCheck {
        name: LIMIT_DAILY_LOSS,
        observed: daily_loss,
        threshold: limits.max_daily_loss_pct,
        violation: LimitViolation::DailyLoss {
            loss_pct: daily_loss * 100.0,
            limit_pct: limits.max_daily_loss_pct * 100.0,
        },
    });

    let (a, b, correlation) = metrics
        .correlation
        .max_offdiagonal()
        .unwrap_or_else(|| ("none".to_string(), "none".to_string(), 0.0));
    checks.push(LimitCheck {
        name: LIMIT_CORRELATION,
        observed: correlation,
        threshold: limits.correlation_ceiling,
        violation: LimitViolation::CorrelationCeiling {
            a,
            b,
            observed: correlation,
            ceiling: limits.correlation_ceiling,
        },
    });

    checks
}
