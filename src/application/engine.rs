//! The engine facade: trade authorization, manual overrides, trade-outcome
//! ingestion, and report assembly.
//!
//! Authorization is deliberately cheap: it reads the published breaker state
//! and the cached metrics, runs the pure sizing function, and writes one
//! audit record. Nothing on this path blocks on metric recomputation.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::application::circuit_breaker::CircuitBreakerHandle;
use crate::application::limit_monitor::LimitMonitor;
use crate::application::metrics_service::MetricsService;
use crate::application::report::{ReportInputs, RiskReport, build_report};
use crate::application::snapshot_store::SnapshotStore;
use crate::domain::errors::{EngineError, LimitViolation};
use crate::domain::risk::limits::{RiskLimitSet, SharedLimits};
use crate::domain::risk::sizing::{KellyAccumulator, SizingConfig, size_position};
use crate::domain::risk::stress::StressResult;
use crate::domain::types::{ManualCommand, OrderSide, RationaleCode, SizingDecision, TradeProposal};
use crate::infrastructure::audit_log::{AuditLog, AuditRecord};
use crate::infrastructure::observability::EngineMetrics;

pub struct RiskEngine {
    store: Arc<SnapshotStore>,
    metrics_service: Arc<MetricsService>,
    limits: Arc<SharedLimits>,
    breaker: CircuitBreakerHandle,
    monitor: Arc<LimitMonitor>,
    sizing: SizingConfig,
    audit: Arc<AuditLog>,
    observability: Arc<EngineMetrics>,
    kelly: Mutex<KellyAccumulator>,
    pending_tightening: Mutex<Option<RiskLimitSet>>,
    latest_stress: RwLock<Vec<StressResult>>,
    staleness_ms: u64,
}

impl RiskEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SnapshotStore>,
        metrics_service: Arc<MetricsService>,
        limits: Arc<SharedLimits>,
        breaker: CircuitBreakerHandle,
        monitor: Arc<LimitMonitor>,
        sizing: SizingConfig,
        audit: Arc<AuditLog>,
        observability: Arc<EngineMetrics>,
        staleness_ms: u64,
    ) -> Self {
        Self {
            store,
            metrics_service,
            limits,
            breaker,
            monitor,
            sizing,
            audit,
            observability,
            kelly: Mutex::new(KellyAccumulator::default()),
            pending_tightening: Mutex::new(None),
            latest_stress: RwLock::new(Vec::new()),
            staleness_ms,
        }
    }

    /// Authorize a trade proposal against the current snapshot, metrics,
    /// limits, and breaker state.
    pub async fn submit_trade_proposal(
        &self,
        proposal: TradeProposal,
    ) -> Result<SizingDecision, EngineError> {
        self.store.ensure_fresh(Utc::now(), self.staleness_ms).await?;

        let state = self.breaker.state();
        if state.blocks_all_orders() {
            self.observability.inc_decision("rejected");
            return Err(EngineError::ProposalRejected(format!(
                "breaker is {state}, no orders accepted"
            )));
        }
        if state.blocks_increases() && proposal.side == OrderSide::Buy {
            self.observability.inc_decision("rejected");
            return Err(EngineError::ProposalRejected(format!(
                "breaker is {state}, only risk-reducing orders accepted"
            )));
        }

        let snapshot = self.store.portfolio().await;
        let market = self.store.market().await;
        let metrics = self.metrics_service.current().await;
        let limits = self.limits.get().await;

        let mark_price = proposal
            .requested_price
            .or_else(|| market.price(&proposal.symbol))
            .unwrap_or(Decimal::ZERO);

        let kelly_stats = self.kelly.lock().await.stats();
        let decision = size_position(
            &proposal,
            &snapshot,
            &metrics,
            &limits,
            &self.sizing,
            kelly_stats.as_ref(),
            mark_price,
        );

        if decision.rationale.contains(&RationaleCode::ClippedByOrderValue) {
            let violation = LimitViolation::OrderValue {
                value: (proposal.requested_quantity * mark_price).round_dp(2),
                max: Decimal::from_f64(limits.max_order_value_usd).unwrap_or(Decimal::ZERO),
            };
            warn!(symbol = %proposal.symbol, %violation, "Proposal notional clipped");
        }

        let outcome = if decision.approved_quantity.is_zero() {
            "denied"
        } else if decision.approved_quantity < proposal.requested_quantity {
            "clipped"
        } else {
            "approved"
        };
        self.observability.inc_decision(outcome);

        if let Err(err) = self
            .audit
            .append(&AuditRecord::Decision {
                symbol: proposal.symbol.clone(),
                decision: decision.clone(),
            })
            .await
        {
            warn!(error = %err, "Failed to audit sizing decision");
        }

        info!(
            symbol = %proposal.symbol,
            side = %proposal.side,
            requested = %proposal.requested_quantity,
            approved = %decision.approved_quantity,
            outcome,
            limit_version = decision.limit_version,
            "Trade proposal sized"
        );
        Ok(decision)
    }

    /// Feed a realized trade result into the Kelly statistics
    pub async fn record_trade_outcome(&self, pnl: f64) {
        self.kelly.lock().await.record_outcome(pnl);
    }

    /// Route an operator command. Limit management is handled here; breaker
    /// state commands go to the breaker actor.
    pub async fn manual_override(
        &self,
        command: ManualCommand,
        actor: &str,
    ) -> Result<(), EngineError> {
        match command {
            ManualCommand::ReloadLimits(limits) => self.reload_limits(*limits, actor).await,
            ManualCommand::ApproveTightening => {
                let pending = self.pending_tightening.lock().await.take();
                match pending {
                    Some(limits) => self.reload_limits(limits, actor).await,
                    None => Err(EngineError::ProposalRejected(
                        "no pending tightening proposal".to_string(),
                    )),
                }
            }
            other => self.breaker.manual(other, actor.to_string()).await,
        }
    }

    async fn reload_limits(&self, limits: RiskLimitSet, actor: &str) -> Result<(), EngineError> {
        limits.validate()?;
        let previous = self.limits.swap(limits.clone()).await;
        info!(
            actor,
            from_version = previous.version,
            to_version = limits.version,
            name = %limits.name,
            "Risk limits reloaded"
        );
        if let Err(err) = self
            .audit
            .append(&AuditRecord::LimitsReloaded {
                name: limits.name.clone(),
                version: limits.version,
                timestamp: Utc::now(),
            })
            .await
        {
            warn!(error = %err, "Failed to audit limits reload");
        }
        Ok(())
    }

    /// Called by the stress runner when a scenario round finishes
    pub async fn set_stress_results(
        &self,
        results: Vec<StressResult>,
        proposal: Option<RiskLimitSet>,
    ) {
        *self.latest_stress.write().await = results;
        if let Some(proposed) = proposal {
            info!(
                name = %proposed.name,
                version = proposed.version,
                "Stress tightening proposal pending approval"
            );
            *self.pending_tightening.lock().await = Some(proposed);
        }
    }

    pub async fn pending_tightening(&self) -> Option<RiskLimitSet> {
        self.pending_tightening.lock().await.clone()
    }

    /// Assemble a report from the current state. Read-only and repeatable.
    pub async fn current_report(&self) -> RiskReport {
        let portfolio = self.store.portfolio().await;
        let metrics = self.metrics_service.current().await;
        let limits = self.limits.get().await;
        let daily_loss = self.store.daily_loss_pct().await;
        let transitions = self.breaker.history().await;
        let open_breaches = self.monitor.open_breaches().await;
        let stress_results = self.latest_stress.read().await.clone();
        let pending = self
            .pending_tightening
            .lock()
            .await
            .as_ref()
            .map(|limits| format!("{} v{}", limits.name, limits.version));

        self.observability
            .portfolio_value_usd
            .set(rust_decimal::prelude::ToPrimitive::to_f64(&portfolio.total_value).unwrap_or(0.0));

        // Derived from the inputs so the report is idempotent: the same
        // state always serializes to the same bytes
        let mut generated_at = portfolio.timestamp.max(metrics.timestamp);
        if let Some(last) = transitions.last() {
            generated_at = generated_at.max(last.timestamp);
        }
        if let Some(last) = stress_results.last() {
            generated_at = generated_at.max(last.computed_at);
        }

        build_report(
            generated_at,
            ReportInputs {
                portfolio: &portfolio,
                metrics: &metrics,
                limits: &limits,
                daily_loss_pct: daily_loss,
                breaker_state: self.breaker.state(),
                open_breaches,
                transitions: &transitions,
                stress_results,
                pending_tightening: pending,
            },
        )
    }
}
