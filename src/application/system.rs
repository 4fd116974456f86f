//! Application wiring: builds every component from configuration, restores
//! state from the audit trail, and runs the background loops.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::circuit_breaker::{BreakerConfig, CircuitBreaker};
use crate::application::engine::RiskEngine;
use crate::application::limit_monitor::LimitMonitor;
use crate::application::metrics_service::MetricsService;
use crate::application::snapshot_store::SnapshotStore;
use crate::application::stress_runner::StressRunner;
use crate::config::EngineConfig;
use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::ports::{ExecutionService, NotificationService};
use crate::domain::risk::limits::{RiskLimitSet, SharedLimits};
use crate::domain::risk::state::CircuitBreakerState;
use crate::domain::risk::stress::default_scenarios;
use crate::infrastructure::audit_log::AuditLog;
use crate::infrastructure::observability::EngineMetrics;

pub struct Application {
    pub store: Arc<SnapshotStore>,
    pub engine: Arc<RiskEngine>,
    pub monitor: Arc<LimitMonitor>,
    pub metrics_service: Arc<MetricsService>,
    pub observability: Arc<EngineMetrics>,
    stress_runner: Arc<StressRunner>,
    config: EngineConfig,
    tasks: Vec<JoinHandle<()>>,
}

impl Application {
    pub fn build(
        config: EngineConfig,
        limits: RiskLimitSet,
        initial_portfolio: PortfolioSnapshot,
        execution: Arc<dyn ExecutionService>,
        notifier: Arc<dyn NotificationService>,
    ) -> Result<Self> {
        limits.validate().context("Initial limit set invalid")?;
        config.validate().context("Engine configuration invalid")?;

        let observability =
            Arc::new(EngineMetrics::new().context("Failed to build metrics registry")?);
        let audit = Arc::new(AuditLog::open(Path::new(&config.audit_log_path))?);

        // Crash recovery: replaying the trail restores open breaches and the
        // last breaker state, so a restart cannot silently resume trading
        let recovered = audit.replay().context("Failed to replay audit trail")?;
        let initial_state = recovered
            .last_state
            .unwrap_or(CircuitBreakerState::Normal);
        if !recovered.open_breaches.is_empty() {
            warn!(
                count = recovered.open_breaches.len(),
                "Open breaches restored from audit trail; trackers will re-evaluate them"
            );
        }

        let store = Arc::new(SnapshotStore::with_return_window(
            initial_portfolio,
            config.return_window,
        ));
        let shared_limits = Arc::new(SharedLimits::new(limits));
        let metrics_service = Arc::new(MetricsService::new(
            store.clone(),
            config.to_metrics_config(),
            config.metric_budget_ms,
            observability.clone(),
        ));

        let breaker = CircuitBreaker::spawn(
            initial_state,
            recovered.open_breaches.len(),
            BreakerConfig {
                warning_threshold: config.warning_escalation_count,
                warning_window: Duration::from_secs(config.warning_window_secs),
                resume_cooldown: Duration::from_secs(config.resume_cooldown_secs),
                auto_recover_restricted: config.auto_recover_restricted,
            },
            execution,
            notifier.clone(),
            audit.clone(),
            observability.clone(),
        );

        let monitor = Arc::new(LimitMonitor::new(
            store.clone(),
            metrics_service.clone(),
            shared_limits.clone(),
            breaker.clone(),
            notifier.clone(),
            audit.clone(),
            observability.clone(),
            config.hysteresis_passes,
            recovered.open_breaches,
        ));

        let engine = Arc::new(RiskEngine::new(
            store.clone(),
            metrics_service.clone(),
            shared_limits.clone(),
            breaker,
            monitor.clone(),
            config.to_sizing_config(),
            audit,
            observability.clone(),
            config.snapshot_staleness_ms,
        ));

        let stress_runner = Arc::new(StressRunner::new(
            store.clone(),
            metrics_service.clone(),
            shared_limits,
            engine.clone(),
            notifier,
            default_scenarios(),
            config.stress_mc_paths,
            config.mc_seed,
            Duration::from_secs(config.stress_interval_secs),
        ));

        Ok(Self {
            store,
            engine,
            monitor,
            metrics_service,
            observability,
            stress_runner,
            config,
            tasks: Vec::new(),
        })
    }

    /// Handle for running stress rounds out of schedule
    pub fn stress_runner(&self) -> Arc<StressRunner> {
        self.stress_runner.clone()
    }

    /// Spawn the evaluation, stress, and reporting loops
    pub fn start(&mut self) {
        let monitor = self.monitor.clone();
        let interval_ms = self.config.evaluation_interval_ms;
        self.tasks.push(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.evaluate_once().await;
            }
        }));

        self.tasks.push(tokio::spawn(self.stress_runner.clone().run()));

        let engine = self.engine.clone();
        let report_secs = self.config.report_interval_secs;
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(report_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = engine.current_report().await;
                match serde_json::to_string(&report) {
                    Ok(json) => info!(target: "risk_report", "{json}"),
                    Err(err) => error!(error = %err, "Failed to serialize risk report"),
                }
            }
        }));

        info!("Risk engine loops started");
    }

    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Risk engine loops stopped");
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        self.shutdown();
    }
}
