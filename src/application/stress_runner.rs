//! Scheduled stress testing.
//!
//! Scenario rounds run on the blocking pool against an immutable snapshot.
//! A watcher on the snapshot epoch flips a cancellation flag if fresher
//! portfolio state arrives mid-run; a cancelled round is discarded rather
//! than reported against stale state.

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use crate::application::engine::RiskEngine;
use crate::application::metrics_service::MetricsService;
use crate::application::snapshot_store::SnapshotStore;
use crate::domain::ports::NotificationService;
use crate::domain::risk::limits::SharedLimits;
use crate::domain::risk::stress::{StressScenario, propose_tightening, run_scenario};
use crate::domain::types::{Alert, Severity};

pub struct StressRunner {
    store: Arc<SnapshotStore>,
    metrics_service: Arc<MetricsService>,
    limits: Arc<SharedLimits>,
    engine: Arc<RiskEngine>,
    notifier: Arc<dyn NotificationService>,
    scenarios: Vec<StressScenario>,
    mc_paths: usize,
    mc_seed: u64,
    pub interval: Duration,
}

impl StressRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SnapshotStore>,
        metrics_service: Arc<MetricsService>,
        limits: Arc<SharedLimits>,
        engine: Arc<RiskEngine>,
        notifier: Arc<dyn NotificationService>,
        scenarios: Vec<StressScenario>,
        mc_paths: usize,
        mc_seed: u64,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            metrics_service,
            limits,
            engine,
            notifier,
            scenarios,
            mc_paths,
            mc_seed,
            interval,
        }
    }

    /// Run every scenario against the current snapshot. Returns Ok(false)
    /// when the round was abandoned because newer state arrived.
    pub async fn run_once(&self) -> Result<bool> {
        let epoch = self.store.current_epoch();
        let portfolio = self.store.portfolio().await;
        let metrics = self.metrics_service.current().await;
        let scenarios = self.scenarios.clone();
        let mc_paths = self.mc_paths;
        let mc_seed = self.mc_seed;

        let cancel = Arc::new(AtomicBool::new(false));
        let watcher = {
            let cancel = cancel.clone();
            let mut epoch_rx = self.store.subscribe_epoch();
            tokio::spawn(async move {
                while epoch_rx.changed().await.is_ok() {
                    if *epoch_rx.borrow() != epoch {
                        cancel.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            })
        };

        let cancel_for_run = cancel.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            scenarios
                .iter()
                .map(|scenario| {
                    run_scenario(
                        scenario,
                        &portfolio,
                        &metrics,
                        mc_paths,
                        mc_seed,
                        &cancel_for_run,
                    )
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .await?;
        watcher.abort();

        let results = match outcome {
            Ok(results) => results,
            Err(_) => {
                warn!("Stress round abandoned: portfolio snapshot superseded mid-run");
                return Ok(false);
            }
        };

        for result in &results {
            info!(
                scenario = %result.scenario,
                projected_pnl = %result.projected_pnl,
                projected_return = result.projected_return,
                var_99 = result.var_99_under_scenario,
                survives = result.survives,
                "Stress scenario evaluated"
            );
        }

        let active = self.limits.get().await;
        let proposal = propose_tightening(&results, &active);
        if let Some(proposed) = &proposal {
            let alert = Alert::new(
                Severity::Warning,
                format!(
                    "Stress testing proposes tightened limits {} v{}; approval required",
                    proposed.name, proposed.version
                ),
                json!({
                    "proposal": proposed.name,
                    "version": proposed.version,
                    "active_version": active.version,
                }),
            );
            if let Err(err) = self.notifier.emit_alert(alert).await {
                warn!(error = %err, "Failed to deliver stress proposal alert");
            }
        }
        self.engine.set_stress_results(results, proposal).await;
        Ok(true)
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                warn!(error = %err, "Stress round failed");
            }
        }
    }
}
