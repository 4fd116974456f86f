//! Periodic recomputation of risk metrics with a hard wall-clock budget.
//!
//! The computation itself is CPU-bound and runs on the blocking pool; if it
//! overruns its budget the service degrades to the cached metrics flagged
//! stale rather than stalling the evaluation loop. With no cache available
//! the punitive conservative defaults apply, so the engine fails safe.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{error, warn};

use crate::application::snapshot_store::SnapshotStore;
use crate::domain::errors::MetricError;
use crate::domain::risk::metrics::{self, MetricsConfig, RiskMetrics};
use crate::infrastructure::observability::EngineMetrics;

pub struct MetricsService {
    store: Arc<SnapshotStore>,
    config: MetricsConfig,
    budget: Duration,
    cached: RwLock<Option<Arc<RiskMetrics>>>,
    observability: Arc<EngineMetrics>,
}

impl MetricsService {
    pub fn new(
        store: Arc<SnapshotStore>,
        config: MetricsConfig,
        budget_ms: u64,
        observability: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            store,
            config,
            budget: Duration::from_millis(budget_ms),
            cached: RwLock::new(None),
            observability,
        }
    }

    /// Latest known metrics; conservative defaults before the first
    /// successful computation.
    pub async fn current(&self) -> Arc<RiskMetrics> {
        if let Some(metrics) = self.cached.read().await.as_ref() {
            return metrics.clone();
        }
        // Stamp with the snapshot time, not the wall clock, so repeated
        // reads without an intervening publish stay byte-identical
        let portfolio = self.store.portfolio().await;
        Arc::new(RiskMetrics::conservative(
            portfolio.timestamp,
            self.config.confidence,
        ))
    }

    /// Recompute from the latest snapshots and refresh the cache.
    pub async fn recompute(&self) -> Arc<RiskMetrics> {
        let portfolio = self.store.portfolio().await;
        let market = self.store.market().await;
        let hwm = self.store.high_water_mark().await;
        let config = self.config.clone();

        let timer = self.observability.metric_latency_timer();
        let handle = tokio::task::spawn_blocking(move || {
            metrics::compute_metrics(&portfolio, &market, hwm, &config)
        });

        let outcome = timeout(self.budget, handle).await;
        drop(timer);

        let fresh = match outcome {
            Ok(Ok(Ok(metrics))) => metrics,
            Ok(Ok(Err(err @ MetricError::InsufficientData { .. }))) => {
                warn!(error = %err, "Metric computation degraded, substituting conservative values");
                self.observability.inc_metric_failures();
                return self.degrade().await;
            }
            Ok(Ok(Err(err))) => {
                error!(error = %err, "Metric computation failed");
                self.observability.inc_metric_failures();
                return self.degrade().await;
            }
            Ok(Err(join_err)) => {
                error!(error = %join_err, "Metric computation task panicked");
                self.observability.inc_metric_failures();
                return self.degrade().await;
            }
            Err(_) => {
                warn!(budget_ms = self.budget.as_millis() as u64, "Metric computation exceeded budget");
                self.observability.inc_metric_timeouts();
                return self.degrade().await;
            }
        };

        // Degraded-but-computable results merge with the cache so a brief
        // data gap cannot make the book look safer than it was.
        let merged = if fresh.insufficient_data {
            match self.cached.read().await.as_ref() {
                Some(cached) => fresh.worst_of(cached),
                None => fresh,
            }
        } else {
            fresh
        };

        self.observability.observe_risk_metrics(&merged);
        let shared = Arc::new(merged);
        *self.cached.write().await = Some(shared.clone());
        shared
    }

    /// Fallback when nothing fresh is computable: cached metrics flagged
    /// stale, or the conservative defaults.
    async fn degrade(&self) -> Arc<RiskMetrics> {
        let mut guard = self.cached.write().await;
        let degraded = match guard.as_ref() {
            Some(cached) => {
                let mut stale = (**cached).clone();
                stale.stale = true;
                Arc::new(stale)
            }
            None => Arc::new(RiskMetrics::conservative(
                chrono::Utc::now(),
                self.config.confidence,
            )),
        };
        *guard = Some(degraded.clone());
        degraded
    }
}
