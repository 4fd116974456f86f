//! In-memory collaborators for tests and dry runs.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::info;

use crate::domain::ports::{ExecutionService, NotificationService};
use crate::domain::types::Alert;

/// Execution adapter that records requests instead of sending them
#[derive(Default)]
pub struct MockExecutionService {
    cancel_all_calls: AtomicUsize,
    liquidation_calls: AtomicUsize,
}

impl MockExecutionService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn cancel_all_count(&self) -> usize {
        self.cancel_all_calls.load(Ordering::SeqCst)
    }

    pub fn liquidation_count(&self) -> usize {
        self.liquidation_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionService for MockExecutionService {
    async fn request_cancel_all_orders(&self, scope: &str) -> Result<()> {
        self.cancel_all_calls.fetch_add(1, Ordering::SeqCst);
        info!(scope, "Mock: cancel-all requested");
        Ok(())
    }

    async fn request_emergency_liquidation(&self, scope: &str) -> Result<()> {
        self.liquidation_calls.fetch_add(1, Ordering::SeqCst);
        info!(scope, "Mock: emergency liquidation requested");
        Ok(())
    }
}

/// Notification sink that collects alerts for inspection
#[derive(Default)]
pub struct MockNotifier {
    alerts: Mutex<Vec<Alert>>,
}

impl MockNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().await.clone()
    }
}

#[async_trait]
impl NotificationService for MockNotifier {
    async fn emit_alert(&self, alert: Alert) -> Result<()> {
        self.alerts.lock().await.push(alert);
        Ok(())
    }
}
