use crate::domain::types::Alert;
use anyhow::Result;
use async_trait::async_trait;

/// Outbound port to the order-execution collaborator. The engine only ever
/// requests protective actions; it never places orders itself.
#[async_trait]
pub trait ExecutionService: Send + Sync {
    async fn request_cancel_all_orders(&self, scope: &str) -> Result<()>;
    async fn request_emergency_liquidation(&self, scope: &str) -> Result<()>;
}

/// Outbound port to the notification collaborator. Receives abstract alerts;
/// channel-specific formatting happens elsewhere.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn emit_alert(&self, alert: Alert) -> Result<()>;
}
