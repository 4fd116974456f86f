//! Alert delivery. The domain emits abstract `Alert` values; this module
//! routes them to the configured sink. The default sink writes structured
//! log lines, which the log pipeline forwards to paging.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::domain::ports::NotificationService;
use crate::domain::types::{Alert, Severity};

/// Notification sink that emits alerts as structured tracing events
pub struct TracingNotifier;

#[async_trait]
impl NotificationService for TracingNotifier {
    async fn emit_alert(&self, alert: Alert) -> Result<()> {
        match alert.severity {
            Severity::Warning => {
                warn!(context = %alert.context, "ALERT: {}", alert.message);
            }
            Severity::Breach => {
                error!(context = %alert.context, "ALERT: {}", alert.message);
            }
            Severity::Critical => {
                error!(context = %alert.context, "CRITICAL ALERT: {}", alert.message);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_tracing_notifier_accepts_all_severities() {
        let notifier = TracingNotifier;
        for severity in [Severity::Warning, Severity::Breach, Severity::Critical] {
            let alert = Alert::new(severity, "test alert", json!({"limit": "max_leverage"}));
            assert!(notifier.emit_alert(alert).await.is_ok());
        }
        info!("done");
    }
}
