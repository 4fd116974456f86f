//! Circuit breaker actor.
//!
//! A single task owns the breaker state; everything else talks to it through
//! commands, so transitions are serialized and cancel-all fires exactly once
//! per entry into Halted. The current state is published on a watch channel
//! for the hot authorization path.

use chrono::Utc;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tokio::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::domain::errors::EngineError;
use crate::domain::ports::{ExecutionService, NotificationService};
use crate::domain::risk::state::{CircuitBreakerState, TransitionRecord};
use crate::domain::types::{Alert, ManualCommand, Severity};
use crate::infrastructure::audit_log::{AuditLog, AuditRecord};
use crate::infrastructure::observability::EngineMetrics;

pub enum BreakerCommand {
    /// A breach opened or re-failed at the given severity
    BreachSignal {
        severity: Severity,
        cause: String,
        open_breaches: usize,
    },
    /// A breach closed; carries the remaining open count
    BreachResolved { open_breaches: usize },
    /// Operator command needing a definitive answer
    Manual {
        command: ManualCommand,
        actor: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
}

#[derive(Clone)]
pub struct CircuitBreakerHandle {
    tx: mpsc::Sender<BreakerCommand>,
    state_rx: watch::Receiver<CircuitBreakerState>,
    history: Arc<RwLock<Vec<TransitionRecord>>>,
}

impl CircuitBreakerHandle {
    /// Current state without touching the actor
    pub fn state(&self) -> CircuitBreakerState {
        *self.state_rx.borrow()
    }

    pub async fn history(&self) -> Vec<TransitionRecord> {
        self.history.read().await.clone()
    }

    pub async fn report_breach(&self, severity: Severity, cause: String, open_breaches: usize) {
        let _ = self
            .tx
            .send(BreakerCommand::BreachSignal {
                severity,
                cause,
                open_breaches,
            })
            .await;
    }

    pub async fn report_resolved(&self, open_breaches: usize) {
        let _ = self
            .tx
            .send(BreakerCommand::BreachResolved { open_breaches })
            .await;
    }

    pub async fn manual(&self, command: ManualCommand, actor: String) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BreakerCommand::Manual {
                command,
                actor,
                reply,
            })
            .await
            .map_err(|_| EngineError::TransitionConflict("breaker actor stopped".to_string()))?;
        rx.await
            .map_err(|_| EngineError::TransitionConflict("breaker actor dropped reply".to_string()))?
    }
}

/// Tuning for the breaker actor, derived from the engine configuration.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Warnings within the window that escalate Normal to Restricted
    pub warning_threshold: usize,
    pub warning_window: Duration,
    /// Minimum time spent outside Normal before a resume is accepted
    pub resume_cooldown: Duration,
    /// Whether Restricted returns to Normal on its own once all breaches
    /// have closed; when disabled an operator must resume
    pub auto_recover_restricted: bool,
}

pub struct CircuitBreaker {
    state: CircuitBreakerState,
    open_breaches: usize,
    warnings: VecDeque<Instant>,
    warning_window: Duration,
    warning_threshold: usize,
    resume_cooldown: Duration,
    auto_recover_restricted: bool,
    non_normal_since: Option<Instant>,
    execution: Arc<dyn ExecutionService>,
    notifier: Arc<dyn NotificationService>,
    audit: Arc<AuditLog>,
    observability: Arc<EngineMetrics>,
    state_tx: watch::Sender<CircuitBreakerState>,
    history: Arc<RwLock<Vec<TransitionRecord>>>,
}

impl CircuitBreaker {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        initial_state: CircuitBreakerState,
        initial_open_breaches: usize,
        config: BreakerConfig,
        execution: Arc<dyn ExecutionService>,
        notifier: Arc<dyn NotificationService>,
        audit: Arc<AuditLog>,
        observability: Arc<EngineMetrics>,
    ) -> CircuitBreakerHandle {
        let (tx, mut rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(initial_state);
        let history = Arc::new(RwLock::new(Vec::new()));

        observability.set_breaker_state(initial_state);
        if initial_state != CircuitBreakerState::Normal {
            warn!(state = %initial_state, "Breaker restored to non-normal state from audit trail");
        }

        let mut actor = CircuitBreaker {
            state: initial_state,
            open_breaches: initial_open_breaches,
            warnings: VecDeque::new(),
            warning_window: config.warning_window,
            warning_threshold: config.warning_threshold.max(1),
            resume_cooldown: config.resume_cooldown,
            auto_recover_restricted: config.auto_recover_restricted,
            non_normal_since: if initial_state != CircuitBreakerState::Normal {
                Some(Instant::now())
            } else {
                None
            },
            execution,
            notifier,
            audit,
            observability,
            state_tx,
            history: history.clone(),
        };

        let handle = CircuitBreakerHandle {
            tx,
            state_rx,
            history,
        };

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                actor.handle(command).await;
            }
            info!("Circuit breaker actor stopped");
        });

        handle
    }

    async fn handle(&mut self, command: BreakerCommand) {
        match command {
            BreakerCommand::BreachSignal {
                severity,
                cause,
                open_breaches,
            } => {
                self.open_breaches = open_breaches;
                self.on_breach(severity, &cause).await;
            }
            BreakerCommand::BreachResolved { open_breaches } => {
                self.open_breaches = open_breaches;
                self.on_resolved().await;
            }
            BreakerCommand::Manual {
                command,
                actor,
                reply,
            } => {
                let result = self.on_manual(command, &actor).await;
                let _ = reply.send(result);
            }
        }
    }

    async fn on_breach(&mut self, severity: Severity, cause: &str) {
        match severity {
            Severity::Warning => {
                let now = Instant::now();
                self.warnings.push_back(now);
                while let Some(front) = self.warnings.front() {
                    if now.duration_since(*front) > self.warning_window {
                        self.warnings.pop_front();
                    } else {
                        break;
                    }
                }
                if self.warnings.len() >= self.warning_threshold
                    && self.state == CircuitBreakerState::Normal
                {
                    let count = self.warnings.len();
                    self.warnings.clear();
                    self.transition(
                        CircuitBreakerState::Restricted,
                        &format!("{count} warnings within window; latest: {cause}"),
                        "system",
                    )
                    .await;
                }
            }
            Severity::Breach => {
                if self.state == CircuitBreakerState::Normal {
                    self.transition(CircuitBreakerState::Restricted, cause, "system").await;
                }
            }
            Severity::Critical => {
                // One notch per signal; repeated critical failures walk the
                // ladder to Halted, never past it
                let target = self.state.escalated();
                if target != self.state {
                    self.transition(target, cause, "system").await;
                }
            }
        }
    }

    async fn on_resolved(&mut self) {
        // Restricted recovers on its own once the book is clean, if so
        // configured. Halted always stays until an operator resumes.
        if self.auto_recover_restricted
            && self.open_breaches == 0
            && self.state == CircuitBreakerState::Restricted
        {
            self.transition(CircuitBreakerState::Normal, "all breaches resolved", "system")
                .await;
        }
    }

    async fn on_manual(&mut self, command: ManualCommand, actor: &str) -> Result<(), EngineError> {
        match command {
            ManualCommand::Resume => self.on_resume(actor).await,
            ManualCommand::EmergencyStop => self.on_emergency_stop(actor).await,
            ManualCommand::Liquidate => self.on_liquidate(actor).await,
            other => Err(EngineError::OverrideDenied(format!(
                "{other} is not a breaker command"
            ))),
        }
    }

    async fn on_resume(&mut self, actor: &str) -> Result<(), EngineError> {
        if self.state == CircuitBreakerState::Normal {
            return Err(EngineError::TransitionConflict(
                "already in normal state".to_string(),
            ));
        }
        if self.open_breaches > 0 {
            return Err(EngineError::OverrideDenied(format!(
                "{} breaches still open",
                self.open_breaches
            )));
        }
        let elapsed = self
            .non_normal_since
            .map(|at| at.elapsed())
            .unwrap_or(Duration::MAX);
        if elapsed < self.resume_cooldown {
            return Err(EngineError::OverrideDenied(format!(
                "cooldown not elapsed: {}s of {}s",
                elapsed.as_secs(),
                self.resume_cooldown.as_secs()
            )));
        }
        self.transition(CircuitBreakerState::Normal, "manual resume", actor).await;
        Ok(())
    }

    async fn on_emergency_stop(&mut self, actor: &str) -> Result<(), EngineError> {
        if self.state >= CircuitBreakerState::Halted {
            return Err(EngineError::TransitionConflict(format!(
                "already {}",
                self.state
            )));
        }
        // Walk the ladder rather than skipping states
        while self.state < CircuitBreakerState::Halted {
            let target = self.state.escalated();
            self.transition(target, "manual emergency stop", actor).await;
        }
        Ok(())
    }

    async fn on_liquidate(&mut self, actor: &str) -> Result<(), EngineError> {
        if self.state != CircuitBreakerState::Halted {
            return Err(EngineError::OverrideDenied(format!(
                "liquidation requires halted state, breaker is {}",
                self.state
            )));
        }
        self.transition(
            CircuitBreakerState::EmergencyLiquidation,
            "manual liquidation",
            actor,
        )
        .await;
        if let Err(err) = self.execution.request_emergency_liquidation("all").await {
            error!(error = %err, "Emergency liquidation request failed");
        }
        Ok(())
    }

    async fn transition(&mut self, target: CircuitBreakerState, cause: &str, actor: &str) {
        if !self.state.can_transition_to(target) {
            error!(from = %self.state, to = %target, "Illegal breaker transition suppressed");
            return;
        }
        let record = TransitionRecord {
            from_state: self.state,
            to_state: target,
            cause: cause.to_string(),
            timestamp: Utc::now(),
            actor: actor.to_string(),
        };
        warn!(from = %record.from_state, to = %record.to_state, cause, actor, "Breaker transition");

        self.state = target;
        let _ = self.state_tx.send(target);
        self.observability.set_breaker_state(target);
        self.observability.inc_transition(target);
        self.history.write().await.push(record.clone());

        if let Err(err) = self.audit.append(&AuditRecord::Transition { record }).await {
            error!(error = %err, "Failed to audit breaker transition");
        }

        let severity = if target == CircuitBreakerState::Normal {
            Severity::Warning
        } else {
            Severity::Critical
        };
        let alert = Alert::new(
            severity,
            format!("Circuit breaker now {target}"),
            json!({ "cause": cause, "actor": actor }),
        );
        if let Err(err) = self.notifier.emit_alert(alert).await {
            error!(error = %err, "Failed to deliver breaker alert");
        }

        // Entering Halted cancels open orders, exactly once per entry
        if target == CircuitBreakerState::Halted {
            if let Err(err) = self.execution.request_cancel_all_orders("all").await {
                error!(error = %err, "Cancel-all request failed on halt");
            }
        }
        if target == CircuitBreakerState::Normal {
            self.non_normal_since = None;
            self.warnings.clear();
        } else {
            // Every restriction or escalation restarts the resume cooldown
            self.non_normal_since = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    use crate::infrastructure::mock::{MockExecutionService, MockNotifier};

    struct Fixture {
        handle: CircuitBreakerHandle,
        execution: Arc<MockExecutionService>,
        notifier: Arc<MockNotifier>,
    }

    fn config(cooldown: Duration) -> BreakerConfig {
        BreakerConfig {
            warning_threshold: 5,
            warning_window: Duration::from_secs(300),
            resume_cooldown: cooldown,
            auto_recover_restricted: true,
        }
    }

    fn fixture(initial: CircuitBreakerState, cooldown: Duration) -> Fixture {
        fixture_with(initial, config(cooldown))
    }

    fn fixture_with(initial: CircuitBreakerState, config: BreakerConfig) -> Fixture {
        let execution = MockExecutionService::new();
        let notifier = MockNotifier::new();
        let audit = Arc::new(
            AuditLog::open(std::env::temp_dir().join(format!("breaker-{}.jsonl", Uuid::new_v4())))
                .unwrap(),
        );
        let handle = CircuitBreaker::spawn(
            initial,
            0,
            config,
            execution.clone(),
            notifier.clone(),
            audit,
            Arc::new(EngineMetrics::new_unregistered()),
        );
        Fixture {
            handle,
            execution,
            notifier,
        }
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn test_critical_breaches_walk_the_ladder() {
        let f = fixture(CircuitBreakerState::Normal, Duration::ZERO);

        f.handle.report_breach(Severity::Critical, "var ceiling".to_string(), 1).await;
        settle().await;
        assert_eq!(f.handle.state(), CircuitBreakerState::Restricted);

        f.handle.report_breach(Severity::Critical, "var ceiling".to_string(), 1).await;
        settle().await;
        assert_eq!(f.handle.state(), CircuitBreakerState::Halted);

        // A third critical cannot push past Halted
        f.handle.report_breach(Severity::Critical, "var ceiling".to_string(), 1).await;
        settle().await;
        assert_eq!(f.handle.state(), CircuitBreakerState::Halted);
        assert_eq!(f.execution.liquidation_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all_fires_once_per_halt() {
        let f = fixture(CircuitBreakerState::Normal, Duration::ZERO);

        f.handle.report_breach(Severity::Critical, "dd".to_string(), 1).await;
        f.handle.report_breach(Severity::Critical, "dd".to_string(), 1).await;
        f.handle.report_breach(Severity::Critical, "dd".to_string(), 1).await;
        settle().await;

        assert_eq!(f.handle.state(), CircuitBreakerState::Halted);
        assert_eq!(f.execution.cancel_all_count(), 1);
    }

    #[tokio::test]
    async fn test_warning_accumulation_restricts() {
        let f = fixture(CircuitBreakerState::Normal, Duration::ZERO);

        for _ in 0..4 {
            f.handle.report_breach(Severity::Warning, "near leverage".to_string(), 0).await;
        }
        settle().await;
        assert_eq!(f.handle.state(), CircuitBreakerState::Normal);

        f.handle.report_breach(Severity::Warning, "near leverage".to_string(), 0).await;
        settle().await;
        assert_eq!(f.handle.state(), CircuitBreakerState::Restricted);
    }

    #[tokio::test]
    async fn test_restricted_auto_recovers_when_clean() {
        let f = fixture(CircuitBreakerState::Normal, Duration::ZERO);

        f.handle.report_breach(Severity::Breach, "leverage".to_string(), 1).await;
        settle().await;
        assert_eq!(f.handle.state(), CircuitBreakerState::Restricted);

        f.handle.report_resolved(0).await;
        settle().await;
        assert_eq!(f.handle.state(), CircuitBreakerState::Normal);
    }

    #[tokio::test]
    async fn test_auto_recovery_can_be_disabled() {
        let f = fixture_with(
            CircuitBreakerState::Normal,
            BreakerConfig {
                auto_recover_restricted: false,
                ..config(Duration::ZERO)
            },
        );

        f.handle.report_breach(Severity::Breach, "leverage".to_string(), 1).await;
        settle().await;
        assert_eq!(f.handle.state(), CircuitBreakerState::Restricted);

        // Clean book alone does not recover; an operator has to resume
        f.handle.report_resolved(0).await;
        settle().await;
        assert_eq!(f.handle.state(), CircuitBreakerState::Restricted);

        f.handle.manual(ManualCommand::Resume, "ops".to_string()).await.unwrap();
        assert_eq!(f.handle.state(), CircuitBreakerState::Normal);
    }

    #[tokio::test]
    async fn test_restricted_resume_respects_cooldown() {
        let f = fixture_with(
            CircuitBreakerState::Normal,
            BreakerConfig {
                auto_recover_restricted: false,
                ..config(Duration::from_secs(300))
            },
        );

        f.handle.report_breach(Severity::Breach, "leverage".to_string(), 1).await;
        f.handle.report_resolved(0).await;
        settle().await;
        assert_eq!(f.handle.state(), CircuitBreakerState::Restricted);

        let denied = f.handle.manual(ManualCommand::Resume, "ops".to_string()).await;
        assert!(matches!(denied, Err(EngineError::OverrideDenied(_))));
        assert_eq!(f.handle.state(), CircuitBreakerState::Restricted);
    }

    #[tokio::test]
    async fn test_halted_requires_manual_resume() {
        let f = fixture(CircuitBreakerState::Normal, Duration::ZERO);

        f.handle.report_breach(Severity::Critical, "dd".to_string(), 1).await;
        f.handle.report_breach(Severity::Critical, "dd".to_string(), 1).await;
        settle().await;
        assert_eq!(f.handle.state(), CircuitBreakerState::Halted);

        // Breaches clearing does not resume from Halted
        f.handle.report_resolved(0).await;
        settle().await;
        assert_eq!(f.handle.state(), CircuitBreakerState::Halted);

        f.handle.manual(ManualCommand::Resume, "ops".to_string()).await.unwrap();
        assert_eq!(f.handle.state(), CircuitBreakerState::Normal);
    }

    #[tokio::test]
    async fn test_resume_denied_with_open_breaches_or_cooldown() {
        let f = fixture(CircuitBreakerState::Normal, Duration::from_secs(300));

        f.handle.report_breach(Severity::Critical, "dd".to_string(), 1).await;
        f.handle.report_breach(Severity::Critical, "dd".to_string(), 1).await;
        settle().await;

        let denied = f.handle.manual(ManualCommand::Resume, "ops".to_string()).await;
        assert!(matches!(denied, Err(EngineError::OverrideDenied(_))));

        // Breaches clear but the cooldown has not elapsed
        f.handle.report_resolved(0).await;
        settle().await;
        let denied = f.handle.manual(ManualCommand::Resume, "ops".to_string()).await;
        assert!(matches!(denied, Err(EngineError::OverrideDenied(_))));
    }

    #[tokio::test]
    async fn test_liquidation_only_from_halted_and_only_manually() {
        let f = fixture(CircuitBreakerState::Normal, Duration::ZERO);

        let denied = f.handle.manual(ManualCommand::Liquidate, "ops".to_string()).await;
        assert!(matches!(denied, Err(EngineError::OverrideDenied(_))));
        assert_eq!(f.execution.liquidation_count(), 0);

        f.handle.manual(ManualCommand::EmergencyStop, "ops".to_string()).await.unwrap();
        assert_eq!(f.handle.state(), CircuitBreakerState::Halted);

        f.handle.manual(ManualCommand::Liquidate, "ops".to_string()).await.unwrap();
        assert_eq!(f.handle.state(), CircuitBreakerState::EmergencyLiquidation);
        assert_eq!(f.execution.liquidation_count(), 1);
    }

    #[tokio::test]
    async fn test_emergency_stop_records_stepwise_transitions() {
        let f = fixture(CircuitBreakerState::Normal, Duration::ZERO);
        f.handle.manual(ManualCommand::EmergencyStop, "ops".to_string()).await.unwrap();

        let history = f.handle.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].to_state, CircuitBreakerState::Restricted);
        assert_eq!(history[1].to_state, CircuitBreakerState::Halted);
        assert!(history.iter().all(|r| r.actor == "ops"));

        let alerts = f.notifier.alerts().await;
        assert_eq!(alerts.len(), 2);
    }
}
