//! Restart behavior: the breaker state survives a crash by replaying the
//! audit trail, so a restart never silently resumes halted trading.

use chrono::Utc;
use rust_decimal_macros::dec;
use uuid::Uuid;

use rustrisk::application::system::Application;
use rustrisk::config::EngineConfig;
use rustrisk::domain::portfolio::PortfolioSnapshot;
use rustrisk::domain::risk::limits::RiskLimitSet;
use rustrisk::domain::risk::state::CircuitBreakerState;
use rustrisk::domain::types::{ManualCommand, OrderSide, TradeProposal};
use rustrisk::infrastructure::audit_log::AuditLog;
use rustrisk::infrastructure::mock::{MockExecutionService, MockNotifier};

fn config_with_audit(path: &str) -> EngineConfig {
    EngineConfig {
        audit_log_path: path.to_string(),
        resume_cooldown_secs: 0,
        ..EngineConfig::default()
    }
}

async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
}

fn build_app(audit_path: &str) -> Application {
    Application::build(
        config_with_audit(audit_path),
        RiskLimitSet::default(),
        PortfolioSnapshot::all_cash(Utc::now(), dec!(100000)),
        MockExecutionService::new(),
        MockNotifier::new(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_halt_survives_restart() {
    let audit_path = std::env::temp_dir()
        .join(format!("recovery-{}.jsonl", Uuid::new_v4()))
        .to_string_lossy()
        .into_owned();

    {
        let app = build_app(&audit_path);
        app.engine
            .manual_override(ManualCommand::EmergencyStop, "ops")
            .await
            .unwrap();
        assert_eq!(
            app.engine.current_report().await.breaker_state,
            CircuitBreakerState::Halted
        );
    }

    // Fresh process, same trail: still halted, orders still refused
    let app = build_app(&audit_path);
    assert_eq!(
        app.engine.current_report().await.breaker_state,
        CircuitBreakerState::Halted
    );

    let proposal = TradeProposal {
        symbol: "BTC/USDT".to_string(),
        side: OrderSide::Buy,
        requested_quantity: dec!(0.01),
        requested_price: Some(dec!(40000)),
        timestamp: Utc::now().timestamp_millis(),
    };
    assert!(app.engine.submit_trade_proposal(proposal).await.is_err());

    // Manual resume still works after the restart
    app.engine.manual_override(ManualCommand::Resume, "ops").await.unwrap();
    assert_eq!(
        app.engine.current_report().await.breaker_state,
        CircuitBreakerState::Normal
    );

    std::fs::remove_file(&audit_path).ok();
}

#[tokio::test]
async fn test_recovered_breach_closes_and_resume_succeeds() {
    let audit_path = std::env::temp_dir()
        .join(format!("recovery-{}.jsonl", Uuid::new_v4()))
        .to_string_lossy()
        .into_owned();

    let breach_id;
    {
        let app = build_app(&audit_path);
        // 12% daily loss is critical twice over; two cycles walk the
        // breaker to Halted with the daily-loss breach open
        app.store
            .update_portfolio(PortfolioSnapshot::all_cash(Utc::now(), dec!(88000)))
            .await;
        app.monitor.evaluate_once().await;
        app.monitor.evaluate_once().await;
        settle().await;
        assert_eq!(
            app.engine.current_report().await.breaker_state,
            CircuitBreakerState::Halted
        );
        let open = app.monitor.open_breaches().await;
        assert_eq!(open.len(), 1);
        breach_id = open[0].id;
    }

    // Fresh process, clean book: the replayed breach is live again under
    // its original identity and still blocks a resume
    let app = build_app(&audit_path);
    let restored = app.monitor.open_breaches().await;
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].id, breach_id);
    assert!(
        app.engine
            .manual_override(ManualCommand::Resume, "ops")
            .await
            .is_err()
    );

    // The breaching condition is gone, so ordinary hysteresis closes it
    for _ in 0..3 {
        app.monitor.evaluate_once().await;
    }
    settle().await;
    assert!(app.monitor.open_breaches().await.is_empty());

    app.engine.manual_override(ManualCommand::Resume, "ops").await.unwrap();
    assert_eq!(
        app.engine.current_report().await.breaker_state,
        CircuitBreakerState::Normal
    );

    // The close reached the trail: another replay finds nothing open
    let replayed = AuditLog::open(&audit_path).unwrap().replay().unwrap();
    assert!(replayed.open_breaches.is_empty());

    std::fs::remove_file(&audit_path).ok();
}

#[tokio::test]
async fn test_clean_shutdown_restarts_normal() {
    let audit_path = std::env::temp_dir()
        .join(format!("recovery-{}.jsonl", Uuid::new_v4()))
        .to_string_lossy()
        .into_owned();

    {
        let app = build_app(&audit_path);
        app.engine
            .manual_override(ManualCommand::EmergencyStop, "ops")
            .await
            .unwrap();
        app.engine.manual_override(ManualCommand::Resume, "ops").await.unwrap();
    }

    let app = build_app(&audit_path);
    assert_eq!(
        app.engine.current_report().await.breaker_state,
        CircuitBreakerState::Normal
    );
    std::fs::remove_file(&audit_path).ok();
}
