//! Append-only JSONL audit trail.
//!
//! Every breach lifecycle event, breaker transition, sizing decision, and
//! limit reload is appended as one JSON object per line. On startup the file
//! is replayed to restore open breaches and the last breaker state, so a
//! crash cannot silently reset the engine to Normal.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::risk::breach::BreachEvent;
use crate::domain::risk::state::{CircuitBreakerState, TransitionRecord};
use crate::domain::types::SizingDecision;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditRecord {
    BreachOpened {
        event: BreachEvent,
    },
    BreachClosed {
        event: BreachEvent,
    },
    Transition {
        record: TransitionRecord,
    },
    Decision {
        symbol: String,
        decision: SizingDecision,
    },
    LimitsReloaded {
        name: String,
        version: u32,
        timestamp: DateTime<Utc>,
    },
}

/// State recovered from replaying the audit trail
#[derive(Debug, Default)]
pub struct RecoveredState {
    pub open_breaches: Vec<BreachEvent>,
    pub last_state: Option<CircuitBreakerState>,
}

pub struct AuditLog {
    path: PathBuf,
    writer: Mutex<File>,
}

impl AuditLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create audit directory {}", parent.display()))?;
            }
        }
        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open audit log {}", path.display()))?;
        info!(path = %path.display(), "Audit log opened");
        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    pub async fn append(&self, record: &AuditRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("Failed to serialize audit record")?;
        let mut writer = self.writer.lock().await;
        writeln!(writer, "{line}").context("Failed to append audit record")?;
        writer.flush().context("Failed to flush audit log")?;
        Ok(())
    }

    /// Replay the trail from disk. Malformed lines are skipped with a
    /// warning; a torn final line from a crash must not block startup.
    pub fn replay(&self) -> Result<RecoveredState> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to read audit log {}", self.path.display()))?;
        let reader = BufReader::new(file);

        let mut recovered = RecoveredState::default();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.context("Failed to read audit log line")?;
            if line.trim().is_empty() {
                continue;
            }
            let record: AuditRecord = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(err) => {
                    warn!(line = line_no + 1, error = %err, "Skipping malformed audit record");
                    continue;
                }
            };
            match record {
                AuditRecord::BreachOpened { event } => recovered.open_breaches.push(event),
                AuditRecord::BreachClosed { event } => {
                    recovered.open_breaches.retain(|open| open.id != event.id);
                }
                AuditRecord::Transition { record } => {
                    recovered.last_state = Some(record.to_state);
                }
                AuditRecord::Decision { .. } | AuditRecord::LimitsReloaded { .. } => {}
            }
        }

        info!(
            open_breaches = recovered.open_breaches.len(),
            last_state = ?recovered.last_state,
            "Audit log replayed"
        );
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::domain::types::Severity;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("audit-{}.jsonl", Uuid::new_v4()))
    }

    fn breach(limit: &str) -> BreachEvent {
        BreachEvent {
            id: Uuid::new_v4(),
            limit_name: limit.to_string(),
            observed_value: 0.07,
            threshold: 0.05,
            severity: Severity::Breach,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    #[tokio::test]
    async fn test_replay_restores_open_breaches() {
        let path = temp_path();
        let log = AuditLog::open(&path).unwrap();

        let survives = breach("max_drawdown");
        let mut closes = breach("max_leverage");

        log.append(&AuditRecord::BreachOpened { event: survives.clone() }).await.unwrap();
        log.append(&AuditRecord::BreachOpened { event: closes.clone() }).await.unwrap();
        closes.closed_at = Some(Utc::now());
        log.append(&AuditRecord::BreachClosed { event: closes }).await.unwrap();

        let recovered = log.replay().unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(recovered.open_breaches.len(), 1);
        assert_eq!(recovered.open_breaches[0].id, survives.id);
    }

    #[tokio::test]
    async fn test_replay_restores_last_breaker_state() {
        let path = temp_path();
        let log = AuditLog::open(&path).unwrap();

        for (from, to) in [
            (CircuitBreakerState::Normal, CircuitBreakerState::Restricted),
            (CircuitBreakerState::Restricted, CircuitBreakerState::Halted),
        ] {
            log.append(&AuditRecord::Transition {
                record: TransitionRecord {
                    from_state: from,
                    to_state: to,
                    cause: "test".to_string(),
                    timestamp: Utc::now(),
                    actor: "system".to_string(),
                },
            })
            .await
            .unwrap();
        }

        let recovered = log.replay().unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(recovered.last_state, Some(CircuitBreakerState::Halted));
    }

    #[tokio::test]
    async fn test_torn_final_line_is_skipped() {
        let path = temp_path();
        let log = AuditLog::open(&path).unwrap();
        log.append(&AuditRecord::BreachOpened { event: breach("daily_var") }).await.unwrap();

        // Simulate a crash mid-write
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            write!(file, "{{\"kind\":\"breach_opened\",\"eve").unwrap();
        }

        let recovered = log.replay().unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(recovered.open_breaches.len(), 1);
    }
}
