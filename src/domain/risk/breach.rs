use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::types::Severity;

/// A single limit excursion, from first crossing to confirmed recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreachEvent {
    pub id: Uuid,
    pub limit_name: String,
    pub observed_value: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl BreachEvent {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}

/// Tolerance for band comparisons. Division noise must not demote a reading
/// sitting exactly on a band edge (0.075 / 0.05 = 1.4999...), and rounding
/// up at the edge errs on the severe side.
const BAND_TOLERANCE: f64 = 1e-9;

/// Classify an observation against a threshold with graded severity.
/// `warning_ratio` and `critical_ratio` are multiples of the threshold;
/// values below the warning band yield None.
pub fn classify(
    observed: f64,
    threshold: f64,
    warning_ratio: f64,
    critical_ratio: f64,
) -> Option<Severity> {
    if threshold <= 0.0 {
        return None;
    }
    let ratio = observed / threshold + BAND_TOLERANCE;
    if ratio >= critical_ratio {
        Some(Severity::Critical)
    } else if ratio >= 1.0 {
        Some(Severity::Breach)
    } else if ratio >= warning_ratio {
        Some(Severity::Warning)
    } else {
        None
    }
}

/// What a tracker observed on this evaluation cycle
#[derive(Debug, Clone)]
pub enum TrackerUpdate {
    /// A new breach opened (first failing check)
    Opened(BreachEvent),
    /// An already-open breach failed again, possibly at a new severity
    StillFailing(BreachEvent),
    /// The breach closed after enough consecutive passing checks
    Closed(BreachEvent),
}

/// Per-limit breach lifecycle with closing hysteresis.
///
/// A breach opens on the first failing check but only closes after
/// `required_passes` consecutive passing checks, so a value oscillating
/// around a threshold cannot flap alerts or breaker transitions.
#[derive(Debug, Clone)]
pub struct LimitTracker {
    limit_name: String,
    required_passes: u32,
    consecutive_passes: u32,
    open: Option<BreachEvent>,
}

impl LimitTracker {
    pub fn new(limit_name: impl Into<String>, required_passes: u32) -> Self {
        Self {
            limit_name: limit_name.into(),
            required_passes: required_passes.max(1),
            consecutive_passes: 0,
            open: None,
        }
    }

    pub fn limit_name(&self) -> &str {
        &self.limit_name
    }

    pub fn open_event(&self) -> Option<&BreachEvent> {
        self.open.as_ref()
    }

    /// Reinstall a previously-open breach, keeping its identity. Used when
    /// replaying the audit trail after a restart; the restored event then
    /// closes through the ordinary hysteresis path.
    pub fn restore(&mut self, event: BreachEvent) {
        self.consecutive_passes = 0;
        self.open = Some(event);
    }

    /// Feed one evaluation result. `severity` is None when the check passed.
    pub fn observe(
        &mut self,
        observed: f64,
        threshold: f64,
        severity: Option<Severity>,
        now: DateTime<Utc>,
    ) -> Option<TrackerUpdate> {
        match severity {
            Some(sev) => {
                self.consecutive_passes = 0;
                if let Some(event) = self.open.as_mut() {
                    // Severity only ratchets up while the breach stays open
                    if sev > event.severity {
                        event.severity = sev;
                    }
                    event.observed_value = observed;
                    event.threshold = threshold;
                    return Some(TrackerUpdate::StillFailing(event.clone()));
                }
                let event = BreachEvent {
                    id: Uuid::new_v4(),
                    limit_name: self.limit_name.clone(),
                    observed_value: observed,
                    threshold,
                    severity: sev,
                    opened_at: now,
                    closed_at: None,
                };
                self.open = Some(event.clone());
                Some(TrackerUpdate::Opened(event))
            }
            None => {
                self.open.as_ref()?;
                self.consecutive_passes += 1;
                if self.consecutive_passes >= self.required_passes {
                    let mut event = self.open.take()?;
                    event.closed_at = Some(now);
                    self.consecutive_passes = 0;
                    Some(TrackerUpdate::Closed(event))
                } else {
                    None
                }
            }
        }
    }
}
