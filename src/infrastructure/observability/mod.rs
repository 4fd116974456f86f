//! Push-based observability: Prometheus metrics rendered on demand and
//! structured JSON logs. The engine only sends data, it never accepts
//! requests.

pub mod metrics;

pub use metrics::{EngineMetrics, LatencyTimer};
