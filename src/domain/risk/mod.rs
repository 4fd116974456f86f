// Risk domain: limits, metrics, sizing, breach lifecycle, breaker states,
// stress scenarios
pub mod breach;
pub mod limits;
pub mod metrics;
pub mod sizing;
pub mod state;
pub mod stress;
