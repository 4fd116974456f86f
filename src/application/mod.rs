//! Application services: snapshot intake, metric recomputation, limit
//! monitoring, the circuit breaker actor, stress testing, and the engine
//! facade that ties them together.

pub mod circuit_breaker;
pub mod engine;
pub mod limit_monitor;
pub mod metrics_service;
pub mod report;
pub mod snapshot_store;
pub mod stress_runner;
pub mod system;
