//! Adapters behind the domain ports: audit persistence, alert delivery,
//! metrics export, and in-memory mocks.

pub mod alerts;
pub mod audit_log;
pub mod mock;
pub mod observability;
