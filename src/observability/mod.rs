//! Observability
//!
//! Audit events and per-registry counters.

pub mod audit;
pub mod metrics;
