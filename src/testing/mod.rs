//! Testing infrastructure
//!
//! Concurrency proofs reused by unit tests, integration tests and benches.

pub mod race_proof;

pub use race_proof::*;
