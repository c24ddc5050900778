//! Configuration and shared types
//!
//! Error taxonomy, record types, limits, and the JSON configuration file.

pub mod config;
pub mod types;
