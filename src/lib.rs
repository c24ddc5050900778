//! shroud: In-memory concealment registries
//! Records which paths, mounts, stat metadata and identity fields callers
//! should see differently, and tags live objects so query paths can decide
//! with a flag test
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::device`]: Legacy packed device-number codec (old/new/huge)
//! - [`kernel::object`]: Object tagging bridge over an injected object store
//! - [`kernel::mount`]: Mount detach primitive (`umount2(2)`)
//! - [`kernel::uts`]: Real system identity (`uname(2)`)
//!
//! ## Registries ([`registry`])
//! - [`registry::path`]: Path concealment with a lock-free reverse index
//! - [`registry::mount`]: Mount concealment
//! - [`registry::kstat`]: Stat spoofing profiles, full upsert and partial refresh
//! - [`registry::unmount`]: Unmount directives and best-effort unmount passes
//! - [`registry::identity`]: Release/version override for system identification
//!
//! ## Runtime & Control ([`runtime`], [`control`])
//! - [`runtime::shroud`]: Startup harness owning every registry
//! - [`control::command`]: Command codes and fixed-size payload codec
//! - [`control::dispatcher`]: Status-returning administrative entry point
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Toggleable audit log sink
//! - [`observability::metrics`]: Per-registry counters, Prometheus export
//!
//! ## Configuration ([`config`])
//! - [`config::config`]: Configuration and startup manifest
//! - [`config::types`]: Records, limits and the error taxonomy
//!
//! ## Testing Infrastructure ([`testing`])
//! - [`testing::race_proof`]: Concurrent upsert proof
//!
//! # Concurrency
//!
//! The path, mount, kstat and unmount registries share one mutation lock.
//! Object resolution runs before it is taken, so it is only ever held for
//! container updates and flag writes. The identity store has its own lock,
//! and the path registry's reverse index is read without any registry lock.

// Kernel Primitives
pub mod kernel;

// Registries
pub mod registry;

// Startup harness
pub mod runtime;

// Administrative surface
pub mod control;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Testing Infrastructure
pub mod testing;

// CLI entrypoint wiring for shroudctl
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use control::{AdminCommand, Dispatcher};
pub use runtime::Shroud;
