//! Thin wrappers around kernel-facing primitives.
//!
//! All `unsafe` code and syscalls are concentrated here. Registries reach the
//! host only through the traits these modules define (`ObjectStore`,
//! `Detacher`, `IdentitySource`), never through the calls themselves.

pub mod device;
pub mod mount;
pub mod object;
pub mod uts;
