//! Process-level wiring of the registries

pub mod shroud;

pub use shroud::{ManifestReport, Shroud};
