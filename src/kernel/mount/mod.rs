//! Mount detach primitive
//!
//! Unmount passes call through [`Detacher`] so tests and dry runs never touch
//! the real mount table.

pub mod detach;

pub use detach::*;
