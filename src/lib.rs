// Clippy allows for reasonable defaults
#![allow(clippy::new_without_default)] // Default not always appropriate for stateful types
#![allow(clippy::derivable_impls)] // Explicit Default impls can be clearer
#![allow(clippy::redundant_closure)] // |x| f(x) can be clearer than f

// Module declarations
pub mod git;
pub mod models;
pub mod shutdown;
pub mod update;
mod utils;

// Re-export models for use by the binary
pub use models::*;
pub use update::{RunReport, RunnerConfig, UpdateError, UpdateRunner};
