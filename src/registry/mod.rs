//! # Registry Infrastructure
//!
//! Named handlers the step executor dispatches `custom` steps to.

pub mod step_handler_registry;

// Re-export main types for easy access
pub use step_handler_registry::{RegistryStats, StepHandlerRegistry};
