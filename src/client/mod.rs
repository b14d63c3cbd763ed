//! # Collaborator Interfaces
//!
//! Traits implemented by the systems the orchestrator drives, plus the context
//! passed to them for each step attempt.

pub mod context;
pub mod traits;

// Re-export main types for easy access
pub use context::StepContext;
pub use traits::{
    AutomationOutcome, CustomStepHandler, DataAvailabilityChecker, EventSink, UiAutomationEngine,
};
