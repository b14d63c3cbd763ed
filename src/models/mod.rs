//! # Models
//!
//! The static runbook graph and the mutable record of one run of it.

pub mod run_instance;
pub mod runbook;

pub use run_instance::{
    AttemptOutcome, AttemptRecord, RunInstance, RunRequest, RunSummary, StepError, StepState,
    StepSummary, TransitionRecord,
};
pub use runbook::{
    shared_dependencies, DatasetRef, NotifyPolicy, RetryPolicy, RunbookDefinition,
    RunbookTemplate, StepKind, StepSpec, ValidationError,
};
