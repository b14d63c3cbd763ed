// Step and run state machines for runbook orchestration
//
// Step transitions are validated by a pure function; the run tracker is the single
// writer of a run record and persists every change through a RunStore.

pub mod errors;
pub mod events;
pub mod persistence;
pub mod run_tracker;
pub mod states;
pub mod step_state_machine;

// Re-export main types for convenient access
pub use errors::{PersistenceError, StateMachineError};
pub use events::StepEvent;
pub use persistence::{FileRunStore, InMemoryRunStore, RunStore};
pub use run_tracker::RunStateTracker;
pub use states::{RunStatus, SkipReason, StepStatus};
pub use step_state_machine::determine_target_state;
